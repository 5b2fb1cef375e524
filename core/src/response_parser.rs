//! Readers for delivery API responses.
//!
//! Every function tolerates malformed input and answers `None` (or an empty
//! string where the wire contract calls for one) instead of failing.

use std::collections::HashMap;

use serde_json::Value;
use tracing::debug;

use crate::json::JsonExt;
use crate::json::JsonObject;
use crate::json::non_blank;
use crate::json::to_string_map;
use crate::state::MboxCache;

pub const A4T_SESSION_ID_KEY: &str = "a.target.sessionId";

const PREFETCH: &str = "prefetch";
const EXECUTE: &str = "execute";
const MBOXES: &str = "mboxes";
const NAME: &str = "name";
const OPTIONS: &str = "options";
const CONTENT: &str = "content";
const RESPONSE_TOKENS: &str = "responseTokens";
const METRICS: &str = "metrics";
const METRIC_TYPE: &str = "type";
const EVENT_TOKEN: &str = "eventToken";
const CLICK: &str = "click";
const ANALYTICS: &str = "analytics";
const PAYLOAD: &str = "payload";
const ID: &str = "id";
const TNT_ID: &str = "tntId";
const EDGE_HOST: &str = "edgeHost";
const MESSAGE: &str = "message";

/// Keys retained on a prefetched mbox before it is cached.
const CACHED_MBOX_KEYS: [&str; 5] = ["name", "state", "options", "analytics", "metrics"];

/// Parses a response body. `None` for an empty body or anything that is not
/// a JSON object.
pub fn parse_to_json(body: &str) -> Option<Value> {
    if body.trim().is_empty() {
        return None;
    }
    match serde_json::from_str::<Value>(body) {
        Ok(value) if value.is_object() => Some(value),
        Ok(_) => {
            debug!("Delivery response is not a JSON object");
            None
        }
        Err(err) => {
            debug!("Unable to parse delivery response: {err}");
            None
        }
    }
}

fn mboxes_under<'a>(response: &'a Value, container: &str) -> Option<&'a Vec<Value>> {
    let mboxes = response
        .opt_object(container)
        .and_then(|node| node.opt_array(MBOXES));
    if mboxes.is_none() {
        debug!("No {container}.{MBOXES} array in response");
    }
    mboxes
}

fn named_mboxes<'a>(
    mboxes: &'a [Value],
) -> impl Iterator<Item = (String, &'a JsonObject)> + 'a {
    mboxes.iter().filter_map(|entry| {
        let mbox = entry.as_object()?;
        let name = mbox.opt_non_blank(NAME)?;
        Some((name.to_string(), mbox))
    })
}

/// `execute.mboxes[]` keyed by name. Later duplicates replace earlier ones.
pub fn extract_batched_mboxes(response: &Value) -> Option<MboxCache> {
    let mboxes = mboxes_under(response, EXECUTE)?;
    Some(
        named_mboxes(mboxes)
            .map(|(name, mbox)| (name, Value::Object(mbox.clone())))
            .collect(),
    )
}

/// `prefetch.mboxes[]` keyed by name, trimmed to the cacheable keys.
pub fn extract_prefetched_mboxes(response: &Value) -> Option<MboxCache> {
    let mboxes = mboxes_under(response, PREFETCH)?;
    Some(
        named_mboxes(mboxes)
            .map(|(name, mbox)| {
                let trimmed: JsonObject = mbox
                    .iter()
                    .filter(|(key, _)| CACHED_MBOX_KEYS.contains(&key.as_str()))
                    .map(|(key, value)| (key.clone(), value.clone()))
                    .collect();
                (name, Value::Object(trimmed))
            })
            .collect(),
    )
}

fn first_option(mbox: &Value) -> Option<&JsonObject> {
    mbox.opt_array(OPTIONS)?.first()?.as_object()
}

/// Content of `options[0]`: strings verbatim, objects and arrays as compact
/// JSON, anything else as the empty string.
pub fn extract_mbox_content(mbox: &Value) -> String {
    match first_option(mbox).and_then(|option| option.get(CONTENT)) {
        Some(Value::String(content)) => content.clone(),
        Some(content @ (Value::Object(_) | Value::Array(_))) => content.to_string(),
        _ => String::new(),
    }
}

/// Raw `analytics.payload` string entries.
pub fn analytics_for_target_payload(json: &Value) -> Option<HashMap<String, String>> {
    json.opt_object(ANALYTICS)
        .and_then(|analytics| analytics.opt_object(PAYLOAD))
        .and_then(to_string_map)
}

/// `analytics.payload` prepared for pass-through reporting with the session id.
pub fn analytics_for_target_payload_with_session(
    json: &Value,
    session_id: Option<&str>,
) -> Option<HashMap<String, String>> {
    preprocess_analytics_for_target_payload(analytics_for_target_payload(json), session_id)
}

/// Prefixes every key with `&&` and adds the unprefixed session id key.
pub fn preprocess_analytics_for_target_payload(
    payload: Option<HashMap<String, String>>,
    session_id: Option<&str>,
) -> Option<HashMap<String, String>> {
    let payload = payload?;
    let mut prefixed: HashMap<String, String> = payload
        .into_iter()
        .map(|(key, value)| (format!("&&{key}"), value))
        .collect();
    if let Some(session_id) = non_blank(session_id) {
        prefixed.insert(A4T_SESSION_ID_KEY.to_string(), session_id.to_string());
    }
    Some(prefixed)
}

pub fn response_tokens(mbox: &Value) -> Option<HashMap<String, String>> {
    first_option(mbox)?
        .opt_object(RESPONSE_TOKENS)
        .and_then(to_string_map)
}

/// First `metrics[]` entry of type `click` with a non-blank event token.
pub fn click_metric(mbox: &Value) -> Option<&JsonObject> {
    mbox.opt_array(METRICS)?
        .iter()
        .filter_map(Value::as_object)
        .find(|metric| {
            metric.opt_str(METRIC_TYPE) == Some(CLICK) && metric.opt_non_blank(EVENT_TOKEN).is_some()
        })
}

pub fn extract_click_metric_analytics_payload(mbox: &Value) -> Option<HashMap<String, String>> {
    let metric = click_metric(mbox)?;
    metric
        .opt_object(ANALYTICS)
        .and_then(|analytics| analytics.opt_object(PAYLOAD))
        .and_then(to_string_map)
}

/// `id.tntId`. `None` when `id` is missing or not an object, `""` when the
/// object lacks a string `tntId`.
pub fn tnt_id(response: &Value) -> Option<String> {
    let id = response.opt_object(ID)?;
    Some(id.opt_str(TNT_ID).unwrap_or_default().to_string())
}

pub fn edge_host(response: &Value) -> String {
    response.opt_str(EDGE_HOST).unwrap_or_default().to_string()
}

pub fn error_message(response: Option<&Value>) -> Option<String> {
    response?.opt_str(MESSAGE).map(str::to_string)
}
