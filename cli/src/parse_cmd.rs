use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use anyhow::Context;
use anyhow::Result;
use anyhow::bail;
use clap::Parser;
use delivery_core::MboxCache;
use delivery_core::response_parser;
use serde_json::Value;
use serde_json::json;

use crate::print_json;

#[derive(Debug, Parser)]
pub struct ParseArgs {
    /// Delivery response body (JSON).
    #[arg(long = "input", value_name = "FILE")]
    input: PathBuf,

    /// Only describe this mbox.
    #[arg(long = "mbox", value_name = "NAME")]
    mbox: Option<String>,

    /// Render pretty JSON instead of a single line.
    #[arg(long = "pretty", default_value_t = false)]
    pretty: bool,
}

pub(crate) fn run(args: ParseArgs) -> Result<()> {
    let body = fs::read_to_string(&args.input)
        .with_context(|| format!("Failed to read response file: {}", args.input.display()))?;
    let summary = summarize(&body, args.mbox.as_deref())?;
    print_json(&summary, args.pretty)
}

/// Identity, edge host and per-mbox content of a delivery response.
/// Executed mboxes shadow prefetched ones of the same name.
fn summarize(body: &str, only: Option<&str>) -> Result<Value> {
    let Some(response) = response_parser::parse_to_json(body) else {
        bail!("response is not a JSON object");
    };
    let prefetched = response_parser::extract_prefetched_mboxes(&response).unwrap_or_default();
    let executed = response_parser::extract_batched_mboxes(&response).unwrap_or_default();

    let mut mboxes: BTreeMap<&str, Value> = BTreeMap::new();
    for (name, mbox) in prefetched.iter().chain(executed.iter()) {
        if only.is_some_and(|only| only != name) {
            continue;
        }
        mboxes.insert(name.as_str(), describe(mbox));
    }
    if let Some(name) = only.filter(|_| mboxes.is_empty()) {
        bail!("mbox {name} is not in the response");
    }

    let edge_host = response_parser::edge_host(&response);
    Ok(json!({
        "tntId": response_parser::tnt_id(&response),
        "edgeHost": (!edge_host.is_empty()).then_some(edge_host),
        "prefetched": sorted_names(&prefetched),
        "executed": sorted_names(&executed),
        "mboxes": mboxes,
    }))
}

fn describe(mbox: &Value) -> Value {
    json!({
        "content": response_parser::extract_mbox_content(mbox),
        "a4tPayload": response_parser::analytics_for_target_payload(mbox),
        "responseTokens": response_parser::response_tokens(mbox),
        "clickMetricA4tPayload": response_parser::extract_click_metric_analytics_payload(mbox),
    })
}

fn sorted_names(mboxes: &MboxCache) -> Vec<&str> {
    let mut names: Vec<&str> = mboxes.keys().map(String::as_str).collect();
    names.sort_unstable();
    names
}
