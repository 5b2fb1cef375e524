//! Assembly of outbound delivery-API request bodies.
//!
//! A [`PayloadBuilder`] is created per request from the current
//! [`StateStore`] and the latest identity/lifecycle snapshots, then asked for
//! exactly one payload or notification.

use std::collections::HashMap;

use serde_json::Map;
use serde_json::Value;
use serde_json::json;
use tracing::debug;
use uuid::Uuid;

use crate::json::JsonExt;
use crate::json::JsonObject;
use crate::json::non_blank;
use crate::params::MboxPrefetch;
use crate::params::MboxRequest;
use crate::params::ParameterMap;
use crate::params::TargetParameters;
use crate::params::merge;
use crate::services::DeviceContext;
use crate::state::StateStore;

pub const AT_PROPERTY: &str = "at_property";

const ID: &str = "id";
const TNT_ID: &str = "tntId";
const THIRD_PARTY_ID: &str = "thirdPartyId";
const MARKETING_CLOUD_VISITOR_ID: &str = "marketingCloudVisitorId";
const CUSTOMER_IDS: &str = "customerIds";
const INTEGRATION_CODE: &str = "integrationCode";
const AUTHENTICATED_STATE: &str = "authenticatedState";
const CONTEXT: &str = "context";
const EXPERIENCE_CLOUD: &str = "experienceCloud";
const ENVIRONMENT_ID: &str = "environmentId";
const PREFETCH: &str = "prefetch";
const EXECUTE: &str = "execute";
const NOTIFICATIONS: &str = "notifications";
const MBOXES: &str = "mboxes";
const PROPERTY: &str = "property";
const TOKEN: &str = "token";
const INDEX: &str = "index";
const NAME: &str = "name";
const STATE: &str = "state";
const PARAMETERS: &str = "parameters";
const PROFILE_PARAMETERS: &str = "profileParameters";
const ORDER: &str = "order";
const PRODUCT: &str = "product";
const OPTIONS: &str = "options";
const EVENT_TOKEN: &str = "eventToken";
const TIMESTAMP: &str = "timestamp";
const TYPE: &str = "type";
const MBOX: &str = "mbox";
const TOKENS: &str = "tokens";
const DISPLAY: &str = "display";
const CLICK: &str = "click";

/// Identity shared-state keys.
pub const IDENTITY_MID: &str = "mid";
pub const IDENTITY_BLOB: &str = "blob";
pub const IDENTITY_LOCATION_HINT: &str = "locationhint";
pub const IDENTITY_VISITOR_IDS: &str = "visitoridslist";
pub const IDENTITY_ADVERTISING_ID: &str = "advertisingidentifier";

const VISITOR_ID: &str = "ID";
const VISITOR_ID_TYPE: &str = "ID_TYPE";
const VISITOR_ID_STATE: &str = "STATE";

pub const LIFECYCLE_CONTEXT_DATA: &str = "lifecyclecontextdata";
const LIFECYCLE_ADID: &str = "a.adid";

const LIFECYCLE_KEYS: &[(&str, &str)] = &[
    ("appid", "a.AppID"),
    ("carriername", "a.CarrierName"),
    ("crashevent", "a.CrashEvent"),
    ("dailyenguserevent", "a.DailyEngUserEvent"),
    ("dayofweek", "a.DayOfWeek"),
    ("dayssincefirstuse", "a.DaysSinceFirstUse"),
    ("dayssincelastuse", "a.DaysSinceLastUse"),
    ("dayssincelastupgrade", "a.DaysSinceLastUpgrade"),
    ("devicename", "a.DeviceName"),
    ("resolution", "a.Resolution"),
    ("hourofday", "a.HourOfDay"),
    ("ignoredsessionlength", "a.ignoredSessionLength"),
    ("installdate", "a.InstallDate"),
    ("installevent", "a.InstallEvent"),
    ("launchevent", "a.LaunchEvent"),
    ("launches", "a.Launches"),
    ("launchessinceupgrade", "a.LaunchesSinceUpgrade"),
    ("locale", "a.locale"),
    ("monthlyenguserevent", "a.MonthlyEngUserEvent"),
    ("osversion", "a.OSVersion"),
    ("prevsessionlength", "a.PrevSessionLength"),
    ("runmode", "a.RunMode"),
    ("upgradeevent", "a.UpgradeEvent"),
];

/// Visitor identifiers published by the identity service.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct IdentitySnapshot {
    pub marketing_cloud_id: Option<String>,
    pub blob: Option<String>,
    pub location_hint: Option<String>,
    /// Raw `visitoridslist` entries; validated when the `id` node is built.
    pub customer_ids: Option<Vec<Value>>,
    pub advertising_identifier: Option<String>,
}

impl IdentitySnapshot {
    pub fn from_map(map: &JsonObject) -> Self {
        let text = |key: &str| map.opt_str(key).map(str::to_string);
        Self {
            marketing_cloud_id: text(IDENTITY_MID),
            blob: text(IDENTITY_BLOB),
            location_hint: text(IDENTITY_LOCATION_HINT),
            customer_ids: map.opt_array(IDENTITY_VISITOR_IDS).cloned(),
            advertising_identifier: text(IDENTITY_ADVERTISING_ID),
        }
    }
}

/// Flattens lifecycle shared state into the context-data keys the delivery
/// service understands. Unknown keys pass through untouched.
pub fn lifecycle_context_data(
    lifecycle: &JsonObject,
    identity: &IdentitySnapshot,
) -> HashMap<String, String> {
    let mut data: HashMap<String, String> = HashMap::new();
    let mut passthrough: HashMap<String, String> = HashMap::new();
    if let Some(context_data) = lifecycle.opt_object(LIFECYCLE_CONTEXT_DATA) {
        for (key, value) in context_data {
            let Some(value) = value.as_str() else {
                continue;
            };
            let mapped = LIFECYCLE_KEYS
                .iter()
                .find(|(from, _)| *from == key.as_str())
                .map(|(_, to)| *to);
            match mapped {
                Some(to) if !value.is_empty() => {
                    data.insert(to.to_string(), value.to_string());
                }
                _ => {
                    passthrough.insert(key.clone(), value.to_string());
                }
            }
        }
    }
    data.extend(passthrough);
    if let Some(adid) = non_blank(identity.advertising_identifier.as_deref()) {
        data.insert(LIFECYCLE_ADID.to_string(), adid.to_string());
    }
    data
}

fn authentication_state(state: Option<i64>) -> &'static str {
    match state {
        Some(1) => "authenticated",
        Some(2) => "logged_out",
        _ => "unknown",
    }
}

fn customer_id_node(entry: &Value) -> Option<Value> {
    let id = entry.opt_non_blank(VISITOR_ID)?;
    let integration_code = entry.opt_non_blank(VISITOR_ID_TYPE)?;
    Some(json!({
        ID: id,
        INTEGRATION_CODE: integration_code,
        AUTHENTICATED_STATE: authentication_state(entry.opt_i64(VISITOR_ID_STATE)),
    }))
}

/// Caller-assembled request nodes sent verbatim.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawRequest {
    pub id: Option<JsonObject>,
    pub context: Option<JsonObject>,
    pub experience_cloud: Option<JsonObject>,
    pub prefetch: Option<JsonObject>,
    pub execute: Option<JsonObject>,
    pub notifications: Vec<Value>,
    pub property_token: Option<String>,
    pub environment_id: i64,
}

impl RawRequest {
    pub fn from_json(value: &Value) -> Self {
        Self {
            id: value.opt_object(ID).cloned(),
            context: value.opt_object(CONTEXT).cloned(),
            experience_cloud: value.opt_object(EXPERIENCE_CLOUD).cloned(),
            prefetch: value.opt_object(PREFETCH).cloned(),
            execute: value.opt_object(EXECUTE).cloned(),
            notifications: value
                .opt_array(NOTIFICATIONS)
                .map(|items| items.iter().filter(|n| n.is_object()).cloned().collect())
                .unwrap_or_default(),
            property_token: value
                .opt_object(PROPERTY)
                .and_then(|property| property.opt_non_blank(TOKEN))
                .map(str::to_string),
            environment_id: value.opt_i64(ENVIRONMENT_ID).unwrap_or(0),
        }
    }

    /// Whether the reply is expected to carry mbox content.
    pub fn is_content_request(&self) -> bool {
        self.prefetch.is_some() || self.execute.is_some()
    }
}

pub struct PayloadBuilder<'a> {
    device: &'a DeviceContext,
    tnt_id: Option<String>,
    third_party_id: Option<String>,
    environment_id: i64,
    identity: IdentitySnapshot,
    lifecycle: HashMap<String, String>,
    preview_parameters: Option<JsonObject>,
}

impl<'a> PayloadBuilder<'a> {
    pub fn new(state: &StateStore, device: &'a DeviceContext) -> Self {
        Self {
            device,
            tnt_id: state.tnt_id(),
            third_party_id: state.third_party_id(),
            environment_id: state.config().environment_id,
            identity: IdentitySnapshot::default(),
            lifecycle: HashMap::new(),
            preview_parameters: None,
        }
    }

    pub fn with_identity(mut self, identity: IdentitySnapshot) -> Self {
        self.identity = identity;
        self
    }

    pub fn with_lifecycle(mut self, lifecycle: HashMap<String, String>) -> Self {
        self.lifecycle = lifecycle;
        self
    }

    /// Top-level keys merged into every payload while preview mode is active.
    pub fn with_preview_parameters(mut self, parameters: Option<JsonObject>) -> Self {
        self.preview_parameters = parameters;
        self
    }

    pub fn build_request(
        &self,
        prefetch: &[MboxPrefetch],
        execute: &[MboxRequest],
        global_parameters: Option<&TargetParameters>,
        notifications: &[Value],
        property_token: Option<&str>,
    ) -> Value {
        let mut payload = self.default_json(None, None, None, self.environment_id);
        let mut mbox_property_token = None;

        let prefetch_mboxes: Vec<Value> = prefetch
            .iter()
            .enumerate()
            .map(|(index, request)| {
                let parameters =
                    merge(global_parameters.into_iter().chain(request.parameters.as_ref()));
                note_property_token(&mut mbox_property_token, &parameters);
                mbox_node(index, &request.name, &parameters, None)
            })
            .collect();
        let execute_mboxes: Vec<Value> = execute
            .iter()
            .enumerate()
            .map(|(index, request)| {
                let parameters =
                    merge(global_parameters.into_iter().chain(request.parameters.as_ref()));
                note_property_token(&mut mbox_property_token, &parameters);
                mbox_node(index, &request.name, &parameters, Some(&self.lifecycle))
            })
            .collect();

        if !prefetch_mboxes.is_empty() {
            payload.insert(PREFETCH.to_string(), json!({ MBOXES: prefetch_mboxes }));
        }
        if !execute_mboxes.is_empty() {
            payload.insert(EXECUTE.to_string(), json!({ MBOXES: execute_mboxes }));
        }

        let token = non_blank(property_token).map(str::to_string).or(mbox_property_token);
        self.finish(payload, notifications, token.as_deref())
    }

    /// Request body for caller-supplied nodes. `property_token` and
    /// `environment_id` are the already-resolved values.
    pub fn build_raw_request(
        &self,
        raw: &RawRequest,
        property_token: Option<&str>,
        environment_id: i64,
    ) -> Value {
        let mut payload = self.default_json(
            raw.id.as_ref(),
            raw.context.as_ref(),
            raw.experience_cloud.as_ref(),
            environment_id,
        );
        if let Some(prefetch) = raw.prefetch.as_ref().filter(|node| !node.is_empty()) {
            payload.insert(PREFETCH.to_string(), Value::Object(prefetch.clone()));
        }
        if let Some(execute) = raw.execute.as_ref().filter(|node| !node.is_empty()) {
            payload.insert(EXECUTE.to_string(), Value::Object(execute.clone()));
        }
        self.finish(payload, &raw.notifications, property_token)
    }

    fn finish(
        &self,
        mut payload: JsonObject,
        notifications: &[Value],
        property_token: Option<&str>,
    ) -> Value {
        if !notifications.is_empty() {
            payload.insert(
                NOTIFICATIONS.to_string(),
                Value::Array(notifications.to_vec()),
            );
        }
        if let Some(token) = non_blank(property_token) {
            payload.insert(PROPERTY.to_string(), json!({ TOKEN: token }));
        }
        if let Some(preview) = &self.preview_parameters {
            for (key, value) in preview {
                payload.insert(key.clone(), value.clone());
            }
        }
        Value::Object(payload)
    }

    /// Base nodes attached to every request. Non-empty caller nodes replace
    /// the generated ones.
    pub fn default_json(
        &self,
        id: Option<&JsonObject>,
        context: Option<&JsonObject>,
        experience_cloud: Option<&JsonObject>,
        environment_id: i64,
    ) -> JsonObject {
        let mut payload = Map::new();

        let id_node = match id.filter(|node| !node.is_empty()) {
            Some(node) => node.clone(),
            None => self.id_node(),
        };
        if !id_node.is_empty() {
            payload.insert(ID.to_string(), Value::Object(id_node));
        }

        let context_node = match context.filter(|node| !node.is_empty()) {
            Some(node) => node.clone(),
            None => context_node(self.device),
        };
        payload.insert(CONTEXT.to_string(), Value::Object(context_node));

        let experience_cloud_node = match experience_cloud.filter(|node| !node.is_empty()) {
            Some(node) => node.clone(),
            None => self.experience_cloud_node(),
        };
        payload.insert(
            EXPERIENCE_CLOUD.to_string(),
            Value::Object(experience_cloud_node),
        );

        if environment_id != 0 {
            payload.insert(ENVIRONMENT_ID.to_string(), json!(environment_id));
        }
        payload
    }

    fn id_node(&self) -> JsonObject {
        let mut node = Map::new();
        if let Some(tnt_id) = non_blank(self.tnt_id.as_deref()) {
            node.insert(TNT_ID.to_string(), json!(tnt_id));
        }
        if let Some(third_party_id) = non_blank(self.third_party_id.as_deref()) {
            node.insert(THIRD_PARTY_ID.to_string(), json!(third_party_id));
        }
        if let Some(mid) = non_blank(self.identity.marketing_cloud_id.as_deref()) {
            node.insert(MARKETING_CLOUD_VISITOR_ID.to_string(), json!(mid));
        }
        if let Some(entries) = self.identity.customer_ids.as_ref().filter(|ids| !ids.is_empty()) {
            let customer_ids: Vec<Value> = entries
                .iter()
                .filter_map(|entry| {
                    let node = customer_id_node(entry);
                    if node.is_none() {
                        debug!("Dropping invalid customer id entry: {entry}");
                    }
                    node
                })
                .collect();
            node.insert(CUSTOMER_IDS.to_string(), Value::Array(customer_ids));
        }
        node
    }

    fn experience_cloud_node(&self) -> JsonObject {
        let mut node = Map::new();
        node.insert("analytics".to_string(), json!({ "logging": "client_side" }));

        let mut audience_manager = Map::new();
        if let Some(blob) = non_blank(self.identity.blob.as_deref()) {
            audience_manager.insert("blob".to_string(), json!(blob));
        }
        if let Some(hint) = non_blank(self.identity.location_hint.as_deref()) {
            audience_manager.insert("locationHint".to_string(), json!(hint));
        }
        if !audience_manager.is_empty() {
            node.insert(
                "audienceManager".to_string(),
                Value::Object(audience_manager),
            );
        }
        node
    }

    /// Display notification for a prefetched mbox. `None` without mbox JSON.
    pub fn display_notification(
        &self,
        mbox_name: &str,
        mbox: Option<&Value>,
        parameters: Option<&TargetParameters>,
        timestamp: i64,
    ) -> Option<Value> {
        let mbox = mbox?;
        let mut mbox_node = Map::new();
        mbox_node.insert(NAME.to_string(), json!(mbox_name));
        if let Some(state) = mbox.opt_non_blank(STATE) {
            mbox_node.insert(STATE.to_string(), json!(state));
        }

        let mut node = notification_skeleton(DISPLAY, timestamp);
        node.insert(MBOX.to_string(), Value::Object(mbox_node));
        let token = mbox
            .opt_array(OPTIONS)
            .and_then(|options| options.first())
            .and_then(|option| option.opt_non_blank(EVENT_TOKEN));
        if let Some(token) = token {
            node.insert(TOKENS.to_string(), json!([token]));
        }
        self.append_notification_parameters(&mut node, parameters);
        Some(Value::Object(node))
    }

    /// Click notification. Always yields at least `{id, timestamp, type}`.
    pub fn click_notification(
        &self,
        mbox: Option<&Value>,
        parameters: Option<&TargetParameters>,
        timestamp: i64,
    ) -> Value {
        let mut node = notification_skeleton(CLICK, timestamp);
        if let Some(mbox) = mbox {
            if let Some(name) = mbox.opt_non_blank(NAME) {
                node.insert(MBOX.to_string(), json!({ NAME: name }));
            }
            let token = crate::response_parser::click_metric(mbox)
                .and_then(|metric| metric.opt_non_blank(EVENT_TOKEN));
            if let Some(token) = token {
                node.insert(TOKENS.to_string(), json!([token]));
            }
        }
        self.append_notification_parameters(&mut node, parameters);
        Value::Object(node)
    }

    fn append_notification_parameters(
        &self,
        node: &mut JsonObject,
        parameters: Option<&TargetParameters>,
    ) {
        let Some(parameters) = parameters else {
            if !self.lifecycle.is_empty() {
                node.insert(PARAMETERS.to_string(), json!(self.lifecycle));
            }
            return;
        };
        let mbox = mbox_node(0, "", parameters, Some(&self.lifecycle));
        for key in [PARAMETERS, PROFILE_PARAMETERS, ORDER, PRODUCT] {
            if let Some(value) = mbox.opt_value(key) {
                node.insert(key.to_string(), value.clone());
            }
        }
    }
}

fn notification_skeleton(kind: &str, timestamp: i64) -> JsonObject {
    let mut node = Map::new();
    node.insert(ID.to_string(), json!(Uuid::new_v4().to_string()));
    node.insert(TIMESTAMP.to_string(), json!(timestamp));
    node.insert(TYPE.to_string(), json!(kind));
    node
}

fn note_property_token(found: &mut Option<String>, parameters: &TargetParameters) {
    if found.is_some() {
        return;
    }
    let token = parameters
        .mbox_parameters
        .as_ref()
        .and_then(|params| non_blank(params.get(AT_PROPERTY).map(String::as_str)));
    *found = token.map(str::to_string);
}

/// One `{index, name, parameters?, profileParameters?, order?, product?}`
/// entry. `at_property` never leaves the client as an mbox parameter.
fn mbox_node(
    index: usize,
    name: &str,
    parameters: &TargetParameters,
    lifecycle: Option<&HashMap<String, String>>,
) -> Value {
    let mut node = Map::new();
    node.insert(INDEX.to_string(), json!(index));
    node.insert(NAME.to_string(), json!(name));

    let mut mbox_parameters: ParameterMap = parameters.mbox_parameters.clone().unwrap_or_default();
    mbox_parameters.remove(AT_PROPERTY);
    if let Some(lifecycle) = lifecycle {
        mbox_parameters.extend(lifecycle.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
    if !mbox_parameters.is_empty() {
        node.insert(PARAMETERS.to_string(), json!(mbox_parameters));
    }
    if let Some(profile) = parameters.profile_parameters.as_ref().filter(|p| !p.is_empty()) {
        node.insert(PROFILE_PARAMETERS.to_string(), json!(profile));
    }
    if let Some(order) = parameters.order.as_ref().and_then(|order| order.to_json()) {
        node.insert(ORDER.to_string(), order);
    }
    if let Some(product) = parameters.product.as_ref().and_then(|product| product.to_json()) {
        node.insert(PRODUCT.to_string(), product);
    }
    Value::Object(node)
}

fn context_node(device: &DeviceContext) -> JsonObject {
    let mut platform = Map::new();
    platform.insert("platformType".to_string(), json!(device.platform_type));
    if let Some(name) = &device.device_name {
        let device_name = match &device.device_manufacturer {
            Some(manufacturer) => format!("{manufacturer} {name}"),
            None => name.clone(),
        };
        platform.insert("deviceName".to_string(), json!(device_name));
    }
    if let Some(device_type) = device.device_type {
        platform.insert("deviceType".to_string(), json!(device_type.as_str()));
    }

    let mut application = Map::new();
    if let Some(id) = &device.application_id {
        application.insert("id".to_string(), json!(id));
    }
    if let Some(name) = &device.application_name {
        application.insert("name".to_string(), json!(name));
    }
    if let Some(version) = &device.application_version {
        application.insert("version".to_string(), json!(version));
    }

    let mut screen = Map::new();
    if let Some(width) = device.screen_width {
        screen.insert("width".to_string(), json!(width));
    }
    if let Some(height) = device.screen_height {
        screen.insert("height".to_string(), json!(height));
    }
    screen.insert("colorDepth".to_string(), json!(32));
    if let Some(orientation) = device.orientation {
        screen.insert("orientation".to_string(), json!(orientation.as_str()));
    }

    let mut context = Map::new();
    context.insert("channel".to_string(), json!("mobile"));
    context.insert("mobilePlatform".to_string(), Value::Object(platform));
    context.insert("application".to_string(), Value::Object(application));
    context.insert("screen".to_string(), Value::Object(screen));
    if let Some(user_agent) = non_blank(device.user_agent.as_deref()) {
        context.insert("userAgent".to_string(), json!(user_agent));
    }
    context.insert(
        "timeOffsetInMinutes".to_string(),
        json!(device.time_offset_minutes),
    );
    context
}
