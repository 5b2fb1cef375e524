//! Configuration snapshot read from the host's configuration shared state.

use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::json::JsonExt;
use crate::json::JsonObject;

pub const DEFAULT_NETWORK_TIMEOUT_SECS: u64 = 2;
pub const DEFAULT_SESSION_TIMEOUT_SECS: u64 = 30 * 60;

const GLOBAL_PRIVACY: &str = "global.privacy";
const CLIENT_CODE: &str = "target.clientCode";
const PREVIEW_ENABLED: &str = "target.previewEnabled";
const NETWORK_TIMEOUT: &str = "target.timeout";
const ENVIRONMENT_ID: &str = "target.environmentId";
const PROPERTY_TOKEN: &str = "target.propertyToken";
const SESSION_TIMEOUT: &str = "target.sessionTimeout";
const TARGET_SERVER: &str = "target.server";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PrivacyStatus {
    #[serde(rename = "optedin")]
    OptIn,
    #[serde(rename = "optedout")]
    OptOut,
    #[default]
    #[serde(rename = "optunknown")]
    Unknown,
}

impl PrivacyStatus {
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "optedin" => PrivacyStatus::OptIn,
            "optedout" => PrivacyStatus::OptOut,
            _ => PrivacyStatus::Unknown,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PrivacyStatus::OptIn => "optedin",
            PrivacyStatus::OptOut => "optedout",
            PrivacyStatus::Unknown => "optunknown",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigSnapshot {
    pub client_code: String,
    pub network_timeout_secs: u64,
    pub privacy_status: PrivacyStatus,
    pub preview_enabled: bool,
    pub environment_id: i64,
    pub property_token: String,
    pub target_server: String,
    pub session_timeout_secs: u64,
}

impl Default for ConfigSnapshot {
    fn default() -> Self {
        Self {
            client_code: String::new(),
            network_timeout_secs: DEFAULT_NETWORK_TIMEOUT_SECS,
            privacy_status: PrivacyStatus::Unknown,
            preview_enabled: true,
            environment_id: 0,
            property_token: String::new(),
            target_server: String::new(),
            session_timeout_secs: DEFAULT_SESSION_TIMEOUT_SECS,
        }
    }
}

impl ConfigSnapshot {
    /// Builds a snapshot from dotted configuration keys. Missing or mistyped
    /// entries fall back to defaults.
    pub fn from_map(map: &JsonObject) -> Self {
        let defaults = Self::default();
        Self {
            client_code: map.opt_str(CLIENT_CODE).unwrap_or_default().to_string(),
            network_timeout_secs: positive_secs(map.opt_value(NETWORK_TIMEOUT))
                .unwrap_or(defaults.network_timeout_secs),
            privacy_status: map
                .opt_str(GLOBAL_PRIVACY)
                .map(PrivacyStatus::parse)
                .unwrap_or_default(),
            preview_enabled: map
                .opt_bool(PREVIEW_ENABLED)
                .unwrap_or(defaults.preview_enabled),
            environment_id: map.opt_i64(ENVIRONMENT_ID).unwrap_or_default(),
            property_token: map.opt_str(PROPERTY_TOKEN).unwrap_or_default().to_string(),
            target_server: map.opt_str(TARGET_SERVER).unwrap_or_default().to_string(),
            session_timeout_secs: positive_secs(map.opt_value(SESSION_TIMEOUT))
                .unwrap_or(defaults.session_timeout_secs),
        }
    }

    pub fn with_client_code(mut self, client_code: impl Into<String>) -> Self {
        self.client_code = client_code.into();
        self
    }

    pub fn with_privacy_status(mut self, status: PrivacyStatus) -> Self {
        self.privacy_status = status;
        self
    }

    pub fn with_target_server(mut self, server: impl Into<String>) -> Self {
        self.target_server = server.into();
        self
    }

    pub fn network_timeout(&self) -> Duration {
        Duration::from_secs(self.network_timeout_secs)
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_secs)
    }
}

fn positive_secs(value: Option<&Value>) -> Option<u64> {
    value.and_then(Value::as_u64).filter(|secs| *secs > 0)
}
