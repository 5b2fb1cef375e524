//! JSON request descriptions read by `build`, `prefetch` and `execute`.

use std::fs;
use std::path::Path;

use anyhow::Context;
use anyhow::Result;
use anyhow::anyhow;
use delivery_core::IdentitySnapshot;
use delivery_core::MboxPrefetch;
use delivery_core::MboxRequest;
use delivery_core::SharedStates;
use delivery_core::TargetParameters;
use delivery_core::json::JsonObject;
use delivery_core::services::DeviceContext;
use delivery_core::services::DeviceType;
use delivery_core::services::Orientation;
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RequestFile {
    prefetch: Vec<Value>,
    execute: Vec<Value>,
    target_parameters: Option<Value>,
    identity: Option<JsonObject>,
    lifecycle: Option<JsonObject>,
    device: DeviceFile,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct DeviceFile {
    platform_type: Option<String>,
    manufacturer: Option<String>,
    device_name: Option<String>,
    device_type: Option<DeviceType>,
    application_id: Option<String>,
    application_name: Option<String>,
    application_version: Option<String>,
    screen_width: Option<u32>,
    screen_height: Option<u32>,
    orientation: Option<Orientation>,
    user_agent: Option<String>,
    time_offset_minutes: i32,
}

impl From<DeviceFile> for DeviceContext {
    fn from(device: DeviceFile) -> Self {
        DeviceContext {
            platform_type: device
                .platform_type
                .unwrap_or_else(|| std::env::consts::OS.to_string()),
            device_manufacturer: device.manufacturer,
            device_name: device.device_name,
            device_type: device.device_type,
            application_id: device.application_id,
            application_name: device.application_name,
            application_version: device.application_version,
            screen_width: device.screen_width,
            screen_height: device.screen_height,
            orientation: device.orientation,
            user_agent: device.user_agent,
            time_offset_minutes: device.time_offset_minutes,
        }
    }
}

/// Everything one content request needs besides the persisted state.
#[derive(Debug, Default)]
pub struct RequestInput {
    pub prefetch: Vec<MboxPrefetch>,
    pub execute: Vec<MboxRequest>,
    pub parameters: Option<TargetParameters>,
    pub identity: Option<IdentitySnapshot>,
    pub lifecycle: Option<JsonObject>,
    pub device: DeviceContext,
}

impl RequestInput {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read request file: {}", path.display()))?;
        Self::parse(&text)
            .with_context(|| format!("Invalid request file: {}", path.display()))
    }

    pub fn parse(text: &str) -> Result<Self> {
        let file: RequestFile = serde_json::from_str(text)?;
        let prefetch = file
            .prefetch
            .iter()
            .enumerate()
            .map(|(index, entry)| {
                MboxPrefetch::from_json(entry)
                    .ok_or_else(|| anyhow!("prefetch[{index}] has no mbox name"))
            })
            .collect::<Result<Vec<_>>>()?;
        let execute = file
            .execute
            .iter()
            .enumerate()
            .map(|(index, entry)| {
                MboxRequest::from_json(entry)
                    .ok_or_else(|| anyhow!("execute[{index}] has no mbox name"))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            prefetch,
            execute,
            parameters: file
                .target_parameters
                .as_ref()
                .map(TargetParameters::from_json),
            identity: file.identity.as_ref().map(IdentitySnapshot::from_map),
            lifecycle: file.lifecycle,
            device: file.device.into(),
        })
    }

    pub fn shared(&self) -> SharedStates<'_> {
        SharedStates {
            identity: self.identity.as_ref(),
            lifecycle: self.lifecycle.as_ref(),
        }
    }
}
