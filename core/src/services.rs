//! Host-platform collaborators: transport, UI and device information.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NetworkRequest {
    pub url: String,
    pub method: HttpMethod,
    pub body: Option<Vec<u8>>,
    pub headers: HashMap<String, String>,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
}

impl NetworkRequest {
    pub fn get(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            url: url.into(),
            method: HttpMethod::Get,
            body: None,
            headers: HashMap::new(),
            connect_timeout: timeout,
            read_timeout: timeout,
        }
    }

    pub fn post(url: impl Into<String>, body: Vec<u8>, timeout: Duration) -> Self {
        Self {
            url: url.into(),
            method: HttpMethod::Post,
            body: Some(body),
            headers: HashMap::new(),
            connect_timeout: timeout,
            read_timeout: timeout,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == 200
    }
}

/// One request, one reply. `None` means no connection could be made.
#[async_trait]
pub trait Networking: Send + Sync {
    async fn connect(&self, request: NetworkRequest) -> Option<HttpResponse>;
}

/// Entry affordance shown while preview mode is active.
pub trait FloatingButton: Send {
    fn display(&mut self);
    fn remove(&mut self);
}

/// Full-screen surface rendering the preview selection page.
pub trait FullscreenMessage: Send {
    fn show(&mut self);
    fn dismiss(&mut self);
}

pub trait UiService: Send + Sync {
    fn create_floating_button(&self) -> Option<Box<dyn FloatingButton>>;
    fn create_fullscreen_message(&self, html: &str) -> Option<Box<dyn FullscreenMessage>>;
    /// Opens a URL with the platform handler; `false` when nothing handled it.
    fn show_url(&self, url: &str) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    Phone,
    Tablet,
}

impl DeviceType {
    pub fn as_str(self) -> &'static str {
        match self {
            DeviceType::Phone => "phone",
            DeviceType::Tablet => "tablet",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    Portrait,
    Landscape,
}

impl Orientation {
    pub fn as_str(self) -> &'static str {
        match self {
            Orientation::Portrait => "portrait",
            Orientation::Landscape => "landscape",
        }
    }
}

/// Platform facts that feed the request `context` node.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DeviceContext {
    pub platform_type: String,
    pub device_manufacturer: Option<String>,
    pub device_name: Option<String>,
    pub device_type: Option<DeviceType>,
    pub application_id: Option<String>,
    pub application_name: Option<String>,
    pub application_version: Option<String>,
    pub screen_width: Option<u32>,
    pub screen_height: Option<u32>,
    pub orientation: Option<Orientation>,
    pub user_agent: Option<String>,
    pub time_offset_minutes: i32,
}
