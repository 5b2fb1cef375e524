//! Request orchestration on top of the state store, payload builder and
//! response parser.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::debug;
use tracing::warn;

use crate::config::ConfigSnapshot;
use crate::config::PrivacyStatus;
use crate::error::DeliveryError;
use crate::error::Result;
use crate::json::JsonObject;
use crate::json::non_blank;
use crate::params::MboxPrefetch;
use crate::params::MboxRequest;
use crate::params::TargetParameters;
use crate::params::merge;
use crate::preview::PreviewController;
use crate::request_builder::IdentitySnapshot;
use crate::request_builder::PayloadBuilder;
use crate::request_builder::RawRequest;
use crate::request_builder::lifecycle_context_data;
use crate::response_parser;
use crate::services::DeviceContext;
use crate::services::NetworkRequest;
use crate::services::Networking;
use crate::services::UiService;
use crate::state::StateStore;

const DELIVERY_PATH: &str = "/rest/v1/delivery/";
const DEFAULT_HOST_SUFFIX: &str = ".tt.omtrdc.net";
const CONTENT_TYPE_JSON: &str = "application/json";
/// Server error messages mentioning this drop the pending notifications.
const NOTIFICATION_ERROR_TAG: &str = "Notification";

/// What a single mbox request resolved to.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MboxContent {
    pub content: String,
    pub a4t_payload: Option<HashMap<String, String>>,
    pub response_tokens: Option<HashMap<String, String>>,
    pub click_metric_a4t_payload: Option<HashMap<String, String>>,
}

impl MboxContent {
    pub fn default_content(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Self::default()
        }
    }

    fn from_mbox(mbox: &Value, default_content: &str) -> Self {
        let content = response_parser::extract_mbox_content(mbox);
        Self {
            content: if content.is_empty() {
                default_content.to_string()
            } else {
                content
            },
            a4t_payload: response_parser::analytics_for_target_payload(mbox),
            response_tokens: response_parser::response_tokens(mbox),
            click_metric_a4t_payload: response_parser::extract_click_metric_analytics_payload(
                mbox,
            ),
        }
    }
}

/// Identity and lifecycle shared state captured for one request.
#[derive(Debug, Clone, Copy, Default)]
pub struct SharedStates<'a> {
    pub identity: Option<&'a IdentitySnapshot>,
    pub lifecycle: Option<&'a JsonObject>,
}

pub struct DeliveryClient {
    state: StateStore,
    networking: Arc<dyn Networking>,
    device: DeviceContext,
    preview: Option<PreviewController>,
}

impl DeliveryClient {
    pub fn new(state: StateStore, networking: Arc<dyn Networking>, device: DeviceContext) -> Self {
        Self {
            state,
            networking,
            device,
            preview: None,
        }
    }

    /// Enables preview mode, which needs a UI to draw on.
    pub fn with_ui_service(mut self, ui: Arc<dyn UiService>) -> Self {
        self.preview = Some(PreviewController::new(self.networking.clone(), ui));
        self
    }

    pub fn state(&self) -> &StateStore {
        &self.state
    }

    pub fn preview(&self) -> Option<&PreviewController> {
        self.preview.as_ref()
    }

    pub fn update_config(&mut self, config: ConfigSnapshot) {
        self.state.update_config(config);
    }

    pub fn update_config_map(&mut self, map: &JsonObject) {
        self.update_config(ConfigSnapshot::from_map(map));
    }

    // ---- content ----

    /// Body of the next content request for these mboxes, queued
    /// notifications included. Nothing is sent.
    pub fn request_payload(
        &self,
        prefetch: &[MboxPrefetch],
        execute: &[MboxRequest],
        parameters: Option<&TargetParameters>,
        shared: SharedStates<'_>,
    ) -> Value {
        self.payload_builder(shared).build_request(
            prefetch,
            execute,
            parameters,
            self.state.notifications(),
            self.configured_property_token().as_deref(),
        )
    }

    /// Prefetches mbox content into the local cache.
    pub async fn prefetch_content(
        &mut self,
        prefetch: &[MboxPrefetch],
        parameters: Option<&TargetParameters>,
        shared: SharedStates<'_>,
    ) -> Result<()> {
        if self.in_preview_mode() {
            warn!("Prefetch is not available in preview mode");
            return Err(DeliveryError::PreviewActive);
        }
        if prefetch.is_empty() {
            debug!("Empty prefetch list, nothing to send");
            return Err(DeliveryError::EmptyRequest);
        }
        self.check_request_gate()?;

        let payload = self.request_payload(prefetch, &[], parameters, shared);
        let response = self.send_content_request(&payload).await?;

        let mboxes = response_parser::extract_prefetched_mboxes(&response)
            .filter(|mboxes| !mboxes.is_empty())
            .ok_or(DeliveryError::NoPrefetchedMboxes)?;
        self.state.merge_prefetched(mboxes);
        self.state.remove_duplicate_loaded();
        debug!(
            "Prefetch cache now holds {} mboxes",
            self.state.prefetched_mboxes().len()
        );
        Ok(())
    }

    /// Resolves every request to content, from the prefetch cache when
    /// possible and from one execute round trip otherwise. Failures resolve
    /// to the request's default content.
    pub async fn load_requests(
        &mut self,
        requests: &[MboxRequest],
        parameters: Option<&TargetParameters>,
        shared: SharedStates<'_>,
    ) -> Vec<MboxContent> {
        let mut results: Vec<Option<MboxContent>> = vec![None; requests.len()];
        if let Err(err) = self.check_request_gate() {
            warn!("Serving default content: {err}");
            return fallback(requests, results);
        }

        let mut batch: Vec<(usize, &MboxRequest)> = Vec::new();
        let in_preview = self.in_preview_mode();
        for (index, request) in requests.iter().enumerate() {
            let cached = (!in_preview)
                .then(|| self.state.prefetched_mboxes().get(&request.name))
                .flatten()
                .cloned();
            match cached {
                Some(mbox) => {
                    let request_parameters =
                        merge(parameters.into_iter().chain(request.parameters.as_ref()));
                    let notification = self.payload_builder(shared).display_notification(
                        &request.name,
                        Some(&mbox),
                        Some(&request_parameters),
                        self.state.now_millis(),
                    );
                    if let Some(notification) = notification {
                        self.state.add_notification(notification);
                    }
                    results[index] = Some(MboxContent::from_mbox(&mbox, &request.default_content));
                }
                None => batch.push((index, request)),
            }
        }

        if batch.is_empty() {
            if !self.state.notifications().is_empty() {
                if let Err(err) = self.flush_notifications(parameters, shared).await {
                    warn!("Display notifications were not sent: {err}");
                }
            }
            return fallback(requests, results);
        }

        let execute: Vec<MboxRequest> = batch.iter().map(|(_, request)| (*request).clone()).collect();
        let payload = self.request_payload(&[], &execute, parameters, shared);
        let response = match self.send_content_request(&payload).await {
            Ok(response) => response,
            Err(err) => {
                warn!("Serving default content for {} mboxes: {err}", batch.len());
                return fallback(requests, results);
            }
        };

        let mboxes = response_parser::extract_batched_mboxes(&response).unwrap_or_default();
        for (index, request) in &batch {
            if let Some(mbox) = mboxes.get(&request.name) {
                results[*index] = Some(MboxContent::from_mbox(mbox, &request.default_content));
            }
        }
        self.state.save_loaded(mboxes);
        fallback(requests, results)
    }

    /// Reports prefetched mboxes as displayed.
    pub async fn locations_displayed(
        &mut self,
        names: &[String],
        parameters: Option<&TargetParameters>,
        shared: SharedStates<'_>,
    ) -> Result<()> {
        if names.is_empty() {
            return Err(DeliveryError::EmptyRequest);
        }
        self.check_request_gate()?;

        let timestamp = self.state.now_millis();
        for name in names {
            if self.state.loaded_mboxes().contains_key(name) {
                debug!("Mbox {name} was loaded, not prefetched; skipping display notification");
                continue;
            }
            let Some(mbox) = self.state.prefetched_mboxes().get(name).cloned() else {
                debug!("Mbox {name} is not in the prefetch cache");
                continue;
            };
            let notification = self.payload_builder(shared).display_notification(
                name,
                Some(&mbox),
                parameters,
                timestamp,
            );
            if let Some(notification) = notification {
                self.state.add_notification(notification);
            }
        }

        if self.state.notifications().is_empty() {
            debug!("No display notifications to send");
            return Ok(());
        }
        self.flush_notifications(parameters, shared).await
    }

    /// Reports a click on a prefetched or loaded mbox.
    pub async fn location_clicked(
        &mut self,
        name: &str,
        parameters: Option<&TargetParameters>,
        shared: SharedStates<'_>,
    ) -> Result<()> {
        self.check_request_gate()?;

        let mbox = self
            .state
            .prefetched_mboxes()
            .get(name)
            .or_else(|| self.state.loaded_mboxes().get(name))
            .cloned();
        let Some(mbox) = mbox else {
            debug!("Mbox {name} is neither prefetched nor loaded; no click to report");
            return Ok(());
        };
        if response_parser::click_metric(&mbox).is_none() {
            debug!("Mbox {name} has no click metric; no click to report");
            return Ok(());
        }

        let notification = self.payload_builder(shared).click_notification(
            Some(&mbox),
            parameters,
            self.state.now_millis(),
        );
        self.state.add_notification(notification);
        self.flush_notifications(parameters, shared).await
    }

    /// Sends caller-assembled request nodes and returns the parsed response.
    pub async fn raw_request(
        &mut self,
        raw: &RawRequest,
        identity: Option<&IdentitySnapshot>,
    ) -> Result<Value> {
        self.check_request_gate()?;

        let config = self.state.config();
        let property_token = non_blank(Some(&config.property_token))
            .map(str::to_string)
            .or_else(|| raw.property_token.clone());
        let environment_id = if config.environment_id != 0 {
            config.environment_id
        } else {
            raw.environment_id
        };

        let shared = SharedStates {
            identity,
            lifecycle: None,
        };
        let payload = self.payload_builder(shared).build_raw_request(
            raw,
            property_token.as_deref(),
            environment_id,
        );
        self.send(&payload).await
    }

    pub async fn send_raw_notifications(
        &mut self,
        notifications: Vec<Value>,
        identity: Option<&IdentitySnapshot>,
    ) -> Result<()> {
        if notifications.is_empty() {
            return Err(DeliveryError::EmptyRequest);
        }
        let raw = RawRequest {
            notifications,
            ..RawRequest::default()
        };
        self.raw_request(&raw, identity).await.map(|_| ())
    }

    // ---- identity ----

    pub fn tnt_id(&self) -> Option<String> {
        self.state.tnt_id()
    }

    pub fn set_tnt_id(&self, tnt_id: Option<&str>) {
        if self.state.privacy_status() == PrivacyStatus::OptOut {
            debug!("Privacy opted out; tntId not updated");
            return;
        }
        self.state.update_tnt_id(tnt_id);
    }

    pub fn third_party_id(&self) -> Option<String> {
        self.state.third_party_id()
    }

    pub fn set_third_party_id(&self, third_party_id: Option<&str>) {
        if self.state.privacy_status() == PrivacyStatus::OptOut {
            debug!("Privacy opted out; thirdPartyId not updated");
            return;
        }
        self.state.set_third_party_id(third_party_id);
    }

    pub fn session_id(&self) -> String {
        self.state.session_id()
    }

    pub fn set_session_id(&self, session_id: Option<&str>) {
        self.state.set_session_id(session_id);
    }

    /// Forgets every visitor identifier and the current session.
    pub fn reset_experience(&self) {
        self.state.reset_identities();
    }

    pub fn clear_prefetch_cache(&mut self) {
        self.state.clear_prefetched();
    }

    pub fn generate_shared_state(&self) -> HashMap<String, String> {
        self.state.generate_shared_state()
    }

    /// A4T payload of a response mbox, ready to forward to analytics.
    pub fn analytics_for_target(&self, mbox: &Value) -> Option<HashMap<String, String>> {
        let session_id = self.state.session_id();
        response_parser::analytics_for_target_payload_with_session(mbox, Some(&session_id))
    }

    // ---- preview ----

    pub async fn enter_preview_mode(&mut self, deep_link: &str) -> Result<()> {
        let config = self.state.config();
        if !config.preview_enabled {
            warn!("Preview is disabled by configuration");
            return Err(DeliveryError::MissingConfig {
                reason: "preview is disabled".to_string(),
            });
        }
        if config.client_code.trim().is_empty() {
            return Err(DeliveryError::missing_client_code());
        }
        let Some(preview) = self.preview.as_mut() else {
            return Err(DeliveryError::MissingConfig {
                reason: "no UI service is available for preview".to_string(),
            });
        };
        preview
            .enter_preview_mode(&config.client_code, deep_link)
            .await
    }

    pub fn set_preview_restart_deep_link(&mut self, link: Option<&str>) {
        if let Some(preview) = self.preview.as_mut() {
            preview.set_restart_deep_link(link);
        }
    }

    pub fn preview_confirmed_with_url(&mut self, url: &str) {
        if let Some(preview) = self.preview.as_mut() {
            preview.confirmed_with_url(url);
        }
    }

    /// Preview mode gates prefetch and cached-content serving once the QA
    /// user has confirmed a selection.
    pub fn in_preview_mode(&self) -> bool {
        self.preview
            .as_ref()
            .and_then(PreviewController::preview_parameters)
            .is_some_and(|params| !params.is_empty())
    }

    // ---- plumbing ----

    fn check_request_gate(&self) -> Result<()> {
        if self.state.client_code().trim().is_empty() {
            debug!("Request rejected: client code is blank");
            return Err(DeliveryError::missing_client_code());
        }
        if self.state.privacy_status() != PrivacyStatus::OptIn {
            debug!("Request rejected: privacy status is not opted in");
            return Err(DeliveryError::OptedOut);
        }
        Ok(())
    }

    fn configured_property_token(&self) -> Option<String> {
        let token = self.state.config().property_token;
        non_blank(Some(&token)).map(str::to_string)
    }

    fn preview_overlay(&self) -> Option<JsonObject> {
        let preview = self.preview.as_ref()?;
        preview.preview_token()?;
        let parameters = preview.preview_parameters()?;
        match serde_json::from_str::<Value>(parameters) {
            Ok(Value::Object(map)) => Some(map),
            Ok(_) => None,
            Err(err) => {
                warn!("Preview parameters are not valid JSON: {err}");
                None
            }
        }
    }

    fn payload_builder(&self, shared: SharedStates<'_>) -> PayloadBuilder<'_> {
        let identity = shared.identity.cloned().unwrap_or_default();
        let empty = JsonObject::new();
        let lifecycle = lifecycle_context_data(shared.lifecycle.unwrap_or(&empty), &identity);
        PayloadBuilder::new(&self.state, &self.device)
            .with_identity(identity)
            .with_lifecycle(lifecycle)
            .with_preview_parameters(self.preview_overlay())
    }

    fn delivery_url(&self) -> String {
        let config = self.state.config();
        let host = match non_blank(Some(&config.target_server)) {
            Some(server) => server.to_string(),
            None => self
                .state
                .edge_host()
                .unwrap_or_else(|| format!("{}{DEFAULT_HOST_SUFFIX}", config.client_code)),
        };
        format!(
            "https://{host}{DELIVERY_PATH}?client={}&sessionId={}",
            urlencoding::encode(&config.client_code),
            urlencoding::encode(&self.state.session_id()),
        )
    }

    async fn flush_notifications(
        &mut self,
        parameters: Option<&TargetParameters>,
        shared: SharedStates<'_>,
    ) -> Result<()> {
        let payload = self.request_payload(&[], &[], parameters, shared);
        self.send_content_request(&payload).await.map(|_| ())
    }

    /// Round trip whose success also acknowledges the queued notifications.
    async fn send_content_request(&mut self, payload: &Value) -> Result<Value> {
        let result = self.send(payload).await;
        match &result {
            Ok(_) => self.state.clear_notifications(),
            Err(DeliveryError::Http { message, .. }) if message.contains(NOTIFICATION_ERROR_TAG) => {
                debug!("Server rejected the queued notifications; dropping them");
                self.state.clear_notifications();
            }
            Err(_) => {}
        }
        result
    }

    async fn send(&mut self, payload: &Value) -> Result<Value> {
        let body = serde_json::to_vec(payload).map_err(|err| {
            warn!("Unable to serialise delivery payload: {err}");
            DeliveryError::RequestGeneration
        })?;
        let url = self.delivery_url();
        let timeout = self.state.config().network_timeout();
        debug!("Sending delivery request to {url}: {payload}");

        let request = NetworkRequest::post(url, body, timeout)
            .with_header("Content-Type", CONTENT_TYPE_JSON);
        let Some(response) = self.networking.connect(request).await else {
            warn!("Delivery request could not connect");
            return Err(DeliveryError::NoConnection);
        };

        let json = response_parser::parse_to_json(&response.body);
        if !response.is_ok() {
            let message = response_parser::error_message(json.as_ref()).unwrap_or_default();
            warn!(
                "Delivery request failed with status {}: {message}",
                response.status
            );
            return Err(DeliveryError::http(response.status, message));
        }
        let json = json.ok_or(DeliveryError::MalformedResponse)?;

        self.state.touch_session(false);
        self.state.update_tnt_id(response_parser::tnt_id(&json).as_deref());
        let edge_host = response_parser::edge_host(&json);
        self.state.update_edge_host(Some(&edge_host));
        Ok(json)
    }
}

fn fallback(requests: &[MboxRequest], results: Vec<Option<MboxContent>>) -> Vec<MboxContent> {
    requests
        .iter()
        .zip(results)
        .map(|(request, result)| {
            result.unwrap_or_else(|| MboxContent::default_content(request.default_content.clone()))
        })
        .collect()
}
