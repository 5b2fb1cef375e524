use std::sync::Arc;
use std::time::Duration;

use tracing::debug;
use tracing::warn;

use super::link::CANCEL;
use super::link::CONFIRM;
use super::link::DEEPLINK_SCHEME;
use super::link::DEFAULT_PREVIEW_ENDPOINT;
use super::link::PREVIEW_ENDPOINT;
use super::link::PREVIEW_PARAMETERS;
use super::link::PREVIEW_TOKEN;
use super::link::decode_once;
use super::link::parse_link;
use super::link::preview_url;
use super::link::query_parameters;
use crate::config::DEFAULT_NETWORK_TIMEOUT_SECS;
use crate::error::DeliveryError;
use crate::error::Result;
use crate::services::FloatingButton;
use crate::services::FullscreenMessage;
use crate::services::NetworkRequest;
use crate::services::Networking;
use crate::services::UiService;

/// Where the preview flow currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PreviewPhase {
    /// No selection page on screen. Preview mode may still be active.
    #[default]
    Idle,
    /// A selection-page request is in flight.
    AwaitingWebView,
    /// The selection page is shown full screen.
    Displayed,
}

/// Drives the in-app preview deep-link protocol.
pub struct PreviewController {
    networking: Arc<dyn Networking>,
    ui: Arc<dyn UiService>,
    client_code: Option<String>,
    token: Option<String>,
    endpoint: Option<String>,
    parameters: Option<String>,
    restart_url: Option<String>,
    web_view_html: Option<String>,
    floating_button: Option<Box<dyn FloatingButton>>,
    message: Option<Box<dyn FullscreenMessage>>,
    phase: PreviewPhase,
}

impl PreviewController {
    pub fn new(networking: Arc<dyn Networking>, ui: Arc<dyn UiService>) -> Self {
        Self {
            networking,
            ui,
            client_code: None,
            token: None,
            endpoint: None,
            parameters: None,
            restart_url: None,
            web_view_html: None,
            floating_button: None,
            message: None,
            phase: PreviewPhase::Idle,
        }
    }

    pub fn phase(&self) -> PreviewPhase {
        self.phase
    }

    pub fn preview_token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    /// Decoded `at_preview_params` JSON text from the last confirmation.
    pub fn preview_parameters(&self) -> Option<&str> {
        self.parameters.as_deref()
    }

    pub fn endpoint(&self) -> &str {
        self.endpoint.as_deref().unwrap_or(DEFAULT_PREVIEW_ENDPOINT)
    }

    pub fn web_view_html(&self) -> Option<&str> {
        self.web_view_html.as_deref()
    }

    /// Preview mode lasts from a successful deep link until cancel/reset.
    pub fn is_active(&self) -> bool {
        self.token.as_deref().is_some_and(|token| !token.is_empty())
    }

    pub fn set_restart_deep_link(&mut self, link: Option<&str>) {
        self.restart_url = link.map(str::to_string);
    }

    /// Starts preview mode from a deep link carrying `at_preview_token`.
    ///
    /// An invalid link leaves every field untouched and shows nothing.
    pub async fn enter_preview_mode(&mut self, client_code: &str, deep_link: &str) -> Result<()> {
        let Some(url) = parse_link(deep_link) else {
            debug!("Ignoring preview deep link that does not parse: {deep_link:?}");
            return Err(DeliveryError::PreviewLinkInvalid);
        };
        let query = query_parameters(&url);
        let Some(token) = query.get(PREVIEW_TOKEN).and_then(|raw| decode_once(raw)) else {
            debug!("Preview deep link carries no usable {PREVIEW_TOKEN}");
            return Err(DeliveryError::PreviewLinkInvalid);
        };
        if token.is_empty() {
            return Err(DeliveryError::PreviewLinkInvalid);
        }

        self.client_code = Some(client_code.to_string());
        self.endpoint = Some(
            query
                .get(PREVIEW_ENDPOINT)
                .and_then(|raw| decode_once(raw))
                .filter(|endpoint| !endpoint.is_empty())
                .unwrap_or_else(|| DEFAULT_PREVIEW_ENDPOINT.to_string()),
        );
        self.token = Some(token);

        self.show_floating_button();
        self.fetch_web_view().await;
        Ok(())
    }

    /// Requests the selection page and shows it full screen on success.
    ///
    /// The phase reads `AwaitingWebView` only while the request is in
    /// flight; dropping the future returns it to `Idle`.
    pub async fn fetch_web_view(&mut self) {
        let url = preview_url(
            self.endpoint(),
            self.client_code.as_deref(),
            self.token.as_deref(),
        );
        let request = NetworkRequest::get(url, Duration::from_secs(DEFAULT_NETWORK_TIMEOUT_SECS))
            .with_header("Accept", "text/html")
            .with_header("Content-Type", "application/x-www-form-urlencoded");

        let networking = Arc::clone(&self.networking);
        let response = {
            let _pending = PendingFetch::start(&mut self.phase);
            networking.connect(request).await
        };

        self.phase = match response {
            None => {
                warn!("Preview page request could not connect");
                PreviewPhase::Idle
            }
            Some(response) if !response.is_ok() => {
                warn!("Preview page request failed with status {}", response.status);
                PreviewPhase::Idle
            }
            Some(response) if response.body.is_empty() => {
                debug!("Preview page response was empty");
                PreviewPhase::Idle
            }
            Some(response) => {
                let shown = self.show_message(&response.body);
                self.web_view_html = Some(response.body);
                if shown {
                    PreviewPhase::Displayed
                } else {
                    PreviewPhase::Idle
                }
            }
        };
    }

    /// Handles a URL clicked inside the selection page.
    pub fn confirmed_with_url(&mut self, url: &str) {
        if let Some(mut message) = self.message.take() {
            message.dismiss();
        }
        self.phase = PreviewPhase::Idle;

        let Some(url) = parse_link(url) else {
            debug!("Ignoring unparsable preview confirmation url {url:?}");
            return;
        };
        if url.scheme() != DEEPLINK_SCHEME {
            debug!("Preview confirmation scheme {} is not {DEEPLINK_SCHEME}", url.scheme());
            self.parameters = None;
            return;
        }

        match url.host_str() {
            Some(CANCEL) => self.reset(),
            Some(CONFIRM) => {
                self.parameters = query_parameters(&url)
                    .get(PREVIEW_PARAMETERS)
                    .and_then(|raw| decode_once(raw));
                if let Some(restart_url) = self.restart_url.as_deref().filter(|u| !u.is_empty()) {
                    if !self.ui.show_url(restart_url) {
                        warn!("Could not open preview restart url {restart_url}");
                    }
                }
            }
            other => {
                debug!("Unknown preview confirmation path {other:?}");
                self.parameters = None;
            }
        }
    }

    /// Leaves preview mode and removes the floating button.
    pub fn reset(&mut self) {
        self.token = None;
        self.web_view_html = None;
        self.endpoint = None;
        self.restart_url = None;
        self.parameters = None;
        self.message = None;
        if let Some(mut button) = self.floating_button.take() {
            button.remove();
        }
        self.phase = PreviewPhase::Idle;
    }

    fn show_floating_button(&mut self) {
        if self.floating_button.is_some() {
            return;
        }
        match self.ui.create_floating_button() {
            Some(mut button) => {
                button.display();
                self.floating_button = Some(button);
            }
            None => warn!("Preview floating button could not be created"),
        }
    }

    fn show_message(&mut self, html: &str) -> bool {
        match self.ui.create_fullscreen_message(html) {
            Some(mut message) => {
                if let Some(mut previous) = self.message.take() {
                    previous.dismiss();
                }
                message.show();
                self.message = Some(message);
                true
            }
            None => {
                warn!("Preview message could not be created");
                false
            }
        }
    }
}

/// Holds the phase at `AwaitingWebView` for the lifetime of one request.
struct PendingFetch<'a> {
    phase: &'a mut PreviewPhase,
}

impl<'a> PendingFetch<'a> {
    fn start(phase: &'a mut PreviewPhase) -> Self {
        *phase = PreviewPhase::AwaitingWebView;
        Self { phase }
    }
}

impl Drop for PendingFetch<'_> {
    fn drop(&mut self) {
        *self.phase = PreviewPhase::Idle;
    }
}
