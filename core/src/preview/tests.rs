use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Duration;

use async_trait::async_trait;
use pretty_assertions::assert_eq;

use super::*;
use crate::error::DeliveryError;
use crate::services::FloatingButton;
use crate::services::FullscreenMessage;
use crate::services::HttpResponse;
use crate::services::NetworkRequest;
use crate::services::Networking;
use crate::services::UiService;

#[derive(Default)]
struct RecordingNetwork {
    response: Option<HttpResponse>,
    requests: Mutex<Vec<NetworkRequest>>,
}

impl RecordingNetwork {
    fn replying(response: Option<HttpResponse>) -> Arc<Self> {
        Arc::new(Self {
            response,
            requests: Mutex::new(Vec::new()),
        })
    }

    fn urls(&self) -> Vec<String> {
        self.requests
            .lock()
            .expect("lock")
            .iter()
            .map(|request| request.url.clone())
            .collect()
    }
}

#[async_trait]
impl Networking for RecordingNetwork {
    async fn connect(&self, request: NetworkRequest) -> Option<HttpResponse> {
        self.requests.lock().expect("lock").push(request);
        self.response.clone()
    }
}

/// Never answers its first request; replies to later ones.
struct StallingNetwork {
    stalled: AtomicBool,
    response: HttpResponse,
}

#[async_trait]
impl Networking for StallingNetwork {
    async fn connect(&self, _request: NetworkRequest) -> Option<HttpResponse> {
        if !self.stalled.swap(true, Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        Some(self.response.clone())
    }
}

type Log = Arc<Mutex<Vec<String>>>;

struct Button(Log);

impl FloatingButton for Button {
    fn display(&mut self) {
        self.0.lock().expect("lock").push("button.display".to_string());
    }

    fn remove(&mut self) {
        self.0.lock().expect("lock").push("button.remove".to_string());
    }
}

struct Message(Log);

impl FullscreenMessage for Message {
    fn show(&mut self) {
        self.0.lock().expect("lock").push("message.show".to_string());
    }

    fn dismiss(&mut self) {
        self.0.lock().expect("lock").push("message.dismiss".to_string());
    }
}

struct RecordingUi {
    log: Log,
    can_create_message: bool,
}

impl RecordingUi {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            log: Log::default(),
            can_create_message: true,
        })
    }

    fn events(&self) -> Vec<String> {
        self.log.lock().expect("lock").clone()
    }
}

impl UiService for RecordingUi {
    fn create_floating_button(&self) -> Option<Box<dyn FloatingButton>> {
        Some(Box::new(Button(self.log.clone())))
    }

    fn create_fullscreen_message(&self, html: &str) -> Option<Box<dyn FullscreenMessage>> {
        if !self.can_create_message {
            return None;
        }
        self.log.lock().expect("lock").push(format!("message.create {html}"));
        Some(Box::new(Message(self.log.clone())))
    }

    fn show_url(&self, url: &str) -> bool {
        self.log.lock().expect("lock").push(format!("show_url {url}"));
        true
    }
}

fn controller(network: &Arc<RecordingNetwork>, ui: &Arc<RecordingUi>) -> PreviewController {
    PreviewController::new(network.clone(), ui.clone())
}

#[tokio::test]
async fn deep_link_fetches_default_endpoint() {
    let network = RecordingNetwork::replying(Some(HttpResponse::new(200, "<html/>")));
    let ui = RecordingUi::new();
    let mut preview = controller(&network, &ui);

    preview
        .enter_preview_mode("acme", "test://path?at_preview_token=abcd&key1=val1")
        .await
        .expect("valid link");

    assert_eq!(
        network.urls(),
        vec!["https://hal.testandtarget.omniture.com/ui/admin/acme/preview?token=abcd".to_string()]
    );
    assert_eq!(preview.preview_token(), Some("abcd"));
    assert_eq!(preview.phase(), PreviewPhase::Displayed);
    assert_eq!(preview.web_view_html(), Some("<html/>"));
    assert_eq!(
        ui.events(),
        vec![
            "button.display".to_string(),
            "message.create <html/>".to_string(),
            "message.show".to_string(),
        ]
    );
}

#[tokio::test]
async fn token_and_endpoint_are_decoded_once() {
    let network = RecordingNetwork::replying(None);
    let ui = RecordingUi::new();
    let mut preview = controller(&network, &ui);

    preview
        .enter_preview_mode(
            "acme",
            "test://path?at_preview_token=a%2520b&at_preview_endpoint=qa.example.com%3A8443",
        )
        .await
        .expect("valid link");

    assert_eq!(preview.preview_token(), Some("a%20b"));
    assert_eq!(preview.endpoint(), "qa.example.com:8443");
    assert_eq!(
        network.urls(),
        vec!["https://qa.example.com:8443/ui/admin/acme/preview?token=a%2520b".to_string()]
    );
}

#[tokio::test]
async fn invalid_links_are_ignored() {
    let network = RecordingNetwork::replying(Some(HttpResponse::new(200, "<html/>")));
    let ui = RecordingUi::new();
    let mut preview = controller(&network, &ui);

    for link in ["", "   ", "no scheme here", "test://path?key1=val1", "test://path?at_preview_token="] {
        let result = preview.enter_preview_mode("acme", link).await;
        assert_eq!(result, Err(DeliveryError::PreviewLinkInvalid), "{link:?}");
    }
    assert!(network.urls().is_empty());
    assert!(ui.events().is_empty());
    assert_eq!(preview.preview_token(), None);
}

#[tokio::test]
async fn failed_fetch_shows_no_message() {
    for response in [None, Some(HttpResponse::new(500, "oops")), Some(HttpResponse::new(200, ""))] {
        let network = RecordingNetwork::replying(response);
        let ui = RecordingUi::new();
        let mut preview = controller(&network, &ui);
        preview
            .enter_preview_mode("acme", "test://path?at_preview_token=abcd")
            .await
            .expect("valid link");
        assert_eq!(preview.phase(), PreviewPhase::Idle);
        assert_eq!(ui.events(), vec!["button.display".to_string()]);
    }
}

#[tokio::test]
async fn message_creation_failure_is_silent() {
    let network = RecordingNetwork::replying(Some(HttpResponse::new(200, "<html/>")));
    let ui = Arc::new(RecordingUi {
        log: Log::default(),
        can_create_message: false,
    });
    let mut preview = controller(&network, &ui);
    preview.fetch_web_view().await;
    assert_eq!(preview.phase(), PreviewPhase::Idle);
    assert_eq!(
        network.urls(),
        vec!["https://hal.testandtarget.omniture.com/ui/admin/preview".to_string()]
    );
}

#[tokio::test]
async fn confirm_stores_params_and_opens_restart_link() {
    let network = RecordingNetwork::replying(Some(HttpResponse::new(200, "<html/>")));
    let ui = RecordingUi::new();
    let mut preview = controller(&network, &ui);
    preview
        .enter_preview_mode("acme", "test://path?at_preview_token=abcd")
        .await
        .expect("valid link");
    preview.set_restart_deep_link(Some("app://restart"));

    preview.confirmed_with_url("adbinapp://confirm?at_preview_params=%7B%22qaMode%22%3A%7B%7D%7D");

    assert_eq!(preview.preview_parameters(), Some(r#"{"qaMode":{}}"#));
    assert_eq!(preview.phase(), PreviewPhase::Idle);
    assert!(preview.is_active());
    let events = ui.events();
    assert_eq!(
        events[events.len() - 2..].to_vec(),
        vec!["message.dismiss".to_string(), "show_url app://restart".to_string()]
    );
}

#[tokio::test]
async fn confirm_without_params_clears_them() {
    let network = RecordingNetwork::replying(None);
    let ui = RecordingUi::new();
    let mut preview = controller(&network, &ui);
    preview
        .enter_preview_mode("acme", "test://path?at_preview_token=abcd")
        .await
        .expect("valid link");
    preview.confirmed_with_url("adbinapp://confirm?at_preview_params=%7B%7D");
    assert_eq!(preview.preview_parameters(), Some("{}"));

    preview.confirmed_with_url("adbinapp://confirm");
    assert_eq!(preview.preview_parameters(), None);

    preview.confirmed_with_url("adbinapp://confirm?at_preview_params=%7B%7D");
    preview.confirmed_with_url("https://confirm?at_preview_params=%7B%7D");
    assert_eq!(preview.preview_parameters(), None);
}

#[tokio::test]
async fn cancel_resets_preview_mode() {
    let network = RecordingNetwork::replying(Some(HttpResponse::new(200, "<html/>")));
    let ui = RecordingUi::new();
    let mut preview = controller(&network, &ui);
    preview
        .enter_preview_mode("acme", "test://path?at_preview_token=abcd&at_preview_endpoint=qa.example.com")
        .await
        .expect("valid link");
    preview.set_restart_deep_link(Some("app://restart"));

    preview.confirmed_with_url("adbinapp://cancel");

    assert!(!preview.is_active());
    assert_eq!(preview.preview_token(), None);
    assert_eq!(preview.endpoint(), DEFAULT_PREVIEW_ENDPOINT);
    assert_eq!(preview.web_view_html(), None);
    let events = ui.events();
    assert_eq!(
        events[events.len() - 2..].to_vec(),
        vec!["message.dismiss".to_string(), "button.remove".to_string()]
    );
}

#[tokio::test]
async fn confirmed_params_decode_plus_as_space() {
    let network = RecordingNetwork::replying(None);
    let ui = RecordingUi::new();
    let mut preview = controller(&network, &ui);
    preview
        .enter_preview_mode("acme", "test://path?at_preview_token=ab+cd")
        .await
        .expect("valid link");
    assert_eq!(preview.preview_token(), Some("ab cd"));

    preview.confirmed_with_url("adbinapp://confirm?at_preview_params=%7B%22a%22%3A%22x+y%22%7D");

    assert_eq!(preview.preview_parameters(), Some(r#"{"a":"x y"}"#));
}

#[tokio::test]
async fn dropped_fetch_returns_to_idle() {
    let network = Arc::new(StallingNetwork {
        stalled: AtomicBool::new(false),
        response: HttpResponse::new(200, "<html/>"),
    });
    let ui = RecordingUi::new();
    let mut preview = PreviewController::new(network, ui.clone());

    let entered = tokio::time::timeout(
        Duration::from_millis(20),
        preview.enter_preview_mode("acme", "test://path?at_preview_token=abcd"),
    )
    .await;
    assert!(entered.is_err(), "first fetch should still be pending");
    assert_eq!(preview.phase(), PreviewPhase::Idle);

    preview.fetch_web_view().await;

    assert_eq!(preview.phase(), PreviewPhase::Displayed);
    assert_eq!(preview.web_view_html(), Some("<html/>"));
}

#[tokio::test]
async fn refetch_dismisses_the_previous_message() {
    let network = RecordingNetwork::replying(Some(HttpResponse::new(200, "<html/>")));
    let ui = RecordingUi::new();
    let mut preview = controller(&network, &ui);
    preview
        .enter_preview_mode("acme", "test://path?at_preview_token=abcd")
        .await
        .expect("valid link");

    preview.fetch_web_view().await;

    let events = ui.events();
    assert_eq!(
        events[events.len() - 3..].to_vec(),
        vec![
            "message.create <html/>".to_string(),
            "message.dismiss".to_string(),
            "message.show".to_string(),
        ]
    );
    assert_eq!(preview.phase(), PreviewPhase::Displayed);
}
