use std::time::Duration;

use delivery_core::ReqwestNetworking;
use delivery_core::response_parser;
use delivery_core::services::NetworkRequest;
use delivery_core::services::Networking;
use pretty_assertions::assert_eq;
use serde_json::json;
use wiremock::Mock;
use wiremock::MockServer;
use wiremock::ResponseTemplate;
use wiremock::matchers::body_string_contains;
use wiremock::matchers::header;
use wiremock::matchers::method;
use wiremock::matchers::path;
use wiremock::matchers::query_param;

const TIMEOUT: Duration = Duration::from_secs(2);

#[tokio::test]
async fn posts_json_and_returns_status_and_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/delivery/"))
        .and(query_param("client", "acme"))
        .and(header("Content-Type", "application/json"))
        .and(body_string_contains("\"prefetch\""))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": {"tntId": "abc.28_0"},
            "edgeHost": "mboxedge28.tt.omtrdc.net"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let url = format!("{}/rest/v1/delivery/?client=acme&sessionId=s1", server.uri());
    let body = json!({"prefetch": {"mboxes": [{"index": 0, "name": "m"}]}});
    let request = NetworkRequest::post(url, body.to_string().into_bytes(), TIMEOUT)
        .with_header("Content-Type", "application/json");

    let response = ReqwestNetworking::new()
        .connect(request)
        .await
        .expect("connection");

    assert!(response.is_ok());
    let json = response_parser::parse_to_json(&response.body).expect("json");
    assert_eq!(response_parser::tnt_id(&json).as_deref(), Some("abc.28_0"));
    assert_eq!(response_parser::edge_host(&json), "mboxedge28.tt.omtrdc.net");
}

#[tokio::test]
async fn error_statuses_are_returned_not_dropped() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ui/admin/acme/preview"))
        .respond_with(ResponseTemplate::new(404).set_body_string("missing"))
        .mount(&server)
        .await;

    let request = NetworkRequest::get(format!("{}/ui/admin/acme/preview", server.uri()), TIMEOUT);
    let response = ReqwestNetworking::new()
        .connect(request)
        .await
        .expect("connection");

    assert_eq!(response.status, 404);
    assert_eq!(response.body, "missing");
}

#[tokio::test]
async fn unreachable_host_yields_none() {
    let server = MockServer::start().await;
    let uri = server.uri();
    drop(server);

    let request = NetworkRequest::get(format!("{uri}/gone"), Duration::from_millis(200));
    assert_eq!(ReqwestNetworking::new().connect(request).await, None);
}
