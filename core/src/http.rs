//! [`Networking`] over `reqwest`.

use async_trait::async_trait;
use tracing::debug;
use tracing::warn;

use crate::services::HttpMethod;
use crate::services::HttpResponse;
use crate::services::NetworkRequest;
use crate::services::Networking;

#[derive(Debug, Clone, Default)]
pub struct ReqwestNetworking {
    client: reqwest::Client,
}

impl ReqwestNetworking {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn send(&self, request: NetworkRequest) -> reqwest::Result<HttpResponse> {
        let mut builder = match request.method {
            HttpMethod::Get => self.client.get(&request.url),
            HttpMethod::Post => self.client.post(&request.url),
        };
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }
        let response = builder
            .timeout(request.connect_timeout + request.read_timeout)
            .send()
            .await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        Ok(HttpResponse::new(status, body))
    }
}

#[async_trait]
impl Networking for ReqwestNetworking {
    async fn connect(&self, request: NetworkRequest) -> Option<HttpResponse> {
        let url = request.url.clone();
        match self.send(request).await {
            Ok(response) => {
                debug!("{url} answered {}", response.status);
                Some(response)
            }
            Err(err) => {
                warn!("Connection to {url} failed: {err}");
                None
            }
        }
    }
}
