//! REST implementation of the backend contract
//!
//! Power transitions on the cloud API are asynchronous: the PATCH returns as
//! soon as the request is queued. [`HttpBackend`] therefore polls the server
//! until its power flag reaches the requested value, racing every request and
//! every poll sleep against the caller's cancellation token.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::{Backend, BackendError, BackendResult, Server};
use crate::config::BackendConfig;

const USER_ID_HEADER: HeaderName = HeaderName::from_static("x-auth-userid");
const TOKEN_HEADER: HeaderName = HeaderName::from_static("x-auth-token");

#[derive(Debug, Deserialize)]
struct ServerEnvelope {
    server: Server,
}

#[derive(Debug, Deserialize)]
struct ServerListEnvelope {
    #[serde(default)]
    servers: HashMap<String, Server>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

/// Cloud API client speaking JSON over HTTP
pub struct HttpBackend {
    /// HTTP client carrying auth headers and request timeout
    client: Client,

    /// API root, without trailing slash
    base_url: String,

    /// Delay between power-state polls
    poll_interval: Duration,
}

impl HttpBackend {
    /// Create a backend from configuration
    ///
    /// # Errors
    ///
    /// Returns `BackendError::Transport` if the credentials are not valid
    /// header values or the HTTP client cannot be built
    pub fn new(config: &BackendConfig) -> BackendResult<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(USER_ID_HEADER, header_value("user id", &config.user_id)?);
        headers.insert(TOKEN_HEADER, header_value("api token", &config.api_token)?);

        let client = Client::builder()
            .default_headers(headers)
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| BackendError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.api_url.trim_end_matches('/').to_string(),
            poll_interval: config.poll_interval(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn server_url(&self, id: &str) -> String {
        self.url(&format!("/objects/servers/{id}"))
    }

    /// Send a request and fail on non-success status
    async fn send(&self, ctx: &CancellationToken, request: RequestBuilder) -> BackendResult<Response> {
        cancellable(ctx, execute(request)).await
    }

    async fn set_power(&self, ctx: &CancellationToken, id: &str, power: bool) -> BackendResult<()> {
        let request = self
            .client
            .patch(self.url(&format!("/objects/servers/{id}/power")))
            .json(&serde_json::json!({ "power": power }));
        self.send(ctx, request).await?;
        self.wait_for_power(ctx, id, power).await
    }

    /// Poll until the server reports the wanted power state
    async fn wait_for_power(&self, ctx: &CancellationToken, id: &str, power: bool) -> BackendResult<()> {
        loop {
            let server = self.get_server(ctx, id).await?;
            if server.power == power {
                debug!(server_id = %id, power, "Server reached requested power state");
                return Ok(());
            }

            trace!(server_id = %id, power, "Waiting for power state");
            tokio::select! {
                _ = ctx.cancelled() => return Err(BackendError::Cancelled),
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }
}

#[async_trait]
impl Backend for HttpBackend {
    async fn get_server(&self, ctx: &CancellationToken, id: &str) -> BackendResult<Server> {
        let response = self.send(ctx, self.client.get(self.server_url(id))).await?;
        let envelope: ServerEnvelope = cancellable(ctx, decode(response)).await?;
        Ok(envelope.server)
    }

    async fn start_server(&self, ctx: &CancellationToken, id: &str) -> BackendResult<()> {
        // A redundant start is benign; skip the PATCH so the API never rejects it.
        if self.get_server(ctx, id).await?.power {
            debug!(server_id = %id, "Server already running, start is a no-op");
            return Ok(());
        }
        self.set_power(ctx, id, true).await
    }

    async fn shutdown_server(&self, ctx: &CancellationToken, id: &str) -> BackendResult<()> {
        let request = self
            .client
            .patch(self.url(&format!("/objects/servers/{id}/shutdown")))
            .json(&serde_json::json!({}));
        self.send(ctx, request).await?;
        self.wait_for_power(ctx, id, false).await
    }

    async fn stop_server(&self, ctx: &CancellationToken, id: &str) -> BackendResult<()> {
        self.set_power(ctx, id, false).await
    }

    async fn delete_server(&self, ctx: &CancellationToken, id: &str) -> BackendResult<()> {
        self.send(ctx, self.client.delete(self.server_url(id))).await?;
        Ok(())
    }

    async fn get_server_list(&self, ctx: &CancellationToken) -> BackendResult<Vec<Server>> {
        let response = self.send(ctx, self.client.get(self.url("/objects/servers"))).await?;
        let envelope: ServerListEnvelope = cancellable(ctx, decode(response)).await?;

        let mut servers: Vec<Server> = envelope
            .servers
            .into_iter()
            .map(|(uuid, mut server)| {
                if server.id.is_empty() {
                    server.id = uuid;
                }
                server
            })
            .collect();
        servers.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(servers)
    }
}

async fn execute(request: RequestBuilder) -> BackendResult<Response> {
    let response = request.send().await?;
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&body)
        .ok()
        .and_then(|b| b.message)
        .unwrap_or(body);
    Err(BackendError::from_status(status.as_u16(), message))
}

async fn decode<T: DeserializeOwned>(response: Response) -> BackendResult<T> {
    Ok(response.json().await?)
}

/// Run `fut` unless `ctx` fires first
async fn cancellable<T, F>(ctx: &CancellationToken, fut: F) -> BackendResult<T>
where
    F: Future<Output = BackendResult<T>>,
{
    tokio::select! {
        _ = ctx.cancelled() => Err(BackendError::Cancelled),
        result = fut => result,
    }
}

fn header_value(field: &str, value: &str) -> BackendResult<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|_| BackendError::Transport(format!("invalid {field} header value")))
}
