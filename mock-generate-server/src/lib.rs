//! A stand-in for an inference server's `POST /generate` endpoint.

use anyhow::Context;
use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::Json;
use generate_wire::{GenerateRequest, GenerateResponse, RequestCounter, GENERATE_PATH};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// What the endpoint answers with once the configured latency has elapsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseMode {
    /// `{"text": [prompt + completion]}` with `max_tokens` completion words.
    #[default]
    Completion,
    /// Valid JSON without the `text` field.
    MissingText,
    /// A truncated JSON document.
    Malformed,
    /// An empty-bodied response with this status code.
    Status(u16),
}

#[derive(Debug, Clone, Default)]
pub struct MockBehavior {
    pub latency: Duration,
    pub mode: ResponseMode,
}

impl MockBehavior {
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    #[must_use]
    pub fn with_mode(mut self, mode: ResponseMode) -> Self {
        self.mode = mode;
        self
    }
}

#[derive(Clone)]
struct MockState {
    behavior: MockBehavior,
    counter: RequestCounter,
}

pub fn router(behavior: MockBehavior, counter: RequestCounter) -> axum::Router {
    axum::Router::new()
        .route(GENERATE_PATH, post(generate))
        .with_state(MockState { behavior, counter })
}

/// A server bound to an ephemeral local port, stopped on drop.
pub struct MockServer {
    addr: SocketAddr,
    counter: RequestCounter,
    handle: Option<JoinHandle<()>>,
}

impl MockServer {
    pub async fn start(behavior: MockBehavior) -> anyhow::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .context("Failed to bind mock listener")?;
        Self::serve(listener, behavior)
    }

    pub fn serve(listener: TcpListener, behavior: MockBehavior) -> anyhow::Result<Self> {
        let addr = listener
            .local_addr()
            .context("Failed to read mock listener address")?;
        let counter = RequestCounter::new();
        let app = router(behavior, counter.clone());
        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                tracing::error!(error = %e, "mock server stopped");
            }
        });
        Ok(Self {
            addr,
            counter,
            handle: Some(handle),
        })
    }

    #[must_use]
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    #[must_use]
    pub fn generate_url(&self) -> String {
        format!("http://{}{}", self.addr(), GENERATE_PATH)
    }

    #[must_use]
    pub fn requests_served(&self) -> usize {
        self.counter.get()
    }

    /// Runs until the accept loop fails.
    pub async fn wait(mut self) -> anyhow::Result<()> {
        match self.handle.take() {
            Some(handle) => handle.await.context("Mock server task failed"),
            None => Ok(()),
        }
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        if let Some(handle) = &self.handle {
            handle.abort();
        }
    }
}

async fn generate(State(state): State<MockState>, Json(req): Json<GenerateRequest>) -> Response {
    let seen = state.counter.increment();
    tracing::debug!(request = seen, max_tokens = req.max_tokens, "generate");
    if !state.behavior.latency.is_zero() {
        tokio::time::sleep(state.behavior.latency).await;
    }
    match state.behavior.mode {
        ResponseMode::Completion => Json(GenerateResponse::new(complete(&req))).into_response(),
        ResponseMode::MissingText => {
            Json(serde_json::json!({ "generated": complete(&req) })).into_response()
        }
        ResponseMode::Malformed => {
            (StatusCode::OK, [(CONTENT_TYPE, "application/json")], "{\"text\": [").into_response()
        }
        ResponseMode::Status(code) => StatusCode::from_u16(code)
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            .into_response(),
    }
}

/// Echoes the prompt followed by `max_tokens` filler words, like a server that never
/// stops early.
fn complete(req: &GenerateRequest) -> String {
    let mut out = req.prompt.clone();
    for _ in 0..req.max_tokens {
        out.push_str(" token");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use generate_wire::byte_body;
    use generate_wire::drain::DrainBodyFuture;
    use http_body_util::Full;
    use hyper::Request;
    use hyper_util::client::legacy::connect::HttpConnector;
    use hyper_util::client::legacy::Client;
    use hyper_util::rt::TokioExecutor;

    async fn post(url: &str, body: &GenerateRequest) -> (StatusCode, Vec<u8>) {
        let client: Client<HttpConnector, Full<Bytes>> =
            Client::builder(TokioExecutor::new()).build(HttpConnector::new());
        let req = Request::post(url)
            .header(CONTENT_TYPE, "application/json")
            .body(byte_body(serde_json::to_vec(body).unwrap()))
            .unwrap();
        let resp = client.request(req).await.unwrap();
        let status = resp.status();
        let bytes = DrainBodyFuture::new_trusted_length(resp.into_body(), 256)
            .await
            .unwrap();
        (status, bytes)
    }

    #[test]
    fn completion_appends_requested_words() {
        let text = complete(&GenerateRequest::greedy("hi", 3));
        assert_eq!(text, "hi token token token");
    }

    #[tokio::test]
    async fn serves_completion_and_counts_requests() {
        let server = MockServer::start(MockBehavior::default()).await.unwrap();
        let (status, bytes) = post(&server.generate_url(), &GenerateRequest::greedy("ping", 2)).await;
        assert_eq!(status, StatusCode::OK);
        let resp: GenerateResponse = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(resp.first_text(), Some("ping token token"));
        assert_eq!(server.requests_served(), 1);
    }

    #[tokio::test]
    async fn status_mode_returns_configured_code() {
        let behavior = MockBehavior::default().with_mode(ResponseMode::Status(503));
        let server = MockServer::start(behavior).await.unwrap();
        let (status, _) = post(&server.generate_url(), &GenerateRequest::greedy("ping", 1)).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn missing_text_mode_omits_field() {
        let behavior = MockBehavior::default().with_mode(ResponseMode::MissingText);
        let server = MockServer::start(behavior).await.unwrap();
        let (_, bytes) = post(&server.generate_url(), &GenerateRequest::greedy("ping", 1)).await;
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert!(value.get("text").is_none());
        assert!(value.get("generated").is_some());
    }
}
