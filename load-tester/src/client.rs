use crate::error::TransportError;
use async_trait::async_trait;
use bytes::Bytes;
use generate_wire::drain::DrainBodyFuture;
use generate_wire::{byte_body, GenerateRequest};
use http_body_util::Full;
use hyper::header::{CONTENT_LENGTH, CONTENT_TYPE};
use hyper::{Request, StatusCode, Uri};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use std::collections::HashMap;
use std::error::Error as StdError;
use std::io::ErrorKind;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Sends one generate call and returns the parsed JSON body.
#[async_trait]
pub trait GenerateTransport: Send + Sync {
    async fn generate(
        &self,
        endpoint: &Uri,
        request: &GenerateRequest,
    ) -> Result<serde_json::Value, TransportError>;
}

#[derive(Debug, Clone, Copy)]
pub struct TransportSettings {
    /// Requests in flight per host; further requests wait for a slot.
    pub pool_limit_per_host: usize,
    pub request_timeout: Duration,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            pool_limit_per_host: 10_000,
            request_timeout: Duration::from_secs(6_000),
        }
    }
}

/// Shared HTTP/1 session. Clones share the connection pool and the per-host limits.
#[derive(Clone)]
pub struct HttpClient {
    client: Client<HttpConnector, Full<Bytes>>,
    limiter: HostLimiter,
    request_timeout: Duration,
}

impl HttpClient {
    #[must_use]
    pub fn new(settings: TransportSettings) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_nodelay(true);
        let client = Client::builder(TokioExecutor::new())
            .pool_max_idle_per_host(settings.pool_limit_per_host)
            .build(connector);
        Self {
            client,
            limiter: HostLimiter::new(settings.pool_limit_per_host),
            request_timeout: settings.request_timeout,
        }
    }

    pub async fn send_recv(
        &self,
        request: Request<Full<Bytes>>,
    ) -> Result<(StatusCode, Vec<u8>), TransportError> {
        let resp = self.client.request(request).await.map_err(|e| {
            if e.is_connect() {
                TransportError::Connect(error_chain(&e))
            } else {
                classify(&e)
            }
        })?;
        let status = resp.status();
        let content_length: usize = resp
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|hv| hv.to_str().ok())
            .and_then(|hv| hv.parse().ok())
            .unwrap_or(1024);
        let bytes = DrainBodyFuture::new_trusted_length(resp.into_body(), content_length)
            .await
            .map_err(|e| classify(&*e))?;
        Ok((status, bytes))
    }
}

#[async_trait]
impl GenerateTransport for HttpClient {
    async fn generate(
        &self,
        endpoint: &Uri,
        request: &GenerateRequest,
    ) -> Result<serde_json::Value, TransportError> {
        let body = serde_json::to_vec(request)
            .map_err(|e| TransportError::Other(format!("Failed to encode request: {e}")))?;
        let req = Request::post(endpoint.clone())
            .header(CONTENT_TYPE, "application/json")
            .body(byte_body(body))
            .map_err(|e| TransportError::Other(format!("Failed to build request: {e}")))?;
        let _permit = self.limiter.acquire(endpoint).await?;
        let (status, bytes) = tokio::time::timeout(self.request_timeout, self.send_recv(req))
            .await
            .map_err(|_| TransportError::Timeout(self.request_timeout))??;
        if !status.is_success() {
            return Err(TransportError::Status {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&bytes).into_owned(),
            });
        }
        serde_json::from_slice(&bytes).map_err(TransportError::MalformedBody)
    }
}

/// One semaphore per `host:port`, created on first use.
#[derive(Clone)]
struct HostLimiter {
    per_host: usize,
    hosts: Arc<Mutex<HashMap<String, Arc<Semaphore>>>>,
}

impl HostLimiter {
    fn new(per_host: usize) -> Self {
        Self {
            per_host,
            hosts: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    async fn acquire(&self, endpoint: &Uri) -> Result<OwnedSemaphorePermit, TransportError> {
        let key = endpoint
            .authority()
            .map(|a| a.as_str().to_owned())
            .unwrap_or_default();
        let semaphore = {
            let mut hosts = self.hosts.lock().unwrap_or_else(PoisonError::into_inner);
            hosts
                .entry(key)
                .or_insert_with(|| Arc::new(Semaphore::new(self.per_host)))
                .clone()
        };
        semaphore
            .acquire_owned()
            .await
            .map_err(|e| TransportError::Other(format!("Connection limiter closed: {e}")))
    }
}

/// Sorts a failure into reset, disconnect, refused or other by walking its sources.
fn classify(err: &(dyn StdError + 'static)) -> TransportError {
    let message = error_chain(err);
    for cause in std::iter::successors(Some(err), |&e| e.source()) {
        if let Some(io) = cause.downcast_ref::<std::io::Error>() {
            match io.kind() {
                ErrorKind::ConnectionRefused | ErrorKind::NotConnected => {
                    return TransportError::Connect(message);
                }
                ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted | ErrorKind::BrokenPipe => {
                    return TransportError::Reset(message);
                }
                ErrorKind::UnexpectedEof => return TransportError::Disconnected(message),
                _ => {}
            }
        }
        if let Some(hyper_err) = cause.downcast_ref::<hyper::Error>() {
            if hyper_err.is_incomplete_message() || hyper_err.is_closed() || hyper_err.is_canceled()
            {
                return TransportError::Disconnected(message);
            }
        }
    }
    TransportError::Other(message)
}

fn error_chain(err: &(dyn StdError + 'static)) -> String {
    std::iter::successors(Some(err), |&e| e.source())
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(": ")
}
