//! Status classification on top of a raw HTTP transport.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

use super::{Headers, Network, NetworkRequest, NetworkResponse};
use crate::error::DispatchError;

/// Exchanges slower than this are logged.
const SLOW_REQUEST_THRESHOLD: Duration = Duration::from_millis(3000);

/// Raw HTTP exchange as seen by the transport.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Headers,
    pub body: Bytes,
}

/// Failures below the HTTP layer.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport timed out")]
    Timeout,
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("malformed url: {0}")]
    MalformedUrl(String),
    #[error("i/o failure: {0}")]
    Io(String),
}

/// Wire-level HTTP client. Implementations own sockets, TLS and body encoding.
#[async_trait]
pub trait HttpStack: Send + Sync {
    async fn execute(&self, request: &NetworkRequest) -> Result<HttpResponse, TransportError>;
}

/// [`Network`] that maps transport outcomes onto the dispatch error taxonomy.
pub struct BasicNetwork<S> {
    stack: S,
}

impl<S: HttpStack> BasicNetwork<S> {
    pub fn new(stack: S) -> Self {
        Self { stack }
    }

    fn classify(response: HttpResponse) -> Result<NetworkResponse, DispatchError> {
        let HttpResponse { status, headers, body } = response;
        match status {
            304 => Ok(NetworkResponse::not_modified(headers)),
            200..=299 => Ok(NetworkResponse::new(status, body, headers)),
            401 | 403 => Err(DispatchError::AuthFailure {
                status,
                response: Some(Box::new(NetworkResponse::new(status, body, headers))),
            }),
            _ => Err(DispatchError::ServerError {
                status,
                response: Some(Box::new(NetworkResponse::new(status, body, headers))),
            }),
        }
    }
}

impl From<TransportError> for DispatchError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Timeout => Self::Timeout,
            TransportError::Connect(msg) => Self::ConnectionFailure(msg),
            TransportError::MalformedUrl(url) => Self::Other(format!("bad url {url}")),
            TransportError::Io(msg) => Self::Other(format!("i/o failure: {msg}")),
        }
    }
}

#[async_trait]
impl<S: HttpStack> Network for BasicNetwork<S> {
    async fn perform_request(
        &self,
        request: &NetworkRequest,
    ) -> Result<NetworkResponse, DispatchError> {
        let start = Instant::now();
        let response = self.stack.execute(request).await?;

        let lifetime = start.elapsed();
        if lifetime > SLOW_REQUEST_THRESHOLD {
            tracing::debug!(
                url = %request.url,
                lifetime_ms = lifetime.as_millis() as u64,
                size = response.body.len(),
                status = response.status,
                attempt = request.attempt,
                "slow HTTP response"
            );
        }
        if !(200..300).contains(&response.status) && response.status != 304 {
            tracing::warn!(status = response.status, url = %request.url, "unexpected response code");
        }

        Self::classify(response)
    }
}
