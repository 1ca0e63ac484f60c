//! Dispatch error taxonomy for GG-DISPATCH.
//!
//! Transient network-class failures are retried under the item's retry
//! policy. Everything else is terminal and delivered as-is.

use thiserror::Error;

use crate::network::NetworkResponse;

/// Errors that can terminate (or interrupt) a work item.
#[derive(Debug, Clone, Error)]
pub enum DispatchError {
    #[error("Request timed out")]
    Timeout,

    #[error("Connection failed: {0}")]
    ConnectionFailure(String),

    #[error("Authentication rejected with status {status}")]
    AuthFailure {
        status: u16,
        response: Option<Box<NetworkResponse>>,
    },

    #[error("Server returned status {status}")]
    ServerError {
        status: u16,
        response: Option<Box<NetworkResponse>>,
    },

    #[error("Malformed response: {0}")]
    ParseError(String),

    #[error("Request canceled")]
    Canceled,

    #[error("Unexpected dispatch failure: {0}")]
    Other(String),
}

impl DispatchError {
    /// Returns true for failures the retry policy gets to consult.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout | Self::ConnectionFailure(_) | Self::AuthFailure { .. }
        )
    }

    /// Returns true if this error means the item was canceled.
    pub fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled)
    }

    /// Stable short name, used as a metrics label.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::ConnectionFailure(_) => "connection_failure",
            Self::AuthFailure { .. } => "auth_failure",
            Self::ServerError { .. } => "server_error",
            Self::ParseError(_) => "parse_error",
            Self::Canceled => "canceled",
            Self::Other(_) => "other",
        }
    }

    /// Terminal error for an item whose stage panicked.
    pub(crate) fn from_panic(payload: &(dyn std::any::Any + Send)) -> Self {
        let detail = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        Self::Other(format!("dispatch panicked: {detail}"))
    }

    /// Raw response attached to server-side failures, if any.
    pub fn response(&self) -> Option<&NetworkResponse> {
        match self {
            Self::AuthFailure { response, .. } | Self::ServerError { response, .. } => {
                response.as_deref()
            }
            _ => None,
        }
    }
}
