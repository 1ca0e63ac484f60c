//! Work kinds and the work items that carry them through the engine.
//!
//! A [`Request`] describes one kind of network operation: where it goes, how
//! its raw response is parsed and where the result is delivered. Wrapping it
//! in a [`WorkItem`] adds the scheduling state the engine needs (sequence,
//! cancellation, cache annotation, retry policy).

mod item;
mod retry;
mod string;

pub use item::{Pending, WorkItem};
pub(crate) use item::Dispatch;
pub use retry::{DefaultRetryPolicy, RetryConfig, RetryPolicy};
pub use string::StringRequest;

pub use crate::network::Method;

use std::time::Duration;

use bytes::Bytes;

use crate::cache::{parse_cache_headers, CacheEntry};
use crate::error::DispatchError;
use crate::network::{Headers, NetworkResponse};
use crate::scheduler::Priority;

/// Per-attempt timeout used when no retry policy says otherwise.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(2500);

/// Content type sent with a request body unless the work kind overrides it.
pub const DEFAULT_BODY_CONTENT_TYPE: &str = "application/x-www-form-urlencoded; charset=UTF-8";

/// A parsed result plus the cache entry to store for it, if any.
#[derive(Debug)]
pub struct Parsed<T> {
    pub value: T,
    pub cache_entry: Option<CacheEntry>,
}

impl<T> Parsed<T> {
    pub fn new(value: T, cache_entry: Option<CacheEntry>) -> Self {
        Self { value, cache_entry }
    }

    /// A result that must not be written to the cache.
    pub fn uncached(value: T) -> Self {
        Self { value, cache_entry: None }
    }

    /// A result cached according to the response's caching headers.
    pub fn from_headers(value: T, response: &NetworkResponse) -> Self {
        Self { value, cache_entry: parse_cache_headers(response) }
    }
}

/// One kind of schedulable network operation.
///
/// `parse_response` runs on network and cache workers and must not touch
/// shared state. `deliver` and `deliver_error` only ever run on the delivery
/// context.
pub trait Request: Send + Sync + 'static {
    type Output: Send + 'static;

    fn url(&self) -> &str;

    fn method(&self) -> Method {
        Method::Get
    }

    fn headers(&self) -> Headers {
        Headers::new()
    }

    fn body(&self) -> Option<Bytes> {
        None
    }

    fn body_content_type(&self) -> String {
        DEFAULT_BODY_CONTENT_TYPE.to_string()
    }

    /// Identity used for single-flight grouping and cache lookups.
    fn cache_key(&self) -> String {
        self.url().to_string()
    }

    fn priority(&self) -> Priority {
        Priority::Normal
    }

    fn parse_response(
        &self,
        response: &NetworkResponse,
    ) -> Result<Parsed<Self::Output>, DispatchError>;

    /// Hook to refine a terminal network error before it is delivered.
    fn parse_network_error(&self, error: DispatchError) -> DispatchError {
        error
    }

    fn deliver(&self, value: Self::Output);

    fn deliver_error(&self, error: DispatchError);
}
