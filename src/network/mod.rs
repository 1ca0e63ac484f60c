//! Network collaborator boundary.
//!
//! The engine never touches sockets. Network workers hand a
//! [`NetworkRequest`] snapshot to a [`Network`] implementation and get back
//! either a [`NetworkResponse`] or a classified [`DispatchError`].

mod basic;

pub use basic::{BasicNetwork, HttpResponse, HttpStack, TransportError};

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::cache::CacheEntry;
use crate::error::DispatchError;

/// Header mapping carried by requests, responses and cache entries.
pub type Headers = HashMap<String, String>;

/// Case-insensitive header lookup.
pub fn header<'a>(headers: &'a Headers, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// HTTP method of a work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Method {
    #[default]
    Get,
    Post,
    Put,
    Delete,
    Head,
    Options,
    Trace,
    Patch,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
            Self::Head => "HEAD",
            Self::Options => "OPTIONS",
            Self::Trace => "TRACE",
            Self::Patch => "PATCH",
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything a transport needs for one attempt of one work item.
#[derive(Debug, Clone)]
pub struct NetworkRequest {
    pub sequence: u64,
    pub method: Method,
    pub url: String,
    /// Caller headers plus conditional revalidation headers.
    pub headers: Headers,
    pub body: Option<Bytes>,
    pub body_content_type: String,
    /// Timeout for this attempt, taken from the retry policy.
    pub timeout: Duration,
    /// Number of retries already prepared before this attempt.
    pub attempt: u32,
    cancelled: Arc<AtomicBool>,
}

impl NetworkRequest {
    /// Standalone request, mostly useful for exercising transports directly.
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            sequence: 0,
            method,
            url: url.into(),
            headers: Headers::new(),
            body: None,
            body_content_type: crate::request::DEFAULT_BODY_CONTENT_TYPE.to_string(),
            timeout: crate::request::DEFAULT_TIMEOUT,
            attempt: 0,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub(crate) fn with_cancel_flag(mut self, cancelled: Arc<AtomicBool>) -> Self {
        self.cancelled = cancelled;
        self
    }

    /// Transports may poll this to abandon work early.
    pub fn is_canceled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Raw result of a network attempt, or a cached payload replayed as one.
#[derive(Debug, Clone)]
pub struct NetworkResponse {
    pub status: u16,
    pub data: Bytes,
    pub headers: Headers,
    /// Server answered 304 to a conditional request.
    pub not_modified: bool,
}

impl NetworkResponse {
    pub fn new(status: u16, data: Bytes, headers: Headers) -> Self {
        Self { status, data, headers, not_modified: false }
    }

    /// A 304 answer. The payload is filled in from the attached cache entry.
    pub fn not_modified(headers: Headers) -> Self {
        Self { status: 304, data: Bytes::new(), headers, not_modified: true }
    }

    /// Replay a cached payload as a 200 response.
    pub fn from_cache(entry: &CacheEntry) -> Self {
        Self {
            status: 200,
            data: entry.data.clone(),
            headers: entry.response_headers.as_ref().clone(),
            not_modified: false,
        }
    }

    /// Merge a 304 with the stale entry it revalidated: cached bytes, cached
    /// headers overlaid by the fresh ones.
    pub fn merge_not_modified(self, entry: &CacheEntry) -> Self {
        let mut headers = entry.response_headers.as_ref().clone();
        for (name, value) in self.headers {
            headers.retain(|k, _| !k.eq_ignore_ascii_case(&name));
            headers.insert(name, value);
        }
        Self {
            status: self.status,
            data: entry.data.clone(),
            headers,
            not_modified: true,
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        header(&self.headers, name)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// The network collaborator.
#[async_trait]
pub trait Network: Send + Sync {
    /// Perform one attempt. Retrying is the engine's job, not the transport's.
    async fn perform_request(
        &self,
        request: &NetworkRequest,
    ) -> Result<NetworkResponse, DispatchError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::SystemTime;

    fn entry_with_headers(headers: Headers) -> CacheEntry {
        CacheEntry {
            data: Bytes::from_static(b"cached"),
            etag: Some("\"v1\"".into()),
            server_date: None,
            ttl: SystemTime::now(),
            soft_ttl: SystemTime::now(),
            response_headers: Arc::new(headers),
        }
    }

    #[test]
    fn header_lookup_ignores_case() {
        let mut headers = Headers::new();
        headers.insert("Cache-Control".into(), "max-age=60".into());
        assert_eq!(header(&headers, "cache-control"), Some("max-age=60"));
        assert_eq!(header(&headers, "ETag"), None);
    }

    #[test]
    fn merge_not_modified_keeps_cached_bytes_and_overlays_headers() {
        let mut cached = Headers::new();
        cached.insert("content-type".into(), "text/plain".into());
        cached.insert("cache-control".into(), "max-age=10".into());
        let entry = entry_with_headers(cached);

        let mut fresh = Headers::new();
        fresh.insert("Cache-Control".into(), "max-age=600".into());
        let merged = NetworkResponse::not_modified(fresh).merge_not_modified(&entry);

        assert!(merged.not_modified);
        assert_eq!(merged.data, Bytes::from_static(b"cached"));
        assert_eq!(merged.header("cache-control"), Some("max-age=600"));
        assert_eq!(merged.header("content-type"), Some("text/plain"));
        assert_eq!(merged.headers.len(), 2);
    }

    #[test]
    fn request_cancel_flag_is_shared() {
        let flag = Arc::new(AtomicBool::new(false));
        let request = NetworkRequest::new(Method::Get, "http://a/").with_cancel_flag(flag.clone());
        assert!(!request.is_canceled());
        flag.store(true, Ordering::Release);
        assert!(request.is_canceled());
    }
}
