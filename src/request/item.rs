//! Work item state shared by every pipeline stage.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use super::{DefaultRetryPolicy, Request, RetryConfig, RetryPolicy, DEFAULT_TIMEOUT};
use crate::cache::{conditional_headers, CacheEntry};
use crate::error::DispatchError;
use crate::network::{Method, NetworkRequest, NetworkResponse};
use crate::scheduler::Priority;

/// Items alive longer than this between admission and finish are logged.
const SLOW_REQUEST_THRESHOLD: Duration = Duration::from_millis(3000);

/// Read-only view of an admitted item, independent of its result type.
///
/// This is what cancellation predicates see.
pub trait Pending: Send + Sync {
    /// Admission order. Zero until the item is admitted.
    fn sequence(&self) -> u64;
    fn url(&self) -> &str;
    fn method(&self) -> Method;
    fn cache_key(&self) -> &str;
    fn priority(&self) -> Priority;
    fn tag(&self) -> Option<&str>;
    fn should_cache(&self) -> bool;
    fn is_canceled(&self) -> bool;
    /// Idempotent. Stages observe the flag cooperatively.
    fn cancel(&self);
    fn has_had_response_delivered(&self) -> bool;
}

/// A parsed result ready to hand to the delivery context.
pub(crate) struct Prepared {
    pub cache_entry: Option<CacheEntry>,
    pub deliver: Box<dyn FnOnce() + Send>,
}

impl std::fmt::Debug for Prepared {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Prepared")
            .field("cacheable", &self.cache_entry.is_some())
            .finish()
    }
}

/// Engine-side operations on an item with its result type erased.
pub(crate) trait Dispatch: Pending {
    fn state(&self) -> &ItemState;

    /// Parse `response` and package the delivery of its value.
    fn prepare(self: Arc<Self>, response: &NetworkResponse) -> Result<Prepared, DispatchError>;

    fn deliver_error(&self, error: DispatchError);

    fn parse_network_error(&self, error: DispatchError) -> DispatchError;

    /// Snapshot for the next network attempt.
    fn network_request(&self) -> NetworkRequest;

    fn as_pending(&self) -> &dyn Pending;
}

/// Scheduling state carried alongside a request.
pub(crate) struct ItemState {
    sequence: u64,
    cache_key: String,
    priority: Priority,
    should_cache: bool,
    tag: Option<String>,
    canceled: Arc<AtomicBool>,
    delivered: AtomicBool,
    finished: AtomicBool,
    cache_entry: Mutex<Option<CacheEntry>>,
    retry_policy: Mutex<Option<Box<dyn RetryPolicy>>>,
    admitted_at: Instant,
}

impl ItemState {
    fn new(cache_key: String, priority: Priority) -> Self {
        Self {
            sequence: 0,
            cache_key,
            priority,
            should_cache: true,
            tag: None,
            canceled: Arc::new(AtomicBool::new(false)),
            delivered: AtomicBool::new(false),
            finished: AtomicBool::new(false),
            cache_entry: Mutex::new(None),
            retry_policy: Mutex::new(None),
            admitted_at: Instant::now(),
        }
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn cache_key(&self) -> &str {
        &self.cache_key
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn should_cache(&self) -> bool {
        self.should_cache
    }

    pub fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::Acquire)
    }

    pub fn cancel(&self) {
        self.canceled.store(true, Ordering::Release);
    }

    pub fn mark_delivered(&self) {
        self.delivered.store(true, Ordering::Release);
    }

    pub fn has_had_response_delivered(&self) -> bool {
        self.delivered.load(Ordering::Acquire)
    }

    pub fn set_cache_entry(&self, entry: Option<CacheEntry>) {
        *self.cache_entry.lock() = entry;
    }

    pub fn cache_entry(&self) -> Option<CacheEntry> {
        self.cache_entry.lock().clone()
    }

    /// Install the engine default unless the caller chose a policy.
    pub fn ensure_retry_policy(&self, config: RetryConfig) {
        let mut policy = self.retry_policy.lock();
        if policy.is_none() {
            *policy = Some(Box::new(DefaultRetryPolicy::new(config)));
        }
    }

    pub fn current_timeout(&self) -> Duration {
        self.retry_policy
            .lock()
            .as_ref()
            .map_or(DEFAULT_TIMEOUT, |p| p.current_timeout())
    }

    pub fn attempt(&self) -> u32 {
        self.retry_policy
            .lock()
            .as_ref()
            .map_or(0, |p| p.current_attempt_count())
    }

    /// Consult the retry policy. Without one, every failure is terminal.
    pub fn retry(&self, error: DispatchError) -> Result<(), DispatchError> {
        match self.retry_policy.lock().as_mut() {
            Some(policy) => policy.retry(error),
            None => Err(error),
        }
    }

    pub fn add_marker(&self, marker: &'static str) {
        tracing::trace!(
            sequence = self.sequence,
            cache_key = %self.cache_key,
            marker,
            "work item marker"
        );
    }

    /// Record the terminal marker. Returns false if the item already finished.
    pub fn mark_finished(&self, reason: &'static str) -> bool {
        if self.finished.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.add_marker(reason);
        let lifetime = self.admitted_at.elapsed();
        tracing::debug!(
            sequence = self.sequence,
            cache_key = %self.cache_key,
            reason,
            lifetime_ms = lifetime.as_millis() as u64,
            "work item finished"
        );
        if lifetime >= SLOW_REQUEST_THRESHOLD {
            tracing::debug!(
                sequence = self.sequence,
                cache_key = %self.cache_key,
                lifetime_ms = lifetime.as_millis() as u64,
                "slow request"
            );
        }
        true
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }
}

/// A [`Request`] plus the state the engine tracks for it.
///
/// Build one with [`WorkItem::new`], adjust it with the `with_*` methods,
/// then hand it to the engine, which returns it behind an `Arc`.
pub struct WorkItem<R: Request> {
    request: R,
    state: ItemState,
}

impl<R: Request> WorkItem<R> {
    pub fn new(request: R) -> Self {
        let state = ItemState::new(request.cache_key(), request.priority());
        Self { request, state }
    }

    /// Group this item for [`cancel_all_tag`](crate::Engine::cancel_all_tag).
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.state.tag = Some(tag.into());
        self
    }

    /// Uncached items skip the cache stage and single-flight grouping.
    pub fn with_should_cache(mut self, should_cache: bool) -> Self {
        self.state.should_cache = should_cache;
        self
    }

    pub fn with_retry_policy(self, policy: impl RetryPolicy + 'static) -> Self {
        *self.state.retry_policy.lock() = Some(Box::new(policy));
        self
    }

    pub fn request(&self) -> &R {
        &self.request
    }

    /// Stamp admission order. Happens once, before the item is shared.
    pub(crate) fn admit(&mut self, sequence: u64, retry: RetryConfig) {
        self.state.sequence = sequence;
        self.state.admitted_at = Instant::now();
        self.state.ensure_retry_policy(retry);
        self.state.add_marker("add-to-queue");
    }
}

impl<R: Request> std::fmt::Debug for WorkItem<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkItem")
            .field("sequence", &self.state.sequence)
            .field("url", &self.request.url())
            .field("priority", &self.state.priority)
            .field("canceled", &self.state.is_canceled())
            .finish()
    }
}

impl<R: Request> Pending for WorkItem<R> {
    fn sequence(&self) -> u64 {
        self.state.sequence()
    }

    fn url(&self) -> &str {
        self.request.url()
    }

    fn method(&self) -> Method {
        self.request.method()
    }

    fn cache_key(&self) -> &str {
        self.state.cache_key()
    }

    fn priority(&self) -> Priority {
        self.state.priority()
    }

    fn tag(&self) -> Option<&str> {
        self.state.tag.as_deref()
    }

    fn should_cache(&self) -> bool {
        self.state.should_cache()
    }

    fn is_canceled(&self) -> bool {
        self.state.is_canceled()
    }

    fn cancel(&self) {
        self.state.cancel();
    }

    fn has_had_response_delivered(&self) -> bool {
        self.state.has_had_response_delivered()
    }
}

impl<R: Request> Dispatch for WorkItem<R> {
    fn state(&self) -> &ItemState {
        &self.state
    }

    fn prepare(self: Arc<Self>, response: &NetworkResponse) -> Result<Prepared, DispatchError> {
        let parsed = self.request.parse_response(response)?;
        let cache_entry = parsed.cache_entry;
        let value = parsed.value;
        Ok(Prepared {
            cache_entry,
            deliver: Box::new(move || self.request.deliver(value)),
        })
    }

    fn deliver_error(&self, error: DispatchError) {
        self.request.deliver_error(error);
    }

    fn parse_network_error(&self, error: DispatchError) -> DispatchError {
        self.request.parse_network_error(error)
    }

    fn network_request(&self) -> NetworkRequest {
        let mut request = NetworkRequest::new(self.request.method(), self.request.url())
            .with_cancel_flag(Arc::clone(&self.state.canceled));
        request.sequence = self.state.sequence;
        request.headers = self.request.headers();
        if let Some(entry) = self.state.cache_entry.lock().as_ref() {
            request.headers.extend(conditional_headers(entry));
        }
        request.body = self.request.body();
        request.body_content_type = self.request.body_content_type();
        request.timeout = self.state.current_timeout();
        request.attempt = self.state.attempt();
        request
    }

    fn as_pending(&self) -> &dyn Pending {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::Headers;
    use bytes::Bytes;
    use std::time::SystemTime;

    struct Echo {
        url: String,
        priority: Priority,
        delivered: Arc<Mutex<Vec<String>>>,
    }

    impl Request for Echo {
        type Output = String;

        fn url(&self) -> &str {
            &self.url
        }

        fn priority(&self) -> Priority {
            self.priority
        }

        fn headers(&self) -> Headers {
            let mut headers = Headers::new();
            headers.insert("X-Client".into(), "test".into());
            headers
        }

        fn parse_response(
            &self,
            response: &NetworkResponse,
        ) -> Result<crate::request::Parsed<String>, DispatchError> {
            String::from_utf8(response.data.to_vec())
                .map(crate::request::Parsed::uncached)
                .map_err(|e| DispatchError::ParseError(e.to_string()))
        }

        fn deliver(&self, value: String) {
            self.delivered.lock().push(value);
        }

        fn deliver_error(&self, error: DispatchError) {
            self.delivered.lock().push(format!("error: {error}"));
        }
    }

    fn echo(url: &str) -> (WorkItem<Echo>, Arc<Mutex<Vec<String>>>) {
        let delivered = Arc::new(Mutex::new(Vec::new()));
        let item = WorkItem::new(Echo {
            url: url.to_string(),
            priority: Priority::High,
            delivered: Arc::clone(&delivered),
        });
        (item, delivered)
    }

    #[test]
    fn new_item_takes_key_and_priority_from_request() {
        let (item, _) = echo("http://a/1");
        assert_eq!(item.cache_key(), "http://a/1");
        assert_eq!(item.priority(), Priority::High);
        assert!(item.should_cache());
        assert_eq!(item.sequence(), 0);
        assert!(item.tag().is_none());
    }

    #[test]
    fn builders_set_options() {
        let (item, _) = echo("http://a/1");
        let item = item.with_tag("screen-1").with_should_cache(false);
        assert_eq!(item.tag(), Some("screen-1"));
        assert!(!item.should_cache());
    }

    #[test]
    fn admit_installs_default_policy_only_when_missing() {
        let (mut item, _) = echo("http://a/1");
        item.admit(7, RetryConfig { initial_timeout: Duration::from_millis(40), ..Default::default() });
        assert_eq!(item.sequence(), 7);
        assert_eq!(item.state.current_timeout(), Duration::from_millis(40));

        let (item, _) = echo("http://a/2");
        let mut item = item.with_retry_policy(DefaultRetryPolicy::new(RetryConfig {
            initial_timeout: Duration::from_millis(900),
            ..Default::default()
        }));
        item.admit(8, RetryConfig::default());
        assert_eq!(item.state.current_timeout(), Duration::from_millis(900));
    }

    #[test]
    fn cancel_is_sticky_and_visible_to_network_request() {
        let (item, _) = echo("http://a/1");
        let request = item.network_request();
        assert!(!request.is_canceled());
        item.cancel();
        item.cancel();
        assert!(item.is_canceled());
        assert!(request.is_canceled());
    }

    #[test]
    fn finish_happens_once() {
        let (item, _) = echo("http://a/1");
        assert!(item.state.mark_finished("done"));
        assert!(!item.state.mark_finished("done"));
        assert!(item.state.is_finished());
    }

    #[test]
    fn network_request_carries_conditional_headers() {
        let (item, _) = echo("http://a/1");
        item.state.set_cache_entry(Some(CacheEntry {
            data: Bytes::new(),
            etag: Some("\"e1\"".into()),
            server_date: None,
            ttl: SystemTime::now(),
            soft_ttl: SystemTime::now(),
            response_headers: Arc::new(Headers::new()),
        }));
        let request = item.network_request();
        assert_eq!(request.headers.get("If-None-Match").map(String::as_str), Some("\"e1\""));
        assert_eq!(request.headers.get("X-Client").map(String::as_str), Some("test"));
        assert_eq!(request.url, "http://a/1");
    }

    #[test]
    fn prepare_defers_delivery_until_called() {
        let (item, delivered) = echo("http://a/1");
        let item = Arc::new(item);
        let response = NetworkResponse::new(200, Bytes::from_static(b"hi"), Headers::new());
        let prepared = Arc::clone(&item).prepare(&response).unwrap();
        assert!(prepared.cache_entry.is_none());
        assert!(delivered.lock().is_empty());
        (prepared.deliver)();
        assert_eq!(delivered.lock().as_slice(), ["hi".to_string()]);
    }

    #[test]
    fn prepare_surfaces_parse_errors() {
        let (item, _) = echo("http://a/1");
        let response = NetworkResponse::new(200, Bytes::from_static(&[0xff, 0xfe]), Headers::new());
        let err = Arc::new(item).prepare(&response).unwrap_err();
        assert!(matches!(err, DispatchError::ParseError(_)));
    }
}
