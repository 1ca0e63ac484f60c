//! Scripted collaborators shared by scheduler tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use crate::cache::{Cache, CacheEntry};
use crate::error::DispatchError;
use crate::network::{Headers, Network, NetworkRequest, NetworkResponse};
use crate::request::{Parsed, Request};
use crate::scheduler::Priority;

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Delivered(String),
    Failed(&'static str),
}

/// Request that records its deliveries. A body of `corrupt` fails to parse
/// and a body of `panic` panics the parser.
pub struct Probe {
    pub url: String,
    pub priority: Priority,
    pub events: Arc<Mutex<Vec<Event>>>,
}

impl Probe {
    pub fn new(url: &str) -> (Self, Arc<Mutex<Vec<Event>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let probe = Self {
            url: url.to_string(),
            priority: Priority::Normal,
            events: Arc::clone(&events),
        };
        (probe, events)
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }
}

impl Request for Probe {
    type Output = String;

    fn url(&self) -> &str {
        &self.url
    }

    fn priority(&self) -> Priority {
        self.priority
    }

    fn parse_response(&self, response: &NetworkResponse) -> Result<Parsed<String>, DispatchError> {
        let text = String::from_utf8_lossy(&response.data).into_owned();
        if text == "panic" {
            panic!("parser blew up");
        }
        if text == "corrupt" {
            return Err(DispatchError::ParseError("corrupt payload".into()));
        }
        Ok(Parsed::from_headers(text, response))
    }

    fn deliver(&self, value: String) {
        self.events.lock().push(Event::Delivered(value));
    }

    fn deliver_error(&self, error: DispatchError) {
        self.events.lock().push(Event::Failed(error.kind()));
    }
}

/// Network that replays scripted outcomes, repeating the last one.
pub struct ScriptedNetwork {
    outcomes: Mutex<VecDeque<Result<NetworkResponse, DispatchError>>>,
    pub calls: AtomicUsize,
    pub seen: Mutex<Vec<NetworkRequest>>,
}

impl ScriptedNetwork {
    pub fn new(outcomes: Vec<Result<NetworkResponse, DispatchError>>) -> Arc<Self> {
        Arc::new(Self {
            outcomes: Mutex::new(outcomes.into()),
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        })
    }

    pub fn ok(body: &'static str, cache_control: &str) -> Result<NetworkResponse, DispatchError> {
        let mut headers = Headers::new();
        headers.insert("Cache-Control".into(), cache_control.into());
        Ok(NetworkResponse::new(200, Bytes::from_static(body.as_bytes()), headers))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Network for ScriptedNetwork {
    async fn perform_request(
        &self,
        request: &NetworkRequest,
    ) -> Result<NetworkResponse, DispatchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().push(request.clone());
        let mut outcomes = self.outcomes.lock();
        if outcomes.len() > 1 {
            outcomes.pop_front().unwrap_or(Err(DispatchError::Other("script empty".into())))
        } else {
            outcomes
                .front()
                .cloned()
                .unwrap_or(Err(DispatchError::Other("script empty".into())))
        }
    }
}

/// Cache that records every call.
#[derive(Default)]
pub struct RecordingCache {
    pub entries: Mutex<std::collections::HashMap<String, CacheEntry>>,
    pub initialized: AtomicUsize,
    pub invalidated: Mutex<Vec<(String, bool)>>,
}

impl Cache for RecordingCache {
    fn initialize(&self) {
        self.initialized.fetch_add(1, Ordering::SeqCst);
    }

    fn get(&self, key: &str) -> Option<CacheEntry> {
        self.entries.lock().get(key).cloned()
    }

    fn put(&self, key: &str, entry: CacheEntry) {
        self.entries.lock().insert(key.to_string(), entry);
    }

    fn invalidate(&self, key: &str, full_expire: bool) {
        self.invalidated.lock().push((key.to_string(), full_expire));
    }

    fn remove(&self, key: &str) {
        self.entries.lock().remove(key);
    }

    fn clear(&self) {
        self.entries.lock().clear();
    }
}

/// Entry whose soft and hard TTLs are offset from now by the given seconds.
pub fn entry(body: &'static str, soft_in: i64, hard_in: i64) -> CacheEntry {
    use std::time::{Duration, SystemTime};
    let now = SystemTime::now();
    let at = |secs: i64| {
        if secs >= 0 {
            now + Duration::from_secs(secs as u64)
        } else {
            now - Duration::from_secs(secs.unsigned_abs())
        }
    };
    CacheEntry {
        data: Bytes::from_static(body.as_bytes()),
        etag: Some("\"cached\"".into()),
        server_date: None,
        ttl: at(hard_in),
        soft_ttl: at(soft_in),
        response_headers: Arc::new(Headers::new()),
    }
}
