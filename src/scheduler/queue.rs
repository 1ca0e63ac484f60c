//! Admission control: sequencing, single-flight grouping and bulk
//! cancellation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::dedup::{DedupResult, WaitingRegistry};
use super::dispatch_queue::DispatchQueue;
use crate::request::{Dispatch, Pending, Request, RetryConfig, WorkItem};
use crate::telemetry;

/// Configuration for request admission.
#[derive(Debug, Clone, Default)]
pub struct RequestQueueConfig {
    /// Retry parameters for items admitted without their own policy.
    pub default_retry: RetryConfig,
}

/// Entry point for new work and owner of the in-flight set.
///
/// The in-flight set and the waiting registry are guarded separately and
/// never locked at the same time.
pub struct RequestQueue {
    next_sequence: AtomicU64,
    current: Mutex<HashMap<u64, Arc<dyn Dispatch>>>,
    waiting: WaitingRegistry<Arc<dyn Dispatch>>,
    cache_queue: Arc<DispatchQueue>,
    network_queue: Arc<DispatchQueue>,
    config: RequestQueueConfig,
}

impl RequestQueue {
    pub(crate) fn new(
        config: RequestQueueConfig,
        cache_queue: Arc<DispatchQueue>,
        network_queue: Arc<DispatchQueue>,
    ) -> Self {
        Self {
            next_sequence: AtomicU64::new(1),
            current: Mutex::new(HashMap::new()),
            waiting: WaitingRegistry::new(),
            cache_queue,
            network_queue,
            config,
        }
    }

    /// Admit `item` and route it to the cache stage, the network stage, or
    /// the waiting registry.
    pub fn add<R: Request>(&self, mut item: WorkItem<R>) -> Arc<WorkItem<R>> {
        let sequence = self.next_sequence.fetch_add(1, Ordering::SeqCst);
        item.admit(sequence, self.config.default_retry);

        let item = Arc::new(item);
        let dispatch: Arc<dyn Dispatch> = item.clone();
        let in_flight = {
            let mut current = self.current.lock();
            current.insert(sequence, Arc::clone(&dispatch));
            current.len()
        };
        telemetry::record_admitted(in_flight);

        if !dispatch.should_cache() {
            self.network_queue.put(dispatch);
            return item;
        }

        let key = dispatch.cache_key().to_string();
        match self.waiting.register(&key, sequence, Arc::clone(&dispatch)) {
            DedupResult::Leader => self.cache_queue.put(dispatch),
            DedupResult::Parked { position } => {
                dispatch.state().add_marker("waiting-for-response");
                telemetry::record_parked();
                tracing::trace!(sequence, cache_key = %key, position, "request parked behind in-flight duplicate");
            }
        }
        item
    }

    /// Retire `item`. Only the first call per item has any effect.
    ///
    /// When the item led a single-flight group, its parked siblings go back
    /// to the cache stage, where they will usually find the leader's result.
    pub(crate) fn finish(&self, item: &dyn Dispatch, reason: &'static str) {
        let state = item.state();
        if !state.mark_finished(reason) {
            return;
        }

        let in_flight = {
            let mut current = self.current.lock();
            current.remove(&state.sequence());
            current.len()
        };
        telemetry::record_in_flight(in_flight);

        if !state.should_cache() {
            return;
        }
        if let Some(waiters) = self.waiting.release(state.cache_key(), state.sequence()) {
            if !waiters.is_empty() {
                tracing::trace!(
                    count = waiters.len(),
                    cache_key = %state.cache_key(),
                    "releasing waiting requests"
                );
            }
            for waiter in waiters {
                self.cache_queue.put(waiter);
            }
        }
    }

    /// Cancel every in-flight item matching `filter`.
    ///
    /// `filter` runs on a snapshot taken without holding the in-flight lock,
    /// so it may call back into the queue.
    pub fn cancel_all<F>(&self, filter: F)
    where
        F: Fn(&dyn Pending) -> bool,
    {
        let snapshot: Vec<Arc<dyn Dispatch>> = self.current.lock().values().cloned().collect();
        for item in snapshot {
            if filter(item.as_pending()) {
                item.cancel();
            }
        }
    }

    /// Cancel every in-flight item carrying `tag`.
    pub fn cancel_all_tag(&self, tag: &str) {
        self.cancel_all(|item| item.tag() == Some(tag));
    }

    /// Number of admitted items not yet finished.
    pub fn in_flight(&self) -> usize {
        self.current.lock().len()
    }

    /// Items parked behind the active flight for `cache_key`, if any.
    pub fn waiting_for(&self, cache_key: &str) -> Option<usize> {
        self.waiting.waiting(cache_key)
    }

    pub(crate) fn cache_queue(&self) -> &Arc<DispatchQueue> {
        &self.cache_queue
    }

    pub(crate) fn network_queue(&self) -> &Arc<DispatchQueue> {
        &self.network_queue
    }
}

#[cfg(test)]
#[path = "queue_tests.rs"]
mod tests;
