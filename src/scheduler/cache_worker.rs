//! Cache dispatcher: resolves items against the cache and routes them.
//!
//! One worker runs per engine. It initializes the cache on the blocking pool
//! before the first lookup, then takes items in dispatch order.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::queue::RequestQueue;
use crate::cache::Cache;
use crate::delivery::ResponseDelivery;
use crate::error::DispatchError;
use crate::network::NetworkResponse;
use crate::request::Dispatch;
use crate::telemetry::{self, CacheLookup};

/// Spawn the cache worker. Returns a handle for shutdown.
pub(crate) fn spawn_cache_worker(
    queue: Arc<RequestQueue>,
    cache: Arc<dyn Cache>,
    delivery: Arc<ResponseDelivery>,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        cache_loop(&queue, cache, &delivery, shutdown).await;
    })
}

async fn cache_loop(
    queue: &RequestQueue,
    cache: Arc<dyn Cache>,
    delivery: &ResponseDelivery,
    shutdown: CancellationToken,
) {
    let init = {
        let cache = Arc::clone(&cache);
        tokio::task::spawn_blocking(move || cache.initialize())
    };
    tokio::select! {
        biased;
        () = shutdown.cancelled() => {
            tracing::debug!("cache worker: shutdown before cache initialized");
            return;
        }
        result = init => {
            if let Err(e) = result {
                tracing::error!(error = %e, "cache initialization failed");
            }
        }
    }

    let cache_queue = Arc::clone(queue.cache_queue());
    loop {
        tokio::select! {
            biased;
            () = shutdown.cancelled() => {
                tracing::debug!("cache worker: shutdown signal received");
                break;
            }
            item = cache_queue.take() => {
                resolve(queue, cache.as_ref(), delivery, item);
            }
        }
    }
}

/// Route one item: miss or expired to the network stage, fresh hit to a
/// final delivery, stale hit to an intermediate delivery plus a refresh.
///
/// A panic from the cache or the response parser fails the item instead of
/// the worker.
pub(super) fn resolve(
    queue: &RequestQueue,
    cache: &dyn Cache,
    delivery: &ResponseDelivery,
    item: Arc<dyn Dispatch>,
) {
    let routed = catch_unwind(AssertUnwindSafe(|| {
        route(queue, cache, delivery, Arc::clone(&item));
    }));
    if let Err(payload) = routed {
        let error = DispatchError::from_panic(&*payload);
        tracing::error!(
            sequence = item.sequence(),
            cache_key = %item.cache_key(),
            error = %error,
            "cache stage panicked"
        );
        if !item.state().is_finished() {
            delivery.post_error(item, error);
        }
    }
}

fn route(
    queue: &RequestQueue,
    cache: &dyn Cache,
    delivery: &ResponseDelivery,
    item: Arc<dyn Dispatch>,
) {
    let state = item.state();
    state.add_marker("cache-queue-take");

    if item.is_canceled() {
        telemetry::record_discarded("cache");
        queue.finish(item.as_ref(), "cache-discard-canceled");
        return;
    }

    let Some(entry) = cache.get(state.cache_key()) else {
        state.add_marker("cache-miss");
        telemetry::record_cache_lookup(CacheLookup::Miss);
        queue.network_queue().put(item);
        return;
    };

    if entry.is_expired() {
        state.add_marker("cache-hit-expired");
        telemetry::record_cache_lookup(CacheLookup::Expired);
        state.set_cache_entry(Some(entry));
        queue.network_queue().put(item);
        return;
    }

    state.add_marker("cache-hit");
    let response = NetworkResponse::from_cache(&entry);
    let prepared = match Arc::clone(&item).prepare(&response) {
        Ok(prepared) => prepared,
        Err(error) => {
            tracing::warn!(
                sequence = state.sequence(),
                cache_key = %state.cache_key(),
                error = %error,
                "cached payload failed to parse; refetching"
            );
            telemetry::record_cache_lookup(CacheLookup::Corrupt);
            cache.invalidate(state.cache_key(), true);
            state.set_cache_entry(None);
            queue.network_queue().put(item);
            return;
        }
    };
    state.add_marker("cache-hit-parsed");

    if !entry.refresh_needed() {
        telemetry::record_cache_lookup(CacheLookup::Fresh);
        delivery.post_response(item, prepared.deliver, false, None);
        return;
    }

    state.add_marker("cache-hit-refresh-needed");
    telemetry::record_cache_lookup(CacheLookup::Stale);
    state.set_cache_entry(Some(entry));
    let network_queue = Arc::clone(queue.network_queue());
    let refresh = Arc::clone(&item);
    delivery.post_response(
        item,
        prepared.deliver,
        true,
        Some(Box::new(move || network_queue.put(refresh))),
    );
}
