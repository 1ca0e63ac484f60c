//! Network dispatcher pool: performs network attempts, writes the cache and
//! hands results to delivery.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use super::queue::RequestQueue;
use crate::cache::Cache;
use crate::delivery::ResponseDelivery;
use crate::error::DispatchError;
use crate::network::{Network, NetworkResponse};
use crate::request::Dispatch;
use crate::telemetry::{self, RequestSpan, SpanExt};

/// Collaborators shared by every network worker.
#[derive(Clone)]
pub(crate) struct NetworkStage {
    pub queue: Arc<RequestQueue>,
    pub network: Arc<dyn Network>,
    pub cache: Arc<dyn Cache>,
    pub delivery: Arc<ResponseDelivery>,
}

/// Spawn network worker `id`. Returns a handle for shutdown.
pub(crate) fn spawn_network_worker(
    id: usize,
    stage: NetworkStage,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        network_loop(id, &stage, shutdown).await;
    })
}

async fn network_loop(id: usize, stage: &NetworkStage, shutdown: CancellationToken) {
    let network_queue = Arc::clone(stage.queue.network_queue());
    loop {
        tokio::select! {
            biased;
            () = shutdown.cancelled() => {
                tracing::debug!(worker = id, "network worker: shutdown signal received");
                break;
            }
            item = network_queue.take() => {
                execute(stage, item).await;
            }
        }
    }
}

/// Run one network attempt for `item` and route the outcome.
///
/// A panic anywhere in the attempt fails the item with
/// [`DispatchError::Other`] and leaves the worker running.
pub(super) async fn execute(stage: &NetworkStage, item: Arc<dyn Dispatch>) {
    let outcome = AssertUnwindSafe(attempt(stage, Arc::clone(&item)))
        .catch_unwind()
        .await;
    if let Err(payload) = outcome {
        let error = DispatchError::from_panic(&*payload);
        tracing::error!(
            sequence = item.sequence(),
            cache_key = %item.cache_key(),
            error = %error,
            "network stage panicked"
        );
        if !item.state().is_finished() {
            stage.delivery.post_error(item, error);
        }
    }
}

async fn attempt(stage: &NetworkStage, item: Arc<dyn Dispatch>) {
    let state = item.state();
    state.add_marker("network-queue-take");

    if item.is_canceled() {
        discard(stage, &item);
        return;
    }

    let request = item.network_request();
    let span = RequestSpan::new(request.sequence, state.cache_key(), request.attempt);
    let start = Instant::now();
    let result = match tokio::time::timeout(
        request.timeout,
        stage.network.perform_request(&request),
    )
    .instrument(span.clone())
    .await
    {
        Ok(result) => result,
        Err(_elapsed) => Err(DispatchError::Timeout),
    };
    let latency = start.elapsed();
    span.record_result(&result);
    span.record("latency_ms", latency.as_millis() as u64);
    let outcome = match &result {
        Ok(response) if response.not_modified => "not_modified",
        Ok(_) => "success",
        Err(error) => error.kind(),
    };
    telemetry::record_network_attempt(outcome, latency);

    // The attempt is not aborted by cancellation, only its result.
    if item.is_canceled() {
        discard(stage, &item);
        return;
    }

    match result {
        Ok(response) => complete(stage, item, response),
        Err(error) if error.is_canceled() => discard(stage, &item),
        Err(error) if error.is_retryable() => retry_or_fail(stage, item, error),
        Err(error) => {
            let error = item.parse_network_error(error);
            stage.delivery.post_error(item, error);
        }
    }
}

fn discard(stage: &NetworkStage, item: &Arc<dyn Dispatch>) {
    telemetry::record_discarded("network");
    stage.queue.finish(item.as_ref(), "network-discard-cancelled");
}

fn complete(stage: &NetworkStage, item: Arc<dyn Dispatch>, response: NetworkResponse) {
    let state = item.state();
    state.add_marker("network-http-complete");

    // A 304 after a stale delivery: the cached payload already stands.
    if response.not_modified && state.has_had_response_delivered() {
        stage.queue.finish(item.as_ref(), "not-modified");
        return;
    }

    let response = match (response.not_modified, state.cache_entry()) {
        (true, Some(entry)) => response.merge_not_modified(&entry),
        _ => response,
    };

    let prepared = match Arc::clone(&item).prepare(&response) {
        Ok(prepared) => prepared,
        Err(error) => {
            stage.delivery.post_error(item, error);
            return;
        }
    };
    state.add_marker("network-parse-complete");

    if state.should_cache() {
        if let Some(entry) = prepared.cache_entry {
            stage.cache.put(state.cache_key(), entry);
            state.add_marker("network-cache-written");
        }
    }

    stage.delivery.post_response(item, prepared.deliver, false, None);
}

fn retry_or_fail(stage: &NetworkStage, item: Arc<dyn Dispatch>, error: DispatchError) {
    let state = item.state();
    let kind = error.kind();
    match state.retry(error) {
        Ok(()) => {
            state.add_marker("network-retry");
            telemetry::record_retry();
            tracing::debug!(
                sequence = state.sequence(),
                cache_key = %state.cache_key(),
                error = kind,
                attempt = state.attempt(),
                timeout_ms = state.current_timeout().as_millis() as u64,
                "retrying network request"
            );
            stage.queue.network_queue().put(item);
        }
        Err(error) => {
            state.add_marker("network-retry-exhausted");
            let error = item.parse_network_error(error);
            stage.delivery.post_error(item, error);
        }
    }
}
