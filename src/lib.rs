//! GG-DISPATCH
//!
//! An asynchronous request-dispatch engine. It deduplicates identical
//! in-flight work, serves cached results while refreshing them in the
//! background, retries transient failures, and delivers every result on one
//! designated execution context.
//!
//! # Pipeline
//!
//! - **Admission**: [`RequestQueue`] assigns a sequence, tracks the item as
//!   in flight and parks duplicates behind the first item for a cache key.
//! - **Cache stage**: one worker resolves items against the [`Cache`].
//! - **Network stage**: a pool of workers calls the [`Network`], writes the
//!   cache and retries under each item's [`RetryPolicy`].
//! - **Delivery**: callbacks run on an [`Executor`], one at a time.
//!
//! Sockets, body formats and cache storage belong to the host's
//! [`Network`] and [`Cache`] implementations.

pub mod cache;
pub mod config;
pub mod delivery;
pub mod error;
pub mod network;
pub mod request;
pub mod scheduler;
pub mod telemetry;

use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub use cache::{Cache, CacheEntry, MemoryCache, MemoryCacheConfig, NoCache};
pub use delivery::{DeliveryLoop, DeliveryThread, Executor};
pub use error::DispatchError;
pub use network::{BasicNetwork, HttpStack, Method, Network, NetworkRequest, NetworkResponse};
pub use request::{
    DefaultRetryPolicy, Parsed, Pending, Request, RetryConfig, RetryPolicy, StringRequest,
    WorkItem,
};
pub use scheduler::{Priority, RequestQueue, RequestQueueConfig};

use delivery::ResponseDelivery;
use scheduler::{spawn_cache_worker, spawn_network_worker, DispatchQueue, NetworkStage};

/// Engine configuration.
#[derive(Debug, Clone, Serialize)]
pub struct EngineConfig {
    /// Network workers to run. Zero means one per CPU.
    pub network_threads: usize,
    /// Retry parameters for items without their own policy.
    pub default_retry: RetryConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            network_threads: 4,
            default_retry: RetryConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn resolved_network_threads(&self) -> usize {
        match self.network_threads {
            0 => num_cpus::get().max(1),
            n => n,
        }
    }
}

struct Workers {
    shutdown: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

/// The dispatch engine: admission queue, worker stages and delivery.
///
/// Construct one per host and share it by reference or `Arc`.
pub struct Engine {
    config: EngineConfig,
    queue: Arc<RequestQueue>,
    cache: Arc<dyn Cache>,
    network: Arc<dyn Network>,
    delivery: Arc<ResponseDelivery>,
    workers: Mutex<Workers>,
}

impl Engine {
    /// Create an engine. No work runs until [`start`](Engine::start).
    pub fn new(
        config: EngineConfig,
        cache: Arc<dyn Cache>,
        network: Arc<dyn Network>,
        executor: Arc<dyn Executor>,
    ) -> Self {
        let queue = Arc::new(RequestQueue::new(
            RequestQueueConfig { default_retry: config.default_retry },
            Arc::new(DispatchQueue::new("cache")),
            Arc::new(DispatchQueue::new("network")),
        ));
        let delivery = Arc::new(ResponseDelivery::new(executor, Arc::clone(&queue)));
        Self {
            config,
            queue,
            cache,
            network,
            delivery,
            workers: Mutex::new(Workers {
                shutdown: CancellationToken::new(),
                handles: Vec::new(),
            }),
        }
    }

    /// Spawn the cache worker and the network pool, stopping any workers
    /// from a previous start first.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    pub fn start(&self) {
        let mut workers = self.workers.lock();
        workers.shutdown.cancel();

        let shutdown = CancellationToken::new();
        let threads = self.config.resolved_network_threads();
        let mut handles = Vec::with_capacity(threads + 1);
        handles.push(spawn_cache_worker(
            Arc::clone(&self.queue),
            Arc::clone(&self.cache),
            Arc::clone(&self.delivery),
            shutdown.clone(),
        ));
        let stage = NetworkStage {
            queue: Arc::clone(&self.queue),
            network: Arc::clone(&self.network),
            cache: Arc::clone(&self.cache),
            delivery: Arc::clone(&self.delivery),
        };
        for id in 0..threads {
            handles.push(spawn_network_worker(id, stage.clone(), shutdown.clone()));
        }

        tracing::info!(network_threads = threads, "dispatch engine started");
        *workers = Workers { shutdown, handles };
    }

    /// Signal every worker to stop. Queued items stay queued and are picked
    /// up by the next [`start`](Engine::start).
    pub fn stop(&self) {
        self.workers.lock().shutdown.cancel();
    }

    /// Stop the workers and wait for them to exit.
    pub async fn shutdown(&self) {
        let handles = {
            let mut workers = self.workers.lock();
            workers.shutdown.cancel();
            std::mem::take(&mut workers.handles)
        };
        for result in futures::future::join_all(handles).await {
            if let Err(e) = result {
                tracing::error!(error = %e, "dispatch worker failed");
            }
        }
        tracing::info!("dispatch engine stopped");
    }

    pub fn is_running(&self) -> bool {
        let workers = self.workers.lock();
        !workers.handles.is_empty() && !workers.shutdown.is_cancelled()
    }

    /// Admit a work item. Results arrive through the request's own
    /// `deliver`/`deliver_error` on the delivery context.
    pub fn add<R: Request>(&self, item: WorkItem<R>) -> Arc<WorkItem<R>> {
        self.queue.add(item)
    }

    /// Cancel every in-flight item matching `filter`.
    pub fn cancel_all<F>(&self, filter: F)
    where
        F: Fn(&dyn Pending) -> bool,
    {
        self.queue.cancel_all(filter);
    }

    /// Cancel every in-flight item tagged `tag`.
    pub fn cancel_all_tag(&self, tag: &str) {
        self.queue.cancel_all_tag(tag);
    }

    pub fn cache(&self) -> &Arc<dyn Cache> {
        &self.cache
    }

    pub fn queue(&self) -> &Arc<RequestQueue> {
        &self.queue
    }

    pub fn in_flight(&self) -> usize {
        self.queue.in_flight()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.workers.lock().shutdown.cancel();
    }
}
