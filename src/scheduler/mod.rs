//! Request scheduling for GG-DISPATCH.
//!
//! Admission and single-flight grouping, the priority-ordered dispatch
//! queues, and the cache and network worker stages that drain them.

mod cache_worker;
mod dedup;
mod dispatch_queue;
mod network_worker;
mod priority;
mod queue;

#[cfg(test)]
pub(crate) mod testing;

pub use dedup::{DedupResult, WaitingRegistry};
pub use priority::{dispatch_order, PrioritizedItem, Priority, PriorityQueue};
pub use queue::{RequestQueue, RequestQueueConfig};

pub(crate) use cache_worker::spawn_cache_worker;
pub(crate) use dispatch_queue::DispatchQueue;
pub(crate) use network_worker::{spawn_network_worker, NetworkStage};
