//! Dispatch metrics through the `metrics` facade.
//!
//! Nothing is exported from here; without an installed recorder every call
//! is a no-op.

use std::time::Duration;

use metrics::{counter, gauge, histogram};

/// Metric names as constants for consistency.
pub mod names {
    pub const ADMITTED_TOTAL: &str = "gg_dispatch_admitted_total";
    pub const PARKED_TOTAL: &str = "gg_dispatch_parked_total";
    pub const IN_FLIGHT: &str = "gg_dispatch_in_flight";
    pub const QUEUE_DEPTH: &str = "gg_dispatch_queue_depth";
    pub const CACHE_LOOKUPS_TOTAL: &str = "gg_dispatch_cache_lookups_total";
    pub const NETWORK_REQUESTS_TOTAL: &str = "gg_dispatch_network_requests_total";
    pub const NETWORK_LATENCY_MS: &str = "gg_dispatch_network_latency_ms";
    pub const RETRIES_TOTAL: &str = "gg_dispatch_retries_total";
    pub const DISCARDED_TOTAL: &str = "gg_dispatch_discarded_total";
    pub const DELIVERIES_TOTAL: &str = "gg_dispatch_deliveries_total";
}

/// Outcome of a cache-stage lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheLookup {
    Miss,
    Expired,
    Fresh,
    Stale,
    Corrupt,
}

impl CacheLookup {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Miss => "miss",
            Self::Expired => "expired",
            Self::Fresh => "fresh",
            Self::Stale => "stale",
            Self::Corrupt => "corrupt",
        }
    }
}

/// Record an admission and the resulting in-flight count.
pub fn record_admitted(in_flight: usize) {
    counter!(names::ADMITTED_TOTAL).increment(1);
    record_in_flight(in_flight);
}

/// Record an item parked behind an in-flight duplicate.
pub fn record_parked() {
    counter!(names::PARKED_TOTAL).increment(1);
}

pub fn record_in_flight(count: usize) {
    gauge!(names::IN_FLIGHT).set(count as f64);
}

/// Record the depth of a dispatch queue after a put.
pub fn record_queue_depth(queue: &'static str, depth: usize) {
    gauge!(names::QUEUE_DEPTH, "queue" => queue).set(depth as f64);
}

pub fn record_cache_lookup(outcome: CacheLookup) {
    counter!(names::CACHE_LOOKUPS_TOTAL, "outcome" => outcome.as_str()).increment(1);
}

/// Record one network attempt. `outcome` is `success`, `not_modified` or an
/// error kind.
pub fn record_network_attempt(outcome: &'static str, latency: Duration) {
    counter!(names::NETWORK_REQUESTS_TOTAL, "outcome" => outcome).increment(1);
    histogram!(names::NETWORK_LATENCY_MS).record(latency.as_secs_f64() * 1000.0);
}

pub fn record_retry() {
    counter!(names::RETRIES_TOTAL).increment(1);
}

/// Record an item dropped without delivery at `stage`.
pub fn record_discarded(stage: &'static str) {
    counter!(names::DISCARDED_TOTAL, "stage" => stage).increment(1);
}

/// Record a delivery of `kind` (`intermediate`, `final` or `error`).
pub fn record_delivery(kind: &'static str) {
    counter!(names::DELIVERIES_TOTAL, "kind" => kind).increment(1);
}
