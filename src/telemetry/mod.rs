//! Telemetry for GG-DISPATCH.
//!
//! Structured logging setup, per-attempt tracing spans and metrics recorders.
//! Nothing here exports data on its own; the host installs subscribers and
//! recorders.

mod logging;
mod metrics;
mod spans;

pub use logging::{init_logging, LogConfig, LogError, LogFormat};
pub use metrics::{
    names, record_admitted, record_cache_lookup, record_delivery, record_discarded,
    record_in_flight, record_network_attempt, record_parked, record_queue_depth, record_retry,
    CacheLookup,
};
pub use spans::{RequestSpan, SpanExt};
