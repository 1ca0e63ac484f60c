//! Span utilities for dispatch tracing.

use tracing::{info_span, Span};

/// Extension trait for adding context to spans.
pub trait SpanExt {
    /// Record the result of an operation into the span.
    fn record_result<T, E>(&self, result: &Result<T, E>)
    where
        E: std::fmt::Display;
}

impl SpanExt for Span {
    fn record_result<T, E>(&self, result: &Result<T, E>)
    where
        E: std::fmt::Display,
    {
        match result {
            Ok(_) => {
                self.record("status", "ok");
            }
            Err(e) => {
                self.record("status", "error");
                self.record("error.message", e.to_string().as_str());
            }
        }
    }
}

/// Factory for per-attempt network spans.
pub struct RequestSpan;

impl RequestSpan {
    /// Create the span wrapping one network attempt of a work item.
    ///
    /// `status`, `error.message` and `latency_ms` start empty and are filled
    /// in once the attempt completes.
    pub fn new(sequence: u64, cache_key: &str, attempt: u32) -> Span {
        info_span!(
            "dispatch_request",
            sequence,
            cache_key = %cache_key,
            attempt,
            status = tracing::field::Empty,
            error.message = tracing::field::Empty,
            latency_ms = tracing::field::Empty,
        )
    }
}
