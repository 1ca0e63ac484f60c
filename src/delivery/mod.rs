//! Result delivery on a single designated execution context.
//!
//! Workers never call `deliver`/`deliver_error` themselves. They post to a
//! [`ResponseDelivery`], which schedules the callback on an [`Executor`].
//! Both executors shipped here run tasks one at a time and in post order, so
//! an intermediate and a final delivery for one item are observed in order.

mod executor;

pub use executor::{DeliveryLoop, DeliveryThread, Executor, Task};

use std::sync::Arc;

use crate::error::DispatchError;
use crate::request::Dispatch;
use crate::scheduler::RequestQueue;
use crate::telemetry;

enum Outcome {
    Value(Box<dyn FnOnce() + Send>),
    Error(DispatchError),
}

/// Schedules completion callbacks and retires items afterwards.
pub(crate) struct ResponseDelivery {
    executor: Arc<dyn Executor>,
    queue: Arc<RequestQueue>,
}

impl ResponseDelivery {
    pub fn new(executor: Arc<dyn Executor>, queue: Arc<RequestQueue>) -> Self {
        Self { executor, queue }
    }

    /// Post a parsed value. Intermediate responses leave the item in flight;
    /// `followup` runs on the delivery context after the callback.
    pub fn post_response(
        &self,
        item: Arc<dyn Dispatch>,
        deliver: Box<dyn FnOnce() + Send>,
        intermediate: bool,
        followup: Option<Task>,
    ) {
        item.state().add_marker("post-response");
        self.schedule(item, Outcome::Value(deliver), intermediate, followup);
    }

    /// Post a terminal error.
    pub fn post_error(&self, item: Arc<dyn Dispatch>, error: DispatchError) {
        item.state().add_marker("post-error");
        self.schedule(item, Outcome::Error(error), false, None);
    }

    fn schedule(
        &self,
        item: Arc<dyn Dispatch>,
        outcome: Outcome,
        intermediate: bool,
        followup: Option<Task>,
    ) {
        item.state().mark_delivered();
        let mut retire = Retire {
            item,
            queue: Arc::clone(&self.queue),
            reason: Some("delivery-dropped"),
        };
        self.executor.execute(Box::new(move || {
            let item = Arc::clone(&retire.item);
            if item.is_canceled() {
                telemetry::record_discarded("delivery");
                retire.reason = Some("canceled-at-delivery");
                return;
            }

            if intermediate {
                retire.reason = Some("intermediate-abandoned");
            } else {
                retire.reason = Some("done");
            }
            match outcome {
                Outcome::Value(deliver) => {
                    telemetry::record_delivery(if intermediate { "intermediate" } else { "final" });
                    deliver();
                }
                Outcome::Error(error) => {
                    telemetry::record_delivery("error");
                    item.deliver_error(error);
                }
            }

            if intermediate {
                retire.reason = None;
                item.state().add_marker("intermediate-response");
            }
            drop(retire);

            if let Some(followup) = followup {
                followup();
            }
        }));
    }
}

/// Finishes the item when a delivery task ends, including when the executor
/// drops the task unrun or a callback panics. `reason: None` keeps the item
/// in flight.
struct Retire {
    item: Arc<dyn Dispatch>,
    queue: Arc<RequestQueue>,
    reason: Option<&'static str>,
}

impl Drop for Retire {
    fn drop(&mut self) {
        if let Some(reason) = self.reason {
            self.queue.finish(self.item.as_ref(), reason);
        }
    }
}
