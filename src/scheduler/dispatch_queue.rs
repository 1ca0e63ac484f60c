//! Blocking priority queue shared by a pipeline stage's workers.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;

use super::priority::PriorityQueue;
use crate::request::Dispatch;

/// Unbounded, priority-ordered hand-off between pipeline stages.
///
/// `put` never blocks. `take` parks the calling worker until an item is
/// available; workers stop waiting by racing `take` against their shutdown
/// token, so the queue itself has no quit state.
pub(crate) struct DispatchQueue {
    name: &'static str,
    items: Mutex<PriorityQueue<Arc<dyn Dispatch>>>,
    notify: Notify,
}

impl DispatchQueue {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            items: Mutex::new(PriorityQueue::new()),
            notify: Notify::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn put(&self, item: Arc<dyn Dispatch>) {
        let priority = item.state().priority();
        let sequence = item.state().sequence();
        let depth = {
            let mut items = self.items.lock();
            items.push(item, priority, sequence);
            items.len()
        };
        crate::telemetry::record_queue_depth(self.name, depth);
        self.notify.notify_one();
    }

    /// Pop the next item without waiting.
    pub fn try_take(&self) -> Option<Arc<dyn Dispatch>> {
        self.items.lock().pop()
    }

    /// Wait for the next item in dispatch order.
    pub async fn take(&self) -> Arc<dyn Dispatch> {
        loop {
            // Register interest before checking so a put between the check
            // and the await still wakes us.
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(item) = self.try_take() {
                return item;
            }
            notified.await;
        }
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }
}

impl std::fmt::Debug for DispatchQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchQueue")
            .field("name", &self.name)
            .field("len", &self.len())
            .finish()
    }
}
