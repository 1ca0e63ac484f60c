//! Single-threaded execution contexts for delivery callbacks.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::thread::JoinHandle;

use parking_lot::Mutex;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio_util::sync::CancellationToken;

/// A unit of work scheduled on the delivery context.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Runs delivery tasks one at a time, in submission order.
///
/// An executor may drop a task instead of running it, for example after
/// shutdown. The item behind a dropped task is finished without callbacks.
pub trait Executor: Send + Sync {
    fn execute(&self, task: Task);
}

fn run_task(task: Task) {
    if catch_unwind(AssertUnwindSafe(task)).is_err() {
        tracing::error!("delivery callback panicked");
    }
}

/// Dedicated OS thread draining a channel of delivery tasks.
pub struct DeliveryThread {
    tx: Mutex<Option<UnboundedSender<Task>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl DeliveryThread {
    /// Spawn the thread under `name`.
    pub fn spawn(name: &str) -> std::io::Result<Self> {
        let (tx, mut rx) = unbounded_channel::<Task>();
        let handle = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                while let Some(task) = rx.blocking_recv() {
                    run_task(task);
                }
                tracing::debug!("delivery thread drained");
            })?;
        Ok(Self {
            tx: Mutex::new(Some(tx)),
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Stop accepting tasks, run what is already queued, and join the thread.
    ///
    /// Must not be called from a delivery callback.
    pub fn shutdown(&self) {
        self.tx.lock().take();
        if let Some(handle) = self.handle.lock().take() {
            if handle.join().is_err() {
                tracing::error!("delivery thread panicked");
            }
        }
    }
}

impl Executor for DeliveryThread {
    fn execute(&self, task: Task) {
        let sent = match self.tx.lock().as_ref() {
            Some(tx) => tx.send(task).is_ok(),
            None => false,
        };
        if !sent {
            tracing::warn!("delivery thread stopped; dropping task");
        }
    }
}

impl Drop for DeliveryThread {
    fn drop(&mut self) {
        // Closing the channel lets the thread exit on its own.
        self.tx.lock().take();
    }
}

/// Host-driven delivery loop.
///
/// Tasks queue up until the host pumps them with [`run_pending`] (e.g. once
/// per frame of an event loop) or hands the loop to [`run`]. Callbacks then
/// execute on whichever thread pumps, one at a time.
///
/// [`run_pending`]: DeliveryLoop::run_pending
/// [`run`]: DeliveryLoop::run
pub struct DeliveryLoop {
    tx: UnboundedSender<Task>,
    rx: Mutex<Option<UnboundedReceiver<Task>>>,
}

impl DeliveryLoop {
    pub fn new() -> Self {
        let (tx, rx) = unbounded_channel();
        Self { tx, rx: Mutex::new(Some(rx)) }
    }

    /// Run every task queued so far. Returns how many ran.
    ///
    /// Returns 0 while [`run`](DeliveryLoop::run) owns the loop. Must not be
    /// called from a delivery callback.
    pub fn run_pending(&self) -> usize {
        let mut guard = self.rx.lock();
        let Some(rx) = guard.as_mut() else { return 0 };
        let mut ran = 0;
        while let Ok(task) = rx.try_recv() {
            run_task(task);
            ran += 1;
        }
        ran
    }

    /// Run tasks as they arrive until `shutdown` fires.
    pub async fn run(&self, shutdown: CancellationToken) {
        let Some(mut rx) = self.rx.lock().take() else {
            tracing::warn!("delivery loop already running");
            return;
        };
        loop {
            tokio::select! {
                biased;
                () = shutdown.cancelled() => break,
                task = rx.recv() => match task {
                    Some(task) => run_task(task),
                    None => break,
                },
            }
        }
        *self.rx.lock() = Some(rx);
    }
}

impl Default for DeliveryLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl Executor for DeliveryLoop {
    fn execute(&self, task: Task) {
        if self.tx.send(task).is_err() {
            tracing::warn!("delivery loop closed; dropping task");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{mpsc, Arc};
    use std::time::Duration;

    #[test]
    fn loop_runs_tasks_in_order_when_pumped() {
        let executor = DeliveryLoop::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let order = Arc::clone(&order);
            executor.execute(Box::new(move || order.lock().push(i)));
        }
        assert!(order.lock().is_empty());
        assert_eq!(executor.run_pending(), 3);
        assert_eq!(*order.lock(), vec![0, 1, 2]);
        assert_eq!(executor.run_pending(), 0);
    }

    #[test]
    fn panicking_task_does_not_stop_the_loop() {
        let executor = DeliveryLoop::new();
        let count = Arc::new(AtomicUsize::new(0));
        executor.execute(Box::new(|| panic!("callback failure")));
        let c = Arc::clone(&count);
        executor.execute(Box::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(executor.run_pending(), 2);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn run_stops_on_shutdown() {
        let executor = Arc::new(DeliveryLoop::new());
        let shutdown = CancellationToken::new();
        let count = Arc::new(AtomicUsize::new(0));

        let runner = {
            let executor = Arc::clone(&executor);
            let shutdown = shutdown.clone();
            tokio::spawn(async move { executor.run(shutdown).await })
        };
        let c = Arc::clone(&count);
        executor.execute(Box::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        }));

        for _ in 0..100 {
            if count.load(Ordering::SeqCst) == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(1), runner).await.unwrap().unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn thread_runs_tasks_on_named_thread() {
        let executor = DeliveryThread::spawn("gg-dispatch-delivery-test").unwrap();
        let (tx, rx) = mpsc::channel();
        executor.execute(Box::new(move || {
            let name = std::thread::current().name().map(str::to_string);
            tx.send(name).unwrap();
        }));
        let name = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(name.as_deref(), Some("gg-dispatch-delivery-test"));

        executor.shutdown();
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        executor.execute(Box::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
