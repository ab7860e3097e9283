use crate::error::{DispatchError, Result};
use crate::types::SendTask;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::{Mutex, mpsc};
use tokio::time::{Duration, Instant};

/// FIFO hand-off between any number of producers and the single engine
/// consumer.
///
/// `enqueue` is synchronous and never waits, so it can be called from request
/// handlers on any thread. Tasks enqueued before the consumer attaches are
/// buffered until `startup_window` has elapsed; after that the queue refuses
/// work until a consumer shows up. Once a consumer has attached the queue
/// accepts for the rest of its lifetime, even if the consumer later stops.
pub struct DispatchQueue {
    tx: mpsc::UnboundedSender<SendTask>,
    rx: Mutex<mpsc::UnboundedReceiver<SendTask>>,
    depth: AtomicUsize,
    consumer_attached: AtomicBool,
    created_at: Instant,
    startup_window: Duration,
}

impl DispatchQueue {
    pub fn new(startup_window: Duration) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Mutex::new(rx),
            depth: AtomicUsize::new(0),
            consumer_attached: AtomicBool::new(false),
            created_at: Instant::now(),
            startup_window,
        }
    }

    /// Returns the queue depth including the new task.
    pub fn enqueue(&self, task: SendTask) -> Result<usize> {
        if !self.consumer_attached.load(Ordering::Acquire)
            && self.created_at.elapsed() >= self.startup_window
        {
            return Err(DispatchError::EngineNotReady(format!(
                "consumer did not start within {:?}",
                self.startup_window
            )));
        }
        let depth = self.depth.fetch_add(1, Ordering::AcqRel) + 1;
        if self.tx.send(task).is_err() {
            self.depth.fetch_sub(1, Ordering::AcqRel);
            return Err(DispatchError::EngineNotReady(
                "dispatch queue is closed".to_string(),
            ));
        }
        Ok(depth)
    }

    pub fn mark_consumer_attached(&self) {
        self.consumer_attached.store(true, Ordering::Release);
    }

    pub fn consumer_attached(&self) -> bool {
        self.consumer_attached.load(Ordering::Acquire)
    }

    /// Waits for the next task. Cancel-safe: dropping the future before it
    /// resolves loses nothing.
    pub async fn next(&self) -> Option<SendTask> {
        let mut rx = self.rx.lock().await;
        let task = rx.recv().await?;
        self.depth.fetch_sub(1, Ordering::AcqRel);
        Some(task)
    }

    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.depth() == 0
    }
}
