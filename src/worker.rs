//! Bounded work queue with one dedicated consumer thread.
//!
//! Callers wrap independent RPC calls (or any other work) as items and push
//! them; the consumer thread pops one at a time and runs it. A handful of
//! workers fans a large batch of calls over a small number of threads
//! without serializing unrelated work onto one of them.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::error::{ChannelError, Result};

/// Default queue capacity.
pub const DEFAULT_WORKER_CAPACITY: usize = 100;

/// One unit of work for a [`Worker`].
pub trait WorkItem: Send + 'static {
    /// Run the work. Invoked exactly once, on the worker's thread.
    fn process(self);
}

/// Bounded FIFO owned by one consumer thread.
pub struct Worker<T: WorkItem> {
    queue: Option<SyncSender<T>>,
    thread: Option<JoinHandle<()>>,
    cancel: Arc<AtomicBool>,
}

impl<T: WorkItem> Worker<T> {
    /// Start a worker with the default queue capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_WORKER_CAPACITY)
    }

    /// Start a worker whose queue holds at most `capacity` items.
    pub fn with_capacity(capacity: usize) -> Self {
        let (queue, items) = sync_channel(capacity);
        let cancel = Arc::new(AtomicBool::new(false));

        let consumer_cancel = Arc::clone(&cancel);
        let thread = std::thread::spawn(move || consume(items, consumer_cancel));

        Self {
            queue: Some(queue),
            thread: Some(thread),
            cancel,
        }
    }

    /// Enqueue an item and wake the consumer.
    ///
    /// Blocks while the queue is full. Fails with
    /// [`ChannelError::WorkerShutdown`] once the worker has been shut down.
    pub fn push(&self, item: T) -> Result<()> {
        match &self.queue {
            Some(queue) => queue.send(item).map_err(|_| ChannelError::WorkerShutdown),
            None => Err(ChannelError::WorkerShutdown),
        }
    }

    /// Stop the worker and join its thread.
    ///
    /// Further pushes fail immediately. With `wait_for_drain` the consumer
    /// finishes every queued item first; without it, only the item already
    /// in flight completes and the rest are discarded.
    pub fn shutdown(&mut self, wait_for_drain: bool) {
        let Some(queue) = self.queue.take() else {
            return;
        };
        if !wait_for_drain {
            self.cancel.store(true, Ordering::Release);
        }
        // Closing the queue is what wakes an idle consumer.
        drop(queue);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl<T: WorkItem> Default for Worker<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: WorkItem> Drop for Worker<T> {
    fn drop(&mut self) {
        self.shutdown(false);
    }
}

/// Consumer loop: wait for the next item or queue closure.
fn consume<T: WorkItem>(items: Receiver<T>, cancel: Arc<AtomicBool>) {
    while let Ok(item) = items.recv() {
        if cancel.load(Ordering::Acquire) {
            break;
        }
        item.process();
    }
}
