//! Bounded work queue with an unbounded overflow buffer.
//!
//! Producers never block: [`WorkQueue::send`] tries the bounded primary
//! buffer first and parks the item in the overflow buffer when it is full.
//! The overflow buffer is drained opportunistically by
//! [`WorkQueue::retry_fallback`], which the sweeper calls on a timer.
//!
//! [`WorkQueue::consume`] runs a consumer pool whose parallelism is capped by
//! a semaphore, independently of the buffer capacity.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinSet;
use uuid::Uuid;

use crate::error::{DispatchError, QueueError};
use crate::lifecycle::ShutdownSignal;

/// Anything that can travel through a [`WorkQueue`].
pub trait QueueItem: Send + 'static {
    /// Identifier used in diagnostics (overflow, handler failures).
    fn item_id(&self) -> Uuid;
}

/// Per-item processing step run by the consumers of a queue.
#[async_trait]
pub trait Handler<T>: Send + Sync + 'static {
    async fn handle(&self, item: T) -> Result<(), DispatchError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Item is in the primary buffer.
    Queued,
    /// Primary buffer was full, item is in the overflow buffer.
    Overflowed,
    /// Queue has shut down, item was discarded.
    Closed,
}

/// Type-erased view used by the sweeper.
pub trait Sweepable: Send + Sync {
    fn name(&self) -> &'static str;
    fn count_overflow(&self) -> usize;
    fn retry_fallback(&self) -> usize;
}

pub struct WorkQueue<T> {
    name: &'static str,
    sender: mpsc::Sender<T>,
    receiver: Mutex<Option<mpsc::Receiver<T>>>,
    overflow: Mutex<VecDeque<T>>,
}

impl<T: QueueItem> WorkQueue<T> {
    /// `capacity` must be non-zero.
    pub fn new(name: &'static str, capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity);

        Self {
            name,
            sender,
            receiver: Mutex::new(Some(receiver)),
            overflow: Mutex::new(VecDeque::new()),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn send(&self, item: T) -> SendOutcome {
        match self.sender.try_send(item) {
            Ok(()) => SendOutcome::Queued,
            Err(TrySendError::Full(item)) => {
                let id = item.item_id();
                let depth = {
                    let mut overflow = self.lock_overflow();
                    overflow.push_back(item);
                    overflow.len()
                };
                tracing::info!(
                    queue = self.name,
                    item_id = %id,
                    overflow = depth,
                    "Queue full, message parked in overflow"
                );
                SendOutcome::Overflowed
            }
            Err(TrySendError::Closed(item)) => {
                tracing::warn!(
                    queue = self.name,
                    item_id = %item.item_id(),
                    "Queue closed, discarding message"
                );
                SendOutcome::Closed
            }
        }
    }

    /// Moves every overflowed item that currently fits into the primary
    /// buffer. Items that do not fit stay in the overflow buffer, in order,
    /// and the pass continues with the next one. Returns the number moved.
    pub fn retry_fallback(&self) -> usize {
        let mut overflow = self.lock_overflow();
        let pending = overflow.len();
        let mut moved = 0;

        for _ in 0..pending {
            let Some(item) = overflow.pop_front() else {
                break;
            };

            match self.sender.try_send(item) {
                Ok(()) => moved += 1,
                Err(TrySendError::Full(item)) | Err(TrySendError::Closed(item)) => {
                    overflow.push_back(item);
                }
            }
        }

        if moved > 0 {
            tracing::debug!(
                queue = self.name,
                moved,
                remaining = overflow.len(),
                "Drained overflow into primary buffer"
            );
        }

        moved
    }

    pub fn count_overflow(&self) -> usize {
        self.lock_overflow().len()
    }

    /// Runs `workers` concurrent consumers until `shutdown` fires.
    ///
    /// On shutdown no further item is admitted, the primary buffer is closed,
    /// and the call returns once every in-flight handler has finished.
    /// Whatever is still buffered or overflowed at that point is discarded.
    pub async fn consume<H>(
        &self,
        mut shutdown: ShutdownSignal,
        workers: usize,
        handler: Arc<H>,
    ) -> Result<(), QueueError>
    where
        H: Handler<T> + ?Sized,
    {
        if workers == 0 {
            return Err(QueueError::NoWorkers(self.name));
        }

        let mut receiver = self
            .receiver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(QueueError::AlreadyConsumed(self.name))?;

        let permits = Arc::new(Semaphore::new(workers));
        let mut in_flight = JoinSet::new();

        tracing::info!(queue = self.name, workers, "Starting consumers");

        loop {
            let permit = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                permit = permits.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let item = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                item = receiver.recv() => match item {
                    Some(item) => item,
                    None => break,
                },
            };

            let handler = Arc::clone(&handler);
            let name = self.name;
            in_flight.spawn(async move {
                let _permit = permit;
                let id = item.item_id();
                if let Err(e) = handler.handle(item).await {
                    tracing::warn!(
                        queue = name,
                        item_id = %id,
                        error = %e,
                        "Failed to process message"
                    );
                }
            });

            while let Some(finished) = in_flight.try_join_next() {
                if let Err(e) = finished {
                    tracing::error!(queue = self.name, error = %e, "Consumer task aborted");
                }
            }
        }

        receiver.close();

        while let Some(finished) = in_flight.join_next().await {
            if let Err(e) = finished {
                tracing::error!(queue = self.name, error = %e, "Consumer task aborted");
            }
        }

        let mut buffered = 0usize;
        while receiver.try_recv().is_ok() {
            buffered += 1;
        }
        let overflowed = {
            let mut overflow = self.lock_overflow();
            let n = overflow.len();
            overflow.clear();
            n
        };

        tracing::info!(
            queue = self.name,
            discarded_buffered = buffered,
            discarded_overflow = overflowed,
            "Consumers stopped"
        );

        Ok(())
    }

    fn lock_overflow(&self) -> MutexGuard<'_, VecDeque<T>> {
        self.overflow.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T: QueueItem> Sweepable for WorkQueue<T> {
    fn name(&self) -> &'static str {
        self.name
    }

    fn count_overflow(&self) -> usize {
        WorkQueue::count_overflow(self)
    }

    fn retry_fallback(&self) -> usize {
        WorkQueue::retry_fallback(self)
    }
}
