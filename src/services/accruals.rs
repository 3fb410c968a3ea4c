//! Accrual reconciliation service
//!
//! Owns the poller and the worker pool. `start` returns once every task is
//! running; `AccrualHandle::shutdown` drains them so the caller can close the
//! database right after.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info};

use crate::accrual::ClientFactory;
use crate::error::{LoyaltyError, Result};
use crate::persistence::OrderStore;

use super::pending::PendingQueue;
use super::poller::Poller;
use super::worker::{AccrualStats, AccrualStatsSnapshot, Worker};

pub struct AccrualService {
    orders: Arc<dyn OrderStore>,
    factory: ClientFactory,
    queue: Arc<PendingQueue>,
    stats: Arc<AccrualStats>,
}

impl AccrualService {
    pub fn new(orders: Arc<dyn OrderStore>, factory: ClientFactory, queue: Arc<PendingQueue>) -> Self {
        Self {
            orders,
            factory,
            queue,
            stats: Arc::new(AccrualStats::default()),
        }
    }

    pub fn queue(&self) -> Arc<PendingQueue> {
        self.queue.clone()
    }

    pub fn stats(&self) -> Arc<AccrualStats> {
        self.stats.clone()
    }

    /// Launch the poller and `worker_count` workers
    ///
    /// Every provider client is built before any task is spawned, so a
    /// construction failure leaves nothing running.
    pub async fn start(
        &self,
        cancel: CancellationToken,
        worker_count: usize,
        poll_interval: Duration,
    ) -> Result<AccrualHandle> {
        if worker_count == 0 {
            return Err(LoyaltyError::Validation(
                "worker count must be positive".to_string(),
            ));
        }
        if poll_interval.is_zero() {
            return Err(LoyaltyError::Validation(
                "poll interval must be positive".to_string(),
            ));
        }
        if self.queue.is_stopped() {
            return Err(LoyaltyError::Internal(
                "pending queue already stopped".to_string(),
            ));
        }

        let providers = (0..worker_count)
            .map(|_| (self.factory)())
            .collect::<Result<Vec<_>>>()?;

        let cancel = cancel.child_token();
        let tracker = TaskTracker::new();
        let (ready_tx, mut ready_rx) = mpsc::channel::<()>(worker_count + 1);

        for (id, provider) in providers.into_iter().enumerate() {
            let worker = Worker::new(
                id,
                self.queue.clone(),
                self.orders.clone(),
                provider,
                self.stats.clone(),
                cancel.clone(),
            );
            let ready = ready_tx.clone();
            tracker.spawn(async move {
                let _ = ready.send(()).await;
                drop(ready);
                worker.run().await;
            });
        }

        let poller = Poller::new(
            self.orders.clone(),
            self.queue.clone(),
            self.stats.clone(),
            poll_interval,
        );
        {
            let ready = ready_tx;
            let cancel = cancel.clone();
            tracker.spawn(async move {
                let _ = ready.send(()).await;
                drop(ready);
                poller.run(cancel).await;
            });
        }

        // Cancellation releases workers blocked on an empty queue
        {
            let queue = self.queue.clone();
            let cancel = cancel.clone();
            tracker.spawn(async move {
                cancel.cancelled().await;
                queue.stop();
            });
        }
        tracker.close();

        let mut running = 0;
        while running < worker_count + 1 {
            if ready_rx.recv().await.is_none() {
                cancel.cancel();
                return Err(LoyaltyError::Internal(
                    "accrual task exited before reporting ready".to_string(),
                ));
            }
            running += 1;
        }

        info!(
            "Accrual reconciliation running ({} workers, poll every {:?})",
            worker_count, poll_interval
        );

        Ok(AccrualHandle {
            cancel,
            queue: self.queue.clone(),
            tracker,
            stats: self.stats.clone(),
        })
    }
}

/// Running reconciliation tasks
pub struct AccrualHandle {
    cancel: CancellationToken,
    queue: Arc<PendingQueue>,
    tracker: TaskTracker,
    stats: Arc<AccrualStats>,
}

impl AccrualHandle {
    pub fn stats(&self) -> AccrualStatsSnapshot {
        self.stats.snapshot()
    }

    /// True once every task has returned
    pub fn is_finished(&self) -> bool {
        self.tracker.is_closed() && self.tracker.is_empty()
    }

    /// Cancel all tasks and wait for in-flight work to finish
    pub async fn shutdown(self) {
        debug!("Stopping accrual reconciliation");
        self.cancel.cancel();
        self.queue.stop();
        self.tracker.wait().await;
        info!("Accrual reconciliation stopped: {}", self.stats.snapshot());
    }
}
