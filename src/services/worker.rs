//! Accrual worker - drains the pending queue against the accrual provider

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::accrual::{AccrualOutcome, AccrualProvider};
use crate::domain::{Order, UpdateOutcome};
use crate::persistence::OrderStore;

use super::pending::PendingQueue;

/// Counters shared by the poller and all workers
#[derive(Debug, Default)]
pub struct AccrualStats {
    polls: AtomicU64,
    enqueued: AtomicU64,
    resolved: AtomicU64,
    rate_limited: AtomicU64,
    failures: AtomicU64,
    unknown: AtomicU64,
}

/// Point-in-time copy of [`AccrualStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AccrualStatsSnapshot {
    pub polls: u64,
    pub enqueued: u64,
    pub resolved: u64,
    pub rate_limited: u64,
    pub failures: u64,
    pub unknown: u64,
}

impl AccrualStats {
    pub fn snapshot(&self) -> AccrualStatsSnapshot {
        AccrualStatsSnapshot {
            polls: self.polls.load(Ordering::Relaxed),
            enqueued: self.enqueued.load(Ordering::Relaxed),
            resolved: self.resolved.load(Ordering::Relaxed),
            rate_limited: self.rate_limited.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            unknown: self.unknown.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn record_poll(&self, enqueued: usize) {
        self.polls.fetch_add(1, Ordering::Relaxed);
        self.enqueued.fetch_add(enqueued as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    fn record_resolved(&self) {
        self.resolved.fetch_add(1, Ordering::Relaxed);
    }

    fn record_rate_limited(&self) {
        self.rate_limited.fetch_add(1, Ordering::Relaxed);
    }

    fn record_unknown(&self) {
        self.unknown.fetch_add(1, Ordering::Relaxed);
    }
}

impl std::fmt::Display for AccrualStatsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Accrual[polls={}, enq={}, resolved={}, limited={}, failed={}, unknown={}]",
            self.polls, self.enqueued, self.resolved, self.rate_limited, self.failures, self.unknown
        )
    }
}

/// One consumer of the pending queue
pub struct Worker {
    id: usize,
    queue: Arc<PendingQueue>,
    orders: Arc<dyn OrderStore>,
    provider: Arc<dyn AccrualProvider>,
    stats: Arc<AccrualStats>,
    cancel: CancellationToken,
}

impl Worker {
    pub fn new(
        id: usize,
        queue: Arc<PendingQueue>,
        orders: Arc<dyn OrderStore>,
        provider: Arc<dyn AccrualProvider>,
        stats: Arc<AccrualStats>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            id,
            queue,
            orders,
            provider,
            stats,
            cancel,
        }
    }

    /// Consume orders until the queue is stopped
    pub async fn run(self) {
        debug!(worker = self.id, "Accrual worker started");

        while let Some(order) = self.queue.dequeue().await {
            self.process(order).await;
        }

        debug!(worker = self.id, "Accrual worker stopped");
    }

    /// Handle one dequeued order and release it back to the queue
    ///
    /// A rate-limited order goes straight back to the queue tail without ever
    /// being released, so no poll can hand it to another worker meanwhile.
    pub(crate) async fn process(&self, order: Order) {
        let id = order.id;
        match self.resolve(order).await {
            Some(order) => {
                if !self.queue.requeue(order) {
                    debug!(worker = self.id, "Queue stopped, rate-limited order left for next start");
                }
            }
            None => self.queue.complete(id),
        }
    }

    /// Look the order up and apply the answer. Failures are logged and left to the next poll.
    ///
    /// Returns the order when it should be retried after a rate-limit wait.
    async fn resolve(&self, order: Order) -> Option<Order> {
        let outcome = match self.provider.fetch(&order.number).await {
            Ok(outcome) => outcome,
            Err(e) => {
                self.stats.record_failure();
                warn!(
                    worker = self.id,
                    order_number = %order.number,
                    "Accrual lookup failed: {}", e
                );
                return None;
            }
        };

        match outcome {
            AccrualOutcome::Resolved { status, accrual } => {
                match self.orders.update(order.id, status, accrual).await {
                    Ok(UpdateOutcome::Applied) => {
                        self.stats.record_resolved();
                        info!(
                            worker = self.id,
                            order_number = %order.number,
                            "Order moved to {} (accrual: {:?})", status, accrual
                        );
                    }
                    Ok(UpdateOutcome::Unchanged) => {
                        debug!(worker = self.id, order_number = %order.number, "Order status unchanged");
                    }
                    Err(e) if e.is_domain_violation() => {
                        debug!(worker = self.id, order_number = %order.number, "Stale provider status ignored: {}", e);
                    }
                    Err(e) => {
                        self.stats.record_failure();
                        warn!(worker = self.id, order_number = %order.number, "Failed to store accrual: {}", e);
                    }
                }
                None
            }
            AccrualOutcome::Unknown => {
                self.stats.record_unknown();
                debug!(worker = self.id, order_number = %order.number, "Provider has no record yet");
                None
            }
            AccrualOutcome::RateLimited { retry_after } => {
                self.stats.record_rate_limited();
                debug!(
                    worker = self.id,
                    order_number = %order.number,
                    "Backing off for {:?}", retry_after
                );

                tokio::select! {
                    _ = tokio::time::sleep(retry_after) => Some(order),
                    _ = self.cancel.cancelled() => {
                        debug!(worker = self.id, "Backoff abandoned on shutdown");
                        None
                    }
                }
            }
        }
    }
}
