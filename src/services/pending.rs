//! Pending queue - deduplicated FIFO of orders awaiting accrual resolution

use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;
use tokio::sync::Notify;
use tracing::debug;

use crate::domain::{Order, OrderId};

#[derive(Default)]
struct Inner {
    orders: VecDeque<Order>,
    /// Queued plus in-flight orders
    tracked: HashSet<OrderId>,
    stopped: bool,
}

/// Shared work queue between the poller and the worker pool
///
/// An order is tracked from the moment it is queued until the worker that
/// dequeued it calls [`PendingQueue::complete`] (or hands it back with
/// [`PendingQueue::requeue`]). While tracked, `enqueue` ignores it, so a
/// poll never gives a second worker an order that is still being handled.
#[derive(Default)]
pub struct PendingQueue {
    inner: Mutex<Inner>,
    notify: Notify,
}

impl PendingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append orders not already tracked, waking one consumer per new order
    ///
    /// # Returns
    /// Number of orders actually added. Always 0 after `stop`.
    pub fn enqueue(&self, orders: impl IntoIterator<Item = Order>) -> usize {
        let added = {
            let mut inner = self.lock();
            if inner.stopped {
                return 0;
            }

            let mut added = 0;
            for order in orders {
                if inner.tracked.insert(order.id) {
                    inner.orders.push_back(order);
                    added += 1;
                }
            }
            added
        };

        for _ in 0..added {
            self.notify.notify_one();
        }
        if added > 0 {
            debug!("Enqueued {} pending orders", added);
        }
        added
    }

    /// Wait for the next order
    ///
    /// The order stays tracked until the caller completes or requeues it.
    /// Returns `None` once the queue is stopped, including for callers that
    /// were already waiting.
    pub async fn dequeue(&self) -> Option<Order> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register before checking state so a concurrent enqueue or stop
            // cannot slip between the check and the wait.
            notified.as_mut().enable();

            {
                let mut inner = self.lock();
                if inner.stopped {
                    return None;
                }
                if let Some(order) = inner.orders.pop_front() {
                    return Some(order);
                }
            }

            notified.await;
        }
    }

    /// Put an in-flight order back at the tail without releasing it
    ///
    /// # Returns
    /// `false` if the queue is stopped and the order was discarded.
    pub fn requeue(&self, order: Order) -> bool {
        {
            let mut inner = self.lock();
            if inner.stopped {
                return false;
            }
            inner.tracked.insert(order.id);
            inner.orders.push_back(order);
        }
        self.notify.notify_one();
        true
    }

    /// Release an order handed out by `dequeue` so later polls can queue it again
    pub fn complete(&self, id: OrderId) {
        self.lock().tracked.remove(&id);
    }

    /// Close the queue and release every waiting consumer. Idempotent.
    pub fn stop(&self) {
        {
            let mut inner = self.lock();
            if inner.stopped {
                return;
            }
            inner.stopped = true;
            inner.orders.clear();
            inner.tracked.clear();
        }
        self.notify.notify_waiters();
        debug!("Pending queue stopped");
    }

    /// Orders being handled by a worker right now
    pub fn in_flight(&self) -> usize {
        let inner = self.lock();
        inner.tracked.len().saturating_sub(inner.orders.len())
    }

    pub fn len(&self) -> usize {
        self.lock().orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().orders.is_empty()
    }

    pub fn is_stopped(&self) -> bool {
        self.lock().stopped
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // Every critical section leaves the state consistent, so a poisoned
        // lock is still usable.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}
