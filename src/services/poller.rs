//! Poller - periodically rediscovers unresolved orders

use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::OrderStatus;
use crate::persistence::OrderStore;

use super::pending::PendingQueue;
use super::worker::AccrualStats;

pub struct Poller {
    orders: Arc<dyn OrderStore>,
    queue: Arc<PendingQueue>,
    stats: Arc<AccrualStats>,
    interval: Duration,
}

impl Poller {
    pub fn new(
        orders: Arc<dyn OrderStore>,
        queue: Arc<PendingQueue>,
        stats: Arc<AccrualStats>,
        interval: Duration,
    ) -> Self {
        Self {
            orders,
            queue,
            stats,
            interval,
        }
    }

    /// Tick until cancelled. The first scan runs immediately.
    pub async fn run(self, cancel: CancellationToken) {
        info!("Starting accrual poller (interval: {:?})", self.interval);

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.poll_once().await;
                }
            }
        }

        info!("Accrual poller stopped");
    }

    /// Enqueue every order still in a non-terminal status
    ///
    /// # Returns
    /// Number of orders newly queued; 0 when the scan failed.
    pub async fn poll_once(&self) -> usize {
        match self.orders.orders_by_status(&OrderStatus::PENDING).await {
            Ok(orders) => {
                let found = orders.len();
                let added = self.queue.enqueue(orders);
                self.stats.record_poll(added);
                if found > 0 {
                    debug!("Poll found {} unresolved orders, queued {}", found, added);
                }
                added
            }
            Err(e) => {
                self.stats.record_failure();
                warn!("Pending order scan failed, retrying next tick: {}", e);
                0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MemoryStore;
    use crate::domain::{Order, OrderId, OrderNumber, UserId};
    use crate::error::LoyaltyError;
    use crate::persistence::MockOrderStore;
    use rust_decimal_macros::dec;

    async fn seed(store: &MemoryStore) {
        for number in ["79927398713", "12345678903", "4561261212345467"] {
            store
                .create(&Order::new(OrderNumber::from(number), UserId(1)))
                .await
                .unwrap();
        }
        let done = store
            .order_by_number(&OrderNumber::from("4561261212345467"))
            .await
            .unwrap()
            .unwrap();
        store
            .update(done.id, OrderStatus::Processed, Some(dec!(10)))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_poll_queues_only_unresolved_orders() {
        let store = Arc::new(MemoryStore::new());
        seed(&store).await;

        let queue = Arc::new(PendingQueue::new());
        let stats = Arc::new(AccrualStats::default());
        let poller = Poller::new(store, queue.clone(), stats.clone(), Duration::from_secs(1));

        assert_eq!(poller.poll_once().await, 2);
        // Still queued from the previous scan
        assert_eq!(poller.poll_once().await, 0);
        assert_eq!(queue.len(), 2);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.polls, 2);
        assert_eq!(snapshot.enqueued, 2);
    }

    #[tokio::test]
    async fn test_failed_scan_is_retried_next_tick() {
        let mut store = MockOrderStore::new();
        let mut scans = 0;
        store.expect_orders_by_status().times(2).returning(move |_| {
            scans += 1;
            if scans == 1 {
                return Err(LoyaltyError::Database(sqlx::Error::PoolTimedOut));
            }
            let mut order = Order::new(OrderNumber::from("79927398713"), UserId(1));
            order.id = OrderId(1);
            Ok(vec![order])
        });

        let queue = Arc::new(PendingQueue::new());
        let stats = Arc::new(AccrualStats::default());
        let poller = Poller::new(
            Arc::new(store),
            queue.clone(),
            stats.clone(),
            Duration::from_secs(1),
        );

        assert_eq!(poller.poll_once().await, 0);
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.failures, 1);
        assert_eq!(snapshot.polls, 0);
        assert!(queue.is_empty());

        assert_eq!(poller.poll_once().await, 1);
        assert_eq!(stats.snapshot().polls, 1);
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_cancel() {
        let store = Arc::new(MemoryStore::new());
        let queue = Arc::new(PendingQueue::new());
        let stats = Arc::new(AccrualStats::default());
        let poller = Poller::new(store, queue, stats.clone(), Duration::from_secs(2));

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(poller.run(cancel.clone()));

        tokio::time::sleep(Duration::from_secs(5)).await;
        cancel.cancel();
        handle.await.unwrap();

        // Ticks at 0s, 2s and 4s
        assert_eq!(stats.snapshot().polls, 3);
    }
}
