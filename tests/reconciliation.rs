//! End-to-end reconciliation against the in-memory store and a scripted provider.

use async_trait::async_trait;
use loyalty::accrual::{shared_client_factory, AccrualOutcome, AccrualProvider};
use loyalty::adapters::MemoryStore;
use loyalty::domain::{OrderNumber, OrderStatus, UserId};
use loyalty::error::{LoyaltyError, Result};
use loyalty::persistence::OrderStore;
use loyalty::services::{AccrualService, BalanceService, OrderService, PendingQueue};
use rust_decimal_macros::dec;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Replays queued outcomes per order number; answers `Unknown` once a script runs out.
#[derive(Default)]
struct ScriptedProvider {
    scripts: Mutex<HashMap<String, VecDeque<Result<AccrualOutcome>>>>,
    calls: AtomicUsize,
}

impl ScriptedProvider {
    fn script(&self, number: &str, outcomes: Vec<Result<AccrualOutcome>>) {
        self.scripts
            .lock()
            .unwrap()
            .insert(number.to_string(), outcomes.into());
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AccrualProvider for ScriptedProvider {
    async fn fetch(&self, number: &OrderNumber) -> Result<AccrualOutcome> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.scripts
            .lock()
            .unwrap()
            .get_mut(number.as_str())
            .and_then(|script| script.pop_front())
            .unwrap_or(Ok(AccrualOutcome::Unknown))
    }
}

fn processed(accrual: rust_decimal::Decimal) -> Result<AccrualOutcome> {
    Ok(AccrualOutcome::Resolved {
        status: OrderStatus::Processed,
        accrual: Some(accrual),
    })
}

async fn wait_for_status(store: &MemoryStore, number: &str, status: OrderStatus) {
    let number = OrderNumber::from(number);
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let order = store.order_by_number(&number).await.unwrap().unwrap();
            if order.status == status {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("order {} never reached {}", number, status));
}

#[tokio::test]
async fn registered_orders_are_resolved_and_credited() {
    let store = Arc::new(MemoryStore::new());
    let provider = Arc::new(ScriptedProvider::default());
    provider.script(
        "79927398713",
        vec![
            Ok(AccrualOutcome::Resolved {
                status: OrderStatus::Processing,
                accrual: None,
            }),
            processed(dec!(729.98)),
        ],
    );
    provider.script(
        "12345678903",
        vec![Ok(AccrualOutcome::Resolved {
            status: OrderStatus::Invalid,
            accrual: None,
        })],
    );

    let orders = OrderService::new(store.clone());
    orders.register("79927398713", UserId(1)).await.unwrap();
    orders.register("12345678903", UserId(1)).await.unwrap();

    let service = AccrualService::new(
        store.clone(),
        shared_client_factory(provider.clone()),
        Arc::new(PendingQueue::new()),
    );
    let handle = service
        .start(CancellationToken::new(), 4, Duration::from_millis(10))
        .await
        .unwrap();

    wait_for_status(&store, "79927398713", OrderStatus::Processed).await;
    wait_for_status(&store, "12345678903", OrderStatus::Invalid).await;
    handle.shutdown().await;

    let balance = BalanceService::new(store.clone()).get(UserId(1)).await.unwrap();
    assert_eq!(balance.current, dec!(729.98));
    assert_eq!(balance.withdrawn, dec!(0));

    let mine = orders.orders(UserId(1)).await.unwrap();
    assert!(mine.iter().all(|o| o.status.is_terminal()));
    // PROCESSING, PROCESSED, INVALID: each lookup handled by exactly one worker
    assert_eq!(service.stats().snapshot().resolved, 3);
}

#[tokio::test]
async fn rate_limited_order_is_retried_not_dropped() {
    let store = Arc::new(MemoryStore::new());
    let provider = Arc::new(ScriptedProvider::default());
    provider.script(
        "79927398713",
        vec![
            Ok(AccrualOutcome::RateLimited {
                retry_after: Duration::from_millis(30),
            }),
            processed(dec!(100)),
        ],
    );

    OrderService::new(store.clone())
        .register("79927398713", UserId(1))
        .await
        .unwrap();

    // A long poll interval leaves the requeue as the only path to a second lookup
    let service = AccrualService::new(
        store.clone(),
        shared_client_factory(provider.clone()),
        Arc::new(PendingQueue::new()),
    );
    let handle = service
        .start(CancellationToken::new(), 2, Duration::from_secs(3600))
        .await
        .unwrap();

    wait_for_status(&store, "79927398713", OrderStatus::Processed).await;
    handle.shutdown().await;

    assert_eq!(provider.calls(), 2);
    let stats = service.stats().snapshot();
    assert_eq!(stats.rate_limited, 1);
    assert_eq!(stats.polls, 1);
}

#[tokio::test]
async fn backing_off_order_is_not_handed_to_another_worker() {
    let store = Arc::new(MemoryStore::new());
    let provider = Arc::new(ScriptedProvider::default());
    provider.script(
        "79927398713",
        vec![Ok(AccrualOutcome::RateLimited {
            retry_after: Duration::from_secs(3600),
        })],
    );
    OrderService::new(store.clone())
        .register("79927398713", UserId(1))
        .await
        .unwrap();

    let queue = Arc::new(PendingQueue::new());
    let service = AccrualService::new(
        store.clone(),
        shared_client_factory(provider.clone()),
        queue.clone(),
    );
    let handle = service
        .start(CancellationToken::new(), 4, Duration::from_millis(10))
        .await
        .unwrap();

    // Twenty poll ticks while the only order is waiting out its Retry-After
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(service.stats().snapshot().polls > 1);
    assert_eq!(provider.calls(), 1);
    assert_eq!(queue.in_flight(), 1);

    handle.shutdown().await;
}

#[tokio::test]
async fn provider_failures_are_retried_on_next_poll() {
    let store = Arc::new(MemoryStore::new());
    let provider = Arc::new(ScriptedProvider::default());
    provider.script(
        "79927398713",
        vec![
            Err(LoyaltyError::AccrualProvider("503".to_string())),
            Err(LoyaltyError::UnknownProviderStatus("ARCHIVED".to_string())),
            processed(dec!(5)),
        ],
    );

    OrderService::new(store.clone())
        .register("79927398713", UserId(1))
        .await
        .unwrap();

    let service = AccrualService::new(
        store.clone(),
        shared_client_factory(provider.clone()),
        Arc::new(PendingQueue::new()),
    );
    let handle = service
        .start(CancellationToken::new(), 1, Duration::from_millis(10))
        .await
        .unwrap();

    wait_for_status(&store, "79927398713", OrderStatus::Processed).await;
    handle.shutdown().await;

    assert_eq!(service.stats().snapshot().failures, 2);
}

#[tokio::test]
async fn restarted_service_picks_up_unresolved_orders() {
    let store = Arc::new(MemoryStore::new());
    OrderService::new(store.clone())
        .register("79927398713", UserId(1))
        .await
        .unwrap();

    // First run never hears back about the order
    let silent = Arc::new(ScriptedProvider::default());
    let first = AccrualService::new(
        store.clone(),
        shared_client_factory(silent.clone()),
        Arc::new(PendingQueue::new()),
    );
    let handle = first
        .start(CancellationToken::new(), 2, Duration::from_millis(10))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    handle.shutdown().await;
    assert!(silent.calls() > 0);

    let provider = Arc::new(ScriptedProvider::default());
    provider.script("79927398713", vec![processed(dec!(42))]);
    let second = AccrualService::new(
        store.clone(),
        shared_client_factory(provider),
        Arc::new(PendingQueue::new()),
    );
    let handle = second
        .start(CancellationToken::new(), 2, Duration::from_millis(10))
        .await
        .unwrap();

    wait_for_status(&store, "79927398713", OrderStatus::Processed).await;
    handle.shutdown().await;
}

#[tokio::test]
async fn shutdown_releases_idle_and_backing_off_workers() {
    let store = Arc::new(MemoryStore::new());
    let provider = Arc::new(ScriptedProvider::default());
    provider.script(
        "79927398713",
        vec![Ok(AccrualOutcome::RateLimited {
            retry_after: Duration::from_secs(3600),
        })],
    );
    OrderService::new(store.clone())
        .register("79927398713", UserId(1))
        .await
        .unwrap();

    let queue = Arc::new(PendingQueue::new());
    let service = AccrualService::new(
        store.clone(),
        shared_client_factory(provider.clone()),
        queue.clone(),
    );
    let cancel = CancellationToken::new();
    let handle = service
        .start(cancel.clone(), 8, Duration::from_millis(10))
        .await
        .unwrap();

    // One worker is parked in a long backoff, the rest wait on an empty queue
    tokio::time::timeout(Duration::from_secs(5), async {
        while service.stats().snapshot().rate_limited == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("provider should have rate limited the order");

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(2), handle.shutdown())
        .await
        .expect("shutdown should not wait out the backoff");

    assert!(queue.is_stopped());
    let order = store
        .order_by_number(&OrderNumber::from("79927398713"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(order.status, OrderStatus::New);
}
