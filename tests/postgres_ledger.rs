//! Ledger checks against a live PostgreSQL.
//!
//! Run with `DATABASE_URL=postgres://... cargo test --test postgres_ledger -- --ignored`.

use loyalty::adapters::PostgresStore;
use loyalty::domain::{Order, OrderNumber, OrderStatus, UpdateOutcome, UserId, WithdrawOutcome};
use loyalty::error::LoyaltyError;
use loyalty::persistence::{BalanceStore, OrderStore};
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

async fn store() -> PostgresStore {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for ignored tests");
    let store = PostgresStore::new(&url, 10).await.expect("connect");
    store.migrate().await.expect("migrate");
    store
}

/// Numbers and user ids unique per run so tests do not collide on a shared database
fn unique(prefix: u64) -> (String, UserId) {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos() as u64;
    let user = (nanos % 1_000_000_000) as i64 + prefix as i64 * 1_000_000_000;
    (format!("{}{}", prefix, nanos), UserId(user))
}

#[tokio::test]
#[ignore]
async fn status_updates_are_monotonic() {
    let store = store().await;
    let (number, user) = unique(1);

    let (order, created) = store
        .create(&Order::new(OrderNumber::new(number.clone()), user))
        .await
        .unwrap();
    assert!(created);

    let (_, created) = store
        .create(&Order::new(OrderNumber::new(number), UserId(user.0 + 1)))
        .await
        .unwrap();
    assert!(!created);

    assert_eq!(
        store.update(order.id, OrderStatus::Processing, None).await.unwrap(),
        UpdateOutcome::Applied
    );
    assert_eq!(
        store
            .update(order.id, OrderStatus::Processed, Some(dec!(100)))
            .await
            .unwrap(),
        UpdateOutcome::Applied
    );
    assert_eq!(
        store.update(order.id, OrderStatus::Invalid, None).await.unwrap(),
        UpdateOutcome::Unchanged
    );
    assert!(matches!(
        store.update(order.id, OrderStatus::New, None).await,
        Err(LoyaltyError::InvalidStateTransition { .. })
    ));

    let stored = store.order_by_number(&order.number).await.unwrap().unwrap();
    assert_eq!(stored.status, OrderStatus::Processed);
    assert_eq!(stored.accrual, Some(dec!(100)));
}

#[tokio::test]
#[ignore]
async fn balance_reflects_withdrawals() {
    let store = store().await;
    let (number, user) = unique(2);
    let number = OrderNumber::new(number);

    let (order, _) = store.create(&Order::new(number.clone(), user)).await.unwrap();
    store
        .update(order.id, OrderStatus::Processed, Some(dec!(100)))
        .await
        .unwrap();

    assert!(store.withdraw(user, &number, dec!(30)).await.unwrap().is_accepted());
    assert!(store.withdraw(user, &number, dec!(20)).await.unwrap().is_accepted());

    let balance = store.balance(user).await.unwrap();
    assert_eq!(balance.current, dec!(50));
    assert_eq!(balance.withdrawn, dec!(50));
    assert_eq!(store.withdrawals_by_user(user).await.unwrap().len(), 2);

    assert!(matches!(
        store.withdraw(UserId(user.0 + 1), &number, dec!(1)).await,
        Err(LoyaltyError::OrderOwnerMismatch(_))
    ));
}

#[tokio::test]
#[ignore]
async fn concurrent_withdrawals_never_overdraw() {
    let store = Arc::new(store().await);
    let (number, user) = unique(3);
    let number = OrderNumber::new(number);

    let (order, _) = store.create(&Order::new(number.clone(), user)).await.unwrap();
    store
        .update(order.id, OrderStatus::Processed, Some(dec!(100)))
        .await
        .unwrap();

    let attempts: Vec<_> = (0..8)
        .map(|_| {
            let store = store.clone();
            let number = number.clone();
            tokio::spawn(async move { store.withdraw(user, &number, dec!(60)).await })
        })
        .collect();
    let results = futures::future::join_all(attempts).await;

    let mut accepted = 0;
    for result in results {
        match result.unwrap() {
            Ok(WithdrawOutcome::Accepted) => accepted += 1,
            Ok(WithdrawOutcome::Insufficient { .. }) => {}
            // Exhausted serialization retries leave the ledger untouched
            Err(e) => assert!(e.is_serialization_failure(), "unexpected error: {}", e),
        }
    }

    assert_eq!(accepted, 1);
    assert_eq!(store.balance(user).await.unwrap().withdrawn, dec!(60));
}
