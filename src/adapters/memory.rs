//! In-process store with the same contracts as `PostgresStore`.
//!
//! A single mutex serializes every operation, which gives withdrawals the
//! same all-or-nothing balance check the database gets from SERIALIZABLE.

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::domain::{
    Balance, Order, OrderId, OrderNumber, OrderStatus, StatusTransition, UpdateOutcome, UserId,
    WithdrawOutcome, Withdrawal,
};
use crate::error::{LoyaltyError, Result};
use crate::persistence::{BalanceStore, OrderStore};

#[derive(Default)]
struct Tables {
    orders: Vec<Order>,
    withdrawals: Vec<Withdrawal>,
    next_order_id: i64,
    next_withdrawal_id: i64,
}

impl Tables {
    fn order_by_number(&self, number: &OrderNumber) -> Option<&Order> {
        self.orders.iter().find(|o| &o.number == number)
    }

    fn withdrawn_from(&self, order_id: OrderId) -> Decimal {
        self.withdrawals
            .iter()
            .filter(|w| w.order_id == order_id)
            .map(|w| w.amount)
            .sum()
    }
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored orders
    pub async fn order_count(&self) -> usize {
        self.tables.lock().await.orders.len()
    }
}

#[async_trait]
impl OrderStore for MemoryStore {
    async fn create(&self, order: &Order) -> Result<(Order, bool)> {
        let mut tables = self.tables.lock().await;

        if let Some(existing) = tables.order_by_number(&order.number) {
            debug!(order_number = %order.number, "Order number already taken");
            return Ok((existing.clone(), false));
        }

        tables.next_order_id += 1;
        let stored = Order {
            id: OrderId(tables.next_order_id),
            ..order.clone()
        };
        tables.orders.push(stored.clone());
        Ok((stored, true))
    }

    async fn update(
        &self,
        id: OrderId,
        status: OrderStatus,
        accrual: Option<Decimal>,
    ) -> Result<UpdateOutcome> {
        let mut tables = self.tables.lock().await;

        let order = tables
            .orders
            .iter_mut()
            .find(|o| o.id == id)
            .ok_or_else(|| LoyaltyError::OrderNotFound(id.to_string()))?;

        match order.status.transition_to(status) {
            StatusTransition::Unchanged => Ok(UpdateOutcome::Unchanged),
            StatusTransition::Descent => {
                warn!(order_id = %id, "Refusing to move order from {} to {}", order.status, status);
                Err(LoyaltyError::InvalidStateTransition {
                    from: order.status.to_string(),
                    to: status.to_string(),
                })
            }
            StatusTransition::Advance => {
                order.status = status;
                if accrual.is_some() {
                    order.accrual = accrual;
                }
                Ok(UpdateOutcome::Applied)
            }
        }
    }

    async fn orders_by_user(&self, user_id: UserId) -> Result<Vec<Order>> {
        let tables = self.tables.lock().await;
        let mut orders: Vec<Order> = tables
            .orders
            .iter()
            .filter(|o| o.user_id == user_id)
            .cloned()
            .collect();
        orders.sort_by_key(|o| o.uploaded_at);
        Ok(orders)
    }

    async fn orders_by_status(&self, statuses: &[OrderStatus]) -> Result<Vec<Order>> {
        let tables = self.tables.lock().await;
        let mut orders: Vec<Order> = tables
            .orders
            .iter()
            .filter(|o| statuses.contains(&o.status))
            .cloned()
            .collect();
        orders.sort_by_key(|o| o.uploaded_at);
        Ok(orders)
    }

    async fn order_by_number(&self, number: &OrderNumber) -> Result<Option<Order>> {
        Ok(self.tables.lock().await.order_by_number(number).cloned())
    }
}

#[async_trait]
impl BalanceStore for MemoryStore {
    async fn balance(&self, user_id: UserId) -> Result<Balance> {
        let tables = self.tables.lock().await;

        let accrued: Decimal = tables
            .orders
            .iter()
            .filter(|o| o.user_id == user_id && o.is_settled())
            .filter_map(|o| o.accrual)
            .sum();
        let withdrawn: Decimal = tables
            .withdrawals
            .iter()
            .filter(|w| w.user_id == user_id)
            .map(|w| w.amount)
            .sum();

        Ok(Balance::derive(accrued, withdrawn))
    }

    async fn withdraw(
        &self,
        user_id: UserId,
        number: &OrderNumber,
        amount: Decimal,
    ) -> Result<WithdrawOutcome> {
        let mut tables = self.tables.lock().await;

        let order = tables
            .order_by_number(number)
            .ok_or_else(|| LoyaltyError::OrderNotFound(number.to_string()))?;
        if order.user_id != user_id {
            return Err(LoyaltyError::OrderOwnerMismatch(number.to_string()));
        }

        let order_id = order.id;
        let remaining = order.accrual.unwrap_or_default() - tables.withdrawn_from(order_id);
        if remaining < amount {
            return Ok(WithdrawOutcome::Insufficient {
                available: remaining,
            });
        }

        tables.next_withdrawal_id += 1;
        let withdrawal = Withdrawal {
            id: tables.next_withdrawal_id,
            order_id,
            number: number.clone(),
            user_id,
            amount,
            processed_at: Utc::now(),
        };
        tables.withdrawals.push(withdrawal);
        Ok(WithdrawOutcome::Accepted)
    }

    async fn withdrawals_by_user(&self, user_id: UserId) -> Result<Vec<Withdrawal>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .withdrawals
            .iter()
            .filter(|w| w.user_id == user_id)
            .cloned()
            .collect())
    }
}
