use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::domain::{
    Balance, Order, OrderId, OrderNumber, OrderStatus, UpdateOutcome, UserId, WithdrawOutcome,
    Withdrawal,
};
use crate::error::Result;

/// Order persistence and the status state machine
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Insert `order` unless its number is taken.
    ///
    /// Returns the stored order (the existing one on collision) and whether it was created.
    async fn create(&self, order: &Order) -> Result<(Order, bool)>;

    /// Move an order forward to `status`, recording `accrual` when given.
    ///
    /// Same-rank targets are a no-op; lower-rank targets fail with
    /// `LoyaltyError::InvalidStateTransition`.
    async fn update(
        &self,
        id: OrderId,
        status: OrderStatus,
        accrual: Option<Decimal>,
    ) -> Result<UpdateOutcome>;

    async fn orders_by_user(&self, user_id: UserId) -> Result<Vec<Order>>;

    async fn orders_by_status(&self, statuses: &[OrderStatus]) -> Result<Vec<Order>>;

    async fn order_by_number(&self, number: &OrderNumber) -> Result<Option<Order>>;
}

/// Balance ledger persistence
#[async_trait]
pub trait BalanceStore: Send + Sync {
    /// Aggregate of settled accruals and withdrawals; zero when nothing matches
    async fn balance(&self, user_id: UserId) -> Result<Balance>;

    /// Record a withdrawal against `number` if its remaining balance covers `amount`.
    ///
    /// The check and the insert are atomic with respect to concurrent withdrawals.
    async fn withdraw(
        &self,
        user_id: UserId,
        number: &OrderNumber,
        amount: Decimal,
    ) -> Result<WithdrawOutcome>;

    async fn withdrawals_by_user(&self, user_id: UserId) -> Result<Vec<Withdrawal>>;
}
