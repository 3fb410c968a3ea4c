//! Balance ledger operations

use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::domain::{Balance, OrderNumber, UserId, WithdrawOutcome, Withdrawal};
use crate::error::{LoyaltyError, Result};
use crate::persistence::BalanceStore;
use crate::validation::validate_amount;

pub struct BalanceService {
    ledger: Arc<dyn BalanceStore>,
}

impl BalanceService {
    pub fn new(ledger: Arc<dyn BalanceStore>) -> Self {
        Self { ledger }
    }

    pub async fn get(&self, user_id: UserId) -> Result<Balance> {
        self.ledger.balance(user_id).await
    }

    /// Spend `amount` points funded by order `number`
    ///
    /// Fails with `Validation` for a non-positive amount, `OrderNotFound`,
    /// `OrderOwnerMismatch` or `InsufficientFunds`. Nothing is recorded on failure.
    #[instrument(skip(self), fields(user_id = %user_id, order_number = %number))]
    pub async fn withdraw(
        &self,
        user_id: UserId,
        number: &OrderNumber,
        amount: Decimal,
    ) -> Result<()> {
        validate_amount(amount)?;

        match self.ledger.withdraw(user_id, number, amount).await? {
            WithdrawOutcome::Accepted => {
                info!("Withdrawal of {} recorded", amount);
                Ok(())
            }
            WithdrawOutcome::Insufficient { available } => {
                warn!("Insufficient funds: requested {}, available {}", amount, available);
                Err(LoyaltyError::InsufficientFunds {
                    requested: amount,
                    available,
                })
            }
        }
    }

    /// A user's withdrawals, oldest first
    pub async fn withdrawals(&self, user_id: UserId) -> Result<Vec<Withdrawal>> {
        self.ledger.withdrawals_by_user(user_id).await
    }
}
