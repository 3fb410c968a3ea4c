use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{OrderId, OrderNumber, UserId};

/// Derived balance; computed on read, never stored
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    pub current: Decimal,
    pub withdrawn: Decimal,
}

impl Balance {
    /// `current = settled accruals - withdrawals`, `withdrawn = withdrawals`
    pub fn derive(accrued: Decimal, withdrawn: Decimal) -> Self {
        Self {
            current: accrued - withdrawn,
            withdrawn,
        }
    }
}

/// Request to spend points funded by one order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WithdrawRequest {
    #[serde(rename = "order")]
    pub number: OrderNumber,
    #[serde(rename = "sum")]
    pub amount: Decimal,
}

impl WithdrawRequest {
    pub fn new(number: OrderNumber, amount: Decimal) -> Self {
        Self { number, amount }
    }
}

/// Recorded withdrawal; immutable once created
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Withdrawal {
    #[serde(skip)]
    pub id: i64,
    #[serde(skip)]
    pub order_id: OrderId,
    #[serde(rename = "order")]
    pub number: OrderNumber,
    #[serde(skip)]
    pub user_id: UserId,
    #[serde(rename = "sum")]
    pub amount: Decimal,
    pub processed_at: DateTime<Utc>,
}

/// Result of a withdrawal attempt that reached the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WithdrawOutcome {
    Accepted,
    /// Remaining balance of the funding order was lower than requested
    Insufficient { available: Decimal },
}

impl WithdrawOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, WithdrawOutcome::Accepted)
    }
}
