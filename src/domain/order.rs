use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Internal surrogate key of an order
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(pub i64);

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Owning user identity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Caller-supplied order number, globally unique across users
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderNumber(String);

impl OrderNumber {
    pub fn new(number: impl Into<String>) -> Self {
        Self(number.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OrderNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for OrderNumber {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Order status
///
/// `NEW → PROCESSING → {INVALID, PROCESSED}`; the two terminal states share a rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderStatus {
    New,
    Processing,
    Invalid,
    Processed,
}

impl OrderStatus {
    /// Statuses the poller keeps picking up
    pub const PENDING: [OrderStatus; 2] = [OrderStatus::New, OrderStatus::Processing];

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::New => "NEW",
            OrderStatus::Processing => "PROCESSING",
            OrderStatus::Invalid => "INVALID",
            OrderStatus::Processed => "PROCESSED",
        }
    }

    /// Position in the monotonic status order
    pub fn rank(&self) -> u8 {
        match self {
            OrderStatus::New => 0,
            OrderStatus::Processing => 1,
            OrderStatus::Invalid | OrderStatus::Processed => 2,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.rank() == 2
    }

    /// Classify a requested move from `self` to `target`
    pub fn transition_to(&self, target: OrderStatus) -> StatusTransition {
        match target.rank().cmp(&self.rank()) {
            std::cmp::Ordering::Greater => StatusTransition::Advance,
            std::cmp::Ordering::Equal => StatusTransition::Unchanged,
            std::cmp::Ordering::Less => StatusTransition::Descent,
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for OrderStatus {
    type Error = String;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s.to_uppercase().as_str() {
            "NEW" => Ok(OrderStatus::New),
            "PROCESSING" => Ok(OrderStatus::Processing),
            "INVALID" => Ok(OrderStatus::Invalid),
            "PROCESSED" => Ok(OrderStatus::Processed),
            _ => Err(format!("Unknown order status: {}", s)),
        }
    }
}

/// Outcome of comparing a stored status with a requested one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusTransition {
    /// Strictly forward; persisted
    Advance,
    /// Same rank; skipped
    Unchanged,
    /// Backwards; rejected
    Descent,
}

/// Result of a status update that did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    Applied,
    Unchanged,
}

/// Order registered by a user for accrual
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    #[serde(skip)]
    pub id: OrderId,
    pub number: OrderNumber,
    #[serde(skip)]
    pub user_id: UserId,
    pub status: OrderStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accrual: Option<Decimal>,
    pub uploaded_at: DateTime<Utc>,
}

impl Order {
    /// A freshly registered order; the store assigns the id
    pub fn new(number: OrderNumber, user_id: UserId) -> Self {
        Self {
            id: OrderId(0),
            number,
            user_id,
            status: OrderStatus::New,
            accrual: None,
            uploaded_at: Utc::now(),
        }
    }

    pub fn is_settled(&self) -> bool {
        self.status.is_terminal()
    }
}
