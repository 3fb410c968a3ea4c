use rust_decimal::Decimal;
use thiserror::Error;

/// Main error type for the loyalty service
#[derive(Error, Debug)]
pub enum LoyaltyError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    // Network errors
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // Accrual provider errors
    #[error("Accrual provider error: {0}")]
    AccrualProvider(String),

    #[error("Unknown accrual status: {0}")]
    UnknownProviderStatus(String),

    // State machine errors
    #[error("Invalid state transition: from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    // Order errors
    #[error("Order not found: {0}")]
    OrderNotFound(String),

    #[error("Order {0} belongs to another user")]
    OrderOwnerMismatch(String),

    #[error("Order {0} already registered")]
    OrderAlreadyRegistered(String),

    #[error("Order {0} already registered by another user")]
    OrderNumberConflict(String),

    #[error("Invalid order number: {0}")]
    InvalidOrderNumber(String),

    // Ledger errors
    #[error("Insufficient funds: requested {requested}, available {available}")]
    InsufficientFunds {
        requested: Decimal,
        available: Decimal,
    },

    // Validation errors
    #[error("Validation failed: {0}")]
    Validation(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl LoyaltyError {
    /// Business rule violations are reported to the caller and never retried.
    pub fn is_domain_violation(&self) -> bool {
        matches!(
            self,
            LoyaltyError::InvalidStateTransition { .. }
                | LoyaltyError::OrderNotFound(_)
                | LoyaltyError::OrderOwnerMismatch(_)
                | LoyaltyError::OrderAlreadyRegistered(_)
                | LoyaltyError::OrderNumberConflict(_)
                | LoyaltyError::InvalidOrderNumber(_)
                | LoyaltyError::InsufficientFunds { .. }
                | LoyaltyError::Validation(_)
        )
    }

    /// Postgres serialization failure (40001) or deadlock (40P01).
    pub fn is_serialization_failure(&self) -> bool {
        match self {
            LoyaltyError::Database(sqlx::Error::Database(db)) => {
                matches!(db.code().as_deref(), Some("40001") | Some("40P01"))
            }
            _ => false,
        }
    }
}

/// Result type alias for LoyaltyError
pub type Result<T> = std::result::Result<T, LoyaltyError>;
