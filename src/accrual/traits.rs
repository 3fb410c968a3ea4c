use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

use crate::domain::{OrderNumber, OrderStatus};
use crate::error::{LoyaltyError, Result};

/// Status as reported by the accrual provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ProviderStatus {
    Registered,
    Processing,
    Invalid,
    Processed,
}

impl ProviderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Registered => "REGISTERED",
            Self::Processing => "PROCESSING",
            Self::Invalid => "INVALID",
            Self::Processed => "PROCESSED",
        }
    }

    /// Map onto the order status state machine
    pub fn to_canonical(self) -> OrderStatus {
        match self {
            Self::Registered => OrderStatus::New,
            Self::Processing => OrderStatus::Processing,
            Self::Invalid => OrderStatus::Invalid,
            Self::Processed => OrderStatus::Processed,
        }
    }
}

impl std::fmt::Display for ProviderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ProviderStatus {
    type Err = LoyaltyError;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "REGISTERED" => Ok(Self::Registered),
            "PROCESSING" => Ok(Self::Processing),
            "INVALID" => Ok(Self::Invalid),
            "PROCESSED" => Ok(Self::Processed),
            _ => Err(LoyaltyError::UnknownProviderStatus(raw.to_string())),
        }
    }
}

/// Body of a successful provider response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccrualResponse {
    pub order: String,
    pub status: String,
    #[serde(default)]
    pub accrual: Option<Decimal>,
}

impl AccrualResponse {
    /// Convert into a resolved outcome, rejecting unknown statuses
    pub fn into_outcome(self) -> Result<AccrualOutcome> {
        let status = ProviderStatus::from_str(&self.status)?;
        Ok(AccrualOutcome::Resolved {
            status: status.to_canonical(),
            accrual: self.accrual,
        })
    }
}

/// What the provider said about an order. Failures are returned as `Err`.
#[derive(Debug, Clone, PartialEq)]
pub enum AccrualOutcome {
    Resolved {
        status: OrderStatus,
        accrual: Option<Decimal>,
    },
    /// Provider asked us to wait before the next request
    RateLimited { retry_after: Duration },
    /// Provider has nothing for this order yet
    Unknown,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AccrualProvider: Send + Sync {
    async fn fetch(&self, number: &OrderNumber) -> Result<AccrualOutcome>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_provider_status_maps_to_canonical() {
        assert_eq!(ProviderStatus::Registered.to_canonical(), OrderStatus::New);
        assert_eq!(
            ProviderStatus::Processing.to_canonical(),
            OrderStatus::Processing
        );
        assert_eq!(ProviderStatus::Invalid.to_canonical(), OrderStatus::Invalid);
        assert_eq!(
            ProviderStatus::Processed.to_canonical(),
            OrderStatus::Processed
        );
    }

    #[test]
    fn test_provider_status_parse_rejects_unknown() {
        assert_eq!(
            "processed".parse::<ProviderStatus>().unwrap(),
            ProviderStatus::Processed
        );
        assert!(matches!(
            "DONE".parse::<ProviderStatus>(),
            Err(LoyaltyError::UnknownProviderStatus(_))
        ));
    }

    #[test]
    fn test_response_into_outcome() {
        let resp: AccrualResponse =
            serde_json::from_str(r#"{"order":"79927398713","status":"PROCESSED","accrual":500}"#)
                .unwrap();
        assert_eq!(
            resp.into_outcome().unwrap(),
            AccrualOutcome::Resolved {
                status: OrderStatus::Processed,
                accrual: Some(dec!(500)),
            }
        );

        let resp: AccrualResponse =
            serde_json::from_str(r#"{"order":"79927398713","status":"REGISTERED"}"#).unwrap();
        assert_eq!(
            resp.into_outcome().unwrap(),
            AccrualOutcome::Resolved {
                status: OrderStatus::New,
                accrual: None,
            }
        );
    }
}
