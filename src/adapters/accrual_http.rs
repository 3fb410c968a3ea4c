//! HTTP client for the external accrual provider.
//!
//! `GET {base}/api/orders/{number}`:
//! - 200 with `{order, status, accrual?}` resolves the order
//! - 204 means the provider does not know the order yet
//! - 429 carries a `Retry-After` in seconds
//! - anything else is a failure

use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::{debug, instrument, warn};
use url::Url;

use crate::accrual::{AccrualOutcome, AccrualProvider, AccrualResponse};
use crate::config::AccrualConfig;
use crate::domain::OrderNumber;
use crate::error::{LoyaltyError, Result};

#[derive(Clone)]
pub struct AccrualHttpClient {
    http: Client,
    base_url: Url,
    default_retry_after: Duration,
}

impl AccrualHttpClient {
    pub fn new(address: &str, timeout: Duration, default_retry_after: Duration) -> Result<Self> {
        let base_url = parse_base_url(address)?;

        let http = Client::builder()
            .user_agent("loyalty-accrual-client/0.1")
            .timeout(timeout)
            .build()
            .map_err(|e| {
                LoyaltyError::Internal(format!("failed to build accrual HTTP client: {}", e))
            })?;

        Ok(Self {
            http,
            base_url,
            default_retry_after,
        })
    }

    pub fn from_config(config: &AccrualConfig) -> Result<Self> {
        Self::new(
            &config.address,
            config.request_timeout(),
            config.default_retry_after(),
        )
    }

    fn order_url(&self, number: &OrderNumber) -> Url {
        let mut url = self.base_url.clone();
        url.set_path(&format!("/api/orders/{}", number));
        url
    }

    fn retry_after(&self, value: Option<&str>) -> Duration {
        value
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(self.default_retry_after)
    }
}

/// Parse the provider address, assuming `http://` when no scheme is given
pub fn parse_base_url(address: &str) -> Result<Url> {
    let address = address.trim();
    match Url::parse(address) {
        Ok(url) if url.host_str().is_some() => Ok(url),
        Ok(_) | Err(url::ParseError::RelativeUrlWithoutBase) if !address.contains("://") => {
            parse_base_url(&format!("http://{}", address))
        }
        Ok(_) => Err(LoyaltyError::InvalidAddress(address.to_string())),
        Err(e) => Err(LoyaltyError::InvalidAddress(format!("{}: {}", address, e))),
    }
}

#[async_trait]
impl AccrualProvider for AccrualHttpClient {
    #[instrument(skip(self), fields(order_number = %number))]
    async fn fetch(&self, number: &OrderNumber) -> Result<AccrualOutcome> {
        let url = self.order_url(number);
        debug!("Querying accrual provider: {}", url);

        let resp = self.http.get(url).send().await?;
        let status = resp.status();

        match status {
            StatusCode::OK => {
                let body: AccrualResponse = resp.json().await?;
                debug!("Provider reported status {}", body.status);
                body.into_outcome()
            }
            StatusCode::NO_CONTENT => {
                debug!("Provider has no record yet");
                Ok(AccrualOutcome::Unknown)
            }
            StatusCode::TOO_MANY_REQUESTS => {
                let header = resp
                    .headers()
                    .get(RETRY_AFTER)
                    .and_then(|v| v.to_str().ok());
                let retry_after = self.retry_after(header);
                warn!("Rate limited by accrual provider, retry after {:?}", retry_after);
                Ok(AccrualOutcome::RateLimited { retry_after })
            }
            _ => {
                let text = resp.text().await.unwrap_or_default();
                Err(LoyaltyError::AccrualProvider(format!(
                    "unexpected response {}: {}",
                    status,
                    text.trim()
                )))
            }
        }
    }
}
