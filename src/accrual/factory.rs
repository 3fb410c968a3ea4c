use std::sync::Arc;

use crate::adapters::AccrualHttpClient;
use crate::config::AccrualConfig;
use crate::error::Result;

use super::AccrualProvider;

/// Builds one provider client per worker
pub type ClientFactory = Arc<dyn Fn() -> Result<Arc<dyn AccrualProvider>> + Send + Sync>;

/// Factory producing HTTP clients for the configured provider address.
pub fn http_client_factory(config: &AccrualConfig) -> ClientFactory {
    let config = config.clone();
    Arc::new(move || {
        let client = AccrualHttpClient::from_config(&config)?;
        Ok(Arc::new(client) as Arc<dyn AccrualProvider>)
    })
}

/// Factory handing out clones of an existing provider.
pub fn shared_client_factory(provider: Arc<dyn AccrualProvider>) -> ClientFactory {
    Arc::new(move || Ok(provider.clone()))
}
