pub mod factory;
mod traits;

pub use factory::{http_client_factory, shared_client_factory, ClientFactory};
pub use traits::{AccrualOutcome, AccrualProvider, AccrualResponse, ProviderStatus};

#[cfg(test)]
pub use traits::MockAccrualProvider;
