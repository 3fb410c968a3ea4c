pub mod accrual;
pub mod adapters;
pub mod cli;
pub mod config;
pub mod coordination;
pub mod domain;
pub mod error;
pub mod persistence;
pub mod services;
pub mod validation;

pub use accrual::{AccrualOutcome, AccrualProvider, ClientFactory};
pub use config::AppConfig;
pub use coordination::{GracefulShutdown, ShutdownSignal};
pub use error::{LoyaltyError, Result};
pub use persistence::{BalanceStore, OrderStore};
pub use services::{
    AccrualHandle, AccrualService, BalanceService, OrderService, PendingQueue,
};
