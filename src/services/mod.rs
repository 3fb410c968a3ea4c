pub mod accruals;
pub mod balance;
pub mod health;
pub mod orders;
pub mod pending;
pub mod poller;
pub mod worker;

pub use accruals::{AccrualHandle, AccrualService};
pub use balance::BalanceService;
pub use health::{ComponentHealth, HealthResponse, HealthServer, HealthState, HealthStatus};
pub use orders::OrderService;
pub use pending::PendingQueue;
pub use poller::Poller;
pub use worker::{AccrualStats, AccrualStatsSnapshot, Worker};
