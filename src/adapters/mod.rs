pub mod accrual_http;
pub mod memory;
pub mod postgres;

pub use accrual_http::{parse_base_url, AccrualHttpClient};
pub use memory::MemoryStore;
pub use postgres::PostgresStore;
