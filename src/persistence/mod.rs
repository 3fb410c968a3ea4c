//! Storage contracts for orders and the balance ledger
//!
//! Implementations live in `adapters` (PostgreSQL and in-memory).

pub mod traits;

pub use traits::{BalanceStore, OrderStore};

#[cfg(test)]
pub use traits::MockOrderStore;
