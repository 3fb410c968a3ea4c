pub mod balance;
pub mod order;

pub use balance::*;
pub use order::*;
