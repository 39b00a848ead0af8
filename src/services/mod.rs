//! Background services

pub mod refill;
pub mod refresh;

pub use refill::{RefillConfig, RefillHandle, RefillService};
pub use refresh::{RefreshConfig, RefreshHandle, RefreshService};
