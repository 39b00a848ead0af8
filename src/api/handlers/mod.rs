//! API request handlers

pub mod pool;
pub mod relay;
