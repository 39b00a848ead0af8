//! HTTP surfaces
//!
//! Routers and handlers for the pool query service and the scrape relay.

pub mod handlers;
pub mod routes;
pub mod server;

pub use routes::{pool_router, relay_router};
pub use server::{ApiServer, PoolState, RelayState};
