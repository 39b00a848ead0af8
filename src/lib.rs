//! Relaypool - proxy pool and scrape relay
//!
//! Two cooperating services:
//!
//! - A proxy pool that aggregates public proxy lists, validates candidates under a
//!   time budget and serves the live set over HTTP
//! - A scrape relay that fans requests out over a pool of proxy-bound sessions,
//!   evicting sessions that get blocked and refilling from the pool service

pub mod api;
pub mod config;
pub mod error;
pub mod models;
pub mod proxy;
pub mod relay;
pub mod services;

pub use config::Config;
pub use error::{RelayPoolError, Result};
