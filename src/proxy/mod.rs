//! Proxy pool
//!
//! This module provides the pool-side machinery:
//! - Candidate aggregation from provider lists
//! - Concurrency-bounded, time-budgeted liveness validation
//! - The deduplicated, capped pool and its query operations
//! - Prometheus metrics

pub mod metrics;
pub mod sources;
pub mod store;
pub mod validator;

pub use metrics::PoolMetrics;
pub use sources::{Aggregation, Aggregator, SourceDescriptor};
pub use store::ProxyPool;
pub use validator::{HttpProber, Prober, ValidationOutcome, Validator, ValidatorConfig};
