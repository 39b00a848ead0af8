//! Pool refresh service
//!
//! One cycle aggregates candidates from every source, validates them, merges the
//! survivors with the self-managed set and publishes the result. Runs once at
//! startup and then every refresh interval.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{error, info, instrument};

use crate::models::CycleReport;
use crate::proxy::{Aggregator, PoolMetrics, ProxyPool, Validator};

/// Refresh service configuration
#[derive(Debug, Clone)]
pub struct RefreshConfig {
    /// Pause between cycles
    pub interval: Duration,
    /// Concurrent probes per batch
    pub concurrency: usize,
    /// Probe self-managed endpoints instead of trusting them
    pub validate_self_managed: bool,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(900),
            concurrency: 3,
            validate_self_managed: false,
        }
    }
}

/// Pool refresh service
pub struct RefreshService {
    aggregator: Aggregator,
    validator: Validator,
    pool: Arc<ProxyPool>,
    metrics: PoolMetrics,
    config: RefreshConfig,
}

impl RefreshService {
    pub fn new(
        aggregator: Aggregator,
        validator: Validator,
        pool: Arc<ProxyPool>,
        metrics: PoolMetrics,
        config: RefreshConfig,
    ) -> Self {
        Self {
            aggregator,
            validator,
            pool,
            metrics,
            config,
        }
    }

    /// Run the refresh service until shutdown.
    ///
    /// Each cycle runs on its own task so a panicking cycle is logged and the
    /// schedule continues; shutdown aborts an in-flight cycle.
    #[instrument(skip(self, shutdown))]
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Starting refresh service (interval: {}s, sources: {})",
            self.config.interval.as_secs(),
            self.aggregator.source_count()
        );

        loop {
            let service = Arc::clone(&self);
            let mut cycle = tokio::spawn(async move { service.run_cycle().await });

            tokio::select! {
                joined = &mut cycle => {
                    if let Err(e) = joined {
                        error!("Refresh cycle failed: {}", e);
                    }
                }
                _ = shutdown.changed() => {
                    cycle.abort();
                    info!("Refresh service shutting down");
                    break;
                }
            }

            tokio::select! {
                _ = sleep(self.config.interval) => {}
                _ = shutdown.changed() => {
                    info!("Refresh service shutting down");
                    break;
                }
            }
        }
    }

    /// Aggregate, validate and merge once
    #[instrument(skip(self))]
    pub async fn run_cycle(&self) -> CycleReport {
        info!("Refreshing proxy list");
        let aggregation = self.aggregator.aggregate().await;
        let candidates = aggregation.candidates.len();

        let outcome = self
            .validator
            .validate_with_outcome(aggregation.candidates, self.config.concurrency)
            .await;
        let unchecked = outcome.unchecked;
        let validated = outcome.working;

        let self_managed = if self.config.validate_self_managed {
            self.validator
                .validate(aggregation.self_managed, self.config.concurrency)
                .await
        } else {
            aggregation.self_managed
        };

        let report = CycleReport {
            candidates,
            validated: validated.len(),
            self_managed: self_managed.len(),
            pool_size: self.pool.merge(validated, self_managed),
            unchecked,
        };
        self.metrics
            .record_refresh(report.pool_size, self.pool.last_updated());

        info!(
            candidates = report.candidates,
            validated = report.validated,
            pool_size = report.pool_size,
            unchecked = report.unchecked,
            "Refresh cycle complete"
        );
        report
    }
}

/// Handle for managing the refresh service
pub struct RefreshHandle {
    shutdown_tx: watch::Sender<bool>,
}

impl RefreshHandle {
    pub fn new() -> (Self, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        (Self { shutdown_tx: tx }, rx)
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

impl Default for RefreshHandle {
    fn default() -> Self {
        Self::new().0
    }
}
