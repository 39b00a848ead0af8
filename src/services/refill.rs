//! Scraper pool refill service
//!
//! Keeps calling [`Bootstrap::grow`] while the scraper pool is below target and
//! idles once it is full, so sessions evicted by the dispatcher get replaced.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, info, instrument};

use crate::relay::Bootstrap;

/// Refill service configuration
#[derive(Debug, Clone)]
pub struct RefillConfig {
    /// Pause between bootstrap calls while below target
    pub pause: Duration,
    /// Monitoring interval once the pool is at target
    pub idle: Duration,
}

impl Default for RefillConfig {
    fn default() -> Self {
        Self {
            pause: Duration::from_secs(2),
            idle: Duration::from_secs(30),
        }
    }
}

/// Scraper pool refill service
pub struct RefillService {
    bootstrap: Arc<Bootstrap>,
    config: RefillConfig,
}

impl RefillService {
    pub fn new(bootstrap: Arc<Bootstrap>, config: RefillConfig) -> Self {
        Self { bootstrap, config }
    }

    /// Run the refill loop until shutdown
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let pool = self.bootstrap.pool();
        info!(
            "Starting refill service (target: {}, pause: {}s, idle: {}s)",
            pool.target(),
            self.config.pause.as_secs(),
            self.config.idle.as_secs()
        );

        loop {
            let wait = if pool.is_full() {
                self.config.idle
            } else {
                tokio::select! {
                    grew = self.bootstrap.grow() => {
                        if !grew {
                            debug!("No session added ({}/{})", pool.len(), pool.target());
                        }
                    }
                    _ = shutdown.changed() => break,
                }
                self.config.pause
            };

            tokio::select! {
                _ = sleep(wait) => {}
                _ = shutdown.changed() => break,
            }
        }

        info!("Refill service shutting down");
    }
}

/// Handle for managing the refill service
pub struct RefillHandle {
    shutdown_tx: watch::Sender<bool>,
}

impl RefillHandle {
    pub fn new() -> (Self, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        (Self { shutdown_tx: tx }, rx)
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

impl Default for RefillHandle {
    fn default() -> Self {
        Self::new().0
    }
}
