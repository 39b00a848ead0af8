//! HTTP servers using Axum
//!
//! The pool service and the relay each run as an [`ApiServer`] over their own router.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::{info, instrument};

use crate::error::{RelayPoolError, Result};
use crate::proxy::{PoolMetrics, ProxyPool};
use crate::relay::Dispatcher;

/// Shared state for pool service handlers
#[derive(Clone)]
pub struct PoolState {
    pub pool: Arc<ProxyPool>,
    pub metrics: PoolMetrics,
}

/// Shared state for relay handlers
#[derive(Clone)]
pub struct RelayState {
    pub dispatcher: Arc<Dispatcher>,
}

/// One listening HTTP service
pub struct ApiServer {
    name: &'static str,
    addr: String,
    router: Router,
}

impl ApiServer {
    pub fn new(name: &'static str, addr: impl Into<String>, router: Router) -> Self {
        Self {
            name,
            addr: addr.into(),
            router,
        }
    }

    /// Run the server until shutdown
    #[instrument(skip(self, shutdown), fields(service = self.name))]
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let addr: SocketAddr = self.addr.parse().map_err(|_| {
            RelayPoolError::InvalidConfig(format!("invalid {} address {}", self.name, self.addr))
        })?;

        let router = self.router.layer(TraceLayer::new_for_http());

        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!("{} listening on {}", self.name, addr);

        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.changed().await;
            })
            .await?;

        info!("{} shut down", self.name);
        Ok(())
    }
}
