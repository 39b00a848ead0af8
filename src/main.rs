//! Relaypool - Entry Point
//!
//! Starts the pool service, the scrape relay or both, with graceful shutdown.
//! A relay that exhausts its error budget under fail-fast shuts everything down
//! and exits with status 1.

use std::sync::Arc;

use anyhow::Context;
use tokio::signal;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use relaypool::api::{pool_router, relay_router, ApiServer, PoolState, RelayState};
use relaypool::config::{Config, LogConfig};
use relaypool::proxy::{Aggregator, HttpProber, PoolMetrics, ProxyPool, Validator, ValidatorConfig};
use relaypool::relay::{
    Bootstrap, BootstrapConfig, CandidateSource, Dispatcher, DispatcherConfig, ErrorAccount,
    HttpSessionFactory, PoolServiceClient, ScraperPool,
};
use relaypool::services::{
    RefillConfig, RefillHandle, RefillService, RefreshConfig, RefreshHandle, RefreshService,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env().context("failed to load configuration")?;
    init_tracing(&config.log);

    info!(mode = ?config.mode, "Starting relaypool");

    let (shutdown_tx, _) = watch::channel(false);
    let (fatal_tx, mut fatal_rx) = watch::channel(false);
    let mut tasks: Vec<JoinHandle<()>> = Vec::new();

    let mut in_process_pool: Option<Arc<ProxyPool>> = None;
    let mut refresh_handle: Option<RefreshHandle> = None;
    let mut refill_handle: Option<RefillHandle> = None;
    let mut scraper_pool: Option<Arc<ScraperPool>> = None;

    if config.mode.runs_pool() {
        let pool_cfg = &config.pool;
        let pool = Arc::new(ProxyPool::new(pool_cfg.cap, pool_cfg.min_healthy));
        let metrics = PoolMetrics::new().context("failed to register metrics")?;

        let aggregator = Aggregator::new(
            pool_cfg.sources.clone(),
            pool_cfg.self_managed.clone(),
            pool_cfg.source_timeout(),
        )
        .context("failed to build source client")?;
        let prober = Arc::new(HttpProber::new(
            pool_cfg.check_url.clone(),
            pool_cfg.validation_timeout(),
        ));
        let validator = Validator::new(
            prober,
            ValidatorConfig {
                batch_size: pool_cfg.validation_batch_size,
                budget: pool_cfg.validation_budget(),
            },
        )
        .with_metrics(metrics.clone());

        let (handle, refresh_shutdown) = RefreshHandle::new();
        let refresh = Arc::new(RefreshService::new(
            aggregator,
            validator,
            pool.clone(),
            metrics.clone(),
            RefreshConfig {
                interval: pool_cfg.refresh_interval(),
                concurrency: pool_cfg.validation_concurrency,
                validate_self_managed: pool_cfg.validate_self_managed,
            },
        ));
        tasks.push(tokio::spawn(refresh.run(refresh_shutdown)));
        refresh_handle = Some(handle);

        let server = ApiServer::new(
            "pool service",
            config.pool_addr(),
            pool_router(PoolState {
                pool: pool.clone(),
                metrics,
            }),
        );
        let server_shutdown = shutdown_tx.subscribe();
        tasks.push(tokio::spawn(async move {
            if let Err(e) = server.run(server_shutdown).await {
                error!("Pool service error: {}", e);
            }
        }));

        in_process_pool = Some(pool);
    }

    if config.mode.runs_relay() {
        let relay_cfg = &config.relay;
        let forward_headers = relay_cfg
            .forward_header_names()
            .context("invalid relay configuration")?;

        let candidates: Arc<dyn CandidateSource> = match in_process_pool.clone() {
            Some(pool) => pool,
            None => Arc::new(
                PoolServiceClient::new(
                    relay_cfg.pool_service_url.clone(),
                    relay_cfg.bootstrap_probe_timeout(),
                )
                .context("failed to build pool service client")?,
            ),
        };

        let pool = Arc::new(ScraperPool::new(relay_cfg.scraper_pool_size));
        let bootstrap = Arc::new(Bootstrap::new(
            candidates,
            Arc::new(HttpSessionFactory::default()),
            pool.clone(),
            BootstrapConfig {
                probe_urls: relay_cfg.probe_urls.clone(),
                probe_timeout: relay_cfg.bootstrap_probe_timeout(),
                max_attempts: relay_cfg.bootstrap_attempts,
            },
        ));

        let (handle, refill_shutdown) = RefillHandle::new();
        let refill = RefillService::new(
            bootstrap,
            RefillConfig {
                pause: relay_cfg.refill_pause(),
                idle: relay_cfg.refill_idle(),
            },
        );
        tasks.push(tokio::spawn(async move {
            refill.run(refill_shutdown).await;
        }));
        refill_handle = Some(handle);

        let dispatcher = Dispatcher::new(
            pool.clone(),
            Arc::new(ErrorAccount::new()),
            DispatcherConfig {
                fetch_timeout: relay_cfg.scrape_timeout(),
                challenge_markers: relay_cfg.challenge_markers.clone(),
                forward_headers,
                fail_fast: relay_cfg.exit_on_error,
                fail_fast_threshold: relay_cfg.fail_fast_threshold,
            },
            fatal_tx.clone(),
        );

        let server = ApiServer::new(
            "relay",
            config.relay_addr(),
            relay_router(RelayState {
                dispatcher: Arc::new(dispatcher),
            }),
        );
        let server_shutdown = shutdown_tx.subscribe();
        tasks.push(tokio::spawn(async move {
            if let Err(e) = server.run(server_shutdown).await {
                error!("Relay error: {}", e);
            }
        }));

        scraper_pool = Some(pool);
    }
    drop(fatal_tx);

    let fatal = async {
        // A closed channel means no relay is running; never fatal then.
        if fatal_rx.wait_for(|fatal| *fatal).await.is_err() {
            std::future::pending::<()>().await;
        }
    };

    let exit_code = tokio::select! {
        _ = shutdown_signal() => {
            info!("Shutdown signal received");
            0
        }
        _ = fatal => {
            error!("Relay error budget exhausted, shutting down");
            1
        }
    };

    let _ = shutdown_tx.send(true);
    if let Some(handle) = &refresh_handle {
        handle.shutdown();
    }
    if let Some(handle) = &refill_handle {
        handle.shutdown();
    }

    for result in futures::future::join_all(tasks).await {
        if let Err(e) = result {
            warn!("Task ended abnormally: {}", e);
        }
    }

    if let Some(pool) = scraper_pool {
        pool.close_all().await;
    }

    info!("Relaypool stopped");
    if exit_code != 0 {
        std::process::exit(exit_code);
    }
    Ok(())
}

fn init_tracing(log: &LogConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("relaypool={},tower_http=info", log.level).into());
    let registry = tracing_subscriber::registry().with(filter);

    if log.format.eq_ignore_ascii_case("pretty") {
        registry.with(tracing_subscriber::fmt::layer().pretty()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
