//! Scraper pool growth
//!
//! Each invocation pulls random candidates, binds a fresh session to each and
//! keeps it only if every probe URL answers 2xx with a non-empty body.

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::HeaderMap;
use tracing::{debug, info, instrument, warn};

use super::candidates::CandidateSource;
use super::scraper_pool::ScraperPool;
use super::session::{ScraperSession, SessionFactory};
use crate::error::{RelayPoolError, Result};

/// Bootstrap limits
#[derive(Debug, Clone)]
pub struct BootstrapConfig {
    /// Target URLs every new session must fetch
    pub probe_urls: Vec<String>,
    /// Timeout for each probe
    pub probe_timeout: Duration,
    /// Candidates tried per invocation
    pub max_attempts: usize,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            probe_urls: Vec::new(),
            probe_timeout: Duration::from_secs(10),
            max_attempts: 25,
        }
    }
}

/// Grows a [`ScraperPool`] toward its target
pub struct Bootstrap {
    candidates: Arc<dyn CandidateSource>,
    factory: Arc<dyn SessionFactory>,
    pool: Arc<ScraperPool>,
    config: BootstrapConfig,
}

impl Bootstrap {
    pub fn new(
        candidates: Arc<dyn CandidateSource>,
        factory: Arc<dyn SessionFactory>,
        pool: Arc<ScraperPool>,
        config: BootstrapConfig,
    ) -> Self {
        Self {
            candidates,
            factory,
            pool,
            config,
        }
    }

    pub fn pool(&self) -> &Arc<ScraperPool> {
        &self.pool
    }

    /// Try to add sessions until the pool is full or attempts run out.
    ///
    /// Returns whether at least one session was added.
    #[instrument(skip(self), fields(size = self.pool.len(), target = self.pool.target()))]
    pub async fn grow(&self) -> bool {
        let mut added = 0usize;

        for attempt in 1..=self.config.max_attempts {
            if self.pool.is_full() {
                break;
            }

            let endpoint = match self.candidates.random_candidate().await {
                Ok(endpoint) => endpoint,
                Err(e) => {
                    warn!("No bootstrap candidate available: {}", e);
                    break;
                }
            };

            let session = match self.factory.create(endpoint.clone()).await {
                Ok(session) => session,
                Err(e) => {
                    debug!("Attempt {}: cannot build session for {}: {}", attempt, endpoint.redacted(), e);
                    continue;
                }
            };

            if let Err(e) = self.probe(session.as_ref()).await {
                debug!("Attempt {}: {}", attempt, e);
                session.close().await;
                continue;
            }

            match self.pool.try_insert(session) {
                Ok(size) => {
                    added += 1;
                    info!(
                        "Added session via {} ({}/{})",
                        endpoint.redacted(),
                        size,
                        self.pool.target()
                    );
                }
                Err(session) => {
                    session.close().await;
                    break;
                }
            }
        }

        added > 0
    }

    /// Fetch every probe URL through the session
    async fn probe(&self, session: &dyn ScraperSession) -> Result<()> {
        let probe_error = |reason: String| RelayPoolError::BootstrapProbe {
            endpoint: session.endpoint().redacted(),
            reason,
        };

        if self.config.probe_urls.is_empty() {
            return Err(probe_error("no probe URLs configured".into()));
        }

        for url in &self.config.probe_urls {
            let page = session
                .fetch(url, HeaderMap::new(), self.config.probe_timeout)
                .await
                .map_err(|e| probe_error(e.to_string()))?;

            if !page.is_success() {
                return Err(probe_error(format!("{} answered {}", url, page.status)));
            }
            if page.body.is_empty() {
                return Err(probe_error(format!("{} returned an empty body", url)));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ProxyEndpoint;
    use crate::proxy::ProxyPool;
    use crate::relay::scraper_pool::tests::StubSession;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    /// Hands out pre-built stub sessions keyed by endpoint URI
    struct StubFactory {
        sessions: Mutex<HashMap<String, Arc<StubSession>>>,
        created: Mutex<Vec<Arc<StubSession>>>,
    }

    impl StubFactory {
        fn new(sessions: Vec<Arc<StubSession>>) -> Self {
            Self {
                sessions: Mutex::new(
                    sessions
                        .into_iter()
                        .map(|s| (s.endpoint().to_string(), s))
                        .collect(),
                ),
                created: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl SessionFactory for StubFactory {
        async fn create(&self, endpoint: ProxyEndpoint) -> Result<Arc<dyn ScraperSession>> {
            let session = self
                .sessions
                .lock()
                .get(endpoint.as_str())
                .cloned()
                .unwrap_or_else(|| StubSession::ok(endpoint.as_str()));
            self.created.lock().push(session.clone());
            Ok(session)
        }
    }

    fn candidates(uris: &[&str]) -> Arc<ProxyPool> {
        let pool = ProxyPool::new(1000, 0);
        pool.merge(
            uris.iter().map(|u| ProxyEndpoint::parse(u).unwrap()).collect(),
            Vec::new(),
        );
        Arc::new(pool)
    }

    fn config(attempts: usize) -> BootstrapConfig {
        BootstrapConfig {
            probe_urls: vec!["https://a.example/".into(), "https://b.example/".into()],
            probe_timeout: Duration::from_secs(1),
            max_attempts: attempts,
        }
    }

    #[tokio::test]
    async fn test_grow_never_exceeds_target() {
        let uris: Vec<String> = (1..=40).map(|i| format!("socks5://10.0.0.{}:1080", i)).collect();
        let refs: Vec<&str> = uris.iter().map(|s| s.as_str()).collect();
        let scraper_pool = Arc::new(ScraperPool::new(3));
        let bootstrap = Bootstrap::new(
            candidates(&refs),
            Arc::new(StubFactory::new(Vec::new())),
            scraper_pool.clone(),
            config(25),
        );

        assert!(bootstrap.grow().await);
        assert_eq!(scraper_pool.len(), 3);

        assert!(!bootstrap.grow().await);
        assert_eq!(scraper_pool.len(), 3);
    }

    #[tokio::test]
    async fn test_rejected_sessions_are_closed() {
        let failing = StubSession::failing("socks5://10.0.0.1:1080");
        let empty_body = StubSession::with_fallback("socks5://10.0.0.2:1080", Some((200, "")));
        let forbidden = StubSession::with_fallback("socks5://10.0.0.3:1080", Some((403, "no")));
        let factory = Arc::new(StubFactory::new(vec![failing, empty_body, forbidden]));
        let scraper_pool = Arc::new(ScraperPool::new(5));
        let bootstrap = Bootstrap::new(
            candidates(&[
                "socks5://10.0.0.1:1080",
                "socks5://10.0.0.2:1080",
                "socks5://10.0.0.3:1080",
            ]),
            factory.clone(),
            scraper_pool.clone(),
            config(10),
        );

        assert!(!bootstrap.grow().await);
        assert!(scraper_pool.is_empty());
        let created = factory.created.lock();
        assert_eq!(created.len(), 10);
        assert!(created.iter().all(|s| s.is_closed()));
    }

    #[tokio::test]
    async fn test_second_probe_failure_rejects_session() {
        let session = StubSession::failing("socks5://10.0.0.1:1080");
        session.push(200, "first probe ok");
        let scraper_pool = Arc::new(ScraperPool::new(2));
        let bootstrap = Bootstrap::new(
            candidates(&["socks5://10.0.0.1:1080"]),
            Arc::new(StubFactory::new(vec![session.clone()])),
            scraper_pool.clone(),
            config(1),
        );

        assert!(!bootstrap.grow().await);
        assert!(session.is_closed());
    }

    #[tokio::test]
    async fn test_empty_probe_list_accepts_nothing() {
        let scraper_pool = Arc::new(ScraperPool::new(2));
        let factory = Arc::new(StubFactory::new(Vec::new()));
        let bootstrap = Bootstrap::new(
            candidates(&["socks5://10.0.0.1:1080"]),
            factory.clone(),
            scraper_pool.clone(),
            BootstrapConfig {
                probe_urls: Vec::new(),
                ..config(3)
            },
        );

        assert!(!bootstrap.grow().await);
        assert!(scraper_pool.is_empty());
        assert!(factory.created.lock().iter().all(|s| s.is_closed()));
    }

    #[tokio::test]
    async fn test_grow_stops_without_candidates() {
        let scraper_pool = Arc::new(ScraperPool::new(2));
        let bootstrap = Bootstrap::new(
            candidates(&[]),
            Arc::new(StubFactory::new(Vec::new())),
            scraper_pool.clone(),
            config(25),
        );

        assert!(!bootstrap.grow().await);
        assert!(scraper_pool.is_empty());
    }
}
