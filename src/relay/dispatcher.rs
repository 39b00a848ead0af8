//! Scrape request dispatch
//!
//! Picks a random session, runs the fetch on its own task, classifies the outcome
//! and feeds it into the [`ErrorAccount`]. A second consecutive failure evicts the
//! offending session; sustained failure can trip fail-fast.

use std::sync::Arc;
use std::time::Duration;

use axum::http::{HeaderName, StatusCode};
use bytes::Bytes;
use reqwest::header::HeaderMap;
use tokio::sync::watch;
use tracing::{error, info, instrument, warn};

use super::account::ErrorAccount;
use super::scraper_pool::ScraperPool;
use super::session::{FetchedPage, ScraperSession};
use crate::error::{RelayPoolError, Result};

/// Failures tolerated before the offending session is evicted
const EVICTION_THRESHOLD: u64 = 1;

/// Success streak milestone interval for progress logging
const SUCCESS_LOG_INTERVAL: u64 = 47;

/// Replacement body for challenge pages
const BLOCKED_BODY: &str = "Blocked";

/// Dispatcher configuration
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Timeout for each relayed fetch
    pub fetch_timeout: Duration,
    /// Body substrings that mark a challenge page
    pub challenge_markers: Vec<String>,
    /// Inbound headers forwarded upstream
    pub forward_headers: Vec<HeaderName>,
    /// Signal process exit once errors exceed the threshold
    pub fail_fast: bool,
    /// Consecutive failures tolerated before fail-fast
    pub fail_fast_threshold: u64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            fetch_timeout: Duration::from_secs(15),
            challenge_markers: vec!["cf-alert".to_string()],
            forward_headers: vec![reqwest::header::RANGE],
            fail_fast: false,
            fail_fast_threshold: 10,
        }
    }
}

/// A relay request
#[derive(Debug, Clone)]
pub struct ScrapeRequest {
    pub url: String,
    /// Inbound headers; only allow-listed ones are forwarded
    pub headers: HeaderMap,
}

/// What the relay answers
#[derive(Debug, Clone)]
pub struct ScrapeResponse {
    pub status: StatusCode,
    pub content_type: Option<String>,
    pub body: Bytes,
}

/// Judge an upstream answer.
///
/// A status outside `[200, 400)` or a body carrying a challenge marker is a
/// [`RelayPoolError::RelayChallenge`].
pub fn check_page(page: &FetchedPage, markers: &[String]) -> Result<()> {
    let blocked = !(200..400).contains(&page.status) || {
        let body = page.text();
        markers.iter().any(|m| !m.is_empty() && body.contains(m.as_str()))
    };

    if blocked {
        Err(RelayPoolError::RelayChallenge {
            status: page.status,
        })
    } else {
        Ok(())
    }
}

/// Keep only allow-listed headers
pub fn filter_headers(inbound: &HeaderMap, allow: &[HeaderName]) -> HeaderMap {
    let mut forwarded = HeaderMap::new();
    for name in allow {
        for value in inbound.get_all(name) {
            forwarded.append(name.clone(), value.clone());
        }
    }
    forwarded
}

/// Serves scrape requests from the [`ScraperPool`]
pub struct Dispatcher {
    pool: Arc<ScraperPool>,
    account: Arc<ErrorAccount>,
    config: DispatcherConfig,
    fatal_tx: watch::Sender<bool>,
}

impl Dispatcher {
    pub fn new(
        pool: Arc<ScraperPool>,
        account: Arc<ErrorAccount>,
        config: DispatcherConfig,
        fatal_tx: watch::Sender<bool>,
    ) -> Self {
        Self {
            pool,
            account,
            config,
            fatal_tx,
        }
    }

    pub fn pool(&self) -> &Arc<ScraperPool> {
        &self.pool
    }

    pub fn account(&self) -> &Arc<ErrorAccount> {
        &self.account
    }

    /// Relay one request through a random session
    #[instrument(skip(self, request), fields(url = %truncate(&request.url, 40)))]
    pub async fn dispatch(&self, request: ScrapeRequest) -> Result<ScrapeResponse> {
        let url = request.url.trim().to_string();
        if url.is_empty() {
            return Err(RelayPoolError::InvalidRequest(
                "'url' is missing in the request body".into(),
            ));
        }

        let session = self.pool.choose().ok_or(RelayPoolError::PoolExhausted)?;
        let headers = filter_headers(&request.headers, &self.config.forward_headers);

        let result = self.fetch_detached(session.clone(), url.clone(), headers).await;

        let page = match result {
            Ok(page) => page,
            Err(e) => {
                warn!("Relay request failed via {}: {}", session.endpoint().redacted(), e);
                self.on_failure(session.as_ref()).await?;
                return Err(RelayPoolError::RelayTransport(e.to_string()));
            }
        };

        if let Err(challenge) = check_page(&page, &self.config.challenge_markers) {
            let preview = truncate(&page.text(), 80).replace('\n', "");
            let streak = self.account.snapshot().success_streak;
            warn!("{} after {} requests: {}", challenge, streak, preview);
            self.on_failure(session.as_ref()).await?;
            return Ok(ScrapeResponse {
                status: status_from(page.status),
                content_type: Some("text/plain".to_string()),
                body: Bytes::from_static(BLOCKED_BODY.as_bytes()),
            });
        }

        self.on_success();
        Ok(ScrapeResponse {
            status: status_from(page.status),
            content_type: page.content_type,
            body: page.body,
        })
    }

    /// Run the fetch on its own task so a slow upstream only holds that task
    async fn fetch_detached(
        &self,
        session: Arc<dyn ScraperSession>,
        url: String,
        headers: HeaderMap,
    ) -> Result<FetchedPage> {
        let timeout = self.config.fetch_timeout;
        let task = tokio::spawn(async move { session.fetch(&url, headers, timeout).await });

        match tokio::time::timeout(timeout + Duration::from_secs(1), task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(RelayPoolError::RelayTransport(join_err.to_string())),
            Err(_) => Err(RelayPoolError::RelayTransport("fetch timed out".into())),
        }
    }

    fn on_success(&self) {
        let snapshot = self.account.record_success();
        if snapshot.success_streak > 10 && snapshot.success_streak % SUCCESS_LOG_INTERVAL == 0 {
            info!("{} successful requests", snapshot.success_streak);
        }
    }

    /// Account a failure; evict or trip fail-fast as needed.
    ///
    /// Runs after the fetch resumed, so pool membership is re-checked by
    /// [`ScraperPool::evict`] rather than assumed.
    async fn on_failure(&self, session: &dyn ScraperSession) -> Result<()> {
        let snapshot = self.account.record_failure();

        if self.config.fail_fast && snapshot.error_count > self.config.fail_fast_threshold {
            error!(
                "Too many errors: {}. Requesting process exit",
                snapshot.error_count
            );
            let _ = self.fatal_tx.send(true);
            return Err(RelayPoolError::ErrorBudgetExhausted {
                errors: snapshot.error_count,
            });
        }

        if snapshot.error_count > EVICTION_THRESHOLD {
            if let Some(evicted) = self.pool.evict(session.id()) {
                self.account.reset_errors();
                evicted.close().await;
                warn!(
                    "Evicted session via {} after {} consecutive errors, {} left",
                    evicted.endpoint().redacted(),
                    snapshot.error_count,
                    self.pool.len()
                );
            }
        }

        Ok(())
    }
}

fn status_from(status: u16) -> StatusCode {
    StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY)
}

fn truncate(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::scraper_pool::tests::{page, StubSession};
    use reqwest::header::{HeaderValue, COOKIE, RANGE};

    fn dispatcher_with(
        sessions: &[Arc<StubSession>],
        config: DispatcherConfig,
    ) -> (Dispatcher, watch::Receiver<bool>) {
        let pool = Arc::new(ScraperPool::new(10));
        for s in sessions {
            assert!(pool.try_insert(s.clone()).is_ok());
        }
        let (tx, rx) = watch::channel(false);
        (
            Dispatcher::new(pool, Arc::new(ErrorAccount::new()), config, tx),
            rx,
        )
    }

    fn request(url: &str) -> ScrapeRequest {
        ScrapeRequest {
            url: url.to_string(),
            headers: HeaderMap::new(),
        }
    }

    #[test]
    fn test_check_page() {
        let markers = vec!["cf-alert".to_string()];

        assert!(check_page(&page(200, "{}"), &markers).is_ok());
        assert!(check_page(&page(302, ""), &markers).is_ok());
        assert!(matches!(
            check_page(&page(403, "denied"), &markers),
            Err(RelayPoolError::RelayChallenge { status: 403 })
        ));
        assert!(matches!(
            check_page(&page(200, "<div class=\"cf-alert\">"), &markers),
            Err(RelayPoolError::RelayChallenge { status: 200 })
        ));
        assert!(matches!(
            check_page(&page(199, ""), &markers),
            Err(RelayPoolError::RelayChallenge { status: 199 })
        ));
    }

    #[test]
    fn test_filter_headers_allow_list() {
        let mut inbound = HeaderMap::new();
        inbound.insert(RANGE, HeaderValue::from_static("bytes=0-99"));
        inbound.insert(COOKIE, HeaderValue::from_static("secret=1"));

        let forwarded = filter_headers(&inbound, &[RANGE]);
        assert_eq!(forwarded.len(), 1);
        assert_eq!(forwarded.get(RANGE).unwrap(), "bytes=0-99");
    }

    #[tokio::test]
    async fn test_empty_pool_is_service_unavailable() {
        let (dispatcher, _rx) = dispatcher_with(&[], DispatcherConfig::default());

        let err = dispatcher.dispatch(request("https://x.example/")).await.unwrap_err();
        assert!(matches!(err, RelayPoolError::PoolExhausted));
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(dispatcher.account().snapshot().error_count, 0);
    }

    #[tokio::test]
    async fn test_empty_url_is_bad_request() {
        let (dispatcher, _rx) =
            dispatcher_with(&[StubSession::ok("socks5://10.0.0.1:1080")], DispatcherConfig::default());

        let err = dispatcher.dispatch(request("  ")).await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_two_consecutive_failures_evict_one_session() {
        let sessions: Vec<Arc<StubSession>> = (1..=3)
            .map(|i| StubSession::failing(&format!("socks5://10.0.0.{}:1080", i)))
            .collect();
        let (dispatcher, _rx) = dispatcher_with(&sessions, DispatcherConfig::default());

        assert!(dispatcher.dispatch(request("https://x.example/")).await.is_err());
        assert_eq!(dispatcher.pool().len(), 3);
        assert_eq!(dispatcher.account().snapshot().error_count, 1);

        assert!(dispatcher.dispatch(request("https://x.example/")).await.is_err());
        assert_eq!(dispatcher.pool().len(), 2);
        assert_eq!(dispatcher.account().snapshot().error_count, 0);
        assert_eq!(sessions.iter().filter(|s| s.is_closed()).count(), 1);
    }

    #[tokio::test]
    async fn test_failure_then_success_restores_state() {
        let flaky = StubSession::ok("socks5://10.0.0.1:1080");
        flaky.push(503, "unavailable");
        let (dispatcher, _rx) = dispatcher_with(&[flaky], DispatcherConfig::default());
        let before = dispatcher.account().snapshot();

        let blocked = dispatcher.dispatch(request("https://x.example/")).await.unwrap();
        assert_eq!(blocked.status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(blocked.body, Bytes::from_static(b"Blocked"));
        assert_eq!(dispatcher.account().snapshot().error_count, 1);

        for i in 2..=3 {
            let s = StubSession::ok(&format!("socks5://10.0.0.{}:1080", i));
            assert!(dispatcher.pool().try_insert(s).is_ok());
        }

        let response = dispatcher.dispatch(request("https://x.example/")).await.unwrap();
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.body, Bytes::from_static(b"ok"));

        let after = dispatcher.account().snapshot();
        assert_eq!(dispatcher.pool().len(), 3);
        assert_eq!(after.error_count, before.error_count);
        assert_eq!(after.total_success, 1);
    }

    #[tokio::test]
    async fn test_eviction_never_empties_pool() {
        let only = StubSession::failing("socks5://10.0.0.1:1080");
        let (dispatcher, _rx) = dispatcher_with(&[only.clone()], DispatcherConfig::default());

        for _ in 0..5 {
            assert!(dispatcher.dispatch(request("https://x.example/")).await.is_err());
        }

        assert_eq!(dispatcher.pool().len(), 1);
        assert!(!only.is_closed());
        assert_eq!(dispatcher.account().snapshot().error_count, 5);
    }

    #[tokio::test]
    async fn test_fail_fast_signals_exit() {
        let only = StubSession::failing("socks5://10.0.0.1:1080");
        let config = DispatcherConfig {
            fail_fast: true,
            fail_fast_threshold: 2,
            ..DispatcherConfig::default()
        };
        let (dispatcher, rx) = dispatcher_with(&[only], config);

        for _ in 0..2 {
            let err = dispatcher.dispatch(request("https://x.example/")).await.unwrap_err();
            assert!(matches!(err, RelayPoolError::RelayTransport(_)));
        }
        assert!(!*rx.borrow());

        let err = dispatcher.dispatch(request("https://x.example/")).await.unwrap_err();
        assert!(matches!(err, RelayPoolError::ErrorBudgetExhausted { errors: 3 }));
        assert!(*rx.borrow());
    }

    #[tokio::test]
    async fn test_only_allowed_headers_reach_session() {
        let session = StubSession::ok("socks5://10.0.0.1:1080");
        let (dispatcher, _rx) = dispatcher_with(&[session.clone()], DispatcherConfig::default());

        let mut headers = HeaderMap::new();
        headers.insert(RANGE, HeaderValue::from_static("bytes=0-9"));
        headers.insert(COOKIE, HeaderValue::from_static("a=b"));
        let response = dispatcher
            .dispatch(ScrapeRequest {
                url: "https://x.example/".into(),
                headers,
            })
            .await
            .unwrap();

        assert_eq!(response.status, StatusCode::OK);
        let seen = session.last_headers.lock().clone().unwrap();
        assert!(seen.contains_key(RANGE));
        assert!(!seen.contains_key(COOKIE));
    }
}
