//! Bypass-capable scraper sessions
//!
//! A session is an HTTP client context with its own cookie jar, bound to exactly
//! one proxy endpoint. The challenge-passing capability is supplied by the
//! [`SessionFactory`]; the relay only invokes sessions and judges their results.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, CONTENT_TYPE, USER_AGENT};
use tracing::debug;
use uuid::Uuid;

use crate::error::{RelayPoolError, Result};
use crate::models::ProxyEndpoint;

const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0 Safari/537.36";

/// Upstream response as seen through a session
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Bytes,
}

impl FetchedPage {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Body as text, invalid UTF-8 replaced
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// A stateful client bound to one proxy endpoint
#[async_trait]
pub trait ScraperSession: Send + Sync {
    fn id(&self) -> Uuid;

    fn endpoint(&self) -> &ProxyEndpoint;

    /// GET `url` through the bound proxy
    async fn fetch(&self, url: &str, headers: HeaderMap, timeout: Duration) -> Result<FetchedPage>;

    /// Release the session; later fetches fail
    async fn close(&self);
}

/// Creates sessions bound to a given endpoint
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn create(&self, endpoint: ProxyEndpoint) -> Result<Arc<dyn ScraperSession>>;
}

/// reqwest-backed session with a persistent cookie jar and browser-like headers
pub struct HttpScraperSession {
    id: Uuid,
    endpoint: ProxyEndpoint,
    client: reqwest::Client,
    closed: AtomicBool,
}

impl HttpScraperSession {
    pub fn new(endpoint: ProxyEndpoint, user_agent: &str) -> Result<Self> {
        let mut default_headers = HeaderMap::new();
        default_headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/html,application/json;q=0.9,*/*;q=0.8"),
        );
        default_headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));

        let client = reqwest::Client::builder()
            .proxy(endpoint.to_reqwest_proxy()?)
            .cookie_store(true)
            .gzip(true)
            .user_agent(user_agent)
            .default_headers(default_headers)
            .build()?;

        Ok(Self {
            id: Uuid::new_v4(),
            endpoint,
            client,
            closed: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl ScraperSession for HttpScraperSession {
    fn id(&self) -> Uuid {
        self.id
    }

    fn endpoint(&self) -> &ProxyEndpoint {
        &self.endpoint
    }

    async fn fetch(&self, url: &str, headers: HeaderMap, timeout: Duration) -> Result<FetchedPage> {
        if self.closed.load(Ordering::Acquire) {
            return Err(RelayPoolError::RelayTransport(format!(
                "session {} is closed",
                self.id
            )));
        }

        let response = self
            .client
            .get(url)
            .headers(headers)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| RelayPoolError::RelayTransport(e.to_string()))?;

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response
            .bytes()
            .await
            .map_err(|e| RelayPoolError::RelayTransport(e.to_string()))?;

        Ok(FetchedPage {
            status,
            content_type,
            body,
        })
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            debug!("Closed session {} ({})", self.id, self.endpoint.redacted());
        }
    }
}

/// Builds [`HttpScraperSession`]s
pub struct HttpSessionFactory {
    user_agent: String,
}

impl HttpSessionFactory {
    pub fn new(user_agent: impl Into<String>) -> Self {
        Self {
            user_agent: user_agent.into(),
        }
    }
}

impl Default for HttpSessionFactory {
    fn default() -> Self {
        Self::new(DEFAULT_USER_AGENT)
    }
}

#[async_trait]
impl SessionFactory for HttpSessionFactory {
    async fn create(&self, endpoint: ProxyEndpoint) -> Result<Arc<dyn ScraperSession>> {
        let session = HttpScraperSession::new(endpoint, &self.user_agent)?;
        Ok(Arc::new(session))
    }
}
