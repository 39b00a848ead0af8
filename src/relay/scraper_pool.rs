//! Bounded set of live scraper sessions

use std::sync::Arc;

use futures::future;
use parking_lot::RwLock;
use rand::seq::SliceRandom;
use uuid::Uuid;

use super::session::ScraperSession;

/// Sessions available to the dispatcher, capped at a target size
pub struct ScraperPool {
    sessions: RwLock<Vec<Arc<dyn ScraperSession>>>,
    target: usize,
}

impl ScraperPool {
    pub fn new(target: usize) -> Self {
        Self {
            sessions: RwLock::new(Vec::new()),
            target: target.max(1),
        }
    }

    pub fn target(&self) -> usize {
        self.target
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.len() >= self.target
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.sessions.read().iter().any(|s| s.id() == id)
    }

    /// Pick a session uniformly at random
    pub fn choose(&self) -> Option<Arc<dyn ScraperSession>> {
        self.sessions
            .read()
            .choose(&mut rand::thread_rng())
            .cloned()
    }

    /// Add a session unless the pool already reached its target.
    ///
    /// On refusal the session is handed back so the caller can close it.
    pub fn try_insert(
        &self,
        session: Arc<dyn ScraperSession>,
    ) -> std::result::Result<usize, Arc<dyn ScraperSession>> {
        let mut sessions = self.sessions.write();
        if sessions.len() >= self.target {
            return Err(session);
        }
        sessions.push(session);
        Ok(sessions.len())
    }

    /// Remove the session if it is still present and at least one other remains.
    ///
    /// Both conditions are checked under the same write lock, so concurrent
    /// evictions can never empty the pool.
    pub fn evict(&self, id: Uuid) -> Option<Arc<dyn ScraperSession>> {
        let mut sessions = self.sessions.write();
        if sessions.len() <= 1 {
            return None;
        }
        let idx = sessions.iter().position(|s| s.id() == id)?;
        Some(sessions.swap_remove(idx))
    }

    /// Remove and close every session
    pub async fn close_all(&self) {
        let drained: Vec<Arc<dyn ScraperSession>> = std::mem::take(&mut *self.sessions.write());
        future::join_all(drained.iter().map(|s| s.close())).await;
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::{RelayPoolError, Result};
    use crate::models::ProxyEndpoint;
    use crate::relay::session::FetchedPage;
    use async_trait::async_trait;
    use bytes::Bytes;
    use parking_lot::Mutex;
    use reqwest::header::HeaderMap;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    /// Scripted session: replays queued responses, then repeats the fallback
    pub(crate) struct StubSession {
        id: Uuid,
        endpoint: ProxyEndpoint,
        script: Mutex<VecDeque<Result<FetchedPage>>>,
        fallback: Option<(u16, &'static str)>,
        pub(crate) closed: AtomicBool,
        pub(crate) last_headers: Mutex<Option<HeaderMap>>,
    }

    impl StubSession {
        pub(crate) fn ok(uri: &str) -> Arc<Self> {
            Self::with_fallback(uri, Some((200, "ok")))
        }

        pub(crate) fn failing(uri: &str) -> Arc<Self> {
            Self::with_fallback(uri, None)
        }

        pub(crate) fn with_fallback(uri: &str, fallback: Option<(u16, &'static str)>) -> Arc<Self> {
            Arc::new(Self {
                id: Uuid::new_v4(),
                endpoint: ProxyEndpoint::parse(uri).unwrap(),
                script: Mutex::new(VecDeque::new()),
                fallback,
                closed: AtomicBool::new(false),
                last_headers: Mutex::new(None),
            })
        }

        pub(crate) fn push(&self, status: u16, body: &'static str) {
            self.script.lock().push_back(Ok(page(status, body)));
        }

        pub(crate) fn is_closed(&self) -> bool {
            self.closed.load(Ordering::SeqCst)
        }
    }

    pub(crate) fn page(status: u16, body: &'static str) -> FetchedPage {
        FetchedPage {
            status,
            content_type: Some("application/json".to_string()),
            body: Bytes::from_static(body.as_bytes()),
        }
    }

    #[async_trait]
    impl ScraperSession for StubSession {
        fn id(&self) -> Uuid {
            self.id
        }

        fn endpoint(&self) -> &ProxyEndpoint {
            &self.endpoint
        }

        async fn fetch(&self, _url: &str, headers: HeaderMap, _timeout: Duration) -> Result<FetchedPage> {
            *self.last_headers.lock() = Some(headers);
            if let Some(next) = self.script.lock().pop_front() {
                return next;
            }
            match self.fallback {
                Some((status, body)) => Ok(page(status, body)),
                None => Err(RelayPoolError::RelayTransport("connection reset".into())),
            }
        }

        async fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    fn filled(n: usize, target: usize) -> (ScraperPool, Vec<Arc<StubSession>>) {
        let pool = ScraperPool::new(target);
        let stubs: Vec<Arc<StubSession>> = (0..n)
            .map(|i| StubSession::ok(&format!("socks5://10.0.0.{}:1080", i + 1)))
            .collect();
        for s in &stubs {
            assert!(pool.try_insert(s.clone()).is_ok());
        }
        (pool, stubs)
    }

    #[test]
    fn test_try_insert_respects_target() {
        let (pool, _stubs) = filled(2, 2);
        assert!(pool.is_full());

        let extra = StubSession::ok("socks5://10.0.0.99:1080");
        assert!(pool.try_insert(extra).is_err());
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn test_evict_never_empties_pool() {
        let (pool, stubs) = filled(2, 5);

        assert!(pool.evict(stubs[0].id()).is_some());
        assert_eq!(pool.len(), 1);

        assert!(pool.evict(stubs[1].id()).is_none());
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_evict_ignores_missing_session() {
        let (pool, stubs) = filled(3, 5);
        assert!(pool.evict(stubs[0].id()).is_some());
        assert!(pool.evict(stubs[0].id()).is_none());
        assert_eq!(pool.len(), 2);
        assert!(!pool.contains(stubs[0].id()));
    }

    #[test]
    fn test_choose_on_empty() {
        let pool = ScraperPool::new(3);
        assert!(pool.choose().is_none());
        assert!(pool.is_empty());
    }

    #[tokio::test]
    async fn test_close_all_drains() {
        let (pool, stubs) = filled(3, 3);
        pool.close_all().await;
        assert!(pool.is_empty());
        assert!(stubs.iter().all(|s| s.is_closed()));
    }
}
