//! Liveness validation for candidate proxies
//!
//! Candidates are probed in fixed-size batches with bounded concurrency under a
//! global wall-clock budget. Whatever has not been confirmed when the budget runs
//! out is dropped for this cycle.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::RANGE;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, instrument, warn};

use crate::error::RelayPoolError;
use crate::models::ProxyEndpoint;
use crate::proxy::metrics::PoolMetrics;

/// Confirms that a proxy can reach the verification target
#[async_trait]
pub trait Prober: Send + Sync {
    /// Returns true if the endpoint is usable
    async fn probe(&self, endpoint: &ProxyEndpoint) -> bool;
}

/// Probes with a short byte-range GET routed through the candidate
pub struct HttpProber {
    check_url: String,
    timeout: Duration,
}

impl HttpProber {
    pub fn new(check_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            check_url: check_url.into(),
            timeout,
        }
    }
}

#[async_trait]
impl Prober for HttpProber {
    async fn probe(&self, endpoint: &ProxyEndpoint) -> bool {
        let proxy = match endpoint.to_reqwest_proxy() {
            Ok(p) => p,
            Err(e) => {
                warn!("Proxy {} rejected: {}", endpoint.redacted(), e);
                return false;
            }
        };

        let client = match reqwest::Client::builder()
            .proxy(proxy)
            .timeout(self.timeout)
            .danger_accept_invalid_certs(true)
            .build()
        {
            Ok(c) => c,
            Err(e) => {
                warn!("Failed to build client for {}: {}", endpoint.redacted(), e);
                return false;
            }
        };

        match client
            .get(&self.check_url)
            .header(RANGE, "bytes=0-9")
            .send()
            .await
        {
            Ok(resp) if resp.status().is_success() => {
                debug!("Proxy {} OK: {}", endpoint.redacted(), resp.status());
                true
            }
            Ok(resp) => {
                debug!(
                    "Proxy {} failed with status: {}",
                    endpoint.redacted(),
                    resp.status()
                );
                false
            }
            Err(e) => {
                debug!("Proxy {} failed: {}", endpoint.redacted(), e);
                false
            }
        }
    }
}

/// Validation limits
#[derive(Debug, Clone)]
pub struct ValidatorConfig {
    /// Candidates per batch
    pub batch_size: usize,
    /// Wall-clock budget for one validation pass
    pub budget: Duration,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            budget: Duration::from_secs(200),
        }
    }
}

/// Runs probes under concurrency and time limits
pub struct Validator {
    prober: Arc<dyn Prober>,
    config: ValidatorConfig,
    metrics: Option<PoolMetrics>,
}

impl Validator {
    pub fn new(prober: Arc<dyn Prober>, config: ValidatorConfig) -> Self {
        Self {
            prober,
            config,
            metrics: None,
        }
    }

    /// Record probe counters into the given metrics
    pub fn with_metrics(mut self, metrics: PoolMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Return the subset of `candidates` that passed a probe before the budget ran out
    pub async fn validate(
        &self,
        candidates: Vec<ProxyEndpoint>,
        concurrency_limit: usize,
    ) -> Vec<ProxyEndpoint> {
        self.validate_with_outcome(candidates, concurrency_limit)
            .await
            .working
    }

    /// Like [`Validator::validate`], also reporting whether the budget cut the pass short
    #[instrument(skip(self, candidates), fields(candidates = candidates.len()))]
    pub async fn validate_with_outcome(
        &self,
        candidates: Vec<ProxyEndpoint>,
        concurrency_limit: usize,
    ) -> ValidationOutcome {
        let deadline = Instant::now() + self.config.budget;
        let concurrency = concurrency_limit.max(1);
        let total = candidates.len();
        let mut working = Vec::new();
        let mut checked = 0usize;

        for batch in candidates.chunks(self.config.batch_size.max(1)) {
            if Instant::now() >= deadline {
                break;
            }

            let results: Vec<(ProxyEndpoint, bool)> = futures::stream::iter(batch.iter().cloned())
                .map(|endpoint| {
                    let prober = Arc::clone(&self.prober);
                    async move {
                        let ok = prober.probe(&endpoint).await;
                        (endpoint, ok)
                    }
                })
                .buffer_unordered(concurrency)
                .take_until(sleep_until(deadline))
                .collect()
                .await;

            checked += results.len();

            for (endpoint, ok) in results {
                if let Some(metrics) = &self.metrics {
                    metrics.record_check(ok);
                }
                if ok {
                    working.push(endpoint);
                }
            }
        }

        let timed_out = (checked < total).then(|| RelayPoolError::ValidationTimeout {
            budget_secs: self.config.budget.as_secs(),
        });
        if let Some(e) = &timed_out {
            warn!("{}, dropping {} unchecked candidates", e, total - checked);
        }

        info!("Validation complete: {}/{} candidates working", working.len(), total);
        ValidationOutcome {
            working,
            unchecked: total - checked,
            timed_out,
        }
    }
}

/// Result of one validation pass
#[derive(Debug)]
pub struct ValidationOutcome {
    /// Endpoints that passed
    pub working: Vec<ProxyEndpoint>,
    /// Candidates dropped without a result
    pub unchecked: usize,
    /// Set when the budget ran out before every candidate was probed
    pub timed_out: Option<RelayPoolError>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Passes a fixed set of URIs and tracks peak concurrency
    struct FakeProber {
        passing: HashSet<String>,
        delay: Duration,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    impl FakeProber {
        fn new(passing: &[&str], delay: Duration) -> Self {
            Self {
                passing: passing.iter().map(|s| s.to_string()).collect(),
                delay,
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Prober for FakeProber {
        async fn probe(&self, endpoint: &ProxyEndpoint) -> bool {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.passing.contains(endpoint.as_str())
        }
    }

    fn endpoints(uris: &[&str]) -> Vec<ProxyEndpoint> {
        uris.iter().map(|u| ProxyEndpoint::parse(u).unwrap()).collect()
    }

    #[tokio::test]
    async fn test_validate_keeps_only_passing() {
        let all = [
            "socks5://1.1.1.1:1080",
            "socks5://2.2.2.2:1080",
            "socks5://3.3.3.3:1080",
            "socks5://4.4.4.4:1080",
            "socks5://5.5.5.5:1080",
        ];
        let passing = ["socks5://1.1.1.1:1080", "socks5://3.3.3.3:1080", "socks5://5.5.5.5:1080"];
        let prober = Arc::new(FakeProber::new(&passing, Duration::from_millis(10)));
        let validator = Validator::new(prober.clone(), ValidatorConfig::default());

        let working = validator.validate(endpoints(&all), 2).await;

        let got: HashSet<&str> = working.iter().map(|e| e.as_str()).collect();
        let want: HashSet<&str> = passing.iter().copied().collect();
        assert_eq!(got, want);
        assert!(prober.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_validate_records_metrics() {
        let prober = Arc::new(FakeProber::new(&["socks5://1.1.1.1:1080"], Duration::ZERO));
        let metrics = PoolMetrics::new().unwrap();
        let validator =
            Validator::new(prober, ValidatorConfig::default()).with_metrics(metrics.clone());

        validator
            .validate(endpoints(&["socks5://1.1.1.1:1080", "socks5://2.2.2.2:1080"]), 3)
            .await;

        assert_eq!(metrics.checks_total(), 2);
        assert_eq!(metrics.checks_success(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_validate_drops_candidates_after_budget() {
        let uris: Vec<String> = (1..=6).map(|i| format!("socks5://10.0.0.{}:1080", i)).collect();
        let refs: Vec<&str> = uris.iter().map(|s| s.as_str()).collect();
        let prober = Arc::new(FakeProber::new(&refs, Duration::from_secs(10)));
        let config = ValidatorConfig {
            batch_size: 2,
            budget: Duration::from_secs(15),
        };
        let validator = Validator::new(prober, config);

        let outcome = validator.validate_with_outcome(endpoints(&refs), 2).await;

        // first batch finishes at t=10s, second is cut at the 15s deadline
        assert_eq!(outcome.working.len(), 2);
        assert_eq!(outcome.unchecked, 4);
        assert!(matches!(
            outcome.timed_out,
            Some(RelayPoolError::ValidationTimeout { budget_secs: 15 })
        ));
    }

    #[tokio::test]
    async fn test_validate_within_budget_reports_no_timeout() {
        let prober = Arc::new(FakeProber::new(&["socks5://1.1.1.1:1080"], Duration::ZERO));
        let validator = Validator::new(prober, ValidatorConfig::default());

        let outcome = validator
            .validate_with_outcome(endpoints(&["socks5://1.1.1.1:1080", "socks5://2.2.2.2:1080"]), 2)
            .await;

        assert_eq!(outcome.working.len(), 1);
        assert_eq!(outcome.unchecked, 0);
        assert!(outcome.timed_out.is_none());
    }

    #[tokio::test]
    async fn test_validate_empty_input() {
        let prober = Arc::new(FakeProber::new(&[], Duration::ZERO));
        let validator = Validator::new(prober, ValidatorConfig::default());
        assert!(validator.validate(Vec::new(), 3).await.is_empty());
    }
}
