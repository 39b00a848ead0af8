//! Prometheus metrics for the pool service

use prometheus::{Encoder, Gauge, IntCounter, IntGauge, Registry, TextEncoder};

use crate::error::{RelayPoolError, Result};

/// Pool gauges and probe counters, exposed on `/metrics`
#[derive(Clone)]
pub struct PoolMetrics {
    registry: Registry,
    proxy_count: IntGauge,
    last_update_timestamp: Gauge,
    checks_total: IntCounter,
    checks_success: IntCounter,
}

impl PoolMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let proxy_count =
            IntGauge::new("proxy_catcher_proxy_count", "Number of available proxies")?;
        let last_update_timestamp = Gauge::new(
            "proxy_catcher_last_update_timestamp",
            "Timestamp of last proxy list update",
        )?;
        let checks_total = IntCounter::new(
            "proxy_catcher_proxy_checks_total",
            "Total number of proxy checks performed",
        )?;
        let checks_success = IntCounter::new(
            "proxy_catcher_proxy_checks_success",
            "Number of successful proxy checks",
        )?;

        registry.register(Box::new(proxy_count.clone()))?;
        registry.register(Box::new(last_update_timestamp.clone()))?;
        registry.register(Box::new(checks_total.clone()))?;
        registry.register(Box::new(checks_success.clone()))?;

        Ok(Self {
            registry,
            proxy_count,
            last_update_timestamp,
            checks_total,
            checks_success,
        })
    }

    pub fn record_check(&self, success: bool) {
        self.checks_total.inc();
        if success {
            self.checks_success.inc();
        }
    }

    pub fn record_refresh(&self, pool_size: usize, timestamp: f64) {
        self.proxy_count.set(pool_size as i64);
        self.last_update_timestamp.set(timestamp);
    }

    pub fn checks_total(&self) -> u64 {
        self.checks_total.get()
    }

    pub fn checks_success(&self) -> u64 {
        self.checks_success.get()
    }

    /// Render all metrics in the Prometheus text format
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| RelayPoolError::Internal(e.to_string()))
    }

    pub fn content_type(&self) -> &'static str {
        prometheus::TEXT_FORMAT
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_contains_all_series() {
        let metrics = PoolMetrics::new().unwrap();
        metrics.record_check(true);
        metrics.record_check(false);
        metrics.record_refresh(42, 1_700_000_000.0);

        let text = metrics.render().unwrap();
        assert!(text.contains("proxy_catcher_proxy_count 42"));
        assert!(text.contains("proxy_catcher_last_update_timestamp 1700000000"));
        assert!(text.contains("proxy_catcher_proxy_checks_total 2"));
        assert!(text.contains("proxy_catcher_proxy_checks_success 1"));
    }

    #[test]
    fn test_independent_registries() {
        let a = PoolMetrics::new().unwrap();
        let b = PoolMetrics::new().unwrap();
        a.record_check(true);
        assert_eq!(a.checks_total(), 1);
        assert_eq!(b.checks_total(), 0);
    }
}
