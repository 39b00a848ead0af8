use chrono::{Local, TimeZone};
use serde::{Deserialize, Serialize};

/// Body of `GET /stats`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolStats {
    pub proxy_count: usize,
    /// Epoch seconds of the last merge, 0 if the pool was never refreshed
    pub last_updated: f64,
    pub last_updated_formatted: String,
}

impl PoolStats {
    pub fn new(proxy_count: usize, last_updated: f64) -> Self {
        Self {
            proxy_count,
            last_updated,
            last_updated_formatted: format_timestamp(last_updated),
        }
    }
}

/// Render an epoch timestamp as local `%Y-%m-%d %H:%M:%S`, or "Never" for 0
pub fn format_timestamp(epoch_secs: f64) -> String {
    if epoch_secs <= 0.0 {
        return "Never".to_string();
    }

    Local
        .timestamp_opt(epoch_secs.trunc() as i64, 0)
        .single()
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "Never".to_string())
}

/// Summary of one refresh cycle
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    /// Candidates produced by the aggregator
    pub candidates: usize,
    /// Candidates that passed validation this cycle
    pub validated: usize,
    /// Pool size after the merge
    pub pool_size: usize,
    /// Self-managed entries appended to the pool
    pub self_managed: usize,
    /// Candidates dropped because the validation budget ran out
    pub unchecked: usize,
}
