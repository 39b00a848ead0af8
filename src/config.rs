use crate::error::{RelayPoolError, Result};
use crate::models::ProxyEndpoint;
use crate::proxy::sources::SourceDescriptor;
use reqwest::header::HeaderName;
use std::env;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

/// Which HTTP services this process runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceMode {
    /// Proxy pool service only
    Pool,
    /// Scrape relay only, fed by a remote pool service
    Relay,
    /// Both services in one process, relay fed in-process
    All,
}

impl ServiceMode {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pool" => Some(ServiceMode::Pool),
            "relay" => Some(ServiceMode::Relay),
            "all" | "both" => Some(ServiceMode::All),
            _ => None,
        }
    }

    pub fn runs_pool(&self) -> bool {
        matches!(self, ServiceMode::Pool | ServiceMode::All)
    }

    pub fn runs_relay(&self) -> bool {
        matches!(self, ServiceMode::Relay | ServiceMode::All)
    }
}

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub mode: ServiceMode,
    /// Proxy pool service configuration
    pub pool: PoolServiceConfig,
    /// Scrape relay configuration
    pub relay: RelayServiceConfig,
    /// Logging configuration
    pub log: LogConfig,
}

#[derive(Debug, Clone)]
pub struct PoolServiceConfig {
    /// Host to bind to (default: 0.0.0.0)
    pub host: String,
    /// Port for the pool service (default: 8880)
    pub port: u16,
    /// Seconds between refresh cycles
    pub refresh_interval_secs: u64,
    /// Maximum number of entries served, self-managed included
    pub cap: usize,
    /// Pool is healthy only above this count
    pub min_healthy: usize,
    /// Verification target for liveness probes
    pub check_url: String,
    /// Concurrent probes per batch
    pub validation_concurrency: usize,
    /// Candidates per validation batch
    pub validation_batch_size: usize,
    /// Wall-clock budget for one validation pass
    pub validation_budget_secs: u64,
    /// Per-probe timeout
    pub validation_timeout_secs: u64,
    /// Per-source download timeout
    pub source_timeout_secs: u64,
    /// Source table; the built-in public lists unless PROXY_SOURCES_FILE is set
    pub sources: Vec<SourceDescriptor>,
    /// Trusted endpoints that are never evicted by the cap
    pub self_managed: Vec<ProxyEndpoint>,
    /// Whether self-managed endpoints are probed like sourced ones
    pub validate_self_managed: bool,
}

#[derive(Debug, Clone)]
pub struct RelayServiceConfig {
    /// Host to bind to (default: 0.0.0.0)
    pub host: String,
    /// Port for the relay (default: 8881)
    pub port: u16,
    /// Exit the process once errors exceed the threshold
    pub exit_on_error: bool,
    /// Consecutive failures tolerated before fail-fast kicks in
    pub fail_fast_threshold: u64,
    /// Base URL of the pool service used as bootstrap candidate source
    pub pool_service_url: String,
    /// Target URLs every new session must fetch successfully
    pub probe_urls: Vec<String>,
    /// Target number of scraper sessions
    pub scraper_pool_size: usize,
    /// Candidates tried per bootstrap invocation
    pub bootstrap_attempts: usize,
    /// Timeout for each bootstrap probe
    pub bootstrap_probe_timeout_secs: u64,
    /// Timeout for each relayed fetch
    pub scrape_timeout_secs: u64,
    /// Pause between bootstrap calls while below target
    pub refill_pause_secs: u64,
    /// Monitoring interval once at target
    pub refill_idle_secs: u64,
    /// Body substrings that mark a challenge page
    pub challenge_markers: Vec<String>,
    /// Inbound headers forwarded upstream
    pub forward_headers: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Log level (debug, info, warn, error)
    pub level: String,
    /// Output format (json, pretty)
    pub format: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let mode_raw = get_env_or("SERVICE_MODE", "all");
        let mode = ServiceMode::from_str(&mode_raw).ok_or_else(|| {
            RelayPoolError::InvalidConfig(format!(
                "SERVICE_MODE must be pool, relay or all (got {})",
                mode_raw
            ))
        })?;

        let pool_port: u16 = parse_env("POOL_PORT", "8880")?;

        let config = Config {
            mode,
            pool: PoolServiceConfig {
                host: get_env_or("POOL_HOST", "0.0.0.0"),
                port: pool_port,
                refresh_interval_secs: parse_env("REFRESH_INTERVAL_SECS", "900")?,
                cap: parse_env("POOL_CAP", "250")?,
                min_healthy: parse_env("POOL_MIN_HEALTHY", "10")?,
                check_url: parse_url_env(
                    "URL_CHECK",
                    "https://www.binance.com/bapi/apex/v1/public/apex/cms/article/list/query?type=1&pageNo=1&pageSize=2",
                )?,
                validation_concurrency: parse_env::<usize>("VALIDATION_CONCURRENCY", "3")?.max(1),
                validation_batch_size: parse_env::<usize>("VALIDATION_BATCH_SIZE", "100")?.max(1),
                validation_budget_secs: parse_env("VALIDATION_BUDGET_SECS", "200")?,
                validation_timeout_secs: parse_env("VALIDATION_TIMEOUT_SECS", "8")?,
                source_timeout_secs: parse_env("SOURCE_TIMEOUT_SECS", "10")?,
                sources: load_sources()?,
                self_managed: parse_endpoint_list(&get_env_or("SELF_MANAGED_PROXIES", ""))?,
                validate_self_managed: parse_flag("VALIDATE_SELF_MANAGED", "false")?,
            },
            relay: RelayServiceConfig {
                host: get_env_or("RELAY_HOST", "0.0.0.0"),
                port: parse_env("PORT", "8881")?,
                exit_on_error: parse_flag("EXIT_ON_ERR", "false")?,
                fail_fast_threshold: parse_env("FAIL_FAST_THRESHOLD", "10")?,
                pool_service_url: parse_url_env(
                    "POOL_SERVICE_URL",
                    &format!("http://127.0.0.1:{}", pool_port),
                )?
                .trim_end_matches('/')
                .to_string(),
                probe_urls: split_list(&get_env_or("PROBE_URLS", "https://www.binance.com/en")),
                scraper_pool_size: parse_env::<usize>("SCRAPER_POOL_SIZE", "10")?.max(1),
                bootstrap_attempts: parse_env("BOOTSTRAP_ATTEMPTS", "25")?,
                bootstrap_probe_timeout_secs: parse_env("BOOTSTRAP_PROBE_TIMEOUT_SECS", "10")?,
                scrape_timeout_secs: parse_env("SCRAPE_TIMEOUT_SECS", "15")?,
                refill_pause_secs: parse_env("REFILL_PAUSE_SECS", "2")?,
                refill_idle_secs: parse_env("REFILL_IDLE_SECS", "30")?,
                challenge_markers: split_list(&get_env_or("CHALLENGE_MARKERS", "cf-alert")),
                forward_headers: split_list(&get_env_or("FORWARD_HEADERS", "Range")),
            },
            log: LogConfig {
                level: get_env_or("LOG_LEVEL", "info"),
                format: get_env_or("LOG_FORMAT", "json"),
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Cross-field checks that single-variable parsing cannot catch
    fn validate(&self) -> Result<()> {
        if self.mode.runs_pool() && self.pool.self_managed.len() > self.pool.cap {
            return Err(RelayPoolError::InvalidConfig(format!(
                "SELF_MANAGED_PROXIES has {} entries but POOL_CAP is {}",
                self.pool.self_managed.len(),
                self.pool.cap
            )));
        }
        if self.mode.runs_relay() && self.relay.probe_urls.is_empty() {
            return Err(RelayPoolError::InvalidConfig(
                "PROBE_URLS must list at least one URL".into(),
            ));
        }
        Ok(())
    }

    /// Get the pool service address
    pub fn pool_addr(&self) -> String {
        format!("{}:{}", self.pool.host, self.pool.port)
    }

    /// Get the relay service address
    pub fn relay_addr(&self) -> String {
        format!("{}:{}", self.relay.host, self.relay.port)
    }
}

impl PoolServiceConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs.max(1))
    }

    pub fn validation_budget(&self) -> Duration {
        Duration::from_secs(self.validation_budget_secs)
    }

    pub fn validation_timeout(&self) -> Duration {
        Duration::from_secs(self.validation_timeout_secs.max(1))
    }

    pub fn source_timeout(&self) -> Duration {
        Duration::from_secs(self.source_timeout_secs.max(1))
    }
}

impl RelayServiceConfig {
    pub fn bootstrap_probe_timeout(&self) -> Duration {
        Duration::from_secs(self.bootstrap_probe_timeout_secs.max(1))
    }

    pub fn scrape_timeout(&self) -> Duration {
        Duration::from_secs(self.scrape_timeout_secs.max(1))
    }

    pub fn refill_pause(&self) -> Duration {
        Duration::from_secs(self.refill_pause_secs)
    }

    pub fn refill_idle(&self) -> Duration {
        Duration::from_secs(self.refill_idle_secs.max(1))
    }

    /// Parsed `FORWARD_HEADERS` allow-list
    pub fn forward_header_names(&self) -> Result<Vec<HeaderName>> {
        self.forward_headers
            .iter()
            .map(|h| {
                HeaderName::from_bytes(h.as_bytes()).map_err(|_| {
                    RelayPoolError::InvalidConfig(format!("FORWARD_HEADERS: invalid header {}", h))
                })
            })
            .collect()
    }
}

fn load_sources() -> Result<Vec<SourceDescriptor>> {
    let path = get_env_or("PROXY_SOURCES_FILE", "");
    if path.trim().is_empty() {
        return SourceDescriptor::default_table();
    }

    let raw = std::fs::read_to_string(path.trim())?;
    SourceDescriptor::from_json(&raw)
}

fn parse_endpoint_list(raw: &str) -> Result<Vec<ProxyEndpoint>> {
    split_list(raw)
        .iter()
        .map(|s| {
            ProxyEndpoint::parse(s).map_err(|e| {
                RelayPoolError::InvalidConfig(format!("SELF_MANAGED_PROXIES: {}", e))
            })
        })
        .collect()
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn parse_env<T: FromStr>(key: &str, default: &str) -> Result<T> {
    get_env_or(key, default)
        .trim()
        .parse()
        .map_err(|_| RelayPoolError::InvalidConfig(format!("{} has an invalid value", key)))
}

/// Boolean switch: `1/0`, `true/false`, `yes/no`, `on/off`, any case
fn parse_flag(key: &str, default: &str) -> Result<bool> {
    match get_env_or(key, default).trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(RelayPoolError::InvalidConfig(format!(
            "{} must be a boolean flag",
            key
        ))),
    }
}

fn parse_url_env(key: &str, default: &str) -> Result<String> {
    let raw = get_env_or(key, default);
    Url::parse(raw.trim()).map_err(|e| {
        RelayPoolError::InvalidConfig(format!("{} must be a valid URL: {}", key, e))
    })?;
    Ok(raw.trim().to_string())
}

/// Get environment variable with a default value
fn get_env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}
