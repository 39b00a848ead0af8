//! Candidate proxy aggregation
//!
//! Every provider is described by the same `(url, pattern, template)` triple and
//! processed by one routine: download, split on whitespace, rewrite each token
//! with the pattern/template pair, canonicalize.

use std::collections::HashSet;
use std::time::Duration;

use futures::future;
use rand::seq::SliceRandom;
use regex::Regex;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info, instrument, warn};

use crate::error::{RelayPoolError, Result};
use crate::models::ProxyEndpoint;

/// Built-in public provider lists
const DEFAULT_SOURCES: &[(&str, &str, &str)] = &[
    (
        "https://raw.githubusercontent.com/ErcinDedeoglu/proxies/refs/heads/main/proxies/socks4.txt",
        r"(.+)",
        r"socks4://\1",
    ),
    (
        "https://raw.githubusercontent.com/monosans/proxy-list/refs/heads/main/proxies/socks5.txt",
        r"(.+)",
        r"socks5://\1",
    ),
    (
        "https://raw.githubusercontent.com/monosans/proxy-list/refs/heads/main/proxies/socks4.txt",
        r"(.+)",
        r"socks4://\1",
    ),
    (
        "https://raw.githubusercontent.com/dpangestuw/Free-Proxy/refs/heads/main/socks5_proxies.txt",
        r"(.+)",
        r"socks5://\1",
    ),
];

/// One provider of candidate proxies
#[derive(Debug, Clone)]
pub struct SourceDescriptor {
    pub url: String,
    pub pattern: Regex,
    /// Replacement in regex-crate syntax (`${1}`), converted from `\1` form
    pub template: String,
}

#[derive(Deserialize)]
struct RawSource {
    url: String,
    pattern: String,
    template: String,
}

impl SourceDescriptor {
    /// Build a descriptor from a pattern and a `\N` style template
    pub fn new(url: &str, pattern: &str, template: &str) -> Result<Self> {
        let pattern = Regex::new(pattern).map_err(|e| {
            RelayPoolError::InvalidConfig(format!("bad pattern for {}: {}", url, e))
        })?;

        Ok(Self {
            url: url.to_string(),
            pattern,
            template: convert_template(template),
        })
    }

    pub fn default_table() -> Result<Vec<Self>> {
        DEFAULT_SOURCES
            .iter()
            .map(|(url, pattern, template)| Self::new(url, pattern, template))
            .collect()
    }

    /// Parse a JSON array of `{url, pattern, template}` objects
    pub fn from_json(raw: &str) -> Result<Vec<Self>> {
        let entries: Vec<RawSource> = serde_json::from_str(raw)
            .map_err(|e| RelayPoolError::InvalidConfig(format!("sources file: {}", e)))?;

        entries
            .iter()
            .map(|s| Self::new(&s.url, &s.pattern, &s.template))
            .collect()
    }

    /// Rewrite one token into a proxy URI string
    pub fn transform(&self, token: &str) -> String {
        self.pattern
            .replace_all(token, self.template.as_str())
            .into_owned()
    }

    /// Turn a downloaded body into canonical endpoints, dropping unparseable tokens
    pub fn extract(&self, body: &str) -> Vec<ProxyEndpoint> {
        body.split_whitespace()
            .filter_map(|token| {
                let rewritten = self.transform(token);
                match ProxyEndpoint::parse(&rewritten) {
                    Ok(endpoint) => Some(endpoint),
                    Err(e) => {
                        debug!("Dropping token from {}: {}", self.url, e);
                        None
                    }
                }
            })
            .collect()
    }
}

/// Convert `\1` back-references to `${1}` and escape literal `$`
fn convert_template(template: &str) -> String {
    let mut out = String::with_capacity(template.len() + 8);
    let mut chars = template.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\\' if chars.peek().is_some_and(|n| n.is_ascii_digit()) => {
                out.push_str("${");
                while let Some(d) = chars.peek().copied().filter(char::is_ascii_digit) {
                    out.push(d);
                    chars.next();
                }
                out.push('}');
            }
            '$' => out.push_str("$$"),
            other => out.push(other),
        }
    }

    out
}

/// Output of one aggregation pass
#[derive(Debug, Clone, Default)]
pub struct Aggregation {
    /// Shuffled, deduplicated candidates that still need validation
    pub candidates: Vec<ProxyEndpoint>,
    /// Trusted endpoints that bypass validation
    pub self_managed: Vec<ProxyEndpoint>,
}

/// Pulls candidates from every configured source
pub struct Aggregator {
    client: Client,
    sources: Vec<SourceDescriptor>,
    self_managed: Vec<ProxyEndpoint>,
}

impl Aggregator {
    pub fn new(
        sources: Vec<SourceDescriptor>,
        self_managed: Vec<ProxyEndpoint>,
        source_timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder().timeout(source_timeout).build()?;

        Ok(Self {
            client,
            sources,
            self_managed,
        })
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    /// Download every source; unreachable sources are skipped
    #[instrument(skip(self))]
    pub async fn aggregate(&self) -> Aggregation {
        let downloads = self.sources.iter().map(|source| async move {
            match self.fetch(source).await {
                Ok(body) => {
                    let endpoints = source.extract(&body);
                    info!("Downloaded {} items from {}", endpoints.len(), source.url);
                    endpoints
                }
                Err(e) => {
                    warn!("{}", e);
                    Vec::new()
                }
            }
        });

        let per_source = future::join_all(downloads).await;

        let mut seen = HashSet::new();
        let mut candidates: Vec<ProxyEndpoint> = per_source
            .into_iter()
            .flatten()
            .filter(|endpoint| seen.insert(endpoint.as_str().to_string()))
            .collect();
        candidates.shuffle(&mut rand::thread_rng());

        Aggregation {
            candidates,
            self_managed: self.self_managed.clone(),
        }
    }

    async fn fetch(&self, source: &SourceDescriptor) -> Result<String> {
        let fetch_error = |reason: String| RelayPoolError::SourceFetch {
            url: source.url.clone(),
            reason,
        };

        let response = self
            .client
            .get(&source.url)
            .send()
            .await
            .map_err(|e| fetch_error(e.to_string()))?;

        if !response.status().is_success() {
            return Err(fetch_error(format!("status {}", response.status())));
        }

        response.text().await.map_err(|e| fetch_error(e.to_string()))
    }
}
