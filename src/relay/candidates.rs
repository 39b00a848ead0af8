//! Where bootstrap gets proxy candidates from

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use crate::error::{RelayPoolError, Result};
use crate::models::ProxyEndpoint;
use crate::proxy::ProxyPool;

/// Supplies one random proxy endpoint at a time
#[async_trait]
pub trait CandidateSource: Send + Sync {
    async fn random_candidate(&self) -> Result<ProxyEndpoint>;
}

/// Queries a remote pool service over HTTP
pub struct PoolServiceClient {
    client: Client,
    base_url: String,
}

impl PoolServiceClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl CandidateSource for PoolServiceClient {
    async fn random_candidate(&self) -> Result<ProxyEndpoint> {
        let url = format!("{}/random-proxies?count=1", self.base_url);
        let response = self.client.get(&url).send().await?;

        if !response.status().is_success() {
            return Err(RelayPoolError::Http(format!(
                "pool service answered {}",
                response.status()
            )));
        }

        let body = response.text().await?;
        let line = body
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .ok_or(RelayPoolError::NoCandidates)?;

        ProxyEndpoint::parse(line)
    }
}

/// In-process pool, used when both services share one process
#[async_trait]
impl CandidateSource for ProxyPool {
    async fn random_candidate(&self) -> Result<ProxyEndpoint> {
        self.random(1, None)
            .into_iter()
            .next()
            .ok_or(RelayPoolError::NoCandidates)
    }
}
