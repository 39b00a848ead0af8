use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use url::Url;

use crate::error::{RelayPoolError, Result};

/// Proxy protocol type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProxyScheme {
    Http,
    Socks4,
    Socks5,
}

impl ProxyScheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProxyScheme::Http => "http",
            ProxyScheme::Socks4 => "socks4",
            ProxyScheme::Socks5 => "socks5",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "http" => Some(ProxyScheme::Http),
            "socks4" => Some(ProxyScheme::Socks4),
            "socks5" => Some(ProxyScheme::Socks5),
            _ => None,
        }
    }

    pub fn is_socks(&self) -> bool {
        matches!(self, ProxyScheme::Socks4 | ProxyScheme::Socks5)
    }

    /// Port assumed when the URI does not carry one
    pub fn default_port(&self) -> u16 {
        match self {
            ProxyScheme::Http => 80,
            ProxyScheme::Socks4 | ProxyScheme::Socks5 => 1080,
        }
    }
}

impl fmt::Display for ProxyScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An outbound proxy address.
///
/// Identity is the canonical URI `scheme://[user[:pass]@]host:port`, computed once
/// at parse time. Two endpoints are equal iff their canonical URIs are equal.
#[derive(Debug, Clone)]
pub struct ProxyEndpoint {
    scheme: ProxyScheme,
    username: Option<String>,
    password: Option<String>,
    host: String,
    port: u16,
    uri: String,
}

impl ProxyEndpoint {
    /// Parse and canonicalize a proxy URI
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(RelayPoolError::InvalidProxyUri("empty".into()));
        }
        if !raw.contains("://") {
            return Err(RelayPoolError::InvalidProxyUri(format!(
                "{}: missing scheme",
                raw
            )));
        }

        let url = Url::parse(raw)?;

        let scheme = ProxyScheme::from_str(url.scheme())
            .ok_or_else(|| RelayPoolError::UnsupportedScheme(url.scheme().to_string()))?;

        if url.query().is_some() || url.fragment().is_some() {
            return Err(RelayPoolError::InvalidProxyUri(format!(
                "{}: query/fragment not allowed",
                raw
            )));
        }
        if !(url.path().is_empty() || url.path() == "/") {
            return Err(RelayPoolError::InvalidProxyUri(format!(
                "{}: path not allowed",
                raw
            )));
        }

        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| RelayPoolError::InvalidProxyUri(format!("{}: missing host", raw)))?
            .to_lowercase();

        let port = url
            .port_or_known_default()
            .unwrap_or_else(|| scheme.default_port());

        let username = Some(url.username())
            .filter(|u| !u.is_empty())
            .map(str::to_string);
        let password = match (&username, url.password()) {
            (Some(_), Some(p)) => Some(p.to_string()),
            _ => None,
        };

        Ok(Self::from_parts(scheme, username, password, host, port))
    }

    fn from_parts(
        scheme: ProxyScheme,
        username: Option<String>,
        password: Option<String>,
        host: String,
        port: u16,
    ) -> Self {
        let uri = match (&username, &password) {
            (Some(user), Some(pass)) => {
                format!("{}://{}:{}@{}:{}", scheme, user, pass, host, port)
            }
            (Some(user), None) => format!("{}://{}@{}:{}", scheme, user, host, port),
            _ => format!("{}://{}:{}", scheme, host, port),
        };

        Self {
            scheme,
            username,
            password,
            host,
            port,
            uri,
        }
    }

    pub fn scheme(&self) -> ProxyScheme {
        self.scheme
    }

    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Canonical URI, also the pool identity
    pub fn as_str(&self) -> &str {
        &self.uri
    }

    /// Address without credentials, safe to log
    pub fn redacted(&self) -> String {
        format!("{}://{}:{}", self.scheme, self.host, self.port)
    }

    /// Build a reqwest proxy routing every request through this endpoint
    pub fn to_reqwest_proxy(&self) -> Result<reqwest::Proxy> {
        reqwest::Proxy::all(self.as_str()).map_err(|e| RelayPoolError::InvalidProxyUri(e.to_string()))
    }
}

impl PartialEq for ProxyEndpoint {
    fn eq(&self, other: &Self) -> bool {
        self.uri == other.uri
    }
}

impl Eq for ProxyEndpoint {}

impl std::hash::Hash for ProxyEndpoint {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.uri.hash(state);
    }
}

impl fmt::Display for ProxyEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.uri)
    }
}

impl FromStr for ProxyEndpoint {
    type Err = RelayPoolError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for ProxyEndpoint {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.uri)
    }
}

impl<'de> Deserialize<'de> for ProxyEndpoint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        ProxyEndpoint::parse(&raw).map_err(serde::de::Error::custom)
    }
}
