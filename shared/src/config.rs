use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use crate::Error;

/// Server certificate verification mode for TLS connections.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CertReqs {
    #[default]
    None,
    Optional,
    Required,
}

impl CertReqs {
    pub fn verifies(&self) -> bool {
        !matches!(self, CertReqs::None)
    }
}

impl FromStr for CertReqs {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" | "cert_none" => Ok(CertReqs::None),
            "optional" | "cert_optional" => Ok(CertReqs::Optional),
            "required" | "cert_required" => Ok(CertReqs::Required),
            other => Err(Error::Config(format!(
                "unknown certificate verification mode '{other}'"
            ))),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TlsConfig {
    pub enabled: bool,
    /// PEM bundle of trusted CA certificates. Falls back to the bundled
    /// Mozilla roots when unset.
    pub ca_certs: Option<PathBuf>,
    pub cert_reqs: CertReqs,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeepaliveConfig {
    pub enabled: bool,
    pub idle: Duration,
    pub interval: Duration,
    pub probes: u32,
    /// Maximum time transmitted data may stay unacknowledged before the
    /// kernel drops the connection (`TCP_USER_TIMEOUT`, Linux only).
    pub socket_timeout: Option<Duration>,
}

impl Default for KeepaliveConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            idle: Duration::from_secs(CacheConfig::DEFAULT_KEEPALIVE_IDLE_SECS),
            interval: Duration::from_secs(CacheConfig::DEFAULT_KEEPALIVE_INTERVAL_SECS),
            probes: CacheConfig::DEFAULT_KEEPALIVE_COUNT,
            socket_timeout: None,
        }
    }
}

/// Connection settings for the shared cache backend.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheConfig {
    pub host: String,
    pub port: u16,
    pub db: u32,
    pub password: Option<String>,
    pub max_connections: usize,
    /// Idle connections older than this are probed with PING before reuse.
    /// Zero disables the probe.
    pub health_check_interval: Duration,
    pub tls: TlsConfig,
    pub keepalive: KeepaliveConfig,
}

impl CacheConfig {
    const DEFAULT_HOST: &str = "localhost";
    const DEFAULT_PORT: u16 = 6379;
    const DEFAULT_MAX_CONNECTIONS: usize = 128;
    const DEFAULT_HEALTH_CHECK_INTERVAL_SECS: u64 = 60;
    const DEFAULT_KEEPALIVE_IDLE_SECS: u64 = 60;
    const DEFAULT_KEEPALIVE_INTERVAL_SECS: u64 = 15;
    const DEFAULT_KEEPALIVE_COUNT: u32 = 3;

    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            db: 0,
            password: None,
            max_connections: Self::DEFAULT_MAX_CONNECTIONS,
            health_check_interval: Duration::from_secs(Self::DEFAULT_HEALTH_CHECK_INTERVAL_SECS),
            tls: TlsConfig::default(),
            keepalive: KeepaliveConfig::default(),
        }
    }

    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = &lookup;
        let host = lookup("CACHE_HOST").unwrap_or_else(|| Self::DEFAULT_HOST.to_string());

        Self {
            host,
            port: parse_or(lookup, "CACHE_PORT", Self::DEFAULT_PORT),
            db: parse_or(lookup, "CACHE_DB_NUMBER", 0),
            password: lookup("CACHE_PASSWORD").filter(|p| !p.is_empty()),
            max_connections: parse_or(
                lookup,
                "CACHE_POOL_MAX_CONNECTIONS",
                Self::DEFAULT_MAX_CONNECTIONS,
            ),
            health_check_interval: Duration::from_secs(parse_or(
                lookup,
                "CACHE_HEALTH_CHECK_INTERVAL",
                Self::DEFAULT_HEALTH_CHECK_INTERVAL_SECS,
            )),
            tls: TlsConfig {
                enabled: flag_or(lookup, "CACHE_SSL", false),
                ca_certs: lookup("CACHE_SSL_CA_CERTS")
                    .filter(|p| !p.is_empty())
                    .map(PathBuf::from),
                cert_reqs: parse_or(lookup, "CACHE_SSL_CERT_REQS", CertReqs::None),
            },
            keepalive: KeepaliveConfig {
                enabled: flag_or(lookup, "CACHE_SOCKET_KEEPALIVE", true),
                idle: Duration::from_secs(parse_or(
                    lookup,
                    "CACHE_KEEPALIVE_IDLE",
                    Self::DEFAULT_KEEPALIVE_IDLE_SECS,
                )),
                interval: Duration::from_secs(parse_or(
                    lookup,
                    "CACHE_KEEPALIVE_INTERVAL",
                    Self::DEFAULT_KEEPALIVE_INTERVAL_SECS,
                )),
                probes: parse_or(lookup, "CACHE_KEEPALIVE_COUNT", Self::DEFAULT_KEEPALIVE_COUNT),
                socket_timeout: lookup("CACHE_SOCKET_TIMEOUT")
                    .and_then(|v| parse_value::<u64>("CACHE_SOCKET_TIMEOUT", &v))
                    .map(Duration::from_secs),
            },
        }
    }

    /// Checks the settings that can be rejected without touching the network.
    pub fn validate(&self) -> crate::Result<()> {
        if self.host.trim().is_empty() {
            return Err(Error::Config("cache host must not be empty".to_string()));
        }
        if self.port == 0 {
            return Err(Error::Config("cache port must not be zero".to_string()));
        }
        if self.max_connections == 0 {
            return Err(Error::Config(
                "max_connections must be at least 1".to_string(),
            ));
        }
        if !self.tls.enabled && self.tls.ca_certs.is_some() {
            warn!("CA bundle configured while TLS is disabled; it will be ignored");
        }
        Ok(())
    }

    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Settings for the bundled development server.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub password: Option<String>,
}

impl ServerConfig {
    const DEFAULT_HOST: &str = "127.0.0.1";
    const DEFAULT_PORT: u16 = 6379;

    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = &lookup;
        Self {
            host: lookup("CACHE_SERVER_HOST").unwrap_or_else(|| Self::DEFAULT_HOST.to_string()),
            port: parse_or(lookup, "CACHE_SERVER_PORT", Self::DEFAULT_PORT),
            password: lookup("CACHE_SERVER_PASSWORD").filter(|p| !p.is_empty()),
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_value<T: FromStr>(key: &str, raw: &str) -> Option<T> {
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("Ignoring unparseable value '{}' for {}", raw, key);
            None
        }
    }
}

fn parse_or<T, F>(lookup: &F, key: &str, default: T) -> T
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .and_then(|raw| parse_value(key, &raw))
        .unwrap_or(default)
}

fn flag_or<F>(lookup: &F, key: &str, default: bool) -> bool
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" | "" => false,
            _ => {
                warn!("Ignoring unparseable flag '{}' for {}", raw, key);
                default
            }
        },
        None => default,
    }
}
