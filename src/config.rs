//! Server configuration, read from `STAYBOOK_*` environment variables with
//! defaults for everything.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use pgwire::tokio::TlsAcceptor;

#[derive(Debug)]
pub enum ConfigError {
    /// The variable is set but does not parse.
    Invalid(&'static str),
    /// Only one of the TLS certificate and key was given.
    TlsPair,
    Tls(std::io::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Invalid(var) => write!(f, "invalid value for {var}"),
            ConfigError::TlsPair => {
                write!(f, "both STAYBOOK_TLS_CERT and STAYBOOK_TLS_KEY must be set, or neither")
            }
            ConfigError::Tls(e) => write!(f, "TLS setup failed: {e}"),
        }
    }
}

impl std::error::Error for ConfigError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub port: u16,
    pub bind: String,
    pub data_dir: PathBuf,
    /// Shared password for every database user.
    pub password: String,
    /// The user allowed to change settings and vouchers.
    pub admin_user: String,
    pub max_connections: usize,
    /// WAL appends before the compactor rewrites the log.
    pub compact_threshold: u64,
    /// How long shutdown waits for open connections.
    pub drain_timeout: Duration,
    pub metrics_port: Option<u16>,
    pub tls_cert: Option<PathBuf>,
    pub tls_key: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 5433,
            bind: "0.0.0.0".into(),
            data_dir: PathBuf::from("./data"),
            password: "staybook".into(),
            admin_user: "admin".into(),
            max_connections: 256,
            compact_threshold: 1000,
            drain_timeout: Duration::from_secs(10),
            metrics_port: None,
            tls_cert: None,
            tls_key: None,
        }
    }
}

fn parse_or<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(var) {
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid(var)),
        None => Ok(default),
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from any variable source. Unset variables take their default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let d = Self::default();
        let metrics_port = match lookup("STAYBOOK_METRICS_PORT") {
            Some(raw) => Some(
                raw.trim()
                    .parse()
                    .map_err(|_| ConfigError::Invalid("STAYBOOK_METRICS_PORT"))?,
            ),
            None => None,
        };
        let tls_cert = lookup("STAYBOOK_TLS_CERT").map(PathBuf::from);
        let tls_key = lookup("STAYBOOK_TLS_KEY").map(PathBuf::from);
        if tls_cert.is_some() != tls_key.is_some() {
            return Err(ConfigError::TlsPair);
        }

        let config = Self {
            port: parse_or(&lookup, "STAYBOOK_PORT", d.port)?,
            bind: lookup("STAYBOOK_BIND").unwrap_or(d.bind),
            data_dir: lookup("STAYBOOK_DATA_DIR").map_or(d.data_dir, PathBuf::from),
            password: lookup("STAYBOOK_PASSWORD").unwrap_or(d.password),
            admin_user: lookup("STAYBOOK_ADMIN_USER").unwrap_or(d.admin_user),
            max_connections: parse_or(&lookup, "STAYBOOK_MAX_CONNECTIONS", d.max_connections)?,
            compact_threshold: parse_or(&lookup, "STAYBOOK_COMPACT_THRESHOLD", d.compact_threshold)?,
            drain_timeout: Duration::from_secs(parse_or(
                &lookup,
                "STAYBOOK_DRAIN_SECS",
                d.drain_timeout.as_secs(),
            )?),
            metrics_port,
            tls_cert,
            tls_key,
        };
        if config.max_connections == 0 {
            return Err(ConfigError::Invalid("STAYBOOK_MAX_CONNECTIONS"));
        }
        Ok(config)
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn tls_acceptor(&self) -> Result<Option<TlsAcceptor>, ConfigError> {
        match (&self.tls_cert, &self.tls_key) {
            (Some(cert), Some(key)) => crate::tls::load_tls_acceptor(cert, key)
                .map(Some)
                .map_err(ConfigError::Tls),
            (None, None) => Ok(None),
            _ => Err(ConfigError::TlsPair),
        }
    }
}
