use std::path::PathBuf;
use std::str::FromStr;

use crate::engine::{OverlapPolicy, PolicyConfig};

/// Server settings, read once from `STAYGRID_*` environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    /// WAL appends between automatic compactions.
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,
    pub policy: PolicyConfig,
    pub default_days_ahead: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    InvalidPolicy { var: &'static str, detail: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::InvalidPolicy { var, detail } => write!(f, "{var}: {detail}"),
        }
    }
}

impl std::error::Error for ConfigError {}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    lookup(key).and_then(|s| s.trim().parse().ok())
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Numeric values that fail to parse fall back to their defaults; policy names must be valid.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let policy = |var: &'static str, default: OverlapPolicy| -> Result<OverlapPolicy, ConfigError> {
            match lookup(var) {
                Some(s) => s
                    .parse()
                    .map_err(|detail| ConfigError::InvalidPolicy { var, detail }),
                None => Ok(default),
            }
        };
        let defaults = PolicyConfig::default();

        Ok(Self {
            bind: lookup("STAYGRID_BIND").unwrap_or_else(|| "0.0.0.0".into()),
            port: parsed(&lookup, "STAYGRID_PORT").unwrap_or(5433),
            data_dir: PathBuf::from(lookup("STAYGRID_DATA_DIR").unwrap_or_else(|| "./data".into())),
            password: lookup("STAYGRID_PASSWORD").unwrap_or_else(|| "staygrid".into()),
            max_connections: parsed(&lookup, "STAYGRID_MAX_CONNECTIONS").unwrap_or(256),
            compact_threshold: parsed(&lookup, "STAYGRID_COMPACT_THRESHOLD").unwrap_or(1000),
            metrics_port: parsed(&lookup, "STAYGRID_METRICS_PORT"),
            tls_cert: lookup("STAYGRID_TLS_CERT"),
            tls_key: lookup("STAYGRID_TLS_KEY"),
            policy: PolicyConfig {
                unscoped: policy("STAYGRID_OVERLAP_POLICY", defaults.unscoped)?,
                scoped: policy("STAYGRID_SCOPED_OVERLAP_POLICY", defaults.scoped)?,
            },
            default_days_ahead: parsed(&lookup, "STAYGRID_DEFAULT_DAYS_AHEAD").unwrap_or(365),
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn overrides_wal(&self) -> PathBuf {
        self.data_dir.join("overrides.wal")
    }

    pub fn directory_wal(&self) -> PathBuf {
        self.data_dir.join("directory.wal")
    }
}
