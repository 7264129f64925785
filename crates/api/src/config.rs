//! Server configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required
//! - `JWT_SECRET` - HS256 secret used to verify bearer tokens
//!
//! ## Optional
//! - `BIND_ADDR` - Listen address (default: 0.0.0.0:8080)
//! - `DATABASE_URL` - `PostgreSQL` connection string; unset keeps all state in memory
//! - `DATABASE_MAX_CONNECTIONS` - Pool size (default: 10)
//! - `OPS_NOTIFICATION_RECIPIENTS` - Comma-separated addresses alerted about new orders
//! - `PRICE_LIST_FETCH_TIMEOUT_SECS` - Remote price-list fetch timeout (default: 30)
//! - `STOCK_POLICY` - `advisory` (default) or `decrement_on_finalize`
//! - `INGESTION_MAX_ATTEMPTS` - Attempts per ingestion job (default: 3)
//! - `NOTIFICATION_MAX_ATTEMPTS` - Delivery attempts per notification, backing off
//!   exponentially from 2s up to 5 minutes (default: 5)
//! - `LOG_FORMAT` - `json` (default) or `pretty`

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use procura_inventory::StockPolicy;
use procura_observability::LogFormat;

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
}

#[derive(Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    /// `None` runs the in-memory store
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub jwt_secret: String,
    pub ops_recipients: Vec<String>,
    pub fetch_timeout: Duration,
    pub stock_policy: StockPolicy,
    pub ingestion_max_attempts: u32,
    pub notification_max_attempts: u32,
    pub log_format: LogFormat,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("bind_addr", &self.bind_addr)
            .field("database_url", &self.database_url.as_ref().map(|_| "[REDACTED]"))
            .field("database_max_connections", &self.database_max_connections)
            .field("jwt_secret", &"[REDACTED]")
            .field("ops_recipients", &self.ops_recipients)
            .field("fetch_timeout", &self.fetch_timeout)
            .field("stock_policy", &self.stock_policy)
            .field("ingestion_max_attempts", &self.ingestion_max_attempts)
            .field("notification_max_attempts", &self.notification_max_attempts)
            .field("log_format", &self.log_format)
            .finish()
    }
}

impl AppConfig {
    /// Load configuration from the process environment (and `.env` if present).
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let jwt_secret = get("JWT_SECRET").ok_or_else(|| ConfigError::MissingEnvVar("JWT_SECRET".into()))?;

        let ops_recipients = get("OPS_NOTIFICATION_RECIPIENTS")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            bind_addr: parse_or("BIND_ADDR", get("BIND_ADDR"), || {
                DEFAULT_BIND_ADDR.parse().map_err(|e| format!("{e}"))
            })?,
            database_url: get("DATABASE_URL"),
            database_max_connections: parse_or("DATABASE_MAX_CONNECTIONS", get("DATABASE_MAX_CONNECTIONS"), || Ok(10))?,
            jwt_secret,
            ops_recipients,
            fetch_timeout: Duration::from_secs(parse_or(
                "PRICE_LIST_FETCH_TIMEOUT_SECS",
                get("PRICE_LIST_FETCH_TIMEOUT_SECS"),
                || Ok(30),
            )?),
            stock_policy: parse_or("STOCK_POLICY", get("STOCK_POLICY"), || Ok(StockPolicy::Advisory))?,
            ingestion_max_attempts: positive(
                "INGESTION_MAX_ATTEMPTS",
                parse_or("INGESTION_MAX_ATTEMPTS", get("INGESTION_MAX_ATTEMPTS"), || Ok(3))?,
            )?,
            notification_max_attempts: positive(
                "NOTIFICATION_MAX_ATTEMPTS",
                parse_or("NOTIFICATION_MAX_ATTEMPTS", get("NOTIFICATION_MAX_ATTEMPTS"), || Ok(5))?,
            )?,
            log_format: parse_or("LOG_FORMAT", get("LOG_FORMAT"), || Ok(LogFormat::Json))?,
        })
    }
}

fn parse_or<T>(
    key: &str,
    raw: Option<String>,
    default: impl FnOnce() -> Result<T, String>,
) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match raw {
        Some(raw) => raw
            .parse()
            .map_err(|e: T::Err| ConfigError::InvalidEnvVar(key.to_string(), format!("'{raw}': {e}"))),
        None => default().map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e)),
    }
}

fn positive(key: &str, value: u32) -> Result<u32, ConfigError> {
    if value == 0 {
        return Err(ConfigError::InvalidEnvVar(key.to_string(), "must be at least 1".into()));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let vars: HashMap<String, String> =
            vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        AppConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_with_only_the_secret() {
        let config = load(&[("JWT_SECRET", "s3cret")]).unwrap();

        assert_eq!(config.bind_addr, "0.0.0.0:8080".parse().unwrap());
        assert_eq!(config.database_url, None);
        assert_eq!(config.database_max_connections, 10);
        assert!(config.ops_recipients.is_empty());
        assert_eq!(config.fetch_timeout, Duration::from_secs(30));
        assert_eq!(config.stock_policy, StockPolicy::Advisory);
        assert_eq!(config.ingestion_max_attempts, 3);
        assert_eq!(config.notification_max_attempts, 5);
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn secret_is_required() {
        assert_eq!(load(&[]).unwrap_err(), ConfigError::MissingEnvVar("JWT_SECRET".into()));
        assert_eq!(
            load(&[("JWT_SECRET", "  ")]).unwrap_err(),
            ConfigError::MissingEnvVar("JWT_SECRET".into())
        );
    }

    #[test]
    fn values_are_parsed() {
        let config = load(&[
            ("JWT_SECRET", "s3cret"),
            ("BIND_ADDR", "127.0.0.1:9000"),
            ("DATABASE_URL", "postgres://localhost/procura"),
            ("OPS_NOTIFICATION_RECIPIENTS", "ops@example.com, , sales@example.com"),
            ("PRICE_LIST_FETCH_TIMEOUT_SECS", "5"),
            ("STOCK_POLICY", "decrement_on_finalize"),
            ("LOG_FORMAT", "pretty"),
        ])
        .unwrap();

        assert_eq!(config.bind_addr.port(), 9000);
        assert_eq!(config.database_url.as_deref(), Some("postgres://localhost/procura"));
        assert_eq!(config.ops_recipients, vec!["ops@example.com", "sales@example.com"]);
        assert_eq!(config.fetch_timeout, Duration::from_secs(5));
        assert_eq!(config.stock_policy, StockPolicy::DecrementOnFinalize);
        assert_eq!(config.log_format, LogFormat::Pretty);
    }

    #[test]
    fn invalid_values_name_the_variable() {
        let err = load(&[("JWT_SECRET", "s"), ("STOCK_POLICY", "reserve")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnvVar(key, _) if key == "STOCK_POLICY"));

        let err = load(&[("JWT_SECRET", "s"), ("DATABASE_MAX_CONNECTIONS", "many")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnvVar(key, _) if key == "DATABASE_MAX_CONNECTIONS"));

        let err = load(&[("JWT_SECRET", "s"), ("INGESTION_MAX_ATTEMPTS", "0")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnvVar(key, _) if key == "INGESTION_MAX_ATTEMPTS"));
    }

    #[test]
    fn debug_redacts_secrets() {
        let config = load(&[("JWT_SECRET", "s3cret"), ("DATABASE_URL", "postgres://u:pw@db/x")]).unwrap();
        let debug = format!("{config:?}");
        assert!(!debug.contains("s3cret"));
        assert!(!debug.contains("pw@db"));
    }
}
