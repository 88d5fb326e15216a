use anyhow::{Context, Result};
use std::{str::FromStr, time::Duration};

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Postgres URL; the in-memory store is used when unset.
    pub database_url: Option<String>,
    pub port: u16,
    pub log_filter: String,
    pub quiz_generator_url: Option<String>,
    pub notify_webhook_url: Option<String>,
    pub http_timeout: Duration,
    pub body_limit: usize,
}

const DEFAULT_LOG_FILTER: &str = "safetrain_progress=info,axum=info";

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |k: &str| lookup(k).filter(|v| !v.trim().is_empty());
        Ok(Self {
            database_url: get("DATABASE_URL"),
            port: parse_or(&get, "PORT", 8081)?,
            log_filter: get("RUST_LOG").unwrap_or_else(|| DEFAULT_LOG_FILTER.into()),
            quiz_generator_url: get("QUIZ_GENERATOR_URL"),
            notify_webhook_url: get("NOTIFY_WEBHOOK_URL"),
            http_timeout: Duration::from_secs(parse_or(&get, "HTTP_TIMEOUT_SECS", 30)?),
            body_limit: parse_or(&get, "BODY_LIMIT_BYTES", 2 * 1024 * 1024)?,
        })
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{key} has an invalid value {raw:?}")),
        None => Ok(default),
    }
}
