use std::time::Duration;

use anyhow::{Context, Result, bail};

#[derive(Clone, Debug)]
pub struct ServiceConfig {
    pub database_url: String,
    pub redis_url: Option<String>,
    pub http_addr: String,
    pub tally_url: String,
    pub tally_timeout: Duration,
    pub tally_company: Option<String>,
    pub education_mode: bool,
    pub db_max_connections: u32,
}

impl ServiceConfig {
    pub fn from_env(default_http_addr: &str) -> Result<Self> {
        Self::from_lookup(default_http_addr, |key| std::env::var(key).ok())
    }

    /// Same as [`ServiceConfig::from_env`] over an arbitrary variable source.
    pub fn from_lookup<F>(default_http_addr: &str, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let database_url = var("DATABASE_URL").context("DATABASE_URL is required")?;
        let http_addr = var("HTTP_ADDR").unwrap_or_else(|| default_http_addr.to_string());
        let tally_url = var("TALLY_URL").unwrap_or_else(|| "http://localhost:9000".to_string());

        let timeout_secs = match var("TALLY_TIMEOUT_SECS") {
            Some(value) => value.trim().parse::<u64>().with_context(|| {
                format!("TALLY_TIMEOUT_SECS must be whole seconds, got {value}")
            })?,
            None => 30,
        };
        if timeout_secs == 0 {
            bail!("TALLY_TIMEOUT_SECS must be greater than zero");
        }

        let education_mode = match var("TALLY_EDUCATION_MODE") {
            Some(value) => parse_flag(&value).with_context(|| {
                format!("TALLY_EDUCATION_MODE must be true or false, got {value}")
            })?,
            None => false,
        };

        let db_max_connections = match var("DB_MAX_CONNECTIONS") {
            Some(value) => value.trim().parse::<u32>().with_context(|| {
                format!("DB_MAX_CONNECTIONS must be a positive integer, got {value}")
            })?,
            None => 10,
        };

        Ok(Self {
            database_url,
            redis_url: var("REDIS_URL"),
            http_addr,
            tally_url,
            tally_timeout: Duration::from_secs(timeout_secs),
            tally_company: var("TALLY_COMPANY"),
            education_mode,
            db_max_connections: db_max_connections.max(1),
        })
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}
