use anyhow::{Context, Result};

const DEFAULT_MAX_CONNECTIONS: u32 = 10;

#[derive(Clone, Debug)]
pub struct ServiceConfig {
    pub database_url: String,
    /// Ledger notifications are only published when this is set.
    pub redis_url: Option<String>,
    pub http_addr: String,
    pub database_max_connections: u32,
}

impl ServiceConfig {
    pub fn from_env(default_http_addr: &str) -> Result<Self> {
        let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL is required")?;
        let redis_url = std::env::var("REDIS_URL")
            .ok()
            .filter(|url| !url.trim().is_empty());
        let http_addr =
            std::env::var("HTTP_ADDR").unwrap_or_else(|_| default_http_addr.to_string());
        let database_max_connections =
            parse_max_connections(std::env::var("DATABASE_MAX_CONNECTIONS").ok().as_deref())?;

        Ok(Self {
            database_url,
            redis_url,
            http_addr,
            database_max_connections,
        })
    }
}

fn parse_max_connections(value: Option<&str>) -> Result<u32> {
    let Some(value) = value.map(str::trim).filter(|value| !value.is_empty()) else {
        return Ok(DEFAULT_MAX_CONNECTIONS);
    };
    let parsed: u32 = value
        .parse()
        .with_context(|| format!("DATABASE_MAX_CONNECTIONS must be a positive integer, got '{value}'"))?;
    anyhow::ensure!(parsed > 0, "DATABASE_MAX_CONNECTIONS must be at least 1");
    Ok(parsed)
}
