use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use chrono::{Duration, Utc};

/// Placeholder JWT secrets that MUST NOT be used.
const PLACEHOLDER_SECRETS: &[&str] = &[
    "change-me-to-a-random-string",
    "dev-secret-change-me",
    "changeme",
];

#[derive(Debug, Clone)]
pub struct Config {
    pub jwt_secret: String,
    pub db_path: PathBuf,
    pub addr: SocketAddr,
    pub session_ttl: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the config from any key/value source.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let jwt_secret = get("SOKONI_JWT_SECRET").unwrap_or_default();
        if jwt_secret.is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            bail!("SOKONI_JWT_SECRET is unset or still a placeholder; set it in your .env file and restart");
        }

        let db_path: PathBuf = get("SOKONI_DB_PATH").unwrap_or_else(|| "sokoni.db".into()).into();
        let host = get("SOKONI_HOST").unwrap_or_else(|| "0.0.0.0".into());
        let port: u16 = get("SOKONI_PORT")
            .unwrap_or_else(|| "3000".into())
            .parse()
            .context("SOKONI_PORT must be a port number")?;
        let addr: SocketAddr = format!("{}:{}", host, port)
            .parse()
            .with_context(|| format!("invalid listen address {}:{}", host, port))?;

        let session_ttl_hours: i64 = match get("SOKONI_SESSION_TTL_HOURS") {
            Some(raw) => raw.parse().context("SOKONI_SESSION_TTL_HOURS must be a whole number of hours")?,
            None => 24,
        };
        if session_ttl_hours <= 0 {
            bail!("SOKONI_SESSION_TTL_HOURS must be positive");
        }
        let session_ttl = Duration::try_hours(session_ttl_hours)
            .filter(|ttl| Utc::now().checked_add_signed(*ttl).is_some())
            .with_context(|| format!("SOKONI_SESSION_TTL_HOURS={} is out of range", session_ttl_hours))?;

        Ok(Self {
            jwt_secret,
            db_path,
            addr,
            session_ttl,
        })
    }
}
