use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use tracing::warn;

const DEFAULT_JWT_SECRET: &str = "dev-secret-change-me";

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub jwt_secret: String,
    /// Push service for offline recipients. Notifications are only logged when unset.
    pub push_webhook_url: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 3000,
            db_path: PathBuf::from("parley.db"),
            jwt_secret: DEFAULT_JWT_SECRET.into(),
            push_webhook_url: None,
        }
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let defaults = Self::default();

        let port = match lookup("PARLEY_PORT") {
            Some(raw) => raw
                .parse()
                .with_context(|| format!("PARLEY_PORT is not a valid port: {:?}", raw))?,
            None => defaults.port,
        };

        let jwt_secret = lookup("PARLEY_JWT_SECRET").unwrap_or_else(|| {
            warn!("PARLEY_JWT_SECRET not set, using the development secret");
            defaults.jwt_secret
        });

        Ok(Self {
            host: lookup("PARLEY_HOST").unwrap_or(defaults.host),
            port,
            db_path: lookup("PARLEY_DB_PATH").map(PathBuf::from).unwrap_or(defaults.db_path),
            jwt_secret,
            push_webhook_url: lookup("PARLEY_PUSH_WEBHOOK_URL").filter(|url| !url.is_empty()),
        })
    }

    pub fn socket_addr(&self) -> anyhow::Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid listen address {}:{}", self.host, self.port))
    }
}
