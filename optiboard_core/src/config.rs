use crate::{Error, Result};
use std::path::PathBuf;
use std::time::Duration;

/// Remote optimization service connection settings.
#[derive(Debug, Clone)]
pub struct RemoteConfig {
    pub base_url: String,
    pub timeout: Duration,
}

/// Process-wide configuration for the dashboard backend.
///
/// The master secret protects every stored API key; its absence is a startup
/// failure (`Error::Configuration`), never a per-request surprise.
#[derive(Debug, Clone)]
pub struct DashboardConfig {
    /// Master secret the vault derives its AES-256 key from.
    pub master_secret: String,
    pub remote: RemoteConfig,
    /// SQLite file backing the local result cache + key store.
    pub db_path: PathBuf,
}

impl DashboardConfig {
    pub fn from_env() -> Result<Self> {
        let master_secret = std::env::var("OPTIBOARD_MASTER_SECRET").map_err(|_| {
            Error::Configuration("OPTIBOARD_MASTER_SECRET is required".to_string())
        })?;

        let base_url = std::env::var("OPTIBOARD_REMOTE_URL")
            .unwrap_or_else(|_| "http://localhost:8600".to_string());
        let timeout_ms = std::env::var("OPTIBOARD_REMOTE_TIMEOUT_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(10_000);

        let db_path = std::env::var("OPTIBOARD_DB_PATH")
            .ok()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./data/optiboard.db"));

        let cfg = Self {
            master_secret,
            remote: RemoteConfig {
                base_url,
                timeout: Duration::from_millis(timeout_ms),
            },
            db_path,
        };

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.master_secret.trim().is_empty() {
            return Err(Error::Configuration("master_secret is empty".to_string()));
        }
        if self.remote.base_url.trim().is_empty() {
            return Err(Error::Configuration("remote.base_url is empty".to_string()));
        }
        if self.remote.timeout.is_zero() {
            return Err(Error::Configuration(
                "remote.timeout must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_master_secret_is_a_configuration_error() {
        let cfg = DashboardConfig {
            master_secret: "   ".to_string(),
            remote: RemoteConfig {
                base_url: "http://localhost:8600".to_string(),
                timeout: Duration::from_secs(10),
            },
            db_path: PathBuf::from("/tmp/optiboard.db"),
        };
        assert!(matches!(cfg.validate(), Err(Error::Configuration(_))));
    }
}
