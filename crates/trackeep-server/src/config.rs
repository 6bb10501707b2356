use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::warn;

use trackeep_crypto::VaultKey;
use trackeep_gateway::GatewayConfig;

const DEFAULT_JWT_SECRET: &str = "dev-secret-change-me";

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub jwt_secret: String,
    pub vault_key: VaultKey,
    pub gateway: GatewayConfig,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Parse settings from any key lookup; `from_env` passes the process env.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let port = get("TRACKEEP_PORT", "3000")
            .parse()
            .context("TRACKEEP_PORT must be a port number")?;

        let jwt_secret = get("TRACKEEP_JWT_SECRET", DEFAULT_JWT_SECRET);
        if jwt_secret == DEFAULT_JWT_SECRET {
            warn!("TRACKEEP_JWT_SECRET not set, using the development secret");
        }

        let vault_key = match lookup("TRACKEEP_VAULT_KEY") {
            Some(encoded) => VaultKey::from_base64(&encoded)
                .context("TRACKEEP_VAULT_KEY must be 32 bytes of base64")?,
            None => {
                warn!("TRACKEEP_VAULT_KEY not set, vault items will not survive a restart");
                VaultKey::generate()
            }
        };

        let outbound_queue: usize = get("TRACKEEP_OUTBOUND_QUEUE", "256")
            .parse()
            .context("TRACKEEP_OUTBOUND_QUEUE must be a positive integer")?;
        if outbound_queue == 0 {
            anyhow::bail!("TRACKEEP_OUTBOUND_QUEUE must be a positive integer");
        }

        let idle_timeout = seconds(&get("TRACKEEP_IDLE_TIMEOUT_SECS", "60"), "TRACKEEP_IDLE_TIMEOUT_SECS")?;
        let heartbeat_interval = seconds(&get("TRACKEEP_HEARTBEAT_SECS", "15"), "TRACKEEP_HEARTBEAT_SECS")?;

        Ok(Self {
            host: get("TRACKEEP_HOST", "0.0.0.0"),
            port,
            db_path: PathBuf::from(get("TRACKEEP_DB_PATH", "trackeep.db")),
            jwt_secret,
            vault_key,
            gateway: GatewayConfig {
                outbound_queue,
                heartbeat_interval,
                idle_timeout,
            },
        })
    }

    pub fn addr(&self) -> Result<SocketAddr> {
        Ok(format!("{}:{}", self.host, self.port).parse()?)
    }
}

fn seconds(raw: &str, key: &str) -> Result<Duration> {
    let secs: u64 = raw
        .parse()
        .with_context(|| format!("{key} must be a whole number of seconds"))?;
    if secs == 0 {
        anyhow::bail!("{key} must be greater than zero");
    }
    Ok(Duration::from_secs(secs))
}
