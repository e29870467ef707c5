use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use ghostlink_types::ids::BridgeId;

pub const DEFAULT_DISCONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub bridge_id: BridgeId,
    pub db_path: PathBuf,
    /// How long teardown waits for a remote client to acknowledge a
    /// disconnect or logout before moving on.
    pub disconnect_timeout: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            bridge_id: BridgeId::from("ghostlink"),
            db_path: PathBuf::from("ghostlink.db"),
            disconnect_timeout: DEFAULT_DISCONNECT_TIMEOUT,
        }
    }
}

impl BridgeConfig {
    /// Reads `GHOSTLINK_BRIDGE_ID`, `GHOSTLINK_DB_PATH` and
    /// `GHOSTLINK_DISCONNECT_TIMEOUT_SECS`, falling back to defaults.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();

        let bridge_id = lookup("GHOSTLINK_BRIDGE_ID")
            .map(BridgeId::from)
            .unwrap_or(defaults.bridge_id);
        let db_path = lookup("GHOSTLINK_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.db_path);
        let disconnect_timeout = match lookup("GHOSTLINK_DISCONNECT_TIMEOUT_SECS") {
            Some(raw) => Duration::from_secs(
                raw.parse()
                    .with_context(|| format!("invalid GHOSTLINK_DISCONNECT_TIMEOUT_SECS: {raw}"))?,
            ),
            None => defaults.disconnect_timeout,
        };

        Ok(Self {
            bridge_id,
            db_path,
            disconnect_timeout,
        })
    }
}
