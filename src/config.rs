//! Engine configuration.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::SettlementMode;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("parsing {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// Tunables for one [`Engine`](crate::Engine) instance.
///
/// Missing fields in a config file fall back to [`Default`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub deposit_settlement: SettlementMode,
    pub transfer_settlement: SettlementMode,
    pub pin_hash_rounds: u32,
    pub account_number_attempts: u32,
    pub reference_attempts: u32,
    /// Upper bound on the `limit` of any listing.
    pub max_page_size: usize,
    /// Completed idempotency keys remembered before the oldest is forgotten.
    pub idempotency_retention: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            deposit_settlement: SettlementMode::Pending,
            transfer_settlement: SettlementMode::Pending,
            pin_hash_rounds: 4096,
            account_number_attempts: 10,
            reference_attempts: 10,
            max_page_size: 100,
            idempotency_retention: 10_000,
        }
    }
}

impl EngineConfig {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Both deposits and transfers settle synchronously.
    pub fn immediate() -> Self {
        Self {
            deposit_settlement: SettlementMode::Immediate,
            transfer_settlement: SettlementMode::Immediate,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;

    fn write_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn defaults_are_pending() {
        let config = EngineConfig::default();
        assert_eq!(config.deposit_settlement, SettlementMode::Pending);
        assert_eq!(config.transfer_settlement, SettlementMode::Pending);
        assert_eq!(config.max_page_size, 100);
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let file = write_config(r#"{ "transfer_settlement": "immediate", "pin_hash_rounds": 8 }"#);
        let config = EngineConfig::from_path(file.path()).unwrap();
        assert_eq!(config.transfer_settlement, SettlementMode::Immediate);
        assert_eq!(config.deposit_settlement, SettlementMode::Pending);
        assert_eq!(config.pin_hash_rounds, 8);
        assert_eq!(config.reference_attempts, 10);
    }

    #[test]
    fn malformed_file_is_a_parse_error() {
        let file = write_config("{ not json");
        assert!(matches!(
            EngineConfig::from_path(file.path()),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        assert!(matches!(
            EngineConfig::from_path("/definitely/not/here.json"),
            Err(ConfigError::Io { .. })
        ));
    }
}
