//! Configuration system for Ferry.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $FERRY_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/ferry/config.toml
//!   3. ~/.config/ferry/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::digest::DigestAlgorithm;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FerryConfig {
    pub transfer: TransferSettings,
    pub storage: StorageSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferSettings {
    /// Parallel connections used by `send` when no count is given. Values
    /// above 1 need a receiver that reassembles `.part<i>` objects.
    pub chunk_count: usize,
    /// `send` falls back to one stream when chunks would be smaller than
    /// this. Explicit parallel uploads below it are logged as wasteful.
    pub min_chunk_size: u64,
    /// Aggregate ceiling across all transfers. 0 = unthrottled.
    pub rate_limit_bytes_per_sec: u64,
    pub digest_algorithm: DigestAlgorithm,
    /// Dial timeout per connection.
    pub connect_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// Where `recv` writes incoming streams.
    pub receive_dir: PathBuf,
    /// Conflict policy for downloads onto an existing file:
    /// "overwrite", "backup" or "abort".
    pub conflict_policy: String,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for TransferSettings {
    fn default() -> Self {
        Self {
            chunk_count: 1,
            min_chunk_size: 1024 * 1024, // 1 MiB
            rate_limit_bytes_per_sec: 0,
            digest_algorithm: DigestAlgorithm::Sha256,
            connect_timeout_secs: 10,
        }
    }
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            receive_dir: data_dir().join("received"),
            conflict_policy: "backup".to_string(),
        }
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("ferry")
}

pub fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".local").join("share"))
        .join("ferry")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl FerryConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            Self::from_file(&path)?
        } else {
            FerryConfig::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Parse a specific file without env overrides.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
        toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("FERRY_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&FerryConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply FERRY_* env var overrides.
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("FERRY_TRANSFER__CHUNK_COUNT") {
            if let Ok(n) = v.parse() {
                self.transfer.chunk_count = n;
            }
        }
        if let Some(v) = lookup("FERRY_TRANSFER__RATE_LIMIT_BYTES_PER_SEC") {
            if let Ok(n) = v.parse() {
                self.transfer.rate_limit_bytes_per_sec = n;
            }
        }
        if let Some(v) = lookup("FERRY_TRANSFER__DIGEST_ALGORITHM") {
            match v.parse() {
                Ok(algo) => self.transfer.digest_algorithm = algo,
                Err(e) => tracing::warn!(error = %e, "ignoring FERRY_TRANSFER__DIGEST_ALGORITHM"),
            }
        }
        if let Some(v) = lookup("FERRY_TRANSFER__CONNECT_TIMEOUT_SECS") {
            if let Ok(n) = v.parse() {
                self.transfer.connect_timeout_secs = n;
            }
        }
        if let Some(v) = lookup("FERRY_STORAGE__RECEIVE_DIR") {
            self.storage.receive_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("FERRY_STORAGE__CONFLICT_POLICY") {
            self.storage.conflict_policy = v;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn default_config_is_unthrottled_sha256() {
        let config = FerryConfig::default();
        assert_eq!(config.transfer.rate_limit_bytes_per_sec, 0);
        assert_eq!(config.transfer.digest_algorithm, DigestAlgorithm::Sha256);
        assert_eq!(config.transfer.chunk_count, 1);
        assert_eq!(config.storage.conflict_policy, "backup");
    }

    #[test]
    fn overrides_replace_values_and_skip_garbage() {
        let env: HashMap<&str, &str> = [
            ("FERRY_TRANSFER__CHUNK_COUNT", "8"),
            ("FERRY_TRANSFER__RATE_LIMIT_BYTES_PER_SEC", "not-a-number"),
            ("FERRY_TRANSFER__DIGEST_ALGORITHM", "md5"),
            ("FERRY_STORAGE__CONFLICT_POLICY", "abort"),
        ]
        .into_iter()
        .collect();

        let mut config = FerryConfig::default();
        config.apply_overrides(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.transfer.chunk_count, 8);
        assert_eq!(config.transfer.rate_limit_bytes_per_sec, 0);
        assert_eq!(config.transfer.digest_algorithm, DigestAlgorithm::Md5);
        assert_eq!(config.storage.conflict_policy, "abort");
    }

    #[test]
    fn partial_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[transfer]\nrate_limit_bytes_per_sec = 2048\ndigest_algorithm = \"sha1\"\n",
        )
        .unwrap();

        let config = FerryConfig::from_file(&path).unwrap();
        assert_eq!(config.transfer.rate_limit_bytes_per_sec, 2048);
        assert_eq!(config.transfer.digest_algorithm, DigestAlgorithm::Sha1);
        assert_eq!(config.transfer.connect_timeout_secs, 10);
    }

    #[test]
    fn bad_file_reports_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[transfer\nchunk_count = ").unwrap();
        assert!(matches!(
            FerryConfig::from_file(&path),
            Err(ConfigError::ParseFailed(..))
        ));
    }

    #[test]
    fn write_default_if_missing_creates_file() {
        let tmp = tempfile::tempdir().unwrap();
        let config_path = tmp.path().join("config.toml");

        unsafe {
            std::env::set_var("FERRY_CONFIG", config_path.to_str().unwrap());
        }

        let path = FerryConfig::write_default_if_missing().expect("write_default_if_missing failed");
        assert!(path.exists());

        let config = FerryConfig::load().expect("load should succeed");
        assert_eq!(config.transfer.chunk_count, 1);

        unsafe {
            std::env::remove_var("FERRY_CONFIG");
        }
    }
}
