//! Daemon configuration.
//!
//! Loaded from `config.json` in the screenlock config directory (or an
//! explicit path). A missing file means defaults; unknown fields are logged
//! and otherwise ignored.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use screenlock_rpc::client::socket_path;
use screenlock_rpc::protocol::NamespaceKind;
use screenlock_rpc::transport::DEFAULT_MAX_FRAME_BYTES;

use crate::error::{DaemonError, Result};

pub const CONFIG_FILENAME: &str = "config.json";

const KNOWN_FIELDS: [&str; 4] = [
    "socketPath",
    "defaultTimeoutSecs",
    "maxFrameBytes",
    "namespaces",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DaemonConfig {
    /// Socket to listen on; the runtime-dir default when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub socket_path: Option<PathBuf>,

    /// Idle timeout for clients of sources that set no `TimeoutDuration`
    #[serde(default = "default_timeout_secs")]
    pub default_timeout_secs: u64,

    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,

    /// Namespace name -> what connections registering there become
    #[serde(default = "default_namespaces")]
    pub namespaces: BTreeMap<String, NamespaceKind>,
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_frame_bytes() -> usize {
    DEFAULT_MAX_FRAME_BYTES
}

fn default_namespaces() -> BTreeMap<String, NamespaceKind> {
    BTreeMap::from([
        ("screen".to_string(), NamespaceKind::Source),
        ("remote".to_string(), NamespaceKind::Client),
    ])
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            socket_path: None,
            default_timeout_secs: default_timeout_secs(),
            max_frame_bytes: default_max_frame_bytes(),
            namespaces: default_namespaces(),
        }
    }
}

impl DaemonConfig {
    /// Standard config file location (`~/.config/screenlock/config.json`).
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "screenlock").map(|dirs| dirs.config_dir().join(CONFIG_FILENAME))
    }

    /// Load config from file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or contains invalid JSON.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        let value: Value = serde_json::from_str(&content)?;
        warn_unknown_fields(&value, path);

        let config: Self = serde_json::from_value(value)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.default_timeout_secs == 0 {
            return Err(DaemonError::Config(
                "defaultTimeoutSecs must be positive".to_string(),
            ));
        }
        if self.max_frame_bytes == 0 {
            return Err(DaemonError::Config(
                "maxFrameBytes must be positive".to_string(),
            ));
        }
        Ok(())
    }

    #[must_use]
    pub fn socket_path(&self) -> PathBuf {
        self.socket_path.clone().unwrap_or_else(socket_path)
    }

    #[must_use]
    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_secs)
    }

    #[must_use]
    pub fn namespace_kind(&self, name: &str) -> Option<NamespaceKind> {
        self.namespaces.get(name).copied()
    }
}

fn warn_unknown_fields(value: &Value, path: &Path) {
    let Value::Object(obj) = value else {
        return;
    };
    for key in obj.keys() {
        if !KNOWN_FIELDS.contains(&key.as_str()) {
            warn!("Unknown config field in {}: {key}", path.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_config_default() {
        let config = DaemonConfig::default();
        assert_eq!(config.default_timeout(), Duration::from_secs(30));
        assert_eq!(config.max_frame_bytes, 1024 * 1024);
        assert_eq!(config.namespace_kind("screen"), Some(NamespaceKind::Source));
        assert_eq!(config.namespace_kind("remote"), Some(NamespaceKind::Client));
        assert_eq!(config.namespace_kind("lobby"), None);
        assert!(config.socket_path().ends_with("screenlock.sock"));
    }

    #[test]
    fn test_config_load_nonexistent_returns_default() {
        let path = Path::new("/nonexistent/path/config.json");
        let config = DaemonConfig::load(path).unwrap();
        assert_eq!(config, DaemonConfig::default());
    }

    #[test]
    fn test_config_load_valid_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"{{"defaultTimeoutSecs": 5, "socketPath": "/tmp/x.sock", "namespaces": {{"wall": "source", "phone": "client"}}}}"#
        )
        .unwrap();

        let config = DaemonConfig::load(file.path()).unwrap();
        assert_eq!(config.default_timeout(), Duration::from_secs(5));
        assert_eq!(config.socket_path(), PathBuf::from("/tmp/x.sock"));
        assert_eq!(config.namespace_kind("wall"), Some(NamespaceKind::Source));
        assert_eq!(config.namespace_kind("screen"), None);
        assert_eq!(config.max_frame_bytes, DEFAULT_MAX_FRAME_BYTES);
    }

    #[test]
    fn test_config_unknown_fields_tolerated() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"maxFrameBytes": 2048, "theme": "dark"}}"#).unwrap();

        let config = DaemonConfig::load(file.path()).unwrap();
        assert_eq!(config.max_frame_bytes, 2048);
    }

    #[test]
    fn test_config_load_invalid_json() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "{{invalid json}}").unwrap();

        assert!(DaemonConfig::load(file.path()).is_err());
    }

    #[test]
    fn test_config_rejects_zero_timeout() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"defaultTimeoutSecs": 0}}"#).unwrap();

        let err = DaemonConfig::load(file.path()).unwrap_err();
        assert!(matches!(err, DaemonError::Config(_)));
    }

    #[test]
    fn test_config_rejects_unknown_namespace_kind() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"namespaces": {{"screen": "projector"}}}}"#).unwrap();

        assert!(matches!(
            DaemonConfig::load(file.path()),
            Err(DaemonError::Json(_))
        ));
    }
}
