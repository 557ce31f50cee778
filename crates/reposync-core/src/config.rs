//! User configuration for reposync (`config.toml`).
//!
//! The file declares the update policy, the device profile used for
//! compatibility checks, and the list of repositories to import into the
//! catalog. A missing file is equivalent to an empty one.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors raised while loading configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The file exists but could not be read.
    #[error("Failed to read {}: {source}", path.display())]
    Io {
        /// Path of the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The file is not valid TOML for this schema.
    #[cfg(feature = "parsing")]
    #[error("Failed to parse {}: {source}", path.display())]
    Parse {
        /// Path of the configuration file.
        path: PathBuf,
        /// Underlying TOML error.
        source: toml::de::Error,
    },

    /// A repository entry has an unusable address.
    #[error("Invalid repository address '{0}': expected an http(s) URL")]
    InvalidAddress(String),
}

/// Top-level configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// The `[update]` section.
    pub update: UpdateSettings,
    /// The `[device]` section.
    pub device: DeviceProfile,
    /// Every `[[repository]]` entry, in file order.
    #[serde(rename = "repository")]
    pub repositories: Vec<RepoConfig>,
}

/// Scheduling and notification policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdateSettings {
    /// Hours between scheduled runs. Zero disables scheduled runs.
    pub interval_hours: u32,
    /// Only run scheduled updates on an unmetered network.
    pub wifi_only: bool,
    /// Report applications with available updates after a changing run.
    pub notify: bool,
}

impl Default for UpdateSettings {
    fn default() -> Self {
        Self {
            interval_hours: 24,
            wifi_only: false,
            notify: true,
        }
    }
}

/// The device a package must run on to be considered compatible.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceProfile {
    /// Platform version (SDK level).
    pub sdk: i32,
    /// Supported native ABIs, most preferred first.
    pub abis: Vec<String>,
}

impl Default for DeviceProfile {
    fn default() -> Self {
        Self {
            sdk: 30,
            abis: vec!["arm64-v8a".to_string(), "armeabi-v7a".to_string()],
        }
    }
}

/// A `[[repository]]` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoConfig {
    /// Base URL of the repository; the index lives at `<address>/index.xml`.
    pub address: String,
    /// Display name used until the index provides one.
    #[serde(default)]
    pub name: Option<String>,
    /// Pinned SHA-256 fingerprint of the signing certificate.
    #[serde(default)]
    pub fingerprint: Option<String>,
    /// Disabled repositories are skipped and their packages purged.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Peer repositories only sync on explicit request.
    #[serde(default)]
    pub peer: bool,
}

fn default_true() -> bool {
    true
}

impl RepoConfig {
    /// Create an enabled, non-peer entry for `address`.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            name: None,
            fingerprint: None,
            enabled: true,
            peer: false,
        }
    }

    /// The address with any trailing slash removed.
    pub fn normalized_address(&self) -> &str {
        self.address.trim().trim_end_matches('/')
    }
}

impl Config {
    /// Parse configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not valid TOML for this schema or a
    /// repository address is not an http(s) URL.
    #[cfg(feature = "parsing")]
    pub fn from_toml_str(content: &str, path: &Path) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Asynchronously load configuration from `path`.
    ///
    /// If the file does not exist, defaults are returned so a fresh install
    /// behaves like an empty configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    #[cfg(feature = "parsing")]
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no configuration file, using defaults");
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        Self::from_toml_str(&content, path)
    }

    /// Check every repository address.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidAddress`] for the first bad entry.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for repo in &self.repositories {
            let address = repo.normalized_address();
            let scheme_ok = address.starts_with("http://") || address.starts_with("https://");
            if !scheme_ok || address.len() <= "https://".len() {
                return Err(ConfigError::InvalidAddress(repo.address.clone()));
            }
        }
        Ok(())
    }
}

#[cfg(all(test, feature = "parsing"))]
mod tests {
    use super::*;

    #[test]
    fn full_file_parses() {
        let toml = r#"
            [update]
            interval_hours = 6
            wifi_only = true
            notify = false

            [device]
            sdk = 21
            abis = ["x86_64"]

            [[repository]]
            address = "https://f-droid.org/repo/"
            name = "F-Droid"
            fingerprint = "43238d51"

            [[repository]]
            address = "http://192.168.1.5:8888/fdroid/repo"
            enabled = false
            peer = true
        "#;
        let config = Config::from_toml_str(toml, Path::new("config.toml")).unwrap();

        assert_eq!(config.update.interval_hours, 6);
        assert!(config.update.wifi_only);
        assert!(!config.update.notify);
        assert_eq!(config.device.sdk, 21);
        assert_eq!(config.device.abis, vec!["x86_64"]);
        assert_eq!(config.repositories.len(), 2);
        assert_eq!(
            config.repositories[0].normalized_address(),
            "https://f-droid.org/repo"
        );
        assert!(config.repositories[0].enabled);
        assert!(!config.repositories[1].enabled);
        assert!(config.repositories[1].peer);
    }

    #[test]
    fn empty_file_uses_defaults() {
        let config = Config::from_toml_str("", Path::new("config.toml")).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.update.interval_hours, 24);
        assert!(config.update.notify);
    }

    #[test]
    fn bad_address_is_rejected() {
        let toml = r#"
            [[repository]]
            address = "ftp://example.org/repo"
        "#;
        let err = Config::from_toml_str(toml, Path::new("config.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidAddress(_)));
    }

    #[tokio::test]
    async fn missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(&dir.path().join("config.toml")).await.unwrap();
        assert!(config.repositories.is_empty());
    }
}
