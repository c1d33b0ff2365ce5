//! ssm-ctl Configuration Module
//!
//! Persistent defaults for the command line.
//! Config is stored in `~/.config/ssm-ctl/config.toml`.
//!
//! ## Priority Order (highest to lowest)
//!
//! 1. Command line flags
//! 2. Environment variables (`SSMCTL_PROFILE`, `AWS_REGION`, ...)
//! 3. Config file (`~/.config/ssm-ctl/config.toml`)
//! 4. Defaults

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::client::DEFAULT_BATCH_SIZE;
use crate::error::{Result, SsmCtlError};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SsmCtlConfig {
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Where the AWS backend connects
    #[serde(default)]
    pub aws: AwsConfig,

    #[serde(default)]
    pub crypto: CryptoConfig,
}

/// Defaults for push/delete runs
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DefaultsConfig {
    /// Overwrite existing parameters unless a parameter says otherwise
    pub overwrite: bool,

    /// Prompt for inputs that have no value
    pub prompt: bool,

    /// Echo prompted input; unset means "echo unless SecureString"
    pub echo: Option<bool>,

    /// Names per remote batch call (1-10)
    pub batch_size: usize,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            overwrite: false,
            prompt: true,
            echo: None,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

impl DefaultsConfig {
    /// Run-wide overwrite default; a flag given on the command line wins
    pub fn overwrite_or(&self, flag: Option<bool>) -> bool {
        flag.unwrap_or(self.overwrite)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AwsConfig {
    /// Named profile from the shared AWS config
    pub profile: Option<String>,

    pub region: Option<String>,

    /// Custom endpoint (LocalStack and friends)
    pub endpoint_url: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CryptoConfig {
    /// Key SecureStrings are re-encrypted with on download
    pub reencrypt_key: Option<String>,
}

impl SsmCtlConfig {
    /// Returns `~/.config/ssm-ctl/` on Unix, `%APPDATA%/ssm-ctl/` on Windows
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("ssm-ctl")
    }

    pub fn config_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    /// Load configuration from the default location
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    /// Load configuration from a file
    ///
    /// Returns default config if file doesn't exist.
    /// Returns error if file exists but is malformed.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).map_err(|e| SsmCtlError::ConfigError {
            reason: format!("Failed to read config file: {}", e),
        })?;

        toml::from_str(&content).map_err(|e| SsmCtlError::ConfigError {
            reason: format!("Failed to parse config file: {}", e),
        })
    }

    /// Merge with environment variables
    ///
    /// Environment variables take precedence over config file values.
    pub fn with_env(self) -> Self {
        self.with_env_from(|key| std::env::var(key).ok())
    }

    /// Merge with variables from `lookup`; empty values are ignored
    pub fn with_env_from<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let first = |keys: &[&str]| {
            keys.iter()
                .filter_map(|key| lookup(key))
                .find(|value| !value.is_empty())
        };

        if let Some(profile) = first(&["SSMCTL_PROFILE", "AWS_PROFILE"]) {
            self.aws.profile = Some(profile);
        }
        if let Some(region) = first(&["SSMCTL_REGION", "AWS_REGION"]) {
            self.aws.region = Some(region);
        }
        if let Some(endpoint_url) = first(&["SSMCTL_ENDPOINT_URL"]) {
            self.aws.endpoint_url = Some(endpoint_url);
        }
        if let Some(key) = first(&["SSMCTL_REENCRYPT_KEY"]) {
            self.crypto.reencrypt_key = Some(key);
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_config_path_contains_ssm_ctl() {
        let path = SsmCtlConfig::config_path();
        assert!(path.to_string_lossy().contains("ssm-ctl"));
        assert!(path.to_string_lossy().ends_with("config.toml"));
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config = SsmCtlConfig::load_from(&temp_dir.path().join("nope.toml")).unwrap();
        assert_eq!(config, SsmCtlConfig::default());
        assert!(config.defaults.prompt);
        assert!(!config.defaults.overwrite);
        assert_eq!(config.defaults.batch_size, 10);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        fs::write(
            &path,
            "[defaults]\noverwrite = true\n\n[aws]\nregion = \"eu-west-1\"\n",
        )
        .unwrap();

        let config = SsmCtlConfig::load_from(&path).unwrap();
        assert!(config.defaults.overwrite);
        assert!(config.defaults.prompt);
        assert_eq!(config.aws.region.as_deref(), Some("eu-west-1"));
        assert!(config.crypto.reencrypt_key.is_none());
    }

    #[test]
    fn test_malformed_file_is_config_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        fs::write(&path, "[defaults\n").unwrap();

        let err = SsmCtlConfig::load_from(&path).unwrap_err();
        assert!(matches!(err, SsmCtlError::ConfigError { .. }));
    }

    #[test]
    fn test_env_overrides_config() {
        let config = SsmCtlConfig {
            aws: AwsConfig {
                profile: Some("from-file".into()),
                region: Some("us-east-1".into()),
                endpoint_url: None,
            },
            ..Default::default()
        }
        .with_env_from(env(&[
            ("AWS_PROFILE", "aws-profile"),
            ("SSMCTL_PROFILE", "ssmctl-profile"),
            ("AWS_REGION", "eu-central-1"),
            ("SSMCTL_REENCRYPT_KEY", "alias/backup"),
        ]));

        assert_eq!(config.aws.profile.as_deref(), Some("ssmctl-profile"));
        assert_eq!(config.aws.region.as_deref(), Some("eu-central-1"));
        assert_eq!(config.crypto.reencrypt_key.as_deref(), Some("alias/backup"));
    }

    #[test]
    fn test_env_does_not_override_with_empty() {
        let config = SsmCtlConfig {
            aws: AwsConfig {
                endpoint_url: Some("http://localhost:4566".into()),
                ..Default::default()
            },
            ..Default::default()
        }
        .with_env_from(env(&[("SSMCTL_ENDPOINT_URL", "")]));

        assert_eq!(
            config.aws.endpoint_url.as_deref(),
            Some("http://localhost:4566")
        );
    }

    #[test]
    fn test_command_line_overwrite_beats_file() {
        let defaults = DefaultsConfig {
            overwrite: true,
            ..DefaultsConfig::default()
        };
        assert!(!defaults.overwrite_or(Some(false)));
        assert!(defaults.overwrite_or(None));
        assert!(DefaultsConfig::default().overwrite_or(Some(true)));
        assert!(!DefaultsConfig::default().overwrite_or(None));
    }
}
