//! Configuration model for the imagevol driver.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ImagevolError, Result};

/// Location and timing policy of the local image store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Root directory of the store. Must exist before the driver starts.
    pub store_dir: PathBuf,
    /// How long an attempt may stay in progress before it is reclaimed.
    pub max_attempt_duration: Duration,
}

impl StoreConfig {
    /// Checks that both values are set.
    ///
    /// # Errors
    ///
    /// Returns `ImagevolError::Config` for an empty store path or a zero duration.
    pub fn validate(&self) -> Result<()> {
        if self.store_dir.as_os_str().is_empty() {
            return Err(ImagevolError::Config {
                message: "no image store dir provided".into(),
            });
        }
        if self.max_attempt_duration.is_zero() {
            return Err(ImagevolError::Config {
                message: "no max attempt duration provided".into(),
            });
        }
        Ok(())
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            store_dir: PathBuf::from(crate::constants::DEFAULT_STORE_DIR),
            max_attempt_duration: crate::constants::DEFAULT_MAX_ATTEMPT_DURATION,
        }
    }
}

/// How the external image copy tool is invoked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetcherConfig {
    /// Path or name of the copy tool binary.
    pub binary: PathBuf,
    /// Registry credentials file passed through as `--authfile`.
    pub auth_file: Option<PathBuf>,
}

impl FetcherConfig {
    /// Builds a fetcher configuration, reading the credentials file path from
    /// `REGISTRY_AUTH_FILE` when it is set and non-empty.
    #[must_use]
    pub fn from_env(binary: impl Into<PathBuf>) -> Self {
        let auth_file = std::env::var_os(crate::constants::REGISTRY_AUTH_FILE_ENV)
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);
        Self {
            binary: binary.into(),
            auth_file,
        }
    }
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from(crate::constants::DEFAULT_SKOPEO_PATH),
            auth_file: None,
        }
    }
}

/// Identity and store settings of one driver instance on a node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverConfig {
    /// Name the driver registers under.
    pub driver_name: String,
    /// Identifier of the node this driver serves.
    pub node_id: String,
    /// Version string reported by the driver.
    pub vendor_version: String,
    /// Image store settings.
    pub store: StoreConfig,
    /// Copy tool settings.
    pub fetcher: FetcherConfig,
}

impl DriverConfig {
    /// Validates identity fields and the store configuration.
    ///
    /// # Errors
    ///
    /// Returns `ImagevolError::Config` naming the first missing value.
    pub fn validate(&self) -> Result<()> {
        if self.driver_name.is_empty() {
            return Err(ImagevolError::Config {
                message: "no driver name provided".into(),
            });
        }
        if self.node_id.is_empty() {
            return Err(ImagevolError::Config {
                message: "no node id provided".into(),
            });
        }
        self.store.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn driver() -> DriverConfig {
        DriverConfig {
            driver_name: "image.csi.test".into(),
            node_id: "node-1".into(),
            vendor_version: "0.1.0".into(),
            store: StoreConfig::default(),
            fetcher: FetcherConfig::default(),
        }
    }

    #[test]
    fn default_store_config_is_valid() {
        assert!(StoreConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_duration_is_rejected() {
        let config = StoreConfig {
            max_attempt_duration: Duration::ZERO,
            ..StoreConfig::default()
        };
        let err = config.validate().expect_err("zero duration must fail");
        assert!(err.to_string().contains("max attempt duration"));
    }

    #[test]
    fn empty_store_dir_is_rejected() {
        let config = StoreConfig {
            store_dir: PathBuf::new(),
            ..StoreConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn driver_requires_node_id() {
        let mut config = driver();
        assert!(config.validate().is_ok());
        config.node_id.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn driver_requires_name() {
        let mut config = driver();
        config.driver_name.clear();
        assert!(config.validate().is_err());
    }
}
