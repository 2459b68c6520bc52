//! Configuration management for autosign
//!
//! Supports loading configuration from:
//! - Environment variables (AUTOSIGN_*, `__` between section and key)
//! - Config file (autosign.toml, or the path given with --config)

use crate::auth::MAX_USERNAME_LEN;
use crate::errors::{HsmError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use tracing::info;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Where policy, audit entries and the storage locker live
    pub storage: StorageConfig,

    /// Users and wallets known to the device
    pub device: DeviceConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Saved policy, read back on the next boot
    pub policy_path: PathBuf,

    /// Root of the removable audit medium; unset means console only
    pub audit_root: Option<PathBuf>,

    /// Backing file for the storage locker slot
    pub secret_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            policy_path: PathBuf::from("./data/hsm-policy.json"),
            audit_root: Some(PathBuf::from("./data/card")),
            secret_path: PathBuf::from("./data/locker.bin"),
        }
    }
}

/// A remote user and their pre-shared token
#[derive(Clone, Serialize, Deserialize)]
pub struct UserEntry {
    pub name: String,
    pub token: String,
}

impl std::fmt::Debug for UserEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserEntry")
            .field("name", &self.name)
            .field("token", &"[REDACTED]")
            .finish()
    }
}

/// Device configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceConfig {
    #[serde(default)]
    pub users: Vec<UserEntry>,

    /// Names of registered multisig wallets
    #[serde(default)]
    pub wallets: Vec<String>,

    /// Activate the saved policy at startup, if there is one
    #[serde(default)]
    pub auto_activate: bool,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (json, pretty)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from file and environment
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();

        // Start with defaults
        let defaults = config::Config::try_from(&Config::default())
            .map_err(|e| HsmError::Config(e.to_string()))?;
        builder = builder.add_source(defaults);

        if let Some(path) = config_path {
            builder = builder.add_source(config::File::with_name(path).required(true));
        } else {
            builder = builder
                .add_source(config::File::with_name("autosign").required(false))
                .add_source(config::File::with_name("/etc/autosign/autosign").required(false));
        }

        // AUTOSIGN_STORAGE__AUDIT_ROOT, AUTOSIGN_LOGGING__LEVEL, ...
        builder = builder.add_source(
            config::Environment::with_prefix("AUTOSIGN")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder
            .build()
            .map_err(|e| HsmError::Config(e.to_string()))?;

        config
            .try_deserialize()
            .map_err(|e| HsmError::Config(e.to_string()))
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for user in &self.device.users {
            if user.name.len() <= 1 || user.name.len() > MAX_USERNAME_LEN {
                return Err(HsmError::Config(format!(
                    "username '{}' must be 2..{} bytes",
                    user.name, MAX_USERNAME_LEN
                )));
            }
            if user.token.is_empty() {
                return Err(HsmError::Config(format!("user '{}' has no token", user.name)));
            }
            if !seen.insert(user.name.as_str()) {
                return Err(HsmError::Config(format!("duplicate user '{}'", user.name)));
            }
        }

        match self.logging.format.as_str() {
            "json" | "pretty" => {}
            other => {
                return Err(HsmError::Config(format!("unknown log format '{}'", other)));
            }
        }

        if self.storage.audit_root.is_none() {
            info!("No audit medium configured, decisions will be logged to the console");
        }

        Ok(())
    }
}
