// src/config.rs
use log::{info, warn};
use std::time::Duration;

use crate::error::ConfigError;

pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";
pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;

const API_KEY_VARS: [&str; 2] = ["GOOGLE_API_KEY", "GEMINI_API_KEY"];

/// Values given on the command line. They win over the environment.
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub model: Option<String>,
    pub timeout_secs: Option<u64>,
}

/// Immutable process-wide settings: the credential bound to one model.
/// Built once at startup and shared behind an `Arc`.
#[derive(Clone)]
pub struct Config {
    api_key: String,
    pub model: String,
    pub api_base: String,
    pub timeout: Duration,
    pub camera_index: u32,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("api_key", &"<redacted>")
            .field("model", &self.model)
            .field("api_base", &self.api_base)
            .field("timeout", &self.timeout)
            .field("camera_index", &self.camera_index)
            .finish()
    }
}

impl Config {
    /// Load `.env` (if present) and read the process environment.
    pub fn from_env(overrides: &Overrides) -> Result<Self, ConfigError> {
        match dotenvy::dotenv() {
            Ok(path) => info!("Loaded environment from {}", path.display()),
            Err(e) if e.not_found() => {}
            Err(e) => warn!("Failed to load .env file: {}", e),
        }
        Self::from_lookup(|key| std::env::var(key).ok(), overrides)
    }

    pub fn from_lookup<F>(lookup: F, overrides: &Overrides) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let api_key = API_KEY_VARS
            .iter()
            .find_map(|&key| non_empty(key))
            .ok_or(ConfigError::MissingCredential)?;

        let model = overrides
            .model
            .clone()
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty())
            .or_else(|| non_empty("GEMINI_MODEL"))
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());

        let api_base = non_empty("GEMINI_API_BASE")
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string())
            .trim_end_matches('/')
            .to_string();

        let timeout_secs = match overrides.timeout_secs {
            Some(secs) => secs,
            None => match non_empty("TOOTHSNAP_TIMEOUT_SECS") {
                Some(raw) => raw.parse::<u64>().map_err(|e| ConfigError::InvalidValue {
                    key: "TOOTHSNAP_TIMEOUT_SECS",
                    reason: e.to_string(),
                })?,
                None => DEFAULT_TIMEOUT_SECS,
            },
        };
        if timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "TOOTHSNAP_TIMEOUT_SECS",
                reason: "timeout must be at least one second".to_string(),
            });
        }

        let camera_index = match non_empty("TOOTHSNAP_CAMERA") {
            Some(raw) => raw.parse::<u32>().map_err(|e| ConfigError::InvalidValue {
                key: "TOOTHSNAP_CAMERA",
                reason: e.to_string(),
            })?,
            None => 0,
        };

        Ok(Self {
            api_key,
            model,
            api_base,
            timeout: Duration::from_secs(timeout_secs),
            camera_index,
        })
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }
}
