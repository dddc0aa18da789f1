// src/config_mod.rs
// Store configuration - defaults, environment and TOML sources

use serde::{Deserialize, Serialize};

use crate::state_mod::StoreError;

/// Environment variable prefix, e.g. `STATETREE_STRICT=true`.
pub const ENV_PREFIX: &str = "STATETREE";

/// Runtime switches for a store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Reject state writes that do not happen inside a commit.
    pub strict: bool,
    /// Tear retired reactive trees down on the tokio runtime instead of inline.
    pub deferred_teardown: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            strict: false,
            deferred_teardown: true,
        }
    }
}

impl StoreConfig {
    /// Load configuration from `STATETREE_*` environment variables over the defaults.
    pub fn from_env() -> Result<Self, StoreError> {
        let settings = config::Config::builder()
            .add_source(config::Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()
            .map_err(|e| StoreError::Config {
                message: e.to_string(),
            })?;

        settings.try_deserialize().map_err(|e| StoreError::Config {
            message: e.to_string(),
        })
    }

    /// Parse a TOML document; missing keys keep their defaults.
    pub fn from_toml_str(source: &str) -> Result<Self, StoreError> {
        toml::from_str(source).map_err(|e| StoreError::Config {
            message: e.to_string(),
        })
    }

    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }
}
