//! Transaction engine configuration
//!
//! Settings can be built in code with the `with_*` methods or parsed from
//! TOML. Every field is optional in TOML and falls back to its default.

use crate::container::BASE_VERSION;
use serde::{Deserialize, Serialize};
use typegraph_core::{Error, Result};

/// Configuration for a [`TransactionManager`](crate::TransactionManager)
///
/// # Example
///
/// ```toml
/// # Starting value of the global version counter
/// initial_version = 1
///
/// # Times an init listener set may rerun on one changeset before the
/// # transaction is rejected as unsettled
/// max_init_passes = 32
///
/// # Upper bound on net order, reached only in cyclic reference graphs
/// max_net_order = 1024
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionConfig {
    /// Starting value of the global version counter
    #[serde(default = "default_initial_version")]
    pub initial_version: u64,
    /// Init-phase reruns allowed per changeset
    #[serde(default = "default_max_init_passes")]
    pub max_init_passes: usize,
    /// Cap on net-order propagation
    #[serde(default = "default_max_net_order")]
    pub max_net_order: u32,
}

fn default_initial_version() -> u64 {
    BASE_VERSION
}

fn default_max_init_passes() -> usize {
    32
}

fn default_max_net_order() -> u32 {
    1024
}

impl Default for TransactionConfig {
    fn default() -> Self {
        Self {
            initial_version: default_initial_version(),
            max_init_passes: default_max_init_passes(),
            max_net_order: default_max_net_order(),
        }
    }
}

impl TransactionConfig {
    /// Set the starting value of the global version counter
    pub fn with_initial_version(mut self, version: u64) -> Self {
        self.initial_version = version;
        self
    }

    /// Set the init-phase pass budget
    pub fn with_max_init_passes(mut self, passes: usize) -> Self {
        self.max_init_passes = passes;
        self
    }

    /// Set the net-order cap
    pub fn with_max_net_order(mut self, order: u32) -> Self {
        self.max_net_order = order;
        self
    }

    /// Parse a configuration from TOML
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the text is not valid TOML, a field has
    /// the wrong type, or the values fail [`validate`](Self::validate).
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: TransactionConfig = toml::from_str(text)
            .map_err(|e| Error::Config(format!("Failed to parse transaction config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Check the settings are usable
    ///
    /// Containers start at `BASE_VERSION`, so the first commit must stamp a
    /// version above it.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if `initial_version` is below `BASE_VERSION`
    /// or `max_init_passes` is zero.
    pub fn validate(&self) -> Result<()> {
        if self.initial_version < BASE_VERSION {
            return Err(Error::Config(format!(
                "initial_version must be at least {}, got {}",
                BASE_VERSION, self.initial_version
            )));
        }
        if self.max_init_passes == 0 {
            return Err(Error::Config(
                "max_init_passes must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Serialize this configuration to TOML
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize transaction config: {}", e)))
    }
}
