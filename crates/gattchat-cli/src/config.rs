//! gattchat CLI configuration
//!
//! Loaded from an optional TOML file; any section or field left out keeps its
//! default. Command-line flags are applied on top by `main`.

use std::path::Path;

use gattchat_ble::BleTransportConfig;
use gattchat_core::{GattchatConfig, IdentityConfig};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{CliError, Result};

// ----------------------------------------------------------------------------
// CLI Application Configuration
// ----------------------------------------------------------------------------

/// Complete configuration for the CLI application
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Protocol, session and identity settings
    pub core: GattchatConfig,
    /// BLE transport settings
    pub ble: BleTransportConfig,
    /// Front-end settings
    pub cli: CliConfig,
}

/// Front-end options
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Enable verbose logging output
    pub verbose: bool,
    /// Prompt printed before each input line
    pub prompt: String,
    /// Start scanning as soon as the chat session opens
    pub auto_scan: bool,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            verbose: false,
            prompt: "> ".to_string(),
            auto_scan: true,
        }
    }
}

impl AppConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&contents)?;
        debug!("Loaded configuration from {}", path.display());
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.core.validate()?;
        if self.ble.assumed_mtu.is_some_and(|mtu| mtu <= self.core.protocol.att_overhead) {
            return Err(CliError::Config(
                "ble.assumed_mtu must exceed protocol.att_overhead".to_string(),
            ));
        }
        Ok(())
    }

    /// Replace the display name, keeping any configured peer id
    pub fn with_display_name(mut self, name: String) -> Self {
        let peer_id = self.core.identity.peer_id.take();
        let mut identity = IdentityConfig::new(name);
        if let Some(peer_id) = peer_id {
            identity = identity.with_peer_id(peer_id);
        }
        self.core.identity = identity;
        self
    }

    /// Default configuration rendered as TOML
    pub fn example_config() -> Result<String> {
        Ok(toml::to_string_pretty(&AppConfig::default())?)
    }
}
