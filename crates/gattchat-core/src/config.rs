//! Centralized configuration
//!
//! Every tunable the node uses lives here, grouped by concern, with presets
//! for tests and constrained hosts.

use core::time::Duration;
use serde::{Deserialize, Serialize};

use crate::errors::GattchatError;
use crate::fragmentation::{ATT_OVERHEAD, DEFAULT_CHUNK_SIZE, DEFAULT_MAX_MESSAGE_SIZE};
use crate::reassembly::DEFAULT_REASSEMBLY_TIMEOUT;
use crate::types::{LocalIdentity, PeerId};

// ----------------------------------------------------------------------------
// Protocol Configuration
// ----------------------------------------------------------------------------

/// Framing and reassembly limits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Largest payload a frame may carry, in bytes
    pub max_message_size: usize,
    /// Age after which a partial inbound frame is discarded
    pub reassembly_timeout: Duration,
    /// Chunk size used when MTU negotiation is refused
    pub default_chunk_size: usize,
    /// Bytes subtracted from a negotiated MTU
    pub att_overhead: usize,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            reassembly_timeout: DEFAULT_REASSEMBLY_TIMEOUT,
            default_chunk_size: DEFAULT_CHUNK_SIZE,
            att_overhead: ATT_OVERHEAD,
        }
    }
}

impl ProtocolConfig {
    pub fn low_memory() -> Self {
        Self {
            max_message_size: 4096,
            reassembly_timeout: Duration::from_secs(10),
            ..Self::default()
        }
    }

    pub fn testing() -> Self {
        Self {
            max_message_size: 8192,
            reassembly_timeout: Duration::from_secs(2),
            ..Self::default()
        }
    }
}

// ----------------------------------------------------------------------------
// Session Configuration
// ----------------------------------------------------------------------------

/// Transport session timing and negotiation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub connection_timeout: Duration,
    /// Bound on a single acknowledged chunk write
    pub write_timeout: Duration,
    /// MTU requested from the transport after connecting
    pub preferred_mtu: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connection_timeout: Duration::from_secs(10),
            write_timeout: Duration::from_secs(5),
            preferred_mtu: 247,
        }
    }
}

impl SessionConfig {
    pub fn testing() -> Self {
        Self {
            connection_timeout: Duration::from_secs(1),
            write_timeout: Duration::from_millis(500),
            preferred_mtu: 247,
        }
    }
}

// ----------------------------------------------------------------------------
// Channel Configuration
// ----------------------------------------------------------------------------

/// Buffer sizes for the node's channels
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Commands from the front end to the node
    pub command_buffer_size: usize,
    /// Events from the node to the front end
    pub app_event_buffer_size: usize,
    /// Scan, receive and delivery reports flowing back into the node
    pub internal_buffer_size: usize,
    /// Messages queued for the dispatch worker
    pub outbound_buffer_size: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            command_buffer_size: 32,
            app_event_buffer_size: 64,
            internal_buffer_size: 128,
            outbound_buffer_size: 16,
        }
    }
}

impl ChannelConfig {
    pub fn low_memory() -> Self {
        Self {
            command_buffer_size: 8,
            app_event_buffer_size: 16,
            internal_buffer_size: 32,
            outbound_buffer_size: 4,
        }
    }

    pub fn testing() -> Self {
        Self {
            command_buffer_size: 100,
            app_event_buffer_size: 256,
            internal_buffer_size: 256,
            outbound_buffer_size: 32,
        }
    }
}

// ----------------------------------------------------------------------------
// Identity Configuration
// ----------------------------------------------------------------------------

/// How the local peer presents itself
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    pub display_name: String,
    /// Fixed identifier; a random one is generated when absent
    pub peer_id: Option<PeerId>,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            display_name: "Anonymous".to_string(),
            peer_id: None,
        }
    }
}

impl IdentityConfig {
    pub fn new<T: Into<String>>(display_name: T) -> Self {
        Self {
            display_name: display_name.into(),
            peer_id: None,
        }
    }

    pub fn with_peer_id(mut self, peer_id: PeerId) -> Self {
        self.peer_id = Some(peer_id);
        self
    }

    pub fn resolve(&self) -> LocalIdentity {
        LocalIdentity::new(
            self.peer_id.clone().unwrap_or_else(PeerId::generate),
            self.display_name.clone(),
        )
    }
}

// ----------------------------------------------------------------------------
// Top-level Configuration
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GattchatConfig {
    pub protocol: ProtocolConfig,
    pub session: SessionConfig,
    pub channels: ChannelConfig,
    pub identity: IdentityConfig,
}

impl GattchatConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn testing() -> Self {
        Self {
            protocol: ProtocolConfig::testing(),
            session: SessionConfig::testing(),
            channels: ChannelConfig::testing(),
            identity: IdentityConfig::new("tester"),
        }
    }

    pub fn low_memory() -> Self {
        Self {
            protocol: ProtocolConfig::low_memory(),
            session: SessionConfig::default(),
            channels: ChannelConfig::low_memory(),
            identity: IdentityConfig::default(),
        }
    }

    pub fn with_protocol(mut self, protocol: ProtocolConfig) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn with_session(mut self, session: SessionConfig) -> Self {
        self.session = session;
        self
    }

    pub fn with_channels(mut self, channels: ChannelConfig) -> Self {
        self.channels = channels;
        self
    }

    pub fn with_identity(mut self, identity: IdentityConfig) -> Self {
        self.identity = identity;
        self
    }

    /// Validate the configuration for consistency
    pub fn validate(&self) -> Result<(), GattchatError> {
        let channels = &self.channels;
        if channels.command_buffer_size == 0
            || channels.app_event_buffer_size == 0
            || channels.internal_buffer_size == 0
            || channels.outbound_buffer_size == 0
        {
            return Err(GattchatError::config_error("Channel buffer sizes cannot be zero"));
        }

        if self.protocol.default_chunk_size == 0 {
            return Err(GattchatError::config_error("Default chunk size cannot be zero"));
        }
        if self.protocol.max_message_size == 0 || self.protocol.max_message_size > u32::MAX as usize
        {
            return Err(GattchatError::config_error(
                "Max message size must fit a 32-bit frame length",
            ));
        }
        if self.protocol.reassembly_timeout.is_zero() {
            return Err(GattchatError::config_error("Reassembly timeout cannot be zero"));
        }
        if self.session.preferred_mtu <= self.protocol.att_overhead {
            return Err(GattchatError::config_error(
                "Preferred MTU must exceed the ATT overhead",
            ));
        }
        if self.session.connection_timeout.is_zero() || self.session.write_timeout.is_zero() {
            return Err(GattchatError::config_error("Session timeouts cannot be zero"));
        }
        if self.identity.display_name.trim().is_empty() {
            return Err(GattchatError::config_error("Display name cannot be empty"));
        }

        Ok(())
    }
}
