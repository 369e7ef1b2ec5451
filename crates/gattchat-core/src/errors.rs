//! Error types for the gattchat protocol
//!
//! Each layer of the protocol has its own error enum so callers can match on
//! exactly the failures that layer produces. `GattchatError` unifies them for
//! code that only needs to propagate.

use thiserror::Error;

// ----------------------------------------------------------------------------
// Codec Errors
// ----------------------------------------------------------------------------

/// Errors produced while decoding an envelope
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("Malformed envelope: {reason}")]
    Malformed { reason: String },

    #[error("Envelope of kind {kind} is missing required field `{field}`")]
    MissingField { kind: &'static str, field: &'static str },
}

impl DecodeError {
    pub fn malformed<T: Into<String>>(reason: T) -> Self {
        DecodeError::Malformed {
            reason: reason.into(),
        }
    }
}

/// Errors produced while encoding an envelope or framing it for transport
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FragmentationError {
    #[error("Invalid chunk size {size}: must be at least 1")]
    InvalidChunkSize { size: usize },

    #[error("Message too large: {size} bytes (max: {max_size})")]
    MessageTooLarge { size: usize, max_size: usize },

    #[error("Encoding failed: {reason}")]
    Encoding { reason: String },
}

// ----------------------------------------------------------------------------
// Reassembly Errors
// ----------------------------------------------------------------------------

/// Errors produced by the per-connection reassembler
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReassemblyError {
    #[error("Corrupt frame: {reason}")]
    Corrupt { reason: String },
}

impl ReassemblyError {
    pub fn corrupt<T: Into<String>>(reason: T) -> Self {
        ReassemblyError::Corrupt {
            reason: reason.into(),
        }
    }
}

// ----------------------------------------------------------------------------
// Transport Errors
// ----------------------------------------------------------------------------

/// Failures while establishing a link to a discovered device
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectError {
    #[error("Device {device_id} unreachable: {reason}")]
    Unreachable { device_id: String, reason: String },

    #[error("Connection to {device_id} timed out after {duration_ms}ms")]
    Timeout { device_id: String, duration_ms: u64 },
}

/// Failures of a single chunk write
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WriteError {
    #[error("Connection is not ready for writes")]
    NotReady,

    #[error("Write rejected by transport: {reason}")]
    Rejected { reason: String },

    #[error("Write timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    #[error("Link lost during write: {reason}")]
    Disconnected { reason: String },

    #[error("Send cancelled by disconnect")]
    Cancelled,
}

impl WriteError {
    /// Whether this failure means the link itself is gone
    pub fn is_link_loss(&self) -> bool {
        matches!(self, WriteError::Disconnected { .. })
    }
}

/// Transport-level errors, all recoverable by re-scanning and reconnecting
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("Transport adapter unavailable: {reason}")]
    AdapterUnavailable { reason: String },

    #[error("Scan failed: {reason}")]
    ScanFailed { reason: String },

    #[error("Failed to subscribe to notifications: {reason}")]
    SubscribeFailed { reason: String },

    #[error("Operation `{operation}` not valid in state {state}")]
    InvalidState {
        operation: &'static str,
        state: String,
    },

    #[error("Unknown device: {device_id}")]
    UnknownDevice { device_id: String },

    #[error(transparent)]
    Connect(#[from] ConnectError),

    #[error(transparent)]
    Write(#[from] WriteError),
}

// ----------------------------------------------------------------------------
// Protocol Errors
// ----------------------------------------------------------------------------

/// Group-membership protocol errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("Group mismatch: envelope for {received}, local group is {local}")]
    GroupMismatch { received: String, local: String },

    #[error("Not a member of any group")]
    NotInGroup,

    #[error("No pending invite for group {group_id}")]
    UnknownInvite { group_id: String },

    #[error("Nothing to send: {reason}")]
    EmptyMessage { reason: String },
}

/// Invalid session-state transition
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid transition from {from_state} on event {event}")]
pub struct StateTransitionError {
    pub from_state: String,
    pub event: String,
}

// ----------------------------------------------------------------------------
// Unified Error
// ----------------------------------------------------------------------------

/// Core error type for the gattchat protocol
#[derive(Debug, Error)]
pub enum GattchatError {
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Fragmentation error: {0}")]
    Fragmentation(#[from] FragmentationError),

    #[error("Reassembly error: {0}")]
    Reassembly(#[from] ReassemblyError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("State transition error: {0}")]
    StateTransition(#[from] StateTransitionError),

    /// Channel communication error between node tasks
    #[error("Channel error: {message}")]
    Channel { message: String },

    #[error("Configuration error: {reason}")]
    Configuration { reason: String },
}

impl GattchatError {
    /// Create a channel error with a message
    pub fn channel_error<T: Into<String>>(message: T) -> Self {
        GattchatError::Channel {
            message: message.into(),
        }
    }

    /// Create a configuration error with a reason
    pub fn config_error<T: Into<String>>(reason: T) -> Self {
        GattchatError::Configuration {
            reason: reason.into(),
        }
    }
}

impl From<ConnectError> for GattchatError {
    fn from(err: ConnectError) -> Self {
        GattchatError::Transport(TransportError::Connect(err))
    }
}

impl From<WriteError> for GattchatError {
    fn from(err: WriteError) -> Self {
        GattchatError::Transport(TransportError::Write(err))
    }
}

// ----------------------------------------------------------------------------
// Type Aliases
// ----------------------------------------------------------------------------

pub type Result<T> = core::result::Result<T, GattchatError>;
pub type GattchatResult<T> = Result<T>;
