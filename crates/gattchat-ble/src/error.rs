//! Error types for the BLE transport

use gattchat_core::{ConnectError, TransportError, WriteError};
use thiserror::Error;

// ----------------------------------------------------------------------------
// Error Types
// ----------------------------------------------------------------------------

/// Errors specific to the BLE transport
#[derive(Error, Debug)]
pub enum BleTransportError {
    #[error("BLE adapter not available")]
    AdapterNotAvailable,

    #[error("BLE manager error: {0}")]
    Manager(String),

    #[error("Failed to scan: {0}")]
    ScanFailed(String),

    #[error("Device not found: {device_id}")]
    DeviceNotFound { device_id: String },

    #[error("Failed to connect: {0}")]
    ConnectionFailed(String),

    #[error("Failed to discover services: {0}")]
    ServiceDiscoveryFailed(String),

    #[error("Characteristic not found: {characteristic}")]
    CharacteristicNotFound { characteristic: String },

    #[error("Failed to subscribe to notifications: {0}")]
    SubscriptionFailed(String),

    #[error("Failed to get BLE events: {0}")]
    EventStreamFailed(String),
}

impl BleTransportError {
    /// Express a failure to reach a device as a core connect error
    pub fn into_connect_error(self, device_id: &str) -> ConnectError {
        ConnectError::Unreachable {
            device_id: device_id.to_string(),
            reason: self.to_string(),
        }
    }
}

impl From<BleTransportError> for TransportError {
    fn from(err: BleTransportError) -> Self {
        match err {
            BleTransportError::AdapterNotAvailable | BleTransportError::Manager(_) => {
                TransportError::AdapterUnavailable {
                    reason: err.to_string(),
                }
            }
            BleTransportError::ScanFailed(_) | BleTransportError::EventStreamFailed(_) => {
                TransportError::ScanFailed {
                    reason: err.to_string(),
                }
            }
            BleTransportError::DeviceNotFound { device_id } => {
                TransportError::UnknownDevice { device_id }
            }
            BleTransportError::ConnectionFailed(reason) => {
                TransportError::Connect(ConnectError::Unreachable {
                    device_id: "unknown".to_string(),
                    reason,
                })
            }
            BleTransportError::ServiceDiscoveryFailed(_)
            | BleTransportError::CharacteristicNotFound { .. }
            | BleTransportError::SubscriptionFailed(_) => TransportError::SubscribeFailed {
                reason: err.to_string(),
            },
        }
    }
}

/// Classify a failed characteristic write
pub fn write_error(err: btleplug::Error) -> WriteError {
    match err {
        btleplug::Error::NotConnected => WriteError::Disconnected {
            reason: err.to_string(),
        },
        btleplug::Error::TimedOut(duration) => WriteError::Timeout {
            duration_ms: duration.as_millis() as u64,
        },
        other => WriteError::Rejected {
            reason: other.to_string(),
        },
    }
}
