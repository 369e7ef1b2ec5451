//! Bluetooth Low Energy transport for gattchat
//!
//! Implements the `Transport` and `TransportLink` traits from `gattchat-core`
//! on top of `btleplug`, acting as the GATT central. The peer exposes one
//! service with a write characteristic (TX) and a notify characteristic (RX).
//!
//! ## Architecture
//!
//! - [`config`] - transport configuration
//! - [`error`] - BLE-specific errors and their mapping onto core errors
//! - [`protocol`] - service and characteristic UUIDs
//! - [`discovery`] - adapter setup and the scan stream
//! - [`connection`] - one connected peripheral as a [`BleLink`]
//! - [`transport`] - [`BleTransport`], the `Transport` implementation
//!
//! ## Usage
//!
//! ```rust,no_run
//! use gattchat_ble::{BleTransport, BleTransportConfig};
//! use gattchat_core::{ChatNode, GattchatConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = BleTransportConfig::new().with_device_name_prefix("gattchat");
//! let transport = BleTransport::new(config).await?;
//!
//! let mut node = ChatNode::spawn(GattchatConfig::default(), transport)?;
//! let _events = node.take_event_receiver();
//! node.request_scan().await?;
//! # Ok(())
//! # }
//! ```

mod config;
mod connection;
mod discovery;
mod error;
mod protocol;
mod transport;

// Public API exports
pub use config::BleTransportConfig;
pub use connection::BleLink;
pub use error::BleTransportError;
pub use protocol::{
    GATTCHAT_RX_CHARACTERISTIC_UUID, GATTCHAT_SERVICE_UUID, GATTCHAT_TX_CHARACTERISTIC_UUID,
};
pub use transport::BleTransport;

// Re-export the transport traits for convenience
pub use gattchat_core::transport::{Transport, TransportLink};
