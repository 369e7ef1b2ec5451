//! Transport abstraction
//!
//! The protocol runs over any connection-oriented byte link that offers an
//! acknowledged write and a notification stream. [`Transport`] covers
//! discovery and connecting, [`TransportLink`] one established connection.

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::errors::{ConnectError, TransportError, WriteError};
use crate::types::DiscoveredDevice;

// ----------------------------------------------------------------------------
// Transport Traits
// ----------------------------------------------------------------------------

/// Device discovery and connection establishment
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    type Link: TransportLink;

    /// Start discovery; the stream runs until the scan is stopped or dropped
    ///
    /// Devices may be reported more than once. The session deduplicates.
    async fn scan(&self) -> Result<BoxStream<'static, DiscoveredDevice>, TransportError>;

    async fn stop_scan(&self) -> Result<(), TransportError>;

    async fn connect(&self, device: &DiscoveredDevice) -> Result<Self::Link, ConnectError>;
}

/// One established point-to-point link
#[async_trait]
pub trait TransportLink: Send + Sync + 'static {
    /// Ask for a larger MTU; `None` when the request is refused
    async fn request_mtu(&self, desired: usize) -> Option<usize>;

    /// Subscribe to inbound notifications; the stream ends when the link closes
    async fn subscribe(&self) -> Result<BoxStream<'static, Vec<u8>>, TransportError>;

    /// Write one chunk and wait for the transport's acknowledgement
    async fn write(&self, chunk: &[u8]) -> Result<(), WriteError>;

    async fn disconnect(&self);
}
