//! BLE implementation of the core `Transport` trait

use async_trait::async_trait;
use futures::stream::BoxStream;
use gattchat_core::{ConnectError, DiscoveredDevice, Transport, TransportError};
use tracing::info;

use crate::config::BleTransportConfig;
use crate::connection::BleLink;
use crate::discovery::{first_adapter, BleDiscovery};

// ----------------------------------------------------------------------------
// BLE Transport
// ----------------------------------------------------------------------------

/// GATT-central transport over the system's first BLE adapter
pub struct BleTransport {
    config: BleTransportConfig,
    discovery: BleDiscovery,
}

impl BleTransport {
    /// Open the default adapter
    pub async fn new(config: BleTransportConfig) -> Result<Self, TransportError> {
        let adapter = first_adapter().await?;
        Ok(Self {
            discovery: BleDiscovery::new(adapter, config.clone()),
            config,
        })
    }

    pub fn config(&self) -> &BleTransportConfig {
        &self.config
    }
}

#[async_trait]
impl Transport for BleTransport {
    type Link = BleLink;

    async fn scan(&self) -> Result<BoxStream<'static, DiscoveredDevice>, TransportError> {
        Ok(self.discovery.start().await?)
    }

    async fn stop_scan(&self) -> Result<(), TransportError> {
        Ok(self.discovery.stop().await?)
    }

    async fn connect(&self, device: &DiscoveredDevice) -> Result<BleLink, ConnectError> {
        let device_id = device.id.as_str();
        let peripheral = self
            .discovery
            .find(&device.id)
            .await
            .map_err(|e| e.into_connect_error(device_id))?;

        info!("Opening GATT link to {}", device);
        BleLink::establish(self.discovery.clone(), peripheral, &self.config)
            .await
            .map_err(|e| e.into_connect_error(device_id))
    }
}
