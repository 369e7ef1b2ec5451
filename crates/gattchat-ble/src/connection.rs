//! One connected gattchat peripheral

use async_trait::async_trait;
use btleplug::api::{Characteristic, Peripheral as _, WriteType};
use btleplug::platform::Peripheral;
use futures::future;
use futures::stream::{BoxStream, StreamExt};
use gattchat_core::{TransportError, TransportLink, WriteError};
use tokio::time::timeout;
use tracing::{debug, info, trace, warn};

use crate::config::BleTransportConfig;
use crate::discovery::BleDiscovery;
use crate::error::{write_error, BleTransportError};
use crate::protocol::{
    find_characteristic, GATTCHAT_RX_CHARACTERISTIC_UUID, GATTCHAT_TX_CHARACTERISTIC_UUID,
};

// ----------------------------------------------------------------------------
// BLE Link
// ----------------------------------------------------------------------------

/// A connected peripheral with its TX and RX characteristics resolved
pub struct BleLink {
    peripheral: Peripheral,
    discovery: BleDiscovery,
    tx: Characteristic,
    rx: Characteristic,
    assumed_mtu: Option<usize>,
}

impl BleLink {
    /// Connect to `peripheral` and resolve the gattchat characteristics
    pub async fn establish(
        discovery: BleDiscovery,
        peripheral: Peripheral,
        config: &BleTransportConfig,
    ) -> Result<Self, BleTransportError> {
        peripheral
            .connect()
            .await
            .map_err(|e| BleTransportError::ConnectionFailed(e.to_string()))?;

        match Self::resolve(&peripheral, config).await {
            Ok((tx, rx)) => {
                info!("GATT link to {} ready", peripheral.id());
                Ok(Self {
                    peripheral,
                    discovery,
                    tx,
                    rx,
                    assumed_mtu: config.assumed_mtu,
                })
            }
            Err(e) => {
                if let Err(disconnect_err) = peripheral.disconnect().await {
                    warn!("Failed to disconnect after setup error: {}", disconnect_err);
                }
                Err(e)
            }
        }
    }

    async fn resolve(
        peripheral: &Peripheral,
        config: &BleTransportConfig,
    ) -> Result<(Characteristic, Characteristic), BleTransportError> {
        match timeout(config.service_discovery_timeout, peripheral.discover_services()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(BleTransportError::ServiceDiscoveryFailed(e.to_string())),
            Err(_) => {
                return Err(BleTransportError::ServiceDiscoveryFailed(
                    "timed out".to_string(),
                ))
            }
        }

        let characteristics = peripheral.characteristics();
        let tx = find_characteristic(&characteristics, GATTCHAT_TX_CHARACTERISTIC_UUID).ok_or(
            BleTransportError::CharacteristicNotFound {
                characteristic: GATTCHAT_TX_CHARACTERISTIC_UUID.to_string(),
            },
        )?;
        let rx = find_characteristic(&characteristics, GATTCHAT_RX_CHARACTERISTIC_UUID).ok_or(
            BleTransportError::CharacteristicNotFound {
                characteristic: GATTCHAT_RX_CHARACTERISTIC_UUID.to_string(),
            },
        )?;
        Ok((tx, rx))
    }
}

#[async_trait]
impl TransportLink for BleLink {
    async fn request_mtu(&self, desired: usize) -> Option<usize> {
        debug!(
            "MTU {} requested for {}, assuming {:?}",
            desired,
            self.peripheral.id(),
            self.assumed_mtu
        );
        self.assumed_mtu
    }

    async fn subscribe(&self) -> Result<BoxStream<'static, Vec<u8>>, TransportError> {
        // watch for disconnects before subscribing so none is missed
        let mut disconnected = self.discovery.disconnections(self.peripheral.id()).await?;

        self.peripheral
            .subscribe(&self.rx)
            .await
            .map_err(|e| BleTransportError::SubscriptionFailed(e.to_string()))?;
        let notifications = self
            .peripheral
            .notifications()
            .await
            .map_err(|e| BleTransportError::SubscriptionFailed(e.to_string()))?;
        debug!("Subscribed to notifications from {}", self.peripheral.id());

        let rx_uuid = self.rx.uuid;
        Ok(notifications
            .filter_map(move |notification| {
                future::ready((notification.uuid == rx_uuid).then_some(notification.value))
            })
            .take_until(async move {
                disconnected.next().await;
            })
            .boxed())
    }

    async fn write(&self, chunk: &[u8]) -> Result<(), WriteError> {
        trace!("{} tx: {}", self.peripheral.id(), hex::encode(chunk));
        self.peripheral
            .write(&self.tx, chunk, WriteType::WithResponse)
            .await
            .map_err(write_error)
    }

    async fn disconnect(&self) {
        match self.peripheral.disconnect().await {
            Ok(()) => info!("Disconnected from {}", self.peripheral.id()),
            Err(e) => warn!("Failed to disconnect from {}: {}", self.peripheral.id(), e),
        }
    }
}
