//! BLE adapter setup and device discovery

use btleplug::api::{Central, CentralEvent, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use futures::future;
use futures::stream::{BoxStream, StreamExt};
use gattchat_core::{DeviceId, DiscoveredDevice};
use tracing::{debug, info, trace};

use crate::config::BleTransportConfig;
use crate::error::BleTransportError;
use crate::protocol::{name_matches, GATTCHAT_SERVICE_UUID};

// ----------------------------------------------------------------------------
// Adapter
// ----------------------------------------------------------------------------

/// Open the first BLE adapter on the system
pub async fn first_adapter() -> Result<Adapter, BleTransportError> {
    let manager = Manager::new()
        .await
        .map_err(|e| BleTransportError::Manager(e.to_string()))?;
    let adapters = manager
        .adapters()
        .await
        .map_err(|e| BleTransportError::Manager(e.to_string()))?;

    let adapter = adapters
        .into_iter()
        .next()
        .ok_or(BleTransportError::AdapterNotAvailable)?;
    match adapter.adapter_info().await {
        Ok(info) => info!("BLE adapter initialized: {}", info),
        Err(_) => info!("BLE adapter initialized"),
    }
    Ok(adapter)
}

// ----------------------------------------------------------------------------
// Discovery Implementation
// ----------------------------------------------------------------------------

/// Handles BLE scanning and turns central events into discovered devices
#[derive(Clone)]
pub struct BleDiscovery {
    adapter: Adapter,
    config: BleTransportConfig,
}

impl BleDiscovery {
    pub fn new(adapter: Adapter, config: BleTransportConfig) -> Self {
        Self { adapter, config }
    }

    /// Start scanning and stream matching devices as they are seen
    pub async fn start(&self) -> Result<BoxStream<'static, DiscoveredDevice>, BleTransportError> {
        let events = self
            .adapter
            .events()
            .await
            .map_err(|e| BleTransportError::EventStreamFailed(e.to_string()))?;

        let filter = if self.config.scan_filter_by_service {
            ScanFilter {
                services: vec![GATTCHAT_SERVICE_UUID],
            }
        } else {
            ScanFilter::default()
        };
        self.adapter
            .start_scan(filter)
            .await
            .map_err(|e| BleTransportError::ScanFailed(e.to_string()))?;
        info!("Started BLE scanning");

        let discovery = self.clone();
        let devices = events
            .filter_map(move |event| {
                let discovery = discovery.clone();
                async move {
                    match event {
                        CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => {
                            discovery.describe(&id).await
                        }
                        _ => None,
                    }
                }
            })
            .boxed();
        Ok(devices)
    }

    pub async fn stop(&self) -> Result<(), BleTransportError> {
        self.adapter
            .stop_scan()
            .await
            .map_err(|e| BleTransportError::ScanFailed(e.to_string()))?;
        info!("Stopped BLE scanning");
        Ok(())
    }

    /// Build a discovered device from a peripheral's advertised properties
    async fn describe(&self, id: &PeripheralId) -> Option<DiscoveredDevice> {
        let peripheral = self.adapter.peripheral(id).await.ok()?;
        let properties = peripheral.properties().await.ok()??;

        let advertised = &properties.services;
        if self.config.scan_filter_by_service
            && !advertised.is_empty()
            && !advertised.contains(&GATTCHAT_SERVICE_UUID)
        {
            trace!("Skipping {} without the gattchat service", id);
            return None;
        }
        let name = properties.local_name;
        if !name_matches(name.as_deref(), self.config.device_name_prefix.as_deref()) {
            trace!("Skipping {} ({:?}) by name prefix", id, name);
            return None;
        }

        let mut device = DiscoveredDevice::new(device_id(&peripheral), name);
        device.rssi = properties.rssi;
        debug!("Discovered {} rssi {:?}", device, device.rssi);
        Some(device)
    }

    /// Look up a peripheral previously reported by a scan
    pub async fn find(&self, wanted: &DeviceId) -> Result<Peripheral, BleTransportError> {
        let peripherals = self
            .adapter
            .peripherals()
            .await
            .map_err(|e| BleTransportError::Manager(e.to_string()))?;
        peripherals
            .into_iter()
            .find(|peripheral| &device_id(peripheral) == wanted)
            .ok_or_else(|| BleTransportError::DeviceNotFound {
                device_id: wanted.to_string(),
            })
    }

    /// Stream that completes once `peripheral` disconnects
    pub async fn disconnections(
        &self,
        peripheral: PeripheralId,
    ) -> Result<BoxStream<'static, ()>, BleTransportError> {
        let events = self
            .adapter
            .events()
            .await
            .map_err(|e| BleTransportError::EventStreamFailed(e.to_string()))?;
        Ok(events
            .filter(move |event| {
                let gone =
                    matches!(event, CentralEvent::DeviceDisconnected(id) if *id == peripheral);
                future::ready(gone)
            })
            .map(|_| ())
            .boxed())
    }
}

/// Stable identifier for a peripheral across scans
pub fn device_id(peripheral: &Peripheral) -> DeviceId {
    DeviceId::new(peripheral.id().to_string())
}
