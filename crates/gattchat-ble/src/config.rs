//! BLE transport configuration

use std::time::Duration;

// ----------------------------------------------------------------------------
// Configuration
// ----------------------------------------------------------------------------

/// Configuration for the BLE transport
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct BleTransportConfig {
    /// Only report devices advertising the gattchat service
    pub scan_filter_by_service: bool,
    /// Only report devices whose advertised name starts with this prefix
    pub device_name_prefix: Option<String>,
    /// MTU to report for a connected link
    ///
    /// btleplug negotiates the MTU inside the platform stack without exposing
    /// the result, so `None` makes the session fall back to its default chunk
    /// size.
    pub assumed_mtu: Option<usize>,
    /// Maximum time to wait for GATT service discovery after connecting
    pub service_discovery_timeout: Duration,
}

impl Default for BleTransportConfig {
    fn default() -> Self {
        Self {
            scan_filter_by_service: true,
            device_name_prefix: None,
            assumed_mtu: None,
            service_discovery_timeout: Duration::from_secs(10),
        }
    }
}

impl BleTransportConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report every advertising device, not only those listing the service
    pub fn with_any_service(mut self) -> Self {
        self.scan_filter_by_service = false;
        self
    }

    pub fn with_device_name_prefix<T: Into<String>>(mut self, prefix: T) -> Self {
        self.device_name_prefix = Some(prefix.into());
        self
    }

    pub fn with_assumed_mtu(mut self, mtu: usize) -> Self {
        self.assumed_mtu = Some(mtu);
        self
    }

    pub fn with_service_discovery_timeout(mut self, timeout: Duration) -> Self {
        self.service_discovery_timeout = timeout;
        self
    }
}
