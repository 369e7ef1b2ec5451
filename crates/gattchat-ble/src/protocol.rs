//! BLE protocol constants for gattchat

use btleplug::api::Characteristic;
use uuid::Uuid;

// ----------------------------------------------------------------------------
// BLE Service and Characteristic UUIDs
// ----------------------------------------------------------------------------

/// gattchat BLE service UUID
pub const GATTCHAT_SERVICE_UUID: Uuid = Uuid::from_u128(0x6E400001_B5A3_F393_E0A9_E50E24DCCA9E);

/// Characteristic the central writes outbound chunks to
pub const GATTCHAT_TX_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x6E400002_B5A3_F393_E0A9_E50E24DCCA9E);

/// Characteristic the peripheral notifies inbound chunks on
pub const GATTCHAT_RX_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x6E400003_B5A3_F393_E0A9_E50E24DCCA9E);

// ----------------------------------------------------------------------------
// Protocol Utilities
// ----------------------------------------------------------------------------

/// Find a characteristic of the gattchat service by UUID
pub fn find_characteristic<'a, I>(characteristics: I, uuid: Uuid) -> Option<Characteristic>
where
    I: IntoIterator<Item = &'a Characteristic>,
{
    characteristics
        .into_iter()
        .find(|c| c.uuid == uuid && c.service_uuid == GATTCHAT_SERVICE_UUID)
        .cloned()
}

/// Whether an advertised name passes the configured prefix filter
pub fn name_matches(name: Option<&str>, prefix: Option<&str>) -> bool {
    match prefix {
        None => true,
        Some(prefix) => name.is_some_and(|name| name.starts_with(prefix)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uuids_share_base() {
        let service = GATTCHAT_SERVICE_UUID.as_u128();
        let tx = GATTCHAT_TX_CHARACTERISTIC_UUID.as_u128();
        let rx = GATTCHAT_RX_CHARACTERISTIC_UUID.as_u128();
        assert_eq!(tx - service, 1 << 96);
        assert_eq!(rx - service, 2 << 96);
        assert_eq!(
            GATTCHAT_SERVICE_UUID.to_string(),
            "6e400001-b5a3-f393-e0a9-e50e24dcca9e"
        );
    }

    #[test]
    fn test_name_prefix_filter() {
        assert!(name_matches(None, None));
        assert!(name_matches(Some("anything"), None));
        assert!(name_matches(Some("gattchat-1"), Some("gattchat")));
        assert!(!name_matches(Some("other"), Some("gattchat")));
        assert!(!name_matches(None, Some("gattchat")));
    }
}
