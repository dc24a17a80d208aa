//! Error types for the radio adapters

use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

// ----------------------------------------------------------------------------
// Error Types
// ----------------------------------------------------------------------------

/// Errors raised while driving the radio
///
/// These never reach the role managers directly. The adapters flatten them to
/// strings inside the matching transport event.
#[derive(Error, Debug)]
pub enum BleError {
    #[error("Bluetooth error: {0}")]
    Btleplug(#[from] btleplug::Error),

    #[cfg(target_os = "linux")]
    #[error("BlueZ error: {0}")]
    Bluez(#[from] bluer::Error),

    #[error("No BLE adapter at index {index}")]
    AdapterNotAvailable { index: usize },

    #[error("Unknown peripheral: {peer_id}")]
    PeripheralNotFound { peer_id: String },

    #[error("Service {service_id} not found")]
    ServiceNotFound { service_id: Uuid },

    #[error("Characteristic {characteristic_id} not found")]
    CharacteristicNotFound { characteristic_id: Uuid },

    #[error("Connection timed out after {0:?}")]
    ConnectionTimeout(Duration),

    #[error("Connection attempt cancelled")]
    ConnectionCancelled,

    #[error("Peripheral role is not supported on this platform")]
    PeripheralUnsupported,
}

pub type Result<T> = std::result::Result<T, BleError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_name_the_missing_item() {
        let err = BleError::PeripheralNotFound {
            peer_id: "hci0/dev_AA".into(),
        };
        assert_eq!(err.to_string(), "Unknown peripheral: hci0/dev_AA");

        let err = BleError::ConnectionTimeout(Duration::from_secs(10));
        assert_eq!(err.to_string(), "Connection timed out after 10s");
    }
}
