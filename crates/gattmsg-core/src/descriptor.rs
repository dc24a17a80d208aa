//! GATT service and characteristic identifiers shared by both roles

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ----------------------------------------------------------------------------
// Identifiers
// ----------------------------------------------------------------------------

/// Bluetooth base UUID (`00000000-0000-1000-8000-00805F9B34FB`)
const BLUETOOTH_BASE_UUID: u128 = 0x00000000_0000_1000_8000_00805F9B34FB;

/// Expand a 16-bit assigned number onto the Bluetooth base UUID
pub const fn uuid_from_u16(short: u16) -> Uuid {
    Uuid::from_u128(BLUETOOTH_BASE_UUID | ((short as u128) << 96))
}

/// Messaging service UUID (short form `0x1234`)
pub const MESSENGER_SERVICE_UUID: Uuid = uuid_from_u16(0x1234);

/// Message characteristic UUID (short form `0xABCD`), write + notify
pub const MESSENGER_CHARACTERISTIC_UUID: Uuid = uuid_from_u16(0xABCD);

/// Local name advertised by the peripheral role
pub const DEFAULT_LOCAL_NAME: &str = "BLE-Peripheral";

// ----------------------------------------------------------------------------
// Service Descriptor
// ----------------------------------------------------------------------------

/// The service/characteristic pair both roles agree on.
///
/// A central only talks to peripherals exposing exactly this pair, and the
/// peripheral registers exactly this pair on power-on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceDescriptor {
    pub service_id: Uuid,
    pub characteristic_id: Uuid,
}

impl ServiceDescriptor {
    /// The messenger's built-in descriptor
    pub const MESSENGER: ServiceDescriptor = ServiceDescriptor {
        service_id: MESSENGER_SERVICE_UUID,
        characteristic_id: MESSENGER_CHARACTERISTIC_UUID,
    };

    pub const fn new(service_id: Uuid, characteristic_id: Uuid) -> Self {
        Self {
            service_id,
            characteristic_id,
        }
    }

    /// Whether a characteristic handle belongs to this descriptor
    pub fn matches(&self, handle: &CharacteristicHandle) -> bool {
        handle.service_id == self.service_id && handle.characteristic_id == self.characteristic_id
    }
}

impl Default for ServiceDescriptor {
    fn default() -> Self {
        Self::MESSENGER
    }
}

/// A characteristic resolved on a connected peer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CharacteristicHandle {
    pub service_id: Uuid,
    pub characteristic_id: Uuid,
    pub can_write: bool,
    pub can_notify: bool,
}

impl CharacteristicHandle {
    pub fn new(service_id: Uuid, characteristic_id: Uuid) -> Self {
        Self {
            service_id,
            characteristic_id,
            can_write: true,
            can_notify: true,
        }
    }
}
