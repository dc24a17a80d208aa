//! GattMsg Core
//!
//! Radio-independent state machines for a dual-role BLE GATT messenger. The
//! central role scans, connects, resolves the messenger characteristic and
//! exchanges messages over write-with-response and notifications. The
//! peripheral role publishes the service, advertises it and echoes every
//! accepted write to its subscribers.
//!
//! Both managers talk to the radio only through [`CommandSink`] commands and
//! [`transport`] events, so they run unchanged against a real adapter or a
//! recorded command list in tests.

// ----------------------------------------------------------------------------
// Module Declarations
// ----------------------------------------------------------------------------

pub mod central;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod message;
pub mod observer;
pub mod peer;
pub mod peripheral;
pub mod runtime;
pub mod transport;

// ----------------------------------------------------------------------------
// Public API
// ----------------------------------------------------------------------------

pub use central::{CentralManager, CentralState, Connection, ConnectionState};
pub use config::{CentralConfig, PeripheralConfig, WriteBatchPolicy, ATT_MAX_VALUE_LEN};
pub use descriptor::{
    uuid_from_u16, CharacteristicHandle, ServiceDescriptor, DEFAULT_LOCAL_NAME,
    MESSENGER_CHARACTERISTIC_UUID, MESSENGER_SERVICE_UUID,
};
pub use error::{MessengerError, Result};
pub use message::Message;
pub use observer::{observer_channel, Observer, ObserverEvent, ObserverReceiver, ObserverSender};
pub use peer::{DiscoveryTable, PeerId, PeerRecord};
pub use peripheral::{PeripheralManager, PeripheralState};
pub use runtime::{spawn_central, spawn_peripheral, CentralHandle, PeripheralHandle};
pub use transport::{
    AttResponse, CentralCommand, CentralEvent, CommandSink, PeripheralCommand, PeripheralEvent,
    RadioState, RequestId, SubscriberId, TransportResult, WriteRequest,
};
