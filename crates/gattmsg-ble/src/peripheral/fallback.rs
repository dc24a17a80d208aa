//! Peripheral role on hosts without a supported GATT server

use async_trait::async_trait;
use gattmsg_core::{AttResponse, RadioState, RequestId, ServiceDescriptor};
use tracing::warn;
use uuid::Uuid;

use crate::error::{BleError, Result};

use super::GattServer;

/// Reports the radio as unsupported and refuses every request
pub struct UnsupportedGattServer;

#[async_trait]
impl GattServer for UnsupportedGattServer {
    async fn power_state(&mut self) -> RadioState {
        warn!("Peripheral role not supported on this platform; use Linux with BlueZ");
        RadioState::Unsupported
    }

    async fn register_service(&mut self, _descriptor: ServiceDescriptor) -> Result<()> {
        Err(BleError::PeripheralUnsupported)
    }

    async fn start_advertising(&mut self, _service_id: Uuid, _local_name: &str) -> Result<()> {
        Err(BleError::PeripheralUnsupported)
    }

    async fn stop_advertising(&mut self) {}

    async fn respond_to_write(&mut self, _request_id: RequestId, _response: AttResponse) {}

    async fn notify_subscribers(&mut self, _characteristic_id: Uuid, _value: Vec<u8>) {}
}
