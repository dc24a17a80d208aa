//! Peripheral role adapter
//!
//! The adapter task forwards [`PeripheralCommand`]s to a platform GATT server.
//! Writes and subscriptions from remote centrals are raised by the server's
//! own callbacks straight onto the event channel.

pub mod fallback;
#[cfg(target_os = "linux")]
pub mod linux;

use async_trait::async_trait;
use gattmsg_core::{
    AttResponse, PeripheralCommand, PeripheralEvent, RadioState, RequestId, ServiceDescriptor,
};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::BleConfig;
use crate::error::Result;

// ----------------------------------------------------------------------------
// Platform GATT Server
// ----------------------------------------------------------------------------

/// Host GATT server and advertiser for the peripheral role
#[async_trait]
pub trait GattServer: Send {
    /// Power state right now
    async fn power_state(&mut self) -> RadioState;

    /// Begin reporting power changes on the event channel
    async fn watch_power(&mut self) {}

    async fn register_service(&mut self, descriptor: ServiceDescriptor) -> Result<()>;

    async fn start_advertising(&mut self, service_id: Uuid, local_name: &str) -> Result<()>;

    async fn stop_advertising(&mut self);

    /// Answer a pending write request
    async fn respond_to_write(&mut self, request_id: RequestId, response: AttResponse);

    /// Push a value to every subscriber
    async fn notify_subscribers(&mut self, characteristic_id: Uuid, value: Vec<u8>);
}

/// Start the peripheral adapter on a background task
pub fn spawn_peripheral_adapter(
    config: BleConfig,
) -> (
    mpsc::UnboundedSender<PeripheralCommand>,
    mpsc::UnboundedReceiver<PeripheralEvent>,
) {
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let (event_tx, event_rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let server = platform_server(config, event_tx.clone()).await;
        run_peripheral_adapter(server, command_rx, event_tx).await
    });

    (command_tx, event_rx)
}

#[cfg(target_os = "linux")]
async fn platform_server(
    config: BleConfig,
    events: mpsc::UnboundedSender<PeripheralEvent>,
) -> Box<dyn GattServer> {
    match linux::BluezGattServer::open(config, events).await {
        Ok(server) => Box::new(server),
        Err(e) => {
            tracing::error!("BlueZ unavailable: {}", e);
            Box::new(fallback::UnsupportedGattServer)
        }
    }
}

#[cfg(not(target_os = "linux"))]
async fn platform_server(
    _config: BleConfig,
    _events: mpsc::UnboundedSender<PeripheralEvent>,
) -> Box<dyn GattServer> {
    Box::new(fallback::UnsupportedGattServer)
}

/// Drive a GATT server from peripheral manager commands
pub async fn run_peripheral_adapter(
    mut server: Box<dyn GattServer>,
    mut commands: mpsc::UnboundedReceiver<PeripheralCommand>,
    events: mpsc::UnboundedSender<PeripheralEvent>,
) {
    let emit = |event: PeripheralEvent| {
        if events.send(event).is_err() {
            debug!("Peripheral manager gone, event dropped");
        }
    };

    emit(PeripheralEvent::PowerStateChanged(server.power_state().await));
    server.watch_power().await;

    while let Some(command) = commands.recv().await {
        debug!("Peripheral adapter <- {:?}", command);
        match command {
            PeripheralCommand::RegisterService(descriptor) => {
                let result = server.register_service(descriptor).await;
                if let Err(e) = &result {
                    warn!("GATT service registration failed: {}", e);
                }
                emit(PeripheralEvent::ServiceAdded {
                    service_id: descriptor.service_id,
                    result: result.map_err(|e| e.to_string()),
                });
            }
            PeripheralCommand::StartAdvertising {
                service_id,
                local_name,
            } => {
                let result = server.start_advertising(service_id, &local_name).await;
                emit(PeripheralEvent::AdvertisingStarted {
                    result: result.map_err(|e| e.to_string()),
                });
            }
            PeripheralCommand::StopAdvertising => server.stop_advertising().await,
            PeripheralCommand::RespondToWrite {
                request_id,
                response,
            } => server.respond_to_write(request_id, response).await,
            PeripheralCommand::NotifySubscribers {
                characteristic_id,
                value,
            } => server.notify_subscribers(characteristic_id, value).await,
        }
    }

    server.stop_advertising().await;
    info!("Peripheral adapter stopped");
}
