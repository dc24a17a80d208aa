//! Central role adapter over btleplug
//!
//! Turns [`CentralCommand`]s into btleplug calls and reports every outcome as
//! a [`CentralEvent`]. Connects run on their own tasks with a timeout; service
//! discovery, subscription and writes are awaited in order on the adapter task.

use std::collections::{HashMap, HashSet};

use btleplug::api::{
    Central, CentralEvent as RadioEvent, CentralState as AdapterState, CharPropFlags,
    Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use futures::stream::StreamExt;
use gattmsg_core::{CentralCommand, CentralEvent, CharacteristicHandle, PeerId, RadioState};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::BleConfig;
use crate::error::{BleError, Result};

/// Start the central adapter on a background task
///
/// Returns the command sink for a central manager and the stream of events
/// the manager should consume.
pub fn spawn_central_adapter(
    config: BleConfig,
) -> (
    mpsc::UnboundedSender<CentralCommand>,
    mpsc::UnboundedReceiver<CentralEvent>,
) {
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let (event_tx, event_rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        match BtleplugCentral::open(config, event_tx.clone()).await {
            Ok(adapter) => adapter.run(command_rx).await,
            Err(e) => {
                error!("Central adapter unavailable: {}", e);
                let _ = event_tx.send(CentralEvent::PowerStateChanged(RadioState::Unsupported));
            }
        }
    });

    (command_tx, event_rx)
}

pub(crate) fn radio_state(state: AdapterState) -> RadioState {
    match state {
        AdapterState::PoweredOn => RadioState::PoweredOn,
        AdapterState::PoweredOff => RadioState::PoweredOff,
        #[allow(unreachable_patterns)]
        _ => RadioState::Unknown,
    }
}

fn peer_id_of(id: &PeripheralId) -> PeerId {
    PeerId::new(id.to_string())
}

// ----------------------------------------------------------------------------
// Adapter Task
// ----------------------------------------------------------------------------

struct BtleplugCentral {
    config: BleConfig,
    _manager: Manager,
    adapter: Adapter,
    events: mpsc::UnboundedSender<CentralEvent>,
    connect_results: mpsc::UnboundedSender<(PeerId, Result<()>)>,
    connect_results_rx: Option<mpsc::UnboundedReceiver<(PeerId, Result<()>)>>,
    /// Peripherals seen while scanning, by peer id
    peripherals: HashMap<PeerId, Peripheral>,
    connecting: HashMap<PeerId, JoinHandle<()>>,
    connected: HashSet<PeerId>,
    /// Notification forwarders for subscribed peers
    listeners: HashMap<PeerId, JoinHandle<()>>,
    scanning: bool,
}

impl BtleplugCentral {
    async fn open(config: BleConfig, events: mpsc::UnboundedSender<CentralEvent>) -> Result<Self> {
        let manager = Manager::new().await?;
        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .nth(config.adapter_index)
            .ok_or(BleError::AdapterNotAvailable {
                index: config.adapter_index,
            })?;
        info!(
            "Central adapter: {}",
            adapter.adapter_info().await.unwrap_or_default()
        );

        let (connect_results, connect_results_rx) = mpsc::unbounded_channel();
        Ok(Self {
            config,
            _manager: manager,
            adapter,
            events,
            connect_results,
            connect_results_rx: Some(connect_results_rx),
            peripherals: HashMap::new(),
            connecting: HashMap::new(),
            connected: HashSet::new(),
            listeners: HashMap::new(),
            scanning: false,
        })
    }

    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<CentralCommand>) {
        let mut radio_events = match self.adapter.events().await {
            Ok(stream) => stream,
            Err(e) => {
                error!("Failed to subscribe to adapter events: {}", e);
                self.emit(CentralEvent::PowerStateChanged(RadioState::Unsupported));
                return;
            }
        };
        let Some(mut connect_results) = self.connect_results_rx.take() else {
            return;
        };

        let state = match self.adapter.adapter_state().await {
            Ok(state) => radio_state(state),
            Err(e) => {
                warn!("Could not read adapter state: {}", e);
                RadioState::Unknown
            }
        };
        self.emit(CentralEvent::PowerStateChanged(state));

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                Some(event) = radio_events.next() => self.handle_radio_event(event).await,
                Some((peer_id, result)) = connect_results.recv() => {
                    self.on_connect_result(peer_id, result).await
                }
            }
        }

        self.shutdown().await;
        info!("Central adapter stopped");
    }

    fn emit(&self, event: CentralEvent) {
        if self.events.send(event).is_err() {
            debug!("Central manager gone, event dropped");
        }
    }

    // ------------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------------

    async fn handle_command(&mut self, command: CentralCommand) {
        debug!("Central adapter <- {:?}", command);
        match command {
            CentralCommand::StartScan { services } => {
                match self.adapter.start_scan(ScanFilter { services }).await {
                    Ok(()) => {
                        self.scanning = true;
                        info!("Radio scan started");
                    }
                    Err(e) => {
                        warn!("Failed to start scan: {}", e);
                        self.emit(CentralEvent::ScanFailed {
                            reason: e.to_string(),
                        });
                    }
                }
            }
            CentralCommand::StopScan => {
                self.scanning = false;
                if let Err(e) = self.adapter.stop_scan().await {
                    warn!("Failed to stop scan: {}", e);
                }
            }
            CentralCommand::Connect { peer_id } => self.connect(peer_id),
            CentralCommand::Disconnect { peer_id } => self.disconnect(peer_id).await,
            CentralCommand::DiscoverServices { peer_id, .. } => {
                let result = self
                    .discover_services(&peer_id)
                    .await
                    .map_err(|e| e.to_string());
                self.emit(CentralEvent::ServicesDiscovered { peer_id, result });
            }
            CentralCommand::DiscoverCharacteristics {
                peer_id,
                service_id,
                ..
            } => {
                let result = self
                    .characteristics(&peer_id, service_id)
                    .map_err(|e| e.to_string());
                self.emit(CentralEvent::CharacteristicsDiscovered {
                    peer_id,
                    service_id,
                    result,
                });
            }
            CentralCommand::Subscribe {
                peer_id,
                characteristic,
            } => {
                let result = self
                    .subscribe(&peer_id, characteristic)
                    .await
                    .map_err(|e| e.to_string());
                self.emit(CentralEvent::SubscriptionChanged {
                    peer_id,
                    characteristic,
                    result,
                });
            }
            CentralCommand::Write {
                peer_id,
                characteristic,
                payload,
            } => {
                let result = self
                    .write(&peer_id, characteristic, &payload)
                    .await
                    .map_err(|e| e.to_string());
                self.emit(CentralEvent::WriteAcknowledged {
                    peer_id,
                    characteristic,
                    result,
                });
            }
        }
    }

    fn peripheral(&self, peer_id: &PeerId) -> Result<Peripheral> {
        self.peripherals
            .get(peer_id)
            .cloned()
            .ok_or_else(|| BleError::PeripheralNotFound {
                peer_id: peer_id.to_string(),
            })
    }

    fn connect(&mut self, peer_id: PeerId) {
        let peripheral = match self.peripheral(&peer_id) {
            Ok(peripheral) => peripheral,
            Err(e) => {
                self.emit(CentralEvent::ConnectFailed {
                    peer_id,
                    reason: e.to_string(),
                });
                return;
            }
        };

        let limit = self.config.connection_timeout;
        let results = self.connect_results.clone();
        let peer = peer_id.clone();
        let task = tokio::spawn(async move {
            let result = match timeout(limit, peripheral.connect()).await {
                Ok(result) => result.map_err(BleError::from),
                Err(_) => Err(BleError::ConnectionTimeout(limit)),
            };
            let _ = results.send((peer, result));
        });

        debug!("Connecting to {} (timeout {:?})", peer_id, limit);
        if let Some(previous) = self.connecting.insert(peer_id, task) {
            previous.abort();
        }
    }

    async fn on_connect_result(&mut self, peer_id: PeerId, result: Result<()>) {
        if self.connecting.remove(&peer_id).is_none() {
            // Attempt was cancelled after the radio finished it
            if result.is_ok() {
                if let Ok(peripheral) = self.peripheral(&peer_id) {
                    let _ = peripheral.disconnect().await;
                }
            }
            return;
        }

        match result {
            Ok(()) => {
                info!("Link up with {}", peer_id);
                self.connected.insert(peer_id.clone());
                self.emit(CentralEvent::Connected { peer_id });
            }
            Err(e) => {
                warn!("Connection to {} failed: {}", peer_id, e);
                self.emit(CentralEvent::ConnectFailed {
                    peer_id,
                    reason: e.to_string(),
                });
            }
        }
    }

    async fn disconnect(&mut self, peer_id: PeerId) {
        if let Some(task) = self.connecting.remove(&peer_id) {
            task.abort();
            info!("Cancelled connection attempt to {}", peer_id);
            if let Ok(peripheral) = self.peripheral(&peer_id) {
                let _ = peripheral.disconnect().await;
            }
            self.emit(CentralEvent::ConnectFailed {
                peer_id,
                reason: BleError::ConnectionCancelled.to_string(),
            });
            return;
        }

        if let Some(listener) = self.listeners.remove(&peer_id) {
            listener.abort();
        }
        if let Ok(peripheral) = self.peripheral(&peer_id) {
            if let Err(e) = peripheral.disconnect().await {
                warn!("Failed to disconnect from {}: {}", peer_id, e);
            }
        }
        self.mark_disconnected(peer_id, None);
    }

    fn mark_disconnected(&mut self, peer_id: PeerId, reason: Option<String>) {
        if self.connected.remove(&peer_id) {
            self.emit(CentralEvent::Disconnected { peer_id, reason });
        }
    }

    async fn discover_services(&self, peer_id: &PeerId) -> Result<Vec<Uuid>> {
        let peripheral = self.peripheral(peer_id)?;
        peripheral.discover_services().await?;
        let services: Vec<Uuid> = peripheral.services().iter().map(|s| s.uuid).collect();
        debug!("{} offers {} services", peer_id, services.len());
        Ok(services)
    }

    fn characteristics(
        &self,
        peer_id: &PeerId,
        service_id: Uuid,
    ) -> Result<Vec<CharacteristicHandle>> {
        let peripheral = self.peripheral(peer_id)?;
        let service = peripheral
            .services()
            .into_iter()
            .find(|s| s.uuid == service_id)
            .ok_or(BleError::ServiceNotFound { service_id })?;

        Ok(service
            .characteristics
            .iter()
            .map(|c| CharacteristicHandle {
                service_id,
                characteristic_id: c.uuid,
                can_write: c.properties.contains(CharPropFlags::WRITE),
                can_notify: c.properties.contains(CharPropFlags::NOTIFY),
            })
            .collect())
    }

    fn find_characteristic(
        peripheral: &Peripheral,
        handle: CharacteristicHandle,
    ) -> Result<Characteristic> {
        peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == handle.characteristic_id && c.service_uuid == handle.service_id)
            .ok_or(BleError::CharacteristicNotFound {
                characteristic_id: handle.characteristic_id,
            })
    }

    async fn subscribe(&mut self, peer_id: &PeerId, handle: CharacteristicHandle) -> Result<()> {
        let peripheral = self.peripheral(peer_id)?;
        let characteristic = Self::find_characteristic(&peripheral, handle)?;

        let mut notifications = peripheral.notifications().await?;
        peripheral.subscribe(&characteristic).await?;

        let events = self.events.clone();
        let peer = peer_id.clone();
        let listener = tokio::spawn(async move {
            while let Some(notification) = notifications.next().await {
                if notification.uuid != handle.characteristic_id {
                    continue;
                }
                let event = CentralEvent::ValueUpdated {
                    peer_id: peer.clone(),
                    characteristic: handle,
                    value: notification.value,
                };
                if events.send(event).is_err() {
                    break;
                }
            }
            debug!("Notification stream for {} ended", peer);
        });

        if let Some(previous) = self.listeners.insert(peer_id.clone(), listener) {
            previous.abort();
        }
        Ok(())
    }

    async fn write(
        &self,
        peer_id: &PeerId,
        handle: CharacteristicHandle,
        payload: &[u8],
    ) -> Result<()> {
        let peripheral = self.peripheral(peer_id)?;
        let characteristic = Self::find_characteristic(&peripheral, handle)?;
        peripheral
            .write(&characteristic, payload, WriteType::WithResponse)
            .await?;
        debug!("Wrote {} bytes to {}", payload.len(), peer_id);
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Radio Events
    // ------------------------------------------------------------------------

    async fn handle_radio_event(&mut self, event: RadioEvent) {
        match event {
            RadioEvent::StateUpdate(state) => {
                let state = radio_state(state);
                info!("Adapter power state: {}", state);
                self.emit(CentralEvent::PowerStateChanged(state));
            }
            RadioEvent::DeviceDiscovered(id) | RadioEvent::DeviceUpdated(id) => {
                self.on_sighting(id).await
            }
            RadioEvent::DeviceDisconnected(id) => {
                let peer_id = peer_id_of(&id);
                if let Some(listener) = self.listeners.remove(&peer_id) {
                    listener.abort();
                }
                self.mark_disconnected(peer_id, Some("link lost".to_string()));
            }
            _ => {}
        }
    }

    async fn on_sighting(&mut self, id: PeripheralId) {
        if !self.scanning {
            return;
        }
        let peripheral = match self.adapter.peripheral(&id).await {
            Ok(peripheral) => peripheral,
            Err(e) => {
                debug!("Peripheral {} vanished: {}", id, e);
                return;
            }
        };
        let properties = match peripheral.properties().await {
            Ok(Some(properties)) => properties,
            Ok(None) => return,
            Err(e) => {
                debug!("No properties for {}: {}", id, e);
                return;
            }
        };

        let peer_id = peer_id_of(&id);
        self.peripherals.insert(peer_id.clone(), peripheral);
        self.emit(CentralEvent::PeerDiscovered {
            peer_id,
            name: properties.local_name,
            rssi: properties.rssi,
        });
    }

    async fn shutdown(&mut self) {
        for (_, task) in self.connecting.drain() {
            task.abort();
        }
        for (_, listener) in self.listeners.drain() {
            listener.abort();
        }
        if self.scanning {
            let _ = self.adapter.stop_scan().await;
        }
        for peer_id in self.connected.drain().collect::<Vec<_>>() {
            if let Some(peripheral) = self.peripherals.get(&peer_id) {
                let _ = peripheral.disconnect().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adapter_state_mapping() {
        assert_eq!(radio_state(AdapterState::PoweredOn), RadioState::PoweredOn);
        assert_eq!(radio_state(AdapterState::PoweredOff), RadioState::PoweredOff);
        assert_eq!(radio_state(AdapterState::Unknown), RadioState::Unknown);
    }
}
