//! Actor runtime for the role managers
//!
//! Each manager runs on its own task and is the only owner of its state. The
//! task selects over adapter events and requests from cloneable handles, so
//! callbacks from the radio and calls from the application are serialized.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::central::{CentralManager, CentralState};
use crate::config::{CentralConfig, PeripheralConfig};
use crate::descriptor::ServiceDescriptor;
use crate::error::{MessengerError, Result};
use crate::observer::ObserverSender;
use crate::peer::{PeerId, PeerRecord};
use crate::peripheral::{PeripheralManager, PeripheralState};
use crate::transport::{CentralCommand, CentralEvent, CommandSink, PeripheralCommand, PeripheralEvent};

type Reply<T> = oneshot::Sender<T>;

// ----------------------------------------------------------------------------
// Central Actor
// ----------------------------------------------------------------------------

#[derive(Debug)]
enum CentralRequest {
    StartScan,
    StopScan,
    ClearDiscovered,
    Connect {
        peer_id: PeerId,
        reply: Reply<Result<()>>,
    },
    Disconnect,
    SendMessage {
        payload: Vec<u8>,
        reply: Reply<Result<()>>,
    },
    Peers {
        reply: Reply<Vec<Arc<PeerRecord>>>,
    },
    State {
        reply: Reply<CentralState>,
    },
    Shutdown,
}

/// Handle to a running central actor
#[derive(Debug, Clone)]
pub struct CentralHandle {
    requests: mpsc::UnboundedSender<CentralRequest>,
}

impl CentralHandle {
    pub fn start_scan(&self) -> Result<()> {
        self.send(CentralRequest::StartScan)
    }

    pub fn stop_scan(&self) -> Result<()> {
        self.send(CentralRequest::StopScan)
    }

    pub fn clear_discovered(&self) -> Result<()> {
        self.send(CentralRequest::ClearDiscovered)
    }

    pub async fn connect(&self, peer_id: PeerId) -> Result<()> {
        let (reply, response) = oneshot::channel();
        self.send(CentralRequest::Connect { peer_id, reply })?;
        response.await.map_err(|_| MessengerError::ChannelClosed)?
    }

    pub fn disconnect(&self) -> Result<()> {
        self.send(CentralRequest::Disconnect)
    }

    pub async fn send_message(&self, payload: impl Into<Vec<u8>>) -> Result<()> {
        let (reply, response) = oneshot::channel();
        self.send(CentralRequest::SendMessage {
            payload: payload.into(),
            reply,
        })?;
        response.await.map_err(|_| MessengerError::ChannelClosed)?
    }

    /// Discovered peers in first-seen order
    pub async fn peers(&self) -> Result<Vec<Arc<PeerRecord>>> {
        let (reply, response) = oneshot::channel();
        self.send(CentralRequest::Peers { reply })?;
        response.await.map_err(|_| MessengerError::ChannelClosed)
    }

    pub async fn state(&self) -> Result<CentralState> {
        let (reply, response) = oneshot::channel();
        self.send(CentralRequest::State { reply })?;
        response.await.map_err(|_| MessengerError::ChannelClosed)
    }

    /// Drop the link, stop scanning and end the actor task
    pub fn shutdown(&self) -> Result<()> {
        self.send(CentralRequest::Shutdown)
    }

    fn send(&self, request: CentralRequest) -> Result<()> {
        self.requests
            .send(request)
            .map_err(|_| MessengerError::ChannelClosed)
    }
}

/// Run a central manager on its own task
pub fn spawn_central<S>(
    config: CentralConfig,
    descriptor: ServiceDescriptor,
    transport: S,
    events: mpsc::UnboundedReceiver<CentralEvent>,
    observer: ObserverSender,
) -> (CentralHandle, JoinHandle<()>)
where
    S: CommandSink<CentralCommand> + 'static,
{
    let (requests_tx, requests_rx) = mpsc::unbounded_channel();
    let manager = CentralManager::new(config, descriptor, transport, observer);
    let task = tokio::spawn(run_central(manager, requests_rx, events));
    (
        CentralHandle {
            requests: requests_tx,
        },
        task,
    )
}

async fn run_central<S: CommandSink<CentralCommand>>(
    mut manager: CentralManager<S>,
    mut requests: mpsc::UnboundedReceiver<CentralRequest>,
    mut events: mpsc::UnboundedReceiver<CentralEvent>,
) {
    info!("Central actor starting");
    let mut requests_open = true;
    let mut events_open = true;

    while requests_open || events_open {
        tokio::select! {
            request = requests.recv(), if requests_open => match request {
                Some(CentralRequest::Shutdown) => {
                    manager.disconnect();
                    manager.stop_scan();
                    break;
                }
                Some(request) => handle_central_request(&mut manager, request),
                None => {
                    debug!("All central handles dropped");
                    requests_open = false;
                }
            },

            event = events.recv(), if events_open => match event {
                Some(event) => manager.handle_event(event),
                None => {
                    warn!("Central adapter event stream closed");
                    events_open = false;
                }
            },
        }
    }

    info!("Central actor stopped");
}

fn handle_central_request<S: CommandSink<CentralCommand>>(
    manager: &mut CentralManager<S>,
    request: CentralRequest,
) {
    // A caller that stopped waiting for its reply is not an error
    match request {
        CentralRequest::StartScan => manager.start_scan(),
        CentralRequest::StopScan => manager.stop_scan(),
        CentralRequest::ClearDiscovered => manager.clear_discovered(),
        CentralRequest::Connect { peer_id, reply } => {
            let _ = reply.send(manager.connect(&peer_id));
        }
        CentralRequest::Disconnect => manager.disconnect(),
        CentralRequest::SendMessage { payload, reply } => {
            let _ = reply.send(manager.send_message(payload));
        }
        CentralRequest::Peers { reply } => {
            let _ = reply.send(manager.discovered().records());
        }
        CentralRequest::State { reply } => {
            let _ = reply.send(manager.state());
        }
        CentralRequest::Shutdown => {}
    }
}

// ----------------------------------------------------------------------------
// Peripheral Actor
// ----------------------------------------------------------------------------

#[derive(Debug)]
enum PeripheralRequest {
    StartAdvertising,
    StopAdvertising,
    SendNotification {
        payload: Vec<u8>,
        reply: Reply<Result<()>>,
    },
    State {
        reply: Reply<PeripheralState>,
    },
    SubscriberCount {
        reply: Reply<usize>,
    },
    Shutdown,
}

/// Handle to a running peripheral actor
#[derive(Debug, Clone)]
pub struct PeripheralHandle {
    requests: mpsc::UnboundedSender<PeripheralRequest>,
}

impl PeripheralHandle {
    pub fn start_advertising(&self) -> Result<()> {
        self.send(PeripheralRequest::StartAdvertising)
    }

    pub fn stop_advertising(&self) -> Result<()> {
        self.send(PeripheralRequest::StopAdvertising)
    }

    pub async fn send_notification(&self, payload: impl Into<Vec<u8>>) -> Result<()> {
        let (reply, response) = oneshot::channel();
        self.send(PeripheralRequest::SendNotification {
            payload: payload.into(),
            reply,
        })?;
        response.await.map_err(|_| MessengerError::ChannelClosed)?
    }

    pub async fn state(&self) -> Result<PeripheralState> {
        let (reply, response) = oneshot::channel();
        self.send(PeripheralRequest::State { reply })?;
        response.await.map_err(|_| MessengerError::ChannelClosed)
    }

    pub async fn subscriber_count(&self) -> Result<usize> {
        let (reply, response) = oneshot::channel();
        self.send(PeripheralRequest::SubscriberCount { reply })?;
        response.await.map_err(|_| MessengerError::ChannelClosed)
    }

    /// Stop advertising and end the actor task
    pub fn shutdown(&self) -> Result<()> {
        self.send(PeripheralRequest::Shutdown)
    }

    fn send(&self, request: PeripheralRequest) -> Result<()> {
        self.requests
            .send(request)
            .map_err(|_| MessengerError::ChannelClosed)
    }
}

/// Run a peripheral manager on its own task
pub fn spawn_peripheral<S>(
    config: PeripheralConfig,
    descriptor: ServiceDescriptor,
    transport: S,
    events: mpsc::UnboundedReceiver<PeripheralEvent>,
    observer: ObserverSender,
) -> (PeripheralHandle, JoinHandle<()>)
where
    S: CommandSink<PeripheralCommand> + 'static,
{
    let (requests_tx, requests_rx) = mpsc::unbounded_channel();
    let manager = PeripheralManager::new(config, descriptor, transport, observer);
    let task = tokio::spawn(run_peripheral(manager, requests_rx, events));
    (
        PeripheralHandle {
            requests: requests_tx,
        },
        task,
    )
}

async fn run_peripheral<S: CommandSink<PeripheralCommand>>(
    mut manager: PeripheralManager<S>,
    mut requests: mpsc::UnboundedReceiver<PeripheralRequest>,
    mut events: mpsc::UnboundedReceiver<PeripheralEvent>,
) {
    info!("Peripheral actor starting");
    let mut requests_open = true;
    let mut events_open = true;

    while requests_open || events_open {
        tokio::select! {
            request = requests.recv(), if requests_open => match request {
                Some(PeripheralRequest::Shutdown) => {
                    manager.stop_advertising();
                    break;
                }
                Some(request) => handle_peripheral_request(&mut manager, request),
                None => {
                    debug!("All peripheral handles dropped");
                    requests_open = false;
                }
            },

            event = events.recv(), if events_open => match event {
                Some(event) => manager.handle_event(event),
                None => {
                    warn!("Peripheral adapter event stream closed");
                    events_open = false;
                }
            },
        }
    }

    info!("Peripheral actor stopped");
}

fn handle_peripheral_request<S: CommandSink<PeripheralCommand>>(
    manager: &mut PeripheralManager<S>,
    request: PeripheralRequest,
) {
    match request {
        PeripheralRequest::StartAdvertising => manager.start_advertising(),
        PeripheralRequest::StopAdvertising => manager.stop_advertising(),
        PeripheralRequest::SendNotification { payload, reply } => {
            let _ = reply.send(manager.send_notification(payload));
        }
        PeripheralRequest::State { reply } => {
            let _ = reply.send(manager.state());
        }
        PeripheralRequest::SubscriberCount { reply } => {
            let _ = reply.send(manager.subscriber_count());
        }
        PeripheralRequest::Shutdown => {}
    }
}
