//! Linux GATT server and advertiser using bluer (BlueZ)

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bluer::adv::{Advertisement, AdvertisementHandle, Type as AdvertisementType};
use bluer::gatt::local::{
    Application, ApplicationHandle, Characteristic, CharacteristicNotifier, CharacteristicNotify,
    CharacteristicNotifyMethod, CharacteristicRead, CharacteristicWrite,
    CharacteristicWriteMethod, ReqError, Service,
};
use bluer::{AdapterEvent, AdapterProperty};
use futures::{FutureExt, StreamExt};
use gattmsg_core::{
    AttResponse, PeerId, PeripheralEvent, RadioState, RequestId, ServiceDescriptor, SubscriberId,
    WriteRequest,
};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::BleConfig;
use crate::error::Result;

use super::GattServer;

type PendingWrites = Arc<Mutex<HashMap<RequestId, oneshot::Sender<AttResponse>>>>;
type Notifiers = Arc<Mutex<Vec<(SubscriberId, CharacteristicNotifier)>>>;

// ----------------------------------------------------------------------------
// BlueZ Implementation
// ----------------------------------------------------------------------------

pub struct BluezGattServer {
    config: BleConfig,
    _session: bluer::Session,
    adapter: bluer::Adapter,
    events: mpsc::UnboundedSender<PeripheralEvent>,
    application: Option<ApplicationHandle>,
    advertisement: Option<AdvertisementHandle>,
    /// Writes waiting for the manager's answer
    pending: PendingWrites,
    next_request: Arc<AtomicU64>,
    next_subscriber: Arc<AtomicU64>,
    notifiers: Notifiers,
    /// Value served to reads, mirrors the last notification
    value: Arc<Mutex<Vec<u8>>>,
}

impl BluezGattServer {
    pub async fn open(
        config: BleConfig,
        events: mpsc::UnboundedSender<PeripheralEvent>,
    ) -> Result<Self> {
        let session = bluer::Session::new().await?;
        let adapter = session.default_adapter().await?;
        info!("Peripheral adapter: {}", adapter.name());

        Ok(Self {
            config,
            _session: session,
            adapter,
            events,
            application: None,
            advertisement: None,
            pending: Arc::new(Mutex::new(HashMap::new())),
            next_request: Arc::new(AtomicU64::new(1)),
            next_subscriber: Arc::new(AtomicU64::new(1)),
            notifiers: Arc::new(Mutex::new(Vec::new())),
            value: Arc::new(Mutex::new(Vec::new())),
        })
    }

    fn build_application(&self, descriptor: ServiceDescriptor) -> Application {
        Application {
            services: vec![Service {
                uuid: descriptor.service_id,
                primary: true,
                characteristics: vec![Characteristic {
                    uuid: descriptor.characteristic_id,
                    read: Some(self.read_handler()),
                    write: Some(self.write_handler(descriptor.characteristic_id)),
                    notify: Some(self.notify_handler()),
                    ..Default::default()
                }],
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    fn read_handler(&self) -> CharacteristicRead {
        let value = self.value.clone();
        CharacteristicRead {
            read: true,
            fun: Box::new(move |_request| {
                let value = value.clone();
                async move { Ok(value.lock().await.clone()) }.boxed()
            }),
            ..Default::default()
        }
    }

    /// Every write is raised as a single-request batch and held open until
    /// the manager responds or the response timeout passes.
    fn write_handler(&self, characteristic_id: Uuid) -> CharacteristicWrite {
        let events = self.events.clone();
        let pending = self.pending.clone();
        let next_request = self.next_request.clone();
        let limit = self.config.write_response_timeout;

        CharacteristicWrite {
            write: true,
            write_without_response: false,
            method: CharacteristicWriteMethod::Fun(Box::new(move |value, request| {
                let events = events.clone();
                let pending = pending.clone();
                let request_id = next_request.fetch_add(1, Ordering::Relaxed);

                async move {
                    let (reply, response) = oneshot::channel();
                    pending.lock().await.insert(request_id, reply);

                    let write = WriteRequest {
                        request_id,
                        peer_id: PeerId::new(request.device_address.to_string()),
                        characteristic_id,
                        value: Some(value),
                    };
                    if events
                        .send(PeripheralEvent::WriteRequestsReceived(vec![write]))
                        .is_err()
                    {
                        pending.lock().await.remove(&request_id);
                        return Err(ReqError::Failed);
                    }

                    match timeout(limit, response).await {
                        Ok(Ok(AttResponse::Success)) => Ok(()),
                        Ok(Ok(AttResponse::RequestNotSupported)) => Err(ReqError::NotSupported),
                        _ => {
                            warn!("Write request {} was not answered", request_id);
                            pending.lock().await.remove(&request_id);
                            Err(ReqError::Failed)
                        }
                    }
                }
                .boxed()
            })),
            ..Default::default()
        }
    }

    fn notify_handler(&self) -> CharacteristicNotify {
        let events = self.events.clone();
        let notifiers = self.notifiers.clone();
        let next_subscriber = self.next_subscriber.clone();

        CharacteristicNotify {
            notify: true,
            method: CharacteristicNotifyMethod::Fun(Box::new(move |notifier| {
                let events = events.clone();
                let notifiers = notifiers.clone();
                // BlueZ does not name the central behind a notify session
                let subscriber = SubscriberId(format!(
                    "session-{}",
                    next_subscriber.fetch_add(1, Ordering::Relaxed)
                ));

                async move {
                    debug!("Notify session {} opened", subscriber);
                    notifiers.lock().await.push((subscriber.clone(), notifier));
                    let _ = events.send(PeripheralEvent::SubscriberAdded { subscriber });
                }
                .boxed()
            })),
            ..Default::default()
        }
    }
}

#[async_trait]
impl GattServer for BluezGattServer {
    async fn power_state(&mut self) -> RadioState {
        match self.adapter.is_powered().await {
            Ok(true) => RadioState::PoweredOn,
            Ok(false) => RadioState::PoweredOff,
            Err(e) => {
                warn!("Could not read adapter power: {}", e);
                RadioState::Unknown
            }
        }
    }

    async fn watch_power(&mut self) {
        let stream = match self.adapter.events().await {
            Ok(stream) => stream,
            Err(e) => {
                warn!("Adapter power changes will not be reported: {}", e);
                return;
            }
        };

        let events = self.events.clone();
        tokio::spawn(async move {
            let mut stream = Box::pin(stream);
            while let Some(event) = stream.next().await {
                if let AdapterEvent::PropertyChanged(AdapterProperty::Powered(powered)) = event {
                    let state = if powered {
                        RadioState::PoweredOn
                    } else {
                        RadioState::PoweredOff
                    };
                    if events.send(PeripheralEvent::PowerStateChanged(state)).is_err() {
                        break;
                    }
                }
            }
        });
    }

    async fn register_service(&mut self, descriptor: ServiceDescriptor) -> Result<()> {
        // Replacing the handle unregisters any previous application
        self.application = None;
        let application = self.build_application(descriptor);
        let handle = self.adapter.serve_gatt_application(application).await?;
        self.application = Some(handle);
        info!("GATT service {} published", descriptor.service_id);
        Ok(())
    }

    async fn start_advertising(&mut self, service_id: Uuid, local_name: &str) -> Result<()> {
        let advertisement = Advertisement {
            advertisement_type: AdvertisementType::Peripheral,
            service_uuids: [service_id].into_iter().collect(),
            local_name: Some(local_name.to_string()),
            discoverable: Some(true),
            ..Default::default()
        };
        let handle = self.adapter.advertise(advertisement).await?;
        self.advertisement = Some(handle);
        info!("Advertising as '{}'", local_name);
        Ok(())
    }

    async fn stop_advertising(&mut self) {
        // Dropping the handle withdraws the advertisement
        if self.advertisement.take().is_some() {
            info!("Advertisement withdrawn");
        }
    }

    async fn respond_to_write(&mut self, request_id: RequestId, response: AttResponse) {
        match self.pending.lock().await.remove(&request_id) {
            Some(reply) => {
                let _ = reply.send(response);
            }
            None => debug!("Write request {} already closed", request_id),
        }
    }

    async fn notify_subscribers(&mut self, _characteristic_id: Uuid, value: Vec<u8>) {
        *self.value.lock().await = value.clone();

        let mut notifiers = self.notifiers.lock().await;
        let mut gone = Vec::new();
        for (index, (subscriber, notifier)) in notifiers.iter_mut().enumerate() {
            if notifier.is_stopped() {
                gone.push(index);
                continue;
            }
            if let Err(e) = notifier.notify(value.clone()).await {
                debug!("Notify to {} failed: {}", subscriber, e);
                gone.push(index);
            }
        }

        for index in gone.into_iter().rev() {
            let (subscriber, _) = notifiers.remove(index);
            debug!("Notify session {} closed", subscriber);
            let _ = self
                .events
                .send(PeripheralEvent::SubscriberRemoved { subscriber });
        }
    }
}
