//! Peripheral role manager
//!
//! Registers the messenger service as soon as the radio powers on, advertises
//! on request, answers incoming writes and fans stored values out to every
//! subscribed central.

use std::collections::BTreeSet;
use std::fmt;

use tracing::{debug, error, info, warn};

use crate::config::{PeripheralConfig, WriteBatchPolicy, ATT_MAX_VALUE_LEN};
use crate::descriptor::ServiceDescriptor;
use crate::error::{MessengerError, Result};
use crate::message::Message;
use crate::observer::{emit, ObserverEvent, ObserverSender};
use crate::transport::{
    AttResponse, CommandSink, PeripheralCommand, PeripheralEvent, RadioState, RequestId,
    SubscriberId, TransportResult, WriteRequest,
};

// ----------------------------------------------------------------------------
// States
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeripheralState {
    PoweredOff,
    /// Powered, service registration pending or failed
    PoweredOn,
    ServiceRegistered,
    Advertising,
}

impl PeripheralState {
    pub fn name(self) -> &'static str {
        match self {
            PeripheralState::PoweredOff => "PoweredOff",
            PeripheralState::PoweredOn => "PoweredOn",
            PeripheralState::ServiceRegistered => "ServiceRegistered",
            PeripheralState::Advertising => "Advertising",
        }
    }
}

impl fmt::Display for PeripheralState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Registration {
    Unregistered,
    Pending,
    Registered,
}

// ----------------------------------------------------------------------------
// Peripheral Manager
// ----------------------------------------------------------------------------

/// Server side of the messenger
pub struct PeripheralManager<S> {
    config: PeripheralConfig,
    descriptor: ServiceDescriptor,
    radio: RadioState,
    registration: Registration,
    advertising: bool,
    /// Current value of the message characteristic
    value: Option<Vec<u8>>,
    /// Subscribers as reported by the transport; lookup only
    subscribers: BTreeSet<SubscriberId>,
    transport: S,
    observer: ObserverSender,
}

impl<S: CommandSink<PeripheralCommand>> PeripheralManager<S> {
    pub fn new(
        config: PeripheralConfig,
        descriptor: ServiceDescriptor,
        transport: S,
        observer: ObserverSender,
    ) -> Self {
        Self {
            config,
            descriptor,
            radio: RadioState::Unknown,
            registration: Registration::Unregistered,
            advertising: false,
            value: None,
            subscribers: BTreeSet::new(),
            transport,
            observer,
        }
    }

    pub fn state(&self) -> PeripheralState {
        if !self.radio.is_powered_on() {
            return PeripheralState::PoweredOff;
        }
        match (self.registration, self.advertising) {
            (Registration::Registered, true) => PeripheralState::Advertising,
            (Registration::Registered, false) => PeripheralState::ServiceRegistered,
            _ => PeripheralState::PoweredOn,
        }
    }

    pub fn radio_state(&self) -> RadioState {
        self.radio
    }

    pub fn current_value(&self) -> Option<&[u8]> {
        self.value.as_deref()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    pub fn transport(&self) -> &S {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut S {
        &mut self.transport
    }

    // ------------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------------

    pub fn start_advertising(&mut self) {
        if !self.radio.is_powered_on() {
            warn!("Cannot advertise, radio is {}", self.radio);
            return;
        }
        match self.state() {
            PeripheralState::ServiceRegistered => {}
            PeripheralState::Advertising => {
                debug!("Already advertising");
                return;
            }
            state => {
                warn!("Cannot advertise before the service is registered ({})", state);
                return;
            }
        }

        self.transport.dispatch(PeripheralCommand::StartAdvertising {
            service_id: self.descriptor.service_id,
            local_name: self.config.local_name.clone(),
        });
        self.advertising = true;
        info!(
            "Advertising {} as '{}'",
            self.descriptor.service_id, self.config.local_name
        );
    }

    pub fn stop_advertising(&mut self) {
        if !self.advertising {
            debug!("Not advertising");
            return;
        }
        self.transport.dispatch(PeripheralCommand::StopAdvertising);
        self.advertising = false;
        info!("Stopped advertising");
        emit(
            &self.observer,
            ObserverEvent::AdvertisingChanged { advertising: false },
        );
    }

    /// Push a server-originated message to every subscriber
    pub fn send_notification(&mut self, payload: impl Into<Vec<u8>>) -> Result<()> {
        let payload = payload.into();
        match self.state() {
            PeripheralState::ServiceRegistered | PeripheralState::Advertising => {}
            PeripheralState::PoweredOff => {
                return Err(MessengerError::RadioUnavailable { state: self.radio })
            }
            PeripheralState::PoweredOn => return Err(MessengerError::ServiceNotRegistered),
        }
        if payload.is_empty() {
            return Err(MessengerError::EmptyPayload);
        }
        if payload.len() > ATT_MAX_VALUE_LEN {
            return Err(MessengerError::PayloadTooLarge {
                size: payload.len(),
                max_size: ATT_MAX_VALUE_LEN,
            });
        }

        self.store_and_notify(payload);
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Event Dispatch
    // ------------------------------------------------------------------------

    pub fn handle_event(&mut self, event: PeripheralEvent) {
        let state = self.state();
        debug!("Peripheral {} <- {:?}", state, event);

        match (state, event) {
            (_, PeripheralEvent::PowerStateChanged(radio)) => self.on_power_state(radio),

            (PeripheralState::PoweredOff, event) => {
                warn!("Ignoring {:?} while radio is {}", event, self.radio);
            }

            (PeripheralState::PoweredOn, PeripheralEvent::ServiceAdded { service_id, result })
                if self.registration == Registration::Pending
                    && service_id == self.descriptor.service_id =>
            {
                self.on_service_added(result)
            }

            (PeripheralState::Advertising, PeripheralEvent::AdvertisingStarted { result }) => {
                self.on_advertising_started(result)
            }

            (
                PeripheralState::ServiceRegistered | PeripheralState::Advertising,
                PeripheralEvent::WriteRequestsReceived(requests),
            ) => self.on_write_requests(requests),

            (_, PeripheralEvent::WriteRequestsReceived(requests)) => {
                warn!("Write before service registration, rejecting {}", requests.len());
                for request in requests {
                    self.reject(request);
                }
            }

            (_, PeripheralEvent::SubscriberAdded { subscriber }) => {
                info!("Central {} subscribed", subscriber);
                self.subscribers.insert(subscriber);
                self.report_subscribers();
            }

            (_, PeripheralEvent::SubscriberRemoved { subscriber }) => {
                if self.subscribers.remove(&subscriber) {
                    info!("Central {} unsubscribed", subscriber);
                    self.report_subscribers();
                }
            }

            (state, event) => {
                warn!("Rejecting {:?} in state {}", event, state);
            }
        }
    }

    fn on_power_state(&mut self, radio: RadioState) {
        let was_on = self.radio.is_powered_on();
        self.radio = radio;
        info!("Peripheral radio: {}", radio);
        emit(&self.observer, ObserverEvent::RadioStateChanged(radio));

        if radio.is_powered_on() {
            if !was_on {
                self.transport
                    .dispatch(PeripheralCommand::RegisterService(self.descriptor));
                self.registration = Registration::Pending;
                debug!(
                    "Registering service {} with characteristic {}",
                    self.descriptor.service_id, self.descriptor.characteristic_id
                );
            }
            return;
        }

        // The radio stack drops the GATT database and advertisement with the power
        self.registration = Registration::Unregistered;
        self.value = None;
        if self.advertising {
            self.advertising = false;
            emit(
                &self.observer,
                ObserverEvent::AdvertisingChanged { advertising: false },
            );
        }
        if !self.subscribers.is_empty() {
            self.subscribers.clear();
            self.report_subscribers();
        }
    }

    fn on_service_added(&mut self, result: TransportResult<()>) {
        match result {
            Ok(()) => {
                self.registration = Registration::Registered;
                info!("Service {} registered, ready to advertise", self.descriptor.service_id);
                emit(&self.observer, ObserverEvent::ServiceRegistered);
            }
            Err(reason) => {
                self.registration = Registration::Unregistered;
                error!("Failed to register service: {}", reason);
                emit(
                    &self.observer,
                    ObserverEvent::ServiceRegistrationFailed { reason },
                );
            }
        }
    }

    fn on_advertising_started(&mut self, result: TransportResult<()>) {
        match result {
            Ok(()) => emit(
                &self.observer,
                ObserverEvent::AdvertisingChanged { advertising: true },
            ),
            Err(reason) => {
                error!("Failed to start advertising: {}", reason);
                self.advertising = false;
                emit(
                    &self.observer,
                    ObserverEvent::AdvertisingChanged { advertising: false },
                );
            }
        }
    }

    fn on_write_requests(&mut self, requests: Vec<WriteRequest>) {
        let total = requests.len();
        for (index, request) in requests.into_iter().enumerate() {
            if request.characteristic_id != self.descriptor.characteristic_id {
                self.reject(request);
                if self.config.write_batch_policy == WriteBatchPolicy::AbortOnMismatch {
                    warn!("Abandoning {} remaining write requests", total - index - 1);
                    break;
                }
                continue;
            }

            match request.value {
                Some(value) if !value.is_empty() => {
                    info!("Received {} bytes from {}", value.len(), request.peer_id);
                    emit(
                        &self.observer,
                        ObserverEvent::WriteReceived {
                            peer_id: request.peer_id,
                            message: Message::new(value.clone()),
                        },
                    );
                    self.store_and_notify(value);
                }
                _ => debug!("Empty write from {}", request.peer_id),
            }
            self.respond(request.request_id, AttResponse::Success);
        }
    }

    fn reject(&mut self, request: WriteRequest) {
        warn!(
            "Write for unsupported characteristic {} from {}",
            request.characteristic_id, request.peer_id
        );
        self.respond(request.request_id, AttResponse::RequestNotSupported);
        emit(
            &self.observer,
            ObserverEvent::WriteRejected {
                peer_id: request.peer_id,
                error: MessengerError::RequestUnsupported {
                    characteristic_id: request.characteristic_id,
                },
            },
        );
    }

    fn respond(&mut self, request_id: RequestId, response: AttResponse) {
        self.transport.dispatch(PeripheralCommand::RespondToWrite {
            request_id,
            response,
        });
    }

    fn store_and_notify(&mut self, value: Vec<u8>) {
        self.value = Some(value.clone());
        self.transport.dispatch(PeripheralCommand::NotifySubscribers {
            characteristic_id: self.descriptor.characteristic_id,
            value,
        });
    }

    fn report_subscribers(&self) {
        emit(
            &self.observer,
            ObserverEvent::SubscribersChanged {
                count: self.subscribers.len(),
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{uuid_from_u16, MESSENGER_CHARACTERISTIC_UUID, MESSENGER_SERVICE_UUID};
    use crate::observer::{observer_channel, ObserverReceiver};

    type TestManager = PeripheralManager<Vec<PeripheralCommand>>;

    fn create_manager(config: PeripheralConfig) -> (TestManager, ObserverReceiver) {
        let (observer_tx, observer_rx) = observer_channel();
        let manager = PeripheralManager::new(
            config,
            ServiceDescriptor::default(),
            Vec::new(),
            observer_tx,
        );
        (manager, observer_rx)
    }

    fn registered_manager(config: PeripheralConfig) -> (TestManager, ObserverReceiver) {
        let (mut manager, mut rx) = create_manager(config);
        manager.handle_event(PeripheralEvent::PowerStateChanged(RadioState::PoweredOn));
        manager.handle_event(PeripheralEvent::ServiceAdded {
            service_id: MESSENGER_SERVICE_UUID,
            result: Ok(()),
        });
        manager.transport_mut().clear();
        while rx.try_recv().is_ok() {}
        (manager, rx)
    }

    fn write(request_id: RequestId, characteristic_id: uuid::Uuid, value: &[u8]) -> WriteRequest {
        WriteRequest {
            request_id,
            peer_id: "central-1".into(),
            characteristic_id,
            value: Some(value.to_vec()),
        }
    }

    fn drain(rx: &mut ObserverReceiver) -> Vec<ObserverEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn test_power_on_registers_service() {
        let (mut manager, mut rx) = create_manager(PeripheralConfig::default());
        manager.handle_event(PeripheralEvent::PowerStateChanged(RadioState::PoweredOn));

        assert_eq!(
            manager.transport(),
            &vec![PeripheralCommand::RegisterService(ServiceDescriptor::default())]
        );
        assert_eq!(manager.state(), PeripheralState::PoweredOn);

        manager.handle_event(PeripheralEvent::ServiceAdded {
            service_id: MESSENGER_SERVICE_UUID,
            result: Ok(()),
        });
        assert_eq!(manager.state(), PeripheralState::ServiceRegistered);
        assert_eq!(
            drain(&mut rx),
            vec![
                ObserverEvent::RadioStateChanged(RadioState::PoweredOn),
                ObserverEvent::ServiceRegistered,
            ]
        );
    }

    #[test]
    fn test_advertising_requires_power_and_registration() {
        let (mut manager, _rx) = create_manager(PeripheralConfig::default());
        manager.start_advertising();
        assert!(manager.transport().is_empty());

        manager.handle_event(PeripheralEvent::PowerStateChanged(RadioState::PoweredOn));
        manager.start_advertising();
        assert_eq!(manager.transport().len(), 1);
        assert_eq!(manager.state(), PeripheralState::PoweredOn);
    }

    #[test]
    fn test_start_and_stop_advertising() {
        let (mut manager, _rx) = registered_manager(PeripheralConfig::default());
        manager.start_advertising();
        assert_eq!(manager.state(), PeripheralState::Advertising);

        manager.stop_advertising();
        manager.stop_advertising();
        assert_eq!(manager.state(), PeripheralState::ServiceRegistered);
        assert_eq!(
            manager.transport(),
            &vec![
                PeripheralCommand::StartAdvertising {
                    service_id: MESSENGER_SERVICE_UUID,
                    local_name: "BLE-Peripheral".to_string(),
                },
                PeripheralCommand::StopAdvertising,
            ]
        );
    }

    #[test]
    fn test_matching_write_notifies_and_succeeds() {
        let (mut manager, mut rx) = registered_manager(PeripheralConfig::default());
        manager.handle_event(PeripheralEvent::WriteRequestsReceived(vec![write(
            7,
            MESSENGER_CHARACTERISTIC_UUID,
            b"hello",
        )]));

        assert_eq!(
            manager.transport(),
            &vec![
                PeripheralCommand::NotifySubscribers {
                    characteristic_id: MESSENGER_CHARACTERISTIC_UUID,
                    value: b"hello".to_vec(),
                },
                PeripheralCommand::RespondToWrite {
                    request_id: 7,
                    response: AttResponse::Success,
                },
            ]
        );
        assert_eq!(manager.current_value(), Some(&b"hello"[..]));
        assert_eq!(
            drain(&mut rx),
            vec![ObserverEvent::WriteReceived {
                peer_id: "central-1".into(),
                message: Message::new(b"hello".to_vec()),
            }]
        );
    }

    #[test]
    fn test_mismatched_write_rejected_without_side_effects() {
        let (mut manager, mut rx) = registered_manager(PeripheralConfig::default());
        let foreign = uuid_from_u16(0x2A00);
        manager.handle_event(PeripheralEvent::WriteRequestsReceived(vec![write(
            1, foreign, b"nope",
        )]));

        assert_eq!(
            manager.transport(),
            &vec![PeripheralCommand::RespondToWrite {
                request_id: 1,
                response: AttResponse::RequestNotSupported,
            }]
        );
        assert_eq!(manager.current_value(), None);
        assert_eq!(
            drain(&mut rx),
            vec![ObserverEvent::WriteRejected {
                peer_id: "central-1".into(),
                error: MessengerError::RequestUnsupported {
                    characteristic_id: foreign
                },
            }]
        );
    }

    #[test]
    fn test_batch_handles_requests_independently() {
        let (mut manager, _rx) = registered_manager(PeripheralConfig::default());
        manager.handle_event(PeripheralEvent::WriteRequestsReceived(vec![
            write(1, uuid_from_u16(0x2A00), b"bad"),
            write(2, MESSENGER_CHARACTERISTIC_UUID, b"good"),
        ]));

        let responses: Vec<_> = manager
            .transport()
            .iter()
            .filter_map(|c| match c {
                PeripheralCommand::RespondToWrite {
                    request_id,
                    response,
                } => Some((*request_id, *response)),
                _ => None,
            })
            .collect();
        assert_eq!(
            responses,
            vec![(1, AttResponse::RequestNotSupported), (2, AttResponse::Success)]
        );
        assert_eq!(manager.current_value(), Some(&b"good"[..]));
    }

    #[test]
    fn test_abort_policy_stops_at_first_mismatch() {
        let config =
            PeripheralConfig::new().with_write_batch_policy(WriteBatchPolicy::AbortOnMismatch);
        let (mut manager, _rx) = registered_manager(config);
        manager.handle_event(PeripheralEvent::WriteRequestsReceived(vec![
            write(1, uuid_from_u16(0x2A00), b"bad"),
            write(2, MESSENGER_CHARACTERISTIC_UUID, b"good"),
        ]));

        assert_eq!(
            manager.transport(),
            &vec![PeripheralCommand::RespondToWrite {
                request_id: 1,
                response: AttResponse::RequestNotSupported,
            }]
        );
        assert_eq!(manager.current_value(), None);
    }

    #[test]
    fn test_empty_write_succeeds_without_notify() {
        let (mut manager, _rx) = registered_manager(PeripheralConfig::default());
        let mut request = write(3, MESSENGER_CHARACTERISTIC_UUID, b"");
        manager.handle_event(PeripheralEvent::WriteRequestsReceived(vec![request.clone()]));
        request.request_id = 4;
        request.value = None;
        manager.handle_event(PeripheralEvent::WriteRequestsReceived(vec![request]));

        assert_eq!(
            manager.transport(),
            &vec![
                PeripheralCommand::RespondToWrite {
                    request_id: 3,
                    response: AttResponse::Success,
                },
                PeripheralCommand::RespondToWrite {
                    request_id: 4,
                    response: AttResponse::Success,
                },
            ]
        );
    }

    #[test]
    fn test_write_before_registration_rejected() {
        let (mut manager, _rx) = create_manager(PeripheralConfig::default());
        manager.handle_event(PeripheralEvent::PowerStateChanged(RadioState::PoweredOn));
        manager.transport_mut().clear();
        manager.handle_event(PeripheralEvent::WriteRequestsReceived(vec![write(
            5,
            MESSENGER_CHARACTERISTIC_UUID,
            b"early",
        )]));

        assert_eq!(
            manager.transport(),
            &vec![PeripheralCommand::RespondToWrite {
                request_id: 5,
                response: AttResponse::RequestNotSupported,
            }]
        );
    }

    #[test]
    fn test_subscriber_tracking() {
        let (mut manager, mut rx) = registered_manager(PeripheralConfig::default());
        let subscriber = SubscriberId("central-1".into());
        manager.handle_event(PeripheralEvent::SubscriberAdded {
            subscriber: subscriber.clone(),
        });
        manager.handle_event(PeripheralEvent::SubscriberAdded {
            subscriber: subscriber.clone(),
        });
        assert_eq!(manager.subscriber_count(), 1);

        manager.handle_event(PeripheralEvent::SubscriberRemoved { subscriber });
        assert_eq!(manager.subscriber_count(), 0);
        assert_eq!(
            drain(&mut rx),
            vec![
                ObserverEvent::SubscribersChanged { count: 1 },
                ObserverEvent::SubscribersChanged { count: 1 },
                ObserverEvent::SubscribersChanged { count: 0 },
            ]
        );
    }

    #[test]
    fn test_registration_failure_reported() {
        let (mut manager, mut rx) = create_manager(PeripheralConfig::default());
        manager.handle_event(PeripheralEvent::PowerStateChanged(RadioState::PoweredOn));
        manager.handle_event(PeripheralEvent::ServiceAdded {
            service_id: MESSENGER_SERVICE_UUID,
            result: Err("busy".into()),
        });

        assert_eq!(manager.state(), PeripheralState::PoweredOn);
        assert_eq!(
            drain(&mut rx).last(),
            Some(&ObserverEvent::ServiceRegistrationFailed {
                reason: "busy".into()
            })
        );
    }

    #[test]
    fn test_power_off_resets_registration() {
        let (mut manager, _rx) = registered_manager(PeripheralConfig::default());
        manager.start_advertising();
        manager.handle_event(PeripheralEvent::PowerStateChanged(RadioState::PoweredOff));
        assert_eq!(manager.state(), PeripheralState::PoweredOff);

        manager.handle_event(PeripheralEvent::PowerStateChanged(RadioState::PoweredOn));
        assert_eq!(manager.state(), PeripheralState::PoweredOn);
        assert_eq!(
            manager.transport().last(),
            Some(&PeripheralCommand::RegisterService(ServiceDescriptor::default()))
        );
    }

    #[test]
    fn test_send_notification_requires_registration() {
        let (mut manager, _rx) = create_manager(PeripheralConfig::default());
        assert!(matches!(
            manager.send_notification(b"hi".to_vec()),
            Err(MessengerError::RadioUnavailable { .. })
        ));

        manager.handle_event(PeripheralEvent::PowerStateChanged(RadioState::PoweredOn));
        assert_eq!(
            manager.send_notification(b"hi".to_vec()),
            Err(MessengerError::ServiceNotRegistered)
        );

        let (mut manager, _rx) = registered_manager(PeripheralConfig::default());
        manager.send_notification(b"hi".to_vec()).unwrap();
        assert_eq!(
            manager.transport(),
            &vec![PeripheralCommand::NotifySubscribers {
                characteristic_id: MESSENGER_CHARACTERISTIC_UUID,
                value: b"hi".to_vec(),
            }]
        );
    }

    #[test]
    fn test_advertising_failure_reverts_to_registered() {
        let (mut manager, mut rx) = registered_manager(PeripheralConfig::default());
        manager.start_advertising();
        manager.handle_event(PeripheralEvent::AdvertisingStarted {
            result: Err("advertisement rejected".into()),
        });

        assert_eq!(manager.state(), PeripheralState::ServiceRegistered);
        assert_eq!(
            drain(&mut rx),
            vec![ObserverEvent::AdvertisingChanged { advertising: false }]
        );
    }
}
