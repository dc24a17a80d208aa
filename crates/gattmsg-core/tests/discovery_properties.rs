//! Property tests for discovery bookkeeping and write handling

use std::collections::HashMap;

use gattmsg_core::{
    observer_channel, uuid_from_u16, AttResponse, CentralCommand, CentralConfig, CentralEvent,
    CentralManager, CentralState, DiscoveryTable, MessengerError, PeerId, PeripheralCommand,
    PeripheralConfig, PeripheralEvent, PeripheralManager, RadioState, ServiceDescriptor,
    WriteRequest, MESSENGER_CHARACTERISTIC_UUID, MESSENGER_SERVICE_UUID,
};
use proptest::prelude::*;

// ----------------------------------------------------------------------------
// Strategies
// ----------------------------------------------------------------------------

fn sighting() -> impl Strategy<Value = (u8, Option<String>, Option<i16>)> {
    (
        0u8..6,
        proptest::option::of("[a-z]{1,8}"),
        proptest::option::of(-100i16..0),
    )
}

fn write_request() -> impl Strategy<Value = (bool, Vec<u8>)> {
    (any::<bool>(), proptest::collection::vec(any::<u8>(), 0..16))
}

fn central_event() -> impl Strategy<Value = CentralEvent> {
    let peer = (0u8..3).prop_map(|n| PeerId::new(format!("peer-{}", n)));
    prop_oneof![
        Just(CentralEvent::PowerStateChanged(RadioState::PoweredOn)),
        Just(CentralEvent::PowerStateChanged(RadioState::PoweredOff)),
        peer.clone().prop_map(|peer_id| CentralEvent::PeerDiscovered {
            peer_id,
            name: None,
            rssi: Some(-60),
        }),
        peer.clone().prop_map(|peer_id| CentralEvent::Connected { peer_id }),
        peer.clone().prop_map(|peer_id| CentralEvent::Disconnected {
            peer_id,
            reason: None,
        }),
        peer.clone().prop_map(|peer_id| CentralEvent::ServicesDiscovered {
            peer_id,
            result: Ok(vec![MESSENGER_SERVICE_UUID]),
        }),
        peer.prop_map(|peer_id| CentralEvent::CharacteristicsDiscovered {
            peer_id,
            service_id: MESSENGER_SERVICE_UUID,
            result: Ok(vec![gattmsg_core::CharacteristicHandle::new(
                MESSENGER_SERVICE_UUID,
                MESSENGER_CHARACTERISTIC_UUID,
            )]),
        }),
    ]
}

// ----------------------------------------------------------------------------
// Properties
// ----------------------------------------------------------------------------

proptest! {
    #[test]
    fn discovery_table_keeps_one_record_per_peer(
        sightings in proptest::collection::vec(sighting(), 0..40)
    ) {
        let mut table = DiscoveryTable::new();
        let mut first_seen = Vec::new();
        let mut first_name: HashMap<u8, Option<String>> = HashMap::new();
        let mut latest_rssi: HashMap<u8, Option<i16>> = HashMap::new();

        for (id, name, rssi) in sightings {
            table.observe(PeerId::new(format!("peer-{}", id)), name.clone(), rssi);
            if !first_name.contains_key(&id) {
                first_seen.push(id);
                first_name.insert(id, name);
                latest_rssi.insert(id, rssi);
            } else if rssi.is_some() {
                latest_rssi.insert(id, rssi);
            }
        }

        prop_assert_eq!(table.len(), first_seen.len());
        let records = table.records();
        for (record, id) in records.iter().zip(&first_seen) {
            prop_assert_eq!(record.peer_id.as_str(), format!("peer-{}", id));
            prop_assert_eq!(&record.display_name, &first_name[id]);
            prop_assert_eq!(record.last_seen_rssi, latest_rssi[id]);
        }
    }

    #[test]
    fn central_writes_only_when_subscribed(
        events in proptest::collection::vec(central_event(), 0..30),
        connect_after in proptest::collection::vec(any::<bool>(), 30),
    ) {
        let (observer, _rx) = observer_channel();
        let mut manager = CentralManager::new(
            CentralConfig::default(),
            ServiceDescriptor::default(),
            Vec::new(),
            observer,
        );

        for (event, connect) in events.into_iter().zip(connect_after) {
            let target = match &event {
                CentralEvent::PeerDiscovered { peer_id, .. } => Some(peer_id.clone()),
                _ => None,
            };
            manager.handle_event(event);
            if let (true, Some(peer_id)) = (connect, target) {
                let _ = manager.connect(&peer_id);
            }

            let subscribed = manager.state() == CentralState::Subscribed;
            let before = manager.transport().len();
            match manager.send_message(b"probe".to_vec()) {
                Ok(()) => {
                    prop_assert!(subscribed);
                    prop_assert!(matches!(
                        manager.transport().last(),
                        Some(CentralCommand::Write { .. })
                    ), "last transport command is not a Write");
                }
                Err(MessengerError::NotSubscribed { .. }) => {
                    prop_assert!(!subscribed);
                    prop_assert_eq!(manager.transport().len(), before);
                }
                Err(other) => prop_assert!(false, "unexpected error {:?}", other),
            }
        }
    }

    #[test]
    fn every_write_request_gets_one_response(
        batch in proptest::collection::vec(write_request(), 1..12)
    ) {
        let (observer, _rx) = observer_channel();
        let mut manager = PeripheralManager::new(
            PeripheralConfig::default(),
            ServiceDescriptor::default(),
            Vec::new(),
            observer,
        );
        manager.handle_event(PeripheralEvent::PowerStateChanged(RadioState::PoweredOn));
        manager.handle_event(PeripheralEvent::ServiceAdded {
            service_id: MESSENGER_SERVICE_UUID,
            result: Ok(()),
        });
        manager.transport_mut().clear();

        let requests: Vec<WriteRequest> = batch
            .iter()
            .enumerate()
            .map(|(i, (matching, value))| WriteRequest {
                request_id: i as u64,
                peer_id: PeerId::new("central"),
                characteristic_id: if *matching {
                    MESSENGER_CHARACTERISTIC_UUID
                } else {
                    uuid_from_u16(0x2A19)
                },
                value: Some(value.clone()),
            })
            .collect();
        manager.handle_event(PeripheralEvent::WriteRequestsReceived(requests));

        let mut responses = Vec::new();
        let mut notified = Vec::new();
        for command in manager.transport() {
            match command {
                PeripheralCommand::RespondToWrite { request_id, response } => {
                    responses.push((*request_id, *response))
                }
                PeripheralCommand::NotifySubscribers { value, .. } => notified.push(value.clone()),
                other => prop_assert!(false, "unexpected command {:?}", other),
            }
        }

        let expected_responses: Vec<_> = batch
            .iter()
            .enumerate()
            .map(|(i, (matching, _))| {
                let response = if *matching {
                    AttResponse::Success
                } else {
                    AttResponse::RequestNotSupported
                };
                (i as u64, response)
            })
            .collect();
        let expected_notified: Vec<_> = batch
            .iter()
            .filter(|(matching, value)| *matching && !value.is_empty())
            .map(|(_, value)| value.clone())
            .collect();

        prop_assert_eq!(responses, expected_responses);
        prop_assert_eq!(&notified, &expected_notified);
        prop_assert_eq!(manager.current_value(), expected_notified.last().map(Vec::as_slice));
    }
}
