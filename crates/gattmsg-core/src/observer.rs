//! Observer contract
//!
//! Managers report through an unbounded channel of [`ObserverEvent`]s. The
//! receiving side calls [`ObserverEvent::deliver`] on whatever task owns the
//! observer, so observers never run on a manager's task.

use tokio::sync::mpsc;

use crate::error::MessengerError;
use crate::message::Message;
use crate::peer::PeerId;
use crate::transport::RadioState;

/// Everything a role manager reports to the outside
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObserverEvent {
    RadioStateChanged(RadioState),

    // Central role
    ScanFailed {
        reason: String,
    },
    PeerDiscovered {
        peer_id: PeerId,
        name: Option<String>,
        rssi: Option<i16>,
    },
    Connected {
        peer_id: PeerId,
    },
    ConnectFailed {
        peer_id: PeerId,
        error: MessengerError,
    },
    /// Service and characteristic resolved, notifications enabled
    Subscribed {
        peer_id: PeerId,
    },
    /// Connected peer does not run the messenger service
    DiscoveryFailed {
        peer_id: PeerId,
        error: MessengerError,
    },
    MessageReceived {
        peer_id: PeerId,
        message: Message,
    },
    MessageSent {
        peer_id: PeerId,
    },
    SendFailed {
        peer_id: PeerId,
        error: MessengerError,
    },
    Disconnected {
        peer_id: PeerId,
        reason: Option<String>,
    },

    // Peripheral role
    ServiceRegistered,
    ServiceRegistrationFailed {
        reason: String,
    },
    AdvertisingChanged {
        advertising: bool,
    },
    WriteReceived {
        peer_id: PeerId,
        message: Message,
    },
    WriteRejected {
        peer_id: PeerId,
        error: MessengerError,
    },
    SubscribersChanged {
        count: usize,
    },
}

impl ObserverEvent {
    /// Route this event to the matching observer callback
    pub fn deliver<O: Observer + ?Sized>(self, observer: &mut O) {
        match &self {
            ObserverEvent::PeerDiscovered {
                peer_id,
                name,
                rssi,
            } => observer.on_peer_discovered(peer_id, name.as_deref(), *rssi),
            ObserverEvent::Connected { peer_id } => observer.on_connected(peer_id),
            ObserverEvent::ConnectFailed { peer_id, error } => {
                observer.on_connect_failed(peer_id, error)
            }
            ObserverEvent::MessageReceived { peer_id, message } => {
                observer.on_message_received(peer_id, message)
            }
            _ => observer.on_event(&self),
        }
    }
}

/// Callbacks for UI or logging collaborators
pub trait Observer {
    fn on_peer_discovered(&mut self, peer_id: &PeerId, name: Option<&str>, rssi: Option<i16>);

    fn on_connected(&mut self, peer_id: &PeerId);

    fn on_connect_failed(&mut self, peer_id: &PeerId, error: &MessengerError);

    fn on_message_received(&mut self, peer_id: &PeerId, message: &Message);

    /// Any report without a dedicated callback
    fn on_event(&mut self, _event: &ObserverEvent) {}
}

pub type ObserverSender = mpsc::UnboundedSender<ObserverEvent>;
pub type ObserverReceiver = mpsc::UnboundedReceiver<ObserverEvent>;

pub fn observer_channel() -> (ObserverSender, ObserverReceiver) {
    mpsc::unbounded_channel()
}

/// Emit helper shared by both managers; a dropped observer is not an error
pub(crate) fn emit(sender: &ObserverSender, event: ObserverEvent) {
    if sender.send(event).is_err() {
        tracing::trace!("Observer channel closed, report dropped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        calls: Vec<String>,
    }

    impl Observer for Recorder {
        fn on_peer_discovered(&mut self, peer_id: &PeerId, name: Option<&str>, rssi: Option<i16>) {
            self.calls
                .push(format!("discovered {} {:?} {:?}", peer_id, name, rssi));
        }

        fn on_connected(&mut self, peer_id: &PeerId) {
            self.calls.push(format!("connected {}", peer_id));
        }

        fn on_connect_failed(&mut self, peer_id: &PeerId, _error: &MessengerError) {
            self.calls.push(format!("failed {}", peer_id));
        }

        fn on_message_received(&mut self, _peer_id: &PeerId, message: &Message) {
            self.calls.push(format!("message {:?}", message.as_bytes()));
        }

        fn on_event(&mut self, event: &ObserverEvent) {
            self.calls.push(format!("other {:?}", event));
        }
    }

    #[test]
    fn test_deliver_routes_to_callbacks() {
        let mut recorder = Recorder::default();
        ObserverEvent::PeerDiscovered {
            peer_id: "X".into(),
            name: Some("Peer-A".into()),
            rssi: Some(-40),
        }
        .deliver(&mut recorder);
        ObserverEvent::MessageReceived {
            peer_id: "X".into(),
            message: Message::new(b"hello".to_vec()),
        }
        .deliver(&mut recorder);
        ObserverEvent::ServiceRegistered.deliver(&mut recorder);

        assert_eq!(recorder.calls.len(), 3);
        assert_eq!(recorder.calls[0], "discovered X Some(\"Peer-A\") Some(-40)");
        assert_eq!(recorder.calls[1], format!("message {:?}", b"hello"));
        assert!(recorder.calls[2].starts_with("other ServiceRegistered"));
    }
}
