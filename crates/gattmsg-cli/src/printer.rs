//! Console observer
//!
//! Renders manager reports as plain lines for the terminal. Message payloads
//! are decoded as UTF-8 here, lossily; the managers only ever see bytes.

use std::collections::HashSet;
use std::io::Write;

use gattmsg_core::{Message, MessengerError, Observer, ObserverEvent, PeerId};

pub struct ConsolePrinter<W: Write> {
    out: W,
    /// Peers already printed; later sightings only refresh RSSI
    seen: HashSet<PeerId>,
}

impl ConsolePrinter<std::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write> ConsolePrinter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            seen: HashSet::new(),
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn line(&mut self, args: std::fmt::Arguments<'_>) {
        let _ = writeln!(self.out, "{}", args);
        let _ = self.out.flush();
    }
}

fn text(message: &Message) -> String {
    String::from_utf8_lossy(message.as_bytes()).into_owned()
}

impl<W: Write> Observer for ConsolePrinter<W> {
    fn on_peer_discovered(&mut self, peer_id: &PeerId, name: Option<&str>, rssi: Option<i16>) {
        if !self.seen.insert(peer_id.clone()) {
            return;
        }
        let rssi = rssi.map_or_else(|| "?".to_string(), |r| r.to_string());
        self.line(format_args!(
            "found  {}  {}  rssi {}",
            peer_id,
            name.unwrap_or("Unknown device"),
            rssi
        ));
    }

    fn on_connected(&mut self, peer_id: &PeerId) {
        self.line(format_args!("connected to {}", peer_id));
    }

    fn on_connect_failed(&mut self, peer_id: &PeerId, error: &MessengerError) {
        self.line(format_args!("could not connect to {}: {}", peer_id, error));
    }

    fn on_message_received(&mut self, peer_id: &PeerId, message: &Message) {
        self.line(format_args!("<{}> {}", peer_id, text(message)));
    }

    fn on_event(&mut self, event: &ObserverEvent) {
        match event {
            ObserverEvent::RadioStateChanged(state) => {
                self.line(format_args!("radio {}", state))
            }
            ObserverEvent::ScanFailed { reason } => {
                self.line(format_args!("scan failed: {}", reason))
            }
            ObserverEvent::Subscribed { peer_id } => {
                self.line(format_args!("ready to chat with {}", peer_id))
            }
            ObserverEvent::DiscoveryFailed { peer_id, error }
            | ObserverEvent::SendFailed { peer_id, error } => {
                self.line(format_args!("{}: {}", peer_id, error))
            }
            ObserverEvent::Disconnected { peer_id, reason } => match reason {
                Some(reason) => self.line(format_args!("disconnected from {} ({})", peer_id, reason)),
                None => self.line(format_args!("disconnected from {}", peer_id)),
            },
            ObserverEvent::ServiceRegistered => self.line(format_args!("service registered")),
            ObserverEvent::ServiceRegistrationFailed { reason } => {
                self.line(format_args!("service registration failed: {}", reason))
            }
            ObserverEvent::AdvertisingChanged { advertising } => self.line(format_args!(
                "advertising {}",
                if *advertising { "started" } else { "stopped" }
            )),
            ObserverEvent::WriteReceived { peer_id, message } => {
                self.line(format_args!("<{}> {}", peer_id, text(message)))
            }
            ObserverEvent::WriteRejected { peer_id, error } => {
                self.line(format_args!("rejected write from {}: {}", peer_id, error))
            }
            ObserverEvent::SubscribersChanged { count } => {
                self.line(format_args!("{} subscriber(s)", count))
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(events: Vec<ObserverEvent>) -> String {
        let mut printer = ConsolePrinter::new(Vec::new());
        for event in events {
            event.deliver(&mut printer);
        }
        String::from_utf8(printer.into_inner()).unwrap()
    }

    #[test]
    fn test_repeat_sightings_print_once() {
        let sighting = ObserverEvent::PeerDiscovered {
            peer_id: "X".into(),
            name: Some("Peer-A".into()),
            rssi: Some(-50),
        };
        let output = render(vec![sighting.clone(), sighting]);
        assert_eq!(output, "found  X  Peer-A  rssi -50\n");
    }

    #[test]
    fn test_messages_decoded_lossily() {
        let output = render(vec![ObserverEvent::MessageReceived {
            peer_id: "X".into(),
            message: Message::new(vec![b'h', b'i', 0xFF]),
        }]);
        assert_eq!(output, "<X> hi\u{FFFD}\n");
    }

    #[test]
    fn test_peripheral_reports() {
        let output = render(vec![
            ObserverEvent::ServiceRegistered,
            ObserverEvent::AdvertisingChanged { advertising: true },
            ObserverEvent::SubscribersChanged { count: 2 },
        ]);
        assert_eq!(
            output,
            "service registered\nadvertising started\n2 subscriber(s)\n"
        );
    }
}
