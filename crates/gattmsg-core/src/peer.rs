//! Peer identity and the central's discovery table

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

// ----------------------------------------------------------------------------
// Peer Identity
// ----------------------------------------------------------------------------

/// Stable peer identifier assigned by the radio stack (an address on BlueZ,
/// an opaque UUID on CoreBluetooth).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId(String);

impl PeerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for PeerId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// A peer seen during scanning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerRecord {
    pub peer_id: PeerId,
    /// Advertised or GAP name, as first seen
    pub display_name: Option<String>,
    /// Signal strength of the most recent sighting
    pub last_seen_rssi: Option<i16>,
}

impl PeerRecord {
    pub fn new(peer_id: PeerId, display_name: Option<String>, rssi: Option<i16>) -> Self {
        Self {
            peer_id,
            display_name,
            last_seen_rssi: rssi,
        }
    }

    /// Name for display, falling back to a placeholder
    pub fn name_or_unknown(&self) -> &str {
        self.display_name.as_deref().unwrap_or("Unknown device")
    }
}

// ----------------------------------------------------------------------------
// Discovery Table
// ----------------------------------------------------------------------------

/// Identity-keyed set of discovered peers.
///
/// Repeated sightings of the same peer only refresh `last_seen_rssi`. Records
/// are handed out as `Arc`s so a `Connection` can hold the peer identity
/// without borrowing the table; an RSSI refresh copies the record rather
/// than mutating one a connection may be holding.
#[derive(Debug, Default)]
pub struct DiscoveryTable {
    peers: HashMap<PeerId, Arc<PeerRecord>>,
    /// First-seen order, for listing
    order: Vec<PeerId>,
}

impl DiscoveryTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a sighting. Returns the current record and whether it is new.
    pub fn observe(
        &mut self,
        peer_id: PeerId,
        display_name: Option<String>,
        rssi: Option<i16>,
    ) -> (Arc<PeerRecord>, bool) {
        if let Some(record) = self.peers.get_mut(&peer_id) {
            if rssi.is_some() && record.last_seen_rssi != rssi {
                Arc::make_mut(record).last_seen_rssi = rssi;
            }
            return (record.clone(), false);
        }

        let record = Arc::new(PeerRecord::new(peer_id.clone(), display_name, rssi));
        self.order.push(peer_id.clone());
        self.peers.insert(peer_id, record.clone());
        (record, true)
    }

    pub fn get(&self, peer_id: &PeerId) -> Option<Arc<PeerRecord>> {
        self.peers.get(peer_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Records in first-seen order
    pub fn records(&self) -> Vec<Arc<PeerRecord>> {
        self.order
            .iter()
            .filter_map(|peer_id| self.peers.get(peer_id).cloned())
            .collect()
    }

    pub fn clear(&mut self) {
        self.peers.clear();
        self.order.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repeated_sighting_updates_rssi_only() {
        let mut table = DiscoveryTable::new();
        let peer = PeerId::from("X");

        let (_, is_new) = table.observe(peer.clone(), Some("Peer-A".into()), Some(-50));
        assert!(is_new);
        let (record, is_new) = table.observe(peer.clone(), Some("Renamed".into()), Some(-40));
        assert!(!is_new);

        assert_eq!(table.len(), 1);
        assert_eq!(record.last_seen_rssi, Some(-40));
        assert_eq!(record.display_name.as_deref(), Some("Peer-A"));
    }

    #[test]
    fn test_refresh_does_not_touch_shared_record() {
        let mut table = DiscoveryTable::new();
        let (held, _) = table.observe("X".into(), None, Some(-70));
        table.observe("X".into(), None, Some(-30));

        assert_eq!(held.last_seen_rssi, Some(-70));
        assert_eq!(table.get(&"X".into()).and_then(|r| r.last_seen_rssi), Some(-30));
    }

    #[test]
    fn test_records_keep_first_seen_order() {
        let mut table = DiscoveryTable::new();
        table.observe("b".into(), None, None);
        table.observe("a".into(), None, None);
        table.observe("b".into(), None, Some(-10));

        let ids: Vec<_> = table.records().iter().map(|r| r.peer_id.to_string()).collect();
        assert_eq!(ids, vec!["b", "a"]);
    }
}
