//! Shared builders for property and end-to-end tests.

use plexus_core::types::{BlocklistEntry, Connection, ConnectionStatus, Direction, PeerId, TimestampMs};
use plexus_network::{MeshConfig, RendezvousMeshConfig};
use serde_json::{Value, json};

/// A valid mesh config with a single beacon and default policy.
pub fn mesh() -> MeshConfig {
    MeshConfig {
        rendezvous: RendezvousMeshConfig {
            beacons: vec!["wss://beacon.test".to_string()],
            ..RendezvousMeshConfig::default()
        },
        ..MeshConfig::default()
    }
}

pub fn peer(n: usize) -> PeerId {
    PeerId::new(format!("peer-{n}"))
}

pub fn entry(peer_id: &str, direction: Direction, added_at: TimestampMs) -> BlocklistEntry {
    BlocklistEntry {
        peer_id: PeerId::new(peer_id),
        direction,
        reason: None,
        added_at,
    }
}

/// An already classified connection.
pub fn connection(id: &str, rtt: Option<f64>, loss: f64, activity: Option<TimestampMs>) -> Connection {
    Connection {
        peer_id: PeerId::new(id),
        user_id: None,
        status: ConnectionStatus::Healthy,
        connected_at: 1,
        last_activity: activity,
        avg_rtt_ms: rtt,
        packet_loss: loss,
        last_seen_at: 1,
    }
}

/// A `gossip_peers` frame from `from` advertising `peers`.
pub fn gossip(from: &str, ttl: i64, peers: &[&str]) -> Value {
    let peers: Vec<Value> = peers
        .iter()
        .map(|p| json!({ "peerId": p, "lastSeen": 1_700_000_000_000u64, "quality": 0.5 }))
        .collect();
    json!({
        "type": "gossip_peers",
        "from": from,
        "ttl": ttl,
        "timestamp": 1_700_000_000_000u64,
        "peers": peers,
    })
}

pub fn frame(v: &Value) -> Vec<u8> {
    serde_json::to_vec(v).unwrap_or_default()
}
