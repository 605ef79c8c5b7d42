//! Dashboard snapshot assembly.
//!
//! [`build`] is a pure function of a [`SnapshotSource`]: the caller gathers
//! owned copies of every component's state (under read locks) and passes the
//! current time in, so building twice from the same source yields equal
//! snapshots.

use plexus_core::constants::SNAPSHOT_DIAGNOSTICS;
use plexus_core::types::{
    BlocklistEntry, Connection, ConnectionHealthSummary, ConnectionHealthView, ControlFlags, DiagnosticEvent,
    MetricsView, NodeDashboardSnapshot, P2PStats, PeerRecord, PeersView, TimestampMs,
};

use crate::blocklist::partition;
use crate::health::strength;
use crate::rendezvous::RendezvousState;

/// Everything a snapshot is built from.
#[derive(Debug, Clone)]
pub struct SnapshotSource {
    pub now: TimestampMs,
    pub stats: P2PStats,
    pub controls: ControlFlags,
    pub blocklist: Vec<BlocklistEntry>,
    pub pending: Vec<PeerRecord>,
    pub discovered: Vec<PeerRecord>,
    /// Classified at `now`.
    pub connections: Vec<Connection>,
    /// The health monitor's summary at `now`, reported as is.
    pub summary: ConnectionHealthSummary,
    pub last_handshake_at: Option<TimestampMs>,
    pub rendezvous: RendezvousState,
    /// Newest first.
    pub diagnostics: Vec<DiagnosticEvent>,
}

pub fn build(source: &SnapshotSource) -> NodeDashboardSnapshot {
    let enabled = source.rendezvous.enabled();
    let stats = &source.stats;

    let (connection_health, metrics, discovered) = if enabled {
        let summary = source.summary.clone();
        let health = ConnectionHealthView {
            last_handshake_at: source.last_handshake_at,
            strength: strength(&summary),
            packet_loss: summary.avg_packet_loss,
            handshake_confidence: summary.handshake_confidence,
            connections: source.connections.clone(),
            summary,
        };
        let metrics = MetricsView {
            failure_rate: ratio(stats.failed_connection_attempts, stats.connection_attempts),
            rendezvous_success_rate: ratio(stats.rendezvous_successes, stats.rendezvous_attempts),
            avg_packet_loss: health.summary.avg_packet_loss,
            bandwidth_kbps: bandwidth_kbps(stats, source.now),
            time_to_first_peer_ms: stats.time_to_first_peer_ms,
            handshake_confidence: health.summary.handshake_confidence,
        };
        (health, metrics, source.discovered.clone())
    } else {
        // A disabled mesh reports nothing derived from live connections or discovery.
        let health = ConnectionHealthView {
            summary: ConnectionHealthSummary::default(),
            ..ConnectionHealthView::default()
        };
        (health, MetricsView::default(), Vec::new())
    };

    NodeDashboardSnapshot {
        built_at: source.now,
        rendezvous: source.rendezvous.view(),
        connection_health,
        metrics,
        controls: source.controls,
        peers: PeersView {
            pending: source.pending.clone(),
            discovered,
        },
        diagnostics: source.diagnostics.iter().take(SNAPSHOT_DIAGNOSTICS).cloned().collect(),
        blocklist: partition(source.blocklist.clone()),
    }
}

/// `num / den`, 0 when `den` is 0.
fn ratio(num: u64, den: u64) -> f64 {
    if den == 0 {
        0.0
    } else {
        (num as f64 / den as f64).clamp(0.0, 1.0)
    }
}

/// `(up + down) * 8 / 1000 / uptime_secs`, 0 before the first full millisecond of uptime.
fn bandwidth_kbps(stats: &P2PStats, now: TimestampMs) -> f64 {
    let uptime_secs = now.saturating_sub(stats.started_at) as f64 / 1000.0;
    if uptime_secs <= 0.0 {
        return 0.0;
    }
    let bits = stats.bytes_uploaded.saturating_add(stats.bytes_downloaded) as f64 * 8.0;
    bits / 1000.0 / uptime_secs
}

#[cfg(test)]
mod tests {
    use plexus_core::types::{ConnectionStatus, DiagnosticLevel, DisabledReason, Direction, PeerId};

    use super::*;
    use crate::rendezvous::SyncState;

    fn rendezvous(disabled: Option<DisabledReason>) -> RendezvousState {
        RendezvousState {
            disabled_reason: disabled,
            attempts: 4,
            successes: 3,
            failures: 1,
            success_rate: 0.75,
            peer_count: 6,
            failure_streak: 0,
            last_sync: Some(900),
            last_beacon_latency_ms: Some(40),
            sync: SyncState::Idle,
        }
    }

    fn conn(id: &str, rtt: Option<f64>, loss: f64, activity: Option<u64>) -> Connection {
        Connection {
            peer_id: PeerId::new(id),
            user_id: None,
            status: ConnectionStatus::Healthy,
            connected_at: 100,
            last_activity: activity,
            avg_rtt_ms: rtt,
            packet_loss: loss,
            last_seen_at: 100,
        }
    }

    fn source() -> SnapshotSource {
        SnapshotSource {
            now: 11_000,
            stats: P2PStats {
                connection_attempts: 10,
                failed_connection_attempts: 2,
                rendezvous_attempts: 4,
                rendezvous_successes: 3,
                bytes_uploaded: 5_000,
                bytes_downloaded: 7_500,
                time_to_first_peer_ms: Some(320),
                started_at: 1_000,
                ..P2PStats::default()
            },
            controls: ControlFlags::default(),
            blocklist: vec![BlocklistEntry {
                peer_id: PeerId::new("bad"),
                direction: Direction::Inbound,
                reason: None,
                added_at: 5,
            }],
            pending: Vec::new(),
            discovered: vec![PeerRecord { peer_id: PeerId::new("d"), user_id: None, seen_at: 7 }],
            connections: vec![conn("a", Some(40.0), 0.1, Some(500)), conn("b", Some(45.0), 0.0, None)],
            summary: ConnectionHealthSummary {
                total: 2,
                healthy: 2,
                avg_rtt_ms: 42.5,
                avg_packet_loss: 0.05,
                handshake_confidence: 0.5,
                ..ConnectionHealthSummary::default()
            },
            last_handshake_at: Some(500),
            rendezvous: rendezvous(None),
            diagnostics: Vec::new(),
        }
    }

    #[test]
    fn rates_from_counters() {
        let snap = build(&source());
        assert_eq!(snap.metrics.failure_rate, 0.2);
        assert_eq!(snap.metrics.rendezvous_success_rate, 0.75);
        assert_eq!(snap.metrics.time_to_first_peer_ms, Some(320));
        // 12_500 bytes * 8 / 1000 / 10s
        assert_eq!(snap.metrics.bandwidth_kbps, 10.0);
    }

    #[test]
    fn zero_attempts_zero_failure_rate() {
        let mut src = source();
        src.stats.connection_attempts = 0;
        src.stats.failed_connection_attempts = 0;
        assert_eq!(build(&src).metrics.failure_rate, 0.0);
    }

    #[test]
    fn zero_uptime_zero_bandwidth() {
        let mut src = source();
        src.now = src.stats.started_at;
        assert_eq!(build(&src).metrics.bandwidth_kbps, 0.0);
    }

    #[test]
    fn health_summary_derived_from_connections() {
        let snap = build(&source());
        let h = &snap.connection_health;
        assert_eq!(h.summary.total, 2);
        assert_eq!(h.summary.avg_rtt_ms, 42.5);
        assert_eq!(h.handshake_confidence, 0.5);
        assert_eq!(snap.metrics.handshake_confidence, h.summary.handshake_confidence);
        assert_eq!(h.strength, 1.0);
        assert_eq!(h.last_handshake_at, Some(500));
    }

    #[test]
    fn summary_reported_as_given() {
        let mut src = source();
        src.summary.handshake_confidence = 0.25;
        src.summary.avg_packet_loss = 0.3;
        let snap = build(&src);
        assert_eq!(snap.connection_health.handshake_confidence, 0.25);
        assert_eq!(snap.metrics.handshake_confidence, 0.25);
        assert_eq!(snap.connection_health.packet_loss, 0.3);
        assert_eq!(snap.metrics.avg_packet_loss, 0.3);
        assert_eq!(snap.connection_health.summary, src.summary);
    }

    #[test]
    fn disabled_mesh_zeroes_derived_fields() {
        let mut src = source();
        src.rendezvous = rendezvous(Some(DisabledReason::Manual));
        let snap = build(&src);
        assert!(!snap.rendezvous.enabled);
        assert_eq!(snap.rendezvous.success_rate, 0.0);
        assert_eq!(snap.rendezvous.peer_count, 0);
        assert_eq!(snap.rendezvous.last_sync, None);
        assert_eq!(snap.rendezvous.last_beacon_latency_ms, None);
        assert_eq!(snap.connection_health.summary.total, 0);
        assert!(snap.connection_health.connections.is_empty());
        assert_eq!(snap.connection_health.last_handshake_at, None);
        assert_eq!(snap.metrics.avg_packet_loss, 0.0);
        assert_eq!(snap.metrics.bandwidth_kbps, 0.0);
        assert_eq!(snap.metrics.time_to_first_peer_ms, None);
        assert_eq!(snap.metrics.failure_rate, 0.0);
        assert!(snap.peers.discovered.is_empty());
        // Operator state survives.
        assert_eq!(snap.blocklist.inbound.len(), 1);
    }

    #[test]
    fn build_is_deterministic() {
        let src = source();
        assert_eq!(build(&src), build(&src));
    }

    #[test]
    fn diagnostics_capped() {
        let mut src = source();
        src.diagnostics = (0..SNAPSHOT_DIAGNOSTICS as u64 + 10)
            .map(|i| DiagnosticEvent {
                level: DiagnosticLevel::Info,
                code: format!("c{i}"),
                message: String::new(),
                source: "test".into(),
                timestamp: i,
                context: None,
            })
            .collect();
        let snap = build(&src);
        assert_eq!(snap.diagnostics.len(), SNAPSHOT_DIAGNOSTICS);
        assert_eq!(snap.diagnostics[0].code, "c0");
    }
}
