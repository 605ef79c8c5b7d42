//! Criterion benchmarks for the control plane hot paths.
//!
//! Covers: snapshot building at dashboard scale, health summaries over many
//! connections, and schema validation of a full gossip frame.

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use plexus_core::types::{ControlFlags, DiagnosticLevel, Direction, PeerId};
use plexus_network::protocol::{self, MessageKind};
use plexus_network::snapshot::{build, SnapshotSource};
use plexus_network::{BlocklistStore, DiagnosticsLog, HealthMonitor, MeshPolicy, RendezvousTracker, StatsRecorder};

const NOW: u64 = 1_700_000_000_000;

fn populated_source(peers: usize) -> SnapshotSource {
    let policy = MeshPolicy::default();
    let stats = Arc::new(StatsRecorder::new(NOW - 60_000));
    let health = HealthMonitor::new(policy.clone());
    let mut blocklist = BlocklistStore::new();
    let mut diagnostics = DiagnosticsLog::new(policy.diagnostics_capacity);
    let mut rendezvous = RendezvousTracker::new(policy, 60_000, Arc::clone(&stats));

    for i in 0..peers {
        let peer = PeerId::new(format!("peer-{i:04}"));
        health.connection_opened(&peer, None, NOW - 30_000);
        health.record_activity(&peer, NOW - 1_000);
        health.record_sample(&peer, 20.0 + (i % 50) as f64, NOW - 500);
        stats.connection_attempt();
        stats.connection_succeeded(NOW - 30_000);
        if i % 10 == 0 {
            let _ = blocklist.block(&peer, Direction::Inbound, Some("bench".into()), NOW - i as u64);
        }
    }
    for i in 0..200 {
        diagnostics.record(DiagnosticLevel::Info, "bench.event", format!("event {i}"), "bench", None, NOW);
    }
    rendezvous.attempt(NOW - 5_000);
    rendezvous.success(peers, 42, NOW - 4_900);

    SnapshotSource {
        now: NOW,
        stats: stats.snapshot(),
        controls: ControlFlags::default(),
        blocklist: blocklist.entries(),
        pending: Vec::new(),
        discovered: Vec::new(),
        connections: health.connections(NOW),
        summary: health.summary(NOW),
        last_handshake_at: health.last_handshake_at(),
        rendezvous: rendezvous.state(),
        diagnostics: diagnostics.recent(usize::MAX),
    }
}

fn gossip_frame(peers: usize) -> Vec<u8> {
    let list: Vec<_> = (0..peers)
        .map(|i| serde_json::json!({"peerId": format!("peer-{i}"), "lastSeen": NOW, "quality": 0.5}))
        .collect();
    serde_json::to_vec(&serde_json::json!({
        "type": "gossip_peers",
        "from": "bench",
        "peers": list,
        "ttl": 3,
        "timestamp": NOW,
    }))
    .unwrap()
}

fn bench_snapshot_build(c: &mut Criterion) {
    let small = populated_source(16);
    c.bench_function("snapshot_build_16_peers", |b| b.iter(|| build(black_box(&small))));
    let large = populated_source(512);
    c.bench_function("snapshot_build_512_peers", |b| b.iter(|| build(black_box(&large))));
}

fn bench_health_summary(c: &mut Criterion) {
    let health = HealthMonitor::new(MeshPolicy::default());
    for i in 0..512 {
        let peer = PeerId::new(format!("peer-{i}"));
        health.connection_opened(&peer, None, NOW - 30_000);
        health.record_sample(&peer, 35.0, NOW - 10);
    }
    c.bench_function("health_summary_512", |b| b.iter(|| health.summary(black_box(NOW))));
}

fn bench_validate_gossip(c: &mut Criterion) {
    let frame = gossip_frame(256);
    c.bench_function("validate_gossip_256_peers", |b| {
        b.iter(|| protocol::validate(MessageKind::GossipPeers, black_box(&frame)))
    });
}

criterion_group!(benches, bench_snapshot_build, bench_health_summary, bench_validate_gossip);
criterion_main!(benches);
