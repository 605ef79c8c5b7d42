//! Connection health tracking.
//!
//! One [`HealthMonitor`] owns a record per live connection, created on
//! connect and dropped on disconnect. Records only accumulate raw samples;
//! the healthy/degraded/stale status is computed at read time from the
//! caller's `now` and the [`MeshPolicy`] thresholds, so classification is a
//! pure function of recorded inputs.

use dashmap::DashMap;
use plexus_core::types::{Connection, ConnectionHealthSummary, ConnectionStatus, PeerId, TimestampMs, UserId};
use tracing::debug;

use crate::config::MeshPolicy;

#[derive(Debug, Clone)]
struct ConnectionRecord {
    user_id: Option<UserId>,
    connected_at: TimestampMs,
    last_activity: Option<TimestampMs>,
    rtt_sum: f64,
    rtt_count: u64,
    failed_probes: u64,
    last_seen_at: TimestampMs,
}

impl ConnectionRecord {
    fn avg_rtt_ms(&self) -> Option<f64> {
        (self.rtt_count > 0).then(|| self.rtt_sum / self.rtt_count as f64)
    }

    /// `failed / (succeeded + failed)`; a successful probe is an RTT sample.
    fn packet_loss(&self) -> f64 {
        let total = self.rtt_count + self.failed_probes;
        if total == 0 {
            0.0
        } else {
            self.failed_probes as f64 / total as f64
        }
    }

    fn classify(&self, now: TimestampMs, policy: &MeshPolicy) -> ConnectionStatus {
        let reference = self.last_activity.unwrap_or(self.connected_at);
        if now.saturating_sub(reference) > policy.stale_after_ms {
            return ConnectionStatus::Stale;
        }
        let slow = self.avg_rtt_ms().is_some_and(|rtt| rtt > policy.degraded_rtt_ms);
        if slow || self.packet_loss() > policy.degraded_packet_loss {
            ConnectionStatus::Degraded
        } else {
            ConnectionStatus::Healthy
        }
    }
}

/// Per-connection health state. Safe to share; each peer's record is locked
/// independently.
pub struct HealthMonitor {
    connections: DashMap<PeerId, ConnectionRecord>,
    policy: MeshPolicy,
}

impl HealthMonitor {
    pub fn new(policy: MeshPolicy) -> Self {
        Self {
            connections: DashMap::new(),
            policy,
        }
    }

    pub fn policy(&self) -> &MeshPolicy {
        &self.policy
    }

    /// Start tracking `peer`. Reopening an existing connection resets its record.
    pub fn connection_opened(&self, peer: &PeerId, user_id: Option<UserId>, now: TimestampMs) {
        let record = ConnectionRecord {
            user_id,
            connected_at: now,
            last_activity: None,
            rtt_sum: 0.0,
            rtt_count: 0,
            failed_probes: 0,
            last_seen_at: now,
        };
        if self.connections.insert(peer.clone(), record).is_some() {
            debug!(%peer, "health: connection reopened; record reset");
        } else {
            debug!(%peer, "health: connection opened");
        }
    }

    /// Stop tracking `peer`. Returns `false` if it was not tracked.
    pub fn connection_closed(&self, peer: &PeerId) -> bool {
        let removed = self.connections.remove(peer).is_some();
        debug!(%peer, removed, "health: connection closed");
        removed
    }

    /// Fold an RTT sample into the running mean. Does not count as activity.
    pub fn record_sample(&self, peer: &PeerId, rtt_ms: f64, now: TimestampMs) {
        if !rtt_ms.is_finite() || rtt_ms < 0.0 {
            debug!(%peer, rtt_ms, "health: ignoring invalid rtt sample");
            return;
        }
        match self.connections.get_mut(peer) {
            Some(mut rec) => {
                rec.rtt_sum += rtt_ms;
                rec.rtt_count += 1;
                rec.last_seen_at = rec.last_seen_at.max(now);
            }
            None => debug!(%peer, "health: rtt sample for unknown peer ignored"),
        }
    }

    /// Mark application-level activity (a completed handshake or message).
    pub fn record_activity(&self, peer: &PeerId, now: TimestampMs) {
        match self.connections.get_mut(peer) {
            Some(mut rec) => {
                rec.last_activity = Some(rec.last_activity.map_or(now, |t| t.max(now)));
                rec.last_seen_at = rec.last_seen_at.max(now);
            }
            None => debug!(%peer, "health: activity for unknown peer ignored"),
        }
    }

    /// Count a probe that went unanswered.
    pub fn record_probe_failure(&self, peer: &PeerId, now: TimestampMs) {
        match self.connections.get_mut(peer) {
            Some(mut rec) => {
                rec.failed_probes += 1;
                rec.last_seen_at = rec.last_seen_at.max(now);
            }
            None => debug!(%peer, "health: probe failure for unknown peer ignored"),
        }
    }

    pub fn contains(&self, peer: &PeerId) -> bool {
        self.connections.contains_key(peer)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Classify a single connection.
    pub fn status(&self, peer: &PeerId, now: TimestampMs) -> Option<ConnectionStatus> {
        self.connections.get(peer).map(|rec| rec.classify(now, &self.policy))
    }

    /// Every live connection, classified at `now`, sorted by peer id.
    pub fn connections(&self, now: TimestampMs) -> Vec<Connection> {
        let mut out: Vec<Connection> = self
            .connections
            .iter()
            .map(|e| {
                let rec = e.value();
                Connection {
                    peer_id: e.key().clone(),
                    user_id: rec.user_id.clone(),
                    status: rec.classify(now, &self.policy),
                    connected_at: rec.connected_at,
                    last_activity: rec.last_activity,
                    avg_rtt_ms: rec.avg_rtt_ms(),
                    packet_loss: rec.packet_loss(),
                    last_seen_at: rec.last_seen_at,
                }
            })
            .collect();
        out.sort_by(|a, b| a.peer_id.cmp(&b.peer_id));
        out
    }

    /// Aggregate view at `now`.
    pub fn summary(&self, now: TimestampMs) -> ConnectionHealthSummary {
        summarize(&self.connections(now))
    }

    /// Most recent activity across all connections.
    pub fn last_handshake_at(&self) -> Option<TimestampMs> {
        self.connections.iter().filter_map(|e| e.value().last_activity).max()
    }
}

/// Summarize already classified connections.
///
/// Mean RTT is taken over connections that have at least one sample; mean
/// packet loss over all connections.
pub fn summarize(connections: &[Connection]) -> ConnectionHealthSummary {
    let total = connections.len();
    if total == 0 {
        return ConnectionHealthSummary::default();
    }
    let count = |s: ConnectionStatus| connections.iter().filter(|c| c.status == s).count();

    let rtts: Vec<f64> = connections.iter().filter_map(|c| c.avg_rtt_ms).collect();
    let avg_rtt_ms = if rtts.is_empty() {
        0.0
    } else {
        rtts.iter().sum::<f64>() / rtts.len() as f64
    };
    let avg_packet_loss = connections.iter().map(|c| c.packet_loss).sum::<f64>() / total as f64;
    let handshaken = connections.iter().filter(|c| c.last_activity.is_some()).count();

    ConnectionHealthSummary {
        total,
        healthy: count(ConnectionStatus::Healthy),
        degraded: count(ConnectionStatus::Degraded),
        stale: count(ConnectionStatus::Stale),
        avg_rtt_ms,
        avg_packet_loss,
        handshake_confidence: (handshaken as f64 / total as f64).clamp(0.0, 1.0),
    }
}

/// Fraction of connections classified healthy; 0 with no connections.
pub fn strength(summary: &ConnectionHealthSummary) -> f64 {
    if summary.total == 0 {
        0.0
    } else {
        summary.healthy as f64 / summary.total as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIN: u64 = 60_000;

    fn p(id: &str) -> PeerId {
        PeerId::new(id)
    }

    fn monitor() -> HealthMonitor {
        HealthMonitor::new(MeshPolicy::default())
    }

    #[test]
    fn average_rtt_is_running_mean() {
        let hm = monitor();
        hm.connection_opened(&p("a"), None, 1_000);
        hm.record_sample(&p("a"), 40.0, 1_100);
        hm.record_sample(&p("a"), 45.0, 1_200);
        let conns = hm.connections(1_300);
        assert_eq!(conns[0].avg_rtt_ms, Some(42.5));
        assert_eq!(hm.summary(1_300).avg_rtt_ms, 42.5);
    }

    #[test]
    fn old_activity_is_stale_regardless_of_rtt() {
        let hm = monitor();
        let t0 = 10 * MIN;
        hm.connection_opened(&p("a"), None, t0);
        hm.record_activity(&p("a"), t0);
        hm.record_sample(&p("a"), 5.0, t0 + 6 * MIN);
        assert_eq!(hm.status(&p("a"), t0 + 6 * MIN), Some(ConnectionStatus::Stale));
    }

    #[test]
    fn staleness_measured_from_connect_without_activity() {
        let hm = monitor();
        hm.connection_opened(&p("a"), None, 0);
        assert_eq!(hm.status(&p("a"), 5 * MIN), Some(ConnectionStatus::Healthy));
        assert_eq!(hm.status(&p("a"), 5 * MIN + 1), Some(ConnectionStatus::Stale));
    }

    #[test]
    fn high_rtt_is_degraded() {
        let hm = monitor();
        hm.connection_opened(&p("a"), None, 0);
        hm.record_activity(&p("a"), 0);
        hm.record_sample(&p("a"), 900.0, 10);
        assert_eq!(hm.status(&p("a"), 20), Some(ConnectionStatus::Degraded));
    }

    #[test]
    fn probe_failures_raise_packet_loss_and_degrade() {
        let hm = monitor();
        hm.connection_opened(&p("a"), None, 0);
        hm.record_activity(&p("a"), 0);
        hm.record_sample(&p("a"), 20.0, 1);
        hm.record_probe_failure(&p("a"), 2);
        let conn = &hm.connections(3)[0];
        assert_eq!(conn.packet_loss, 0.5);
        assert_eq!(conn.status, ConnectionStatus::Degraded);
    }

    #[test]
    fn unknown_peer_samples_ignored() {
        let hm = monitor();
        hm.record_sample(&p("ghost"), 10.0, 1);
        hm.record_activity(&p("ghost"), 1);
        hm.record_probe_failure(&p("ghost"), 1);
        assert!(hm.is_empty());
    }

    #[test]
    fn close_removes_record() {
        let hm = monitor();
        hm.connection_opened(&p("a"), Some(UserId::new("u")), 0);
        assert!(hm.connection_closed(&p("a")));
        assert!(!hm.connection_closed(&p("a")));
        assert_eq!(hm.summary(1).total, 0);
    }

    #[test]
    fn summary_counts_and_confidence() {
        let hm = monitor();
        hm.connection_opened(&p("a"), None, 0);
        hm.connection_opened(&p("b"), None, 0);
        hm.connection_opened(&p("c"), None, 0);
        hm.record_activity(&p("a"), 10);
        hm.record_activity(&p("b"), 20);
        hm.record_sample(&p("b"), 800.0, 20);

        let s = hm.summary(100);
        assert_eq!(s.total, 3);
        assert_eq!(s.healthy, 2);
        assert_eq!(s.degraded, 1);
        assert_eq!(s.stale, 0);
        assert!((s.handshake_confidence - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(s.avg_rtt_ms, 800.0, "mean over sampled connections only");
        assert!((strength(&s) - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn last_handshake_is_latest_activity() {
        let hm = monitor();
        assert_eq!(hm.last_handshake_at(), None);
        hm.connection_opened(&p("a"), None, 0);
        assert_eq!(hm.last_handshake_at(), None);
        hm.record_activity(&p("a"), 50);
        hm.connection_opened(&p("b"), None, 0);
        hm.record_activity(&p("b"), 70);
        assert_eq!(hm.last_handshake_at(), Some(70));
    }

    #[test]
    fn connections_sorted_by_peer() {
        let hm = monitor();
        for id in ["c", "a", "b"] {
            hm.connection_opened(&p(id), None, 0);
        }
        let ids: Vec<_> = hm.connections(1).into_iter().map(|c| c.peer_id).collect();
        assert_eq!(ids, vec![p("a"), p("b"), p("c")]);
    }

    #[test]
    fn empty_summary_is_zeroed() {
        let s = monitor().summary(1);
        assert_eq!(s, ConnectionHealthSummary::default());
        assert_eq!(strength(&s), 0.0);
    }

    #[test]
    fn custom_policy_thresholds_apply() {
        let hm = HealthMonitor::new(MeshPolicy { degraded_rtt_ms: 30.0, ..MeshPolicy::default() });
        hm.connection_opened(&p("a"), None, 0);
        hm.record_activity(&p("a"), 0);
        hm.record_sample(&p("a"), 40.0, 1);
        assert_eq!(hm.status(&p("a"), 2), Some(ConnectionStatus::Degraded));
    }
}
