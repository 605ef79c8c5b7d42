//! Rendezvous discovery tracking and the sync round state machine.
//!
//! ```text
//! Idle ──StartRound──▶ Attempting{started_at}
//!                        │ success          │ failure / timeout
//!                        ▼                  ▼
//!                   Succeeded{at}       Failed{at}
//!                        │ refresh due      │
//!                        ▼                  ▼
//!                       Idle          Backoff{until} ──expired──▶ Idle
//! ```
//!
//! [`RendezvousTracker::poll`] drives the machine from the caller's clock and
//! returns the [`SyncAction`] to take. Reaching the failure-streak ceiling
//! auto-disables the mesh, but rounds keep being retried after backoff; the
//! first success clears the streak and re-enables it. An operator disable
//! stops all rounds until an explicit re-enable.

use std::sync::Arc;

use plexus_core::error::DiscoveryFailure;
use plexus_core::types::{DisabledReason, RendezvousView, TimestampMs};
use tracing::{debug, info, warn};

use crate::config::MeshPolicy;
use crate::stats::StatsRecorder;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Idle,
    Attempting { started_at: TimestampMs },
    Succeeded { at: TimestampMs },
    Failed { at: TimestampMs },
    Backoff { until: TimestampMs },
}

/// What the caller should do after [`RendezvousTracker::poll`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncAction {
    /// Begin a discovery round now and report it with [`RendezvousTracker::attempt`].
    StartRound,
    /// Nothing to do before `until`.
    Wait { until: TimestampMs },
    /// The in-flight round exceeded the sync timeout and was counted as failed.
    TimedOut { elapsed_ms: u64 },
    /// The operator disabled the mesh.
    Disabled,
}

/// Plain-data export of the tracker, consumed by the snapshot builder.
#[derive(Debug, Clone, PartialEq)]
pub struct RendezvousState {
    pub disabled_reason: Option<DisabledReason>,
    pub attempts: u64,
    pub successes: u64,
    pub failures: u64,
    pub success_rate: f64,
    pub peer_count: usize,
    pub failure_streak: u32,
    pub last_sync: Option<TimestampMs>,
    pub last_beacon_latency_ms: Option<u64>,
    pub sync: SyncState,
}

impl RendezvousState {
    pub fn enabled(&self) -> bool {
        self.disabled_reason.is_none()
    }

    /// The dashboard view. A disabled mesh reports no rate, peers, sync time
    /// or beacon latency; only the failure streak survives.
    pub fn view(&self) -> RendezvousView {
        if !self.enabled() {
            return RendezvousView {
                enabled: false,
                disabled_reason: self.disabled_reason,
                failure_streak: self.failure_streak,
                ..RendezvousView::default()
            };
        }
        RendezvousView {
            enabled: true,
            disabled_reason: None,
            success_rate: self.success_rate,
            peer_count: self.peer_count,
            failure_streak: self.failure_streak,
            last_sync: self.last_sync,
            last_beacon_latency_ms: self.last_beacon_latency_ms,
        }
    }
}

pub struct RendezvousTracker {
    policy: MeshPolicy,
    refresh_interval_ms: u64,
    stats: Arc<StatsRecorder>,
    state: SyncState,
    attempts: u64,
    successes: u64,
    failures: u64,
    failure_streak: u32,
    peer_count: usize,
    last_sync: Option<TimestampMs>,
    last_beacon_latency_ms: Option<u64>,
    manually_disabled: bool,
}

impl RendezvousTracker {
    pub fn new(policy: MeshPolicy, refresh_interval_ms: u64, stats: Arc<StatsRecorder>) -> Self {
        Self {
            policy,
            refresh_interval_ms,
            stats,
            state: SyncState::Idle,
            attempts: 0,
            successes: 0,
            failures: 0,
            failure_streak: 0,
            peer_count: 0,
            last_sync: None,
            last_beacon_latency_ms: None,
            manually_disabled: false,
        }
    }

    /// A discovery round started.
    pub fn attempt(&mut self, now: TimestampMs) {
        self.attempts += 1;
        self.state = SyncState::Attempting { started_at: now };
        self.stats.rendezvous_attempt();
        debug!(attempts = self.attempts, "rendezvous: round started");
    }

    /// The current round found `peer_count` peers.
    pub fn success(&mut self, peer_count: usize, latency_ms: u64, now: TimestampMs) {
        let was_auto_disabled = self.failure_streak >= self.policy.failure_streak_ceiling;
        self.successes += 1;
        self.failure_streak = 0;
        self.peer_count = peer_count;
        self.last_sync = Some(now);
        self.last_beacon_latency_ms = Some(latency_ms);
        self.state = SyncState::Succeeded { at: now };
        self.stats.rendezvous_success(latency_ms);
        if was_auto_disabled {
            info!(peer_count, "rendezvous: mesh re-enabled after successful retry");
        } else {
            debug!(peer_count, latency_ms, "rendezvous: round succeeded");
        }
    }

    /// The current round failed. Returns `true` if this failure just reached
    /// the streak ceiling and auto-disabled the mesh.
    pub fn failure(&mut self, now: TimestampMs, reason: &DiscoveryFailure) -> bool {
        self.failures += 1;
        self.failure_streak = self.failure_streak.saturating_add(1);
        self.state = SyncState::Failed { at: now };
        self.stats.rendezvous_failure(self.failure_streak);
        let tripped = self.failure_streak == self.policy.failure_streak_ceiling;
        if tripped {
            warn!(streak = self.failure_streak, %reason, "rendezvous: failure ceiling reached; mesh auto-disabled");
        } else {
            debug!(streak = self.failure_streak, %reason, "rendezvous: round failed");
        }
        tripped
    }

    /// Advance the state machine to `now`.
    pub fn poll(&mut self, now: TimestampMs) -> SyncAction {
        if self.manually_disabled {
            return SyncAction::Disabled;
        }
        loop {
            match self.state {
                SyncState::Idle => return SyncAction::StartRound,
                SyncState::Attempting { started_at } => {
                    let elapsed_ms = now.saturating_sub(started_at);
                    if elapsed_ms > self.policy.sync_timeout_ms {
                        self.failure(now, &DiscoveryFailure::Timeout { elapsed_ms });
                        return SyncAction::TimedOut { elapsed_ms };
                    }
                    return SyncAction::Wait {
                        until: started_at.saturating_add(self.policy.sync_timeout_ms),
                    };
                }
                SyncState::Succeeded { at } => {
                    let due = at.saturating_add(self.refresh_interval_ms);
                    if now < due {
                        return SyncAction::Wait { until: due };
                    }
                    self.state = SyncState::Idle;
                }
                SyncState::Failed { at } => {
                    let until = at.saturating_add(self.backoff_delay_ms());
                    debug!(until, streak = self.failure_streak, "rendezvous: backing off");
                    self.state = SyncState::Backoff { until };
                }
                SyncState::Backoff { until } => {
                    if now < until {
                        return SyncAction::Wait { until };
                    }
                    self.state = SyncState::Idle;
                }
            }
        }
    }

    /// `min(base * 2^(streak - 1), max)`; zero with no failures.
    pub fn backoff_delay_ms(&self) -> u64 {
        if self.failure_streak == 0 {
            return 0;
        }
        let shift = (self.failure_streak - 1).min(63);
        let factor = 1u64.checked_shl(shift).unwrap_or(u64::MAX);
        self.policy
            .backoff_base_ms
            .saturating_mul(factor)
            .min(self.policy.backoff_max_ms)
    }

    pub fn success_rate(&self) -> f64 {
        if self.attempts == 0 {
            0.0
        } else {
            (self.successes as f64 / self.attempts as f64).clamp(0.0, 1.0)
        }
    }

    /// Operator toggle. Re-enabling clears the failure streak and schedules an
    /// immediate round.
    pub fn set_enabled(&mut self, enabled: bool) {
        if enabled {
            if self.manually_disabled || self.failure_streak > 0 {
                info!("rendezvous: mesh enabled by operator");
            }
            self.manually_disabled = false;
            self.failure_streak = 0;
            self.stats.reset_failure_streak();
            self.state = SyncState::Idle;
        } else if !self.manually_disabled {
            info!("rendezvous: mesh disabled by operator");
            self.manually_disabled = true;
        }
    }

    pub fn disabled_reason(&self) -> Option<DisabledReason> {
        if self.manually_disabled {
            Some(DisabledReason::Manual)
        } else if self.failure_streak >= self.policy.failure_streak_ceiling {
            Some(DisabledReason::Failure)
        } else {
            None
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.disabled_reason().is_none()
    }

    pub fn sync_state(&self) -> SyncState {
        self.state
    }

    pub fn failure_streak(&self) -> u32 {
        self.failure_streak
    }

    pub fn state(&self) -> RendezvousState {
        RendezvousState {
            disabled_reason: self.disabled_reason(),
            attempts: self.attempts,
            successes: self.successes,
            failures: self.failures,
            success_rate: self.success_rate(),
            peer_count: self.peer_count,
            failure_streak: self.failure_streak,
            last_sync: self.last_sync,
            last_beacon_latency_ms: self.last_beacon_latency_ms,
            sync: self.state,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> RendezvousTracker {
        RendezvousTracker::new(MeshPolicy::default(), 60_000, Arc::new(StatsRecorder::new(0)))
    }

    fn fail(t: &mut RendezvousTracker, now: TimestampMs) -> bool {
        t.attempt(now);
        t.failure(now, &DiscoveryFailure::NoBeacons)
    }

    #[test]
    fn success_rate_guards_zero_attempts() {
        assert_eq!(tracker().success_rate(), 0.0);
    }

    #[test]
    fn success_rate_three_of_four() {
        let mut t = tracker();
        for i in 0..3 {
            t.attempt(i);
            t.success(2, 50, i);
        }
        fail(&mut t, 10);
        assert_eq!(t.success_rate(), 0.75);
    }

    #[test]
    fn last_sync_only_moves_on_success() {
        let mut t = tracker();
        t.attempt(1);
        t.success(4, 120, 100);
        fail(&mut t, 200);
        let s = t.state();
        assert_eq!(s.last_sync, Some(100));
        assert_eq!(s.last_beacon_latency_ms, Some(120));
        assert_eq!(s.peer_count, 4);
    }

    #[test]
    fn streak_ceiling_auto_disables_and_success_reenables() {
        let mut t = tracker();
        for i in 0..4 {
            assert!(!fail(&mut t, i));
        }
        assert!(t.is_enabled());
        assert!(fail(&mut t, 5));
        assert_eq!(t.disabled_reason(), Some(DisabledReason::Failure));
        assert!(!fail(&mut t, 6), "ceiling is reported once");

        t.attempt(7);
        t.success(1, 10, 7);
        assert!(t.is_enabled());
        assert_eq!(t.failure_streak(), 0);
    }

    #[test]
    fn manual_disable_needs_explicit_enable() {
        let mut t = tracker();
        t.set_enabled(false);
        assert_eq!(t.disabled_reason(), Some(DisabledReason::Manual));
        assert_eq!(t.poll(0), SyncAction::Disabled);
        t.attempt(1);
        t.success(1, 1, 1);
        assert_eq!(t.disabled_reason(), Some(DisabledReason::Manual));
        t.set_enabled(true);
        assert!(t.is_enabled());
    }

    #[test]
    fn idle_starts_round_and_in_flight_waits() {
        let mut t = tracker();
        assert_eq!(t.poll(0), SyncAction::StartRound);
        t.attempt(0);
        assert_eq!(t.poll(1_000), SyncAction::Wait { until: 15_000 });
    }

    #[test]
    fn stuck_round_times_out_as_failure() {
        let mut t = tracker();
        t.attempt(0);
        assert_eq!(t.poll(15_001), SyncAction::TimedOut { elapsed_ms: 15_001 });
        assert_eq!(t.failure_streak(), 1);
        assert_eq!(t.state().failures, 1);
        assert_eq!(t.poll(15_002), SyncAction::Wait { until: 17_001 });
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let mut t = tracker();
        assert_eq!(t.backoff_delay_ms(), 0);
        let expected = [2_000, 4_000, 8_000, 16_000];
        for want in expected {
            fail(&mut t, 0);
            assert_eq!(t.backoff_delay_ms(), want);
        }
        for _ in 0..20 {
            fail(&mut t, 0);
        }
        assert_eq!(t.backoff_delay_ms(), MeshPolicy::default().backoff_max_ms);
    }

    #[test]
    fn backoff_expires_into_new_round() {
        let mut t = tracker();
        fail(&mut t, 1_000);
        assert_eq!(t.poll(2_000), SyncAction::Wait { until: 3_000 });
        assert_eq!(t.poll(3_000), SyncAction::StartRound);
    }

    #[test]
    fn auto_disabled_mesh_still_retries() {
        let mut t = tracker();
        for _ in 0..5 {
            fail(&mut t, 0);
        }
        assert_eq!(t.disabled_reason(), Some(DisabledReason::Failure));
        assert!(matches!(t.poll(0), SyncAction::Wait { .. }));
        assert_eq!(t.poll(u64::MAX / 2), SyncAction::StartRound);
    }

    #[test]
    fn refresh_after_success() {
        let mut t = tracker();
        t.attempt(0);
        t.success(3, 5, 100);
        assert_eq!(t.poll(200), SyncAction::Wait { until: 60_100 });
        assert_eq!(t.poll(60_100), SyncAction::StartRound);
    }

    #[test]
    fn disabled_view_zeroes_rate_and_peers() {
        let mut t = tracker();
        t.attempt(0);
        t.success(3, 5, 100);
        t.set_enabled(false);
        let view = t.state().view();
        assert!(!view.enabled);
        assert_eq!(view.success_rate, 0.0);
        assert_eq!(view.peer_count, 0);
        assert_eq!(view.last_sync, None);
        assert_eq!(view.last_beacon_latency_ms, None);
    }

    #[test]
    fn feeds_shared_stats() {
        let stats = Arc::new(StatsRecorder::new(0));
        let mut t = RendezvousTracker::new(MeshPolicy::default(), 60_000, Arc::clone(&stats));
        t.attempt(0);
        t.failure(1, &DiscoveryFailure::NoBeacons);
        t.attempt(2);
        t.success(1, 33, 3);
        let snap = stats.snapshot();
        assert_eq!(snap.rendezvous_attempts, 2);
        assert_eq!(snap.rendezvous_failures, 1);
        assert_eq!(snap.rendezvous_successes, 1);
        assert_eq!(snap.last_beacon_latency_ms, Some(33));
    }
}
