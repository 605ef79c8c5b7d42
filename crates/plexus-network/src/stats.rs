//! Raw network counters.
//!
//! Transport callbacks fire from many tasks at once, so every counter is an
//! [`AtomicU64`] and no update takes a lock. Optional values use `u64::MAX`
//! as the "unset" marker. [`StatsRecorder::snapshot`] copies the counters
//! into an owned [`P2PStats`]; the copy is not atomic across fields, which is
//! fine for display but means derived rates may mix adjacent updates.

use std::sync::atomic::{AtomicU64, Ordering};

use plexus_core::types::{P2PStats, TimestampMs};
use tracing::debug;

const UNSET: u64 = u64::MAX;

#[derive(Debug)]
pub struct StatsRecorder {
    started_at: TimestampMs,
    connection_attempts: AtomicU64,
    successful_connections: AtomicU64,
    failed_connection_attempts: AtomicU64,
    rendezvous_attempts: AtomicU64,
    rendezvous_successes: AtomicU64,
    rendezvous_failures: AtomicU64,
    rendezvous_failure_streak: AtomicU64,
    bytes_uploaded: AtomicU64,
    bytes_downloaded: AtomicU64,
    relay_count: AtomicU64,
    ping_count: AtomicU64,
    time_to_first_peer_ms: AtomicU64,
    last_beacon_latency_ms: AtomicU64,
    transport_fallbacks: AtomicU64,
    last_transport_fallback_at: AtomicU64,
}

impl StatsRecorder {
    /// Counters with uptime measured from `started_at`.
    pub fn new(started_at: TimestampMs) -> Self {
        Self {
            started_at,
            connection_attempts: AtomicU64::new(0),
            successful_connections: AtomicU64::new(0),
            failed_connection_attempts: AtomicU64::new(0),
            rendezvous_attempts: AtomicU64::new(0),
            rendezvous_successes: AtomicU64::new(0),
            rendezvous_failures: AtomicU64::new(0),
            rendezvous_failure_streak: AtomicU64::new(0),
            bytes_uploaded: AtomicU64::new(0),
            bytes_downloaded: AtomicU64::new(0),
            relay_count: AtomicU64::new(0),
            ping_count: AtomicU64::new(0),
            time_to_first_peer_ms: AtomicU64::new(UNSET),
            last_beacon_latency_ms: AtomicU64::new(UNSET),
            transport_fallbacks: AtomicU64::new(0),
            last_transport_fallback_at: AtomicU64::new(UNSET),
        }
    }

    pub fn started_at(&self) -> TimestampMs {
        self.started_at
    }

    pub fn connection_attempt(&self) {
        self.connection_attempts.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a successful connection. The first one also fixes time-to-first-peer.
    pub fn connection_succeeded(&self, now: TimestampMs) {
        self.successful_connections.fetch_add(1, Ordering::Relaxed);
        let elapsed = now.saturating_sub(self.started_at);
        if self
            .time_to_first_peer_ms
            .compare_exchange(UNSET, elapsed, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            debug!(elapsed_ms = elapsed, "stats: first peer connected");
        }
    }

    pub fn connection_failed(&self) {
        self.failed_connection_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bytes_up(&self, n: u64) {
        self.bytes_uploaded.fetch_add(n, Ordering::Relaxed);
    }

    pub fn bytes_down(&self, n: u64) {
        self.bytes_downloaded.fetch_add(n, Ordering::Relaxed);
    }

    pub fn relay(&self) {
        self.relay_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn ping(&self) {
        self.ping_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn transport_fallback(&self, now: TimestampMs) {
        self.transport_fallbacks.fetch_add(1, Ordering::Relaxed);
        self.last_transport_fallback_at.store(now, Ordering::Relaxed);
    }

    pub fn rendezvous_attempt(&self) {
        self.rendezvous_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn rendezvous_success(&self, latency_ms: u64) {
        self.rendezvous_successes.fetch_add(1, Ordering::Relaxed);
        self.rendezvous_failure_streak.store(0, Ordering::Relaxed);
        self.last_beacon_latency_ms.store(latency_ms, Ordering::Relaxed);
    }

    /// Count a failed round. `streak` is the tracker's current failure streak.
    pub fn rendezvous_failure(&self, streak: u32) {
        self.rendezvous_failures.fetch_add(1, Ordering::Relaxed);
        self.rendezvous_failure_streak.store(u64::from(streak), Ordering::Relaxed);
    }

    pub fn reset_failure_streak(&self) {
        self.rendezvous_failure_streak.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> P2PStats {
        let get = |a: &AtomicU64| a.load(Ordering::Relaxed);
        let opt = |a: &AtomicU64| Some(a.load(Ordering::Relaxed)).filter(|v| *v != UNSET);
        P2PStats {
            connection_attempts: get(&self.connection_attempts),
            successful_connections: get(&self.successful_connections),
            failed_connection_attempts: get(&self.failed_connection_attempts),
            rendezvous_attempts: get(&self.rendezvous_attempts),
            rendezvous_successes: get(&self.rendezvous_successes),
            rendezvous_failures: get(&self.rendezvous_failures),
            rendezvous_failure_streak: get(&self.rendezvous_failure_streak),
            bytes_uploaded: get(&self.bytes_uploaded),
            bytes_downloaded: get(&self.bytes_downloaded),
            relay_count: get(&self.relay_count),
            ping_count: get(&self.ping_count),
            time_to_first_peer_ms: opt(&self.time_to_first_peer_ms),
            last_beacon_latency_ms: opt(&self.last_beacon_latency_ms),
            transport_fallbacks: get(&self.transport_fallbacks),
            last_transport_fallback_at: opt(&self.last_transport_fallback_at),
            started_at: self.started_at,
        }
    }
}
