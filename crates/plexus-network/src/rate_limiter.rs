//! Per-peer limiting of validation-failure diagnostics.
//!
//! A hostile peer can send malformed frames as fast as the transport allows.
//! Every one of them is dropped, but logging every one would flood the
//! diagnostics ring and evict everything useful. This limiter lets each peer
//! produce at most `burst` diagnostic records per sliding window; the rest are
//! counted and reported on the next record that is allowed through.
//!
//! # Design
//!
//! Each peer has a [`PeerWindow`] holding a [`VecDeque`] of millisecond
//! timestamps. On every check the deque is pruned of entries older than the
//! window, then its length is compared against the burst limit. Time is passed
//! in by the caller, so the limiter never reads a clock.

use std::collections::{HashMap, VecDeque};

use plexus_core::types::{PeerId, TimestampMs};
use tracing::debug;

/// Outcome of a [`ValidationLogLimiter::check`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogDecision {
    /// Record the diagnostic. `suppressed` failures were dropped since the last one.
    Emit { suppressed: u64 },
    /// Drop the diagnostic; it has been counted.
    Suppress,
}

/// Recent emitted-record timestamps and the pending suppressed count for one peer.
#[derive(Debug, Clone, Default)]
pub struct PeerWindow {
    pub emitted: VecDeque<TimestampMs>,
    pub suppressed: u64,
}

impl PeerWindow {
    fn prune(&mut self, now: TimestampMs, window_ms: u64) {
        let cutoff = now.saturating_sub(window_ms);
        while self.emitted.front().is_some_and(|t| *t <= cutoff) {
            self.emitted.pop_front();
        }
    }
}

/// Sliding-window limiter keyed by peer.
pub struct ValidationLogLimiter {
    burst: usize,
    window_ms: u64,
    peers: HashMap<PeerId, PeerWindow>,
}

impl ValidationLogLimiter {
    pub fn new(burst: usize, window_ms: u64) -> Self {
        Self {
            burst,
            window_ms,
            peers: HashMap::new(),
        }
    }

    /// Decide whether a validation failure from `peer` at `now` should be logged.
    ///
    /// Check and record happen together: an `Emit` decision consumes one slot.
    pub fn check(&mut self, peer: &PeerId, now: TimestampMs) -> LogDecision {
        let window = self.peers.entry(peer.clone()).or_default();
        window.prune(now, self.window_ms);
        if window.emitted.len() < self.burst {
            window.emitted.push_back(now);
            let suppressed = std::mem::take(&mut window.suppressed);
            LogDecision::Emit { suppressed }
        } else {
            window.suppressed = window.suppressed.saturating_add(1);
            debug!(%peer, suppressed = window.suppressed, "rate_limiter: validation log suppressed");
            LogDecision::Suppress
        }
    }

    /// Failures suppressed for `peer` and not yet reported.
    pub fn pending_suppressed(&self, peer: &PeerId) -> u64 {
        self.peers.get(peer).map(|w| w.suppressed).unwrap_or(0)
    }

    /// Forget a peer. Call on disconnect.
    pub fn remove_peer(&mut self, peer: &PeerId) {
        if self.peers.remove(peer).is_some() {
            debug!(%peer, "rate_limiter: peer removed");
        }
    }

    pub fn tracked_peers(&self) -> usize {
        self.peers.len()
    }
}
