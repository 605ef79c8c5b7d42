//! Control plane composition and event loop.
//!
//! [`ControlPlane`] owns one of each component (blocklist, health monitor,
//! rendezvous tracker, diagnostics log, stats recorder) and is shared as
//! `Arc<ControlPlane>` between the transport event loop and the RPC server.
//! Each component sits behind its own lock so concurrent transport callbacks
//! serialize per component; [`ControlPlane::snapshot`] only takes read locks.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use serde_json::json;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use plexus_core::constants::SNAPSHOT_DIAGNOSTICS;
use plexus_core::error::{BlocklistError, DiscoveryFailure, PlexusError, ValidationError};
use plexus_core::traits::BlocklistPersistence;
use plexus_core::types::{
    BlocklistView, ControlFlags, DiagnosticEvent, DiagnosticLevel, Direction, DisabledReason,
    NodeDashboardSnapshot, P2PStats, PeerId, PeerRecord, PersistencePhase, PersistenceStatus, TimestampMs, UserId,
};
use plexus_network::gate::{self, DenyReason, GateDecision};
use plexus_network::protocol::{self, MeshMessage};
use plexus_network::rate_limiter::LogDecision;
use plexus_network::snapshot::{self, SnapshotSource};
use plexus_network::{
    BlocklistStore, DiagnosticsLog, HealthMonitor, MeshConfig, RendezvousTracker, StatsRecorder, SyncAction,
    ValidationLogLimiter,
};

use crate::persistence::{PersistenceWorker, RetryPolicy};

/// How often the event loop drives the rendezvous state machine.
const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Upper bound on remembered discovered peers; the oldest are evicted.
const MAX_DISCOVERED: usize = 1024;

/// Accepted messages waiting for the application; newer ones are dropped when full.
const MESSAGE_BUFFER: usize = 1024;

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_ms() -> TimestampMs {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

/// Events reported by the transport layer.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    Connected { peer: PeerId, user: Option<UserId> },
    Disconnected { peer: PeerId },
    RttSample { peer: PeerId, rtt_ms: f64 },
    Activity { peer: PeerId },
    ProbeFailed { peer: PeerId },
    ConnectFailed { peer: PeerId, reason: String },
    BytesTransferred { up: u64, down: u64 },
    Relay,
    Ping,
    TransportFallback { from: String, to: String },
    /// A round the transport started on its own. Rounds started through
    /// [`ControlCommand::StartRendezvousRound`] are already counted.
    RendezvousAttempt,
    RendezvousSuccess { peers: Vec<PeerId>, latency_ms: u64 },
    RendezvousFailure { reason: DiscoveryFailure },
    Message { peer: PeerId, bytes: Bytes },
    InboundRequest { peer: PeerId, user: Option<UserId> },
}

/// Commands the control plane issues to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCommand {
    StartRendezvousRound,
    Disconnect { peer: PeerId, reason: String },
}

/// Receiving ends handed to the transport and application by [`ControlPlane::open`].
#[derive(Debug)]
pub struct PlaneChannels {
    pub commands: mpsc::UnboundedReceiver<ControlCommand>,
    /// Messages from [`TransportEvent::Message`] that passed the gate and validation.
    pub messages: mpsc::Receiver<(PeerId, MeshMessage)>,
}

/// Answer to an inbound connection request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundDecision {
    Accept,
    /// Held for manual operator approval.
    Queue,
    Reject(DenyReason),
}

/// Why an inbound message was dropped.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Rejection {
    #[error("denied: {0}")] Denied(DenyReason),
    #[error(transparent)] Invalid(#[from] ValidationError),
}

pub struct ControlPlane {
    mesh: MeshConfig,
    stats: Arc<StatsRecorder>,
    blocklist: RwLock<BlocklistStore>,
    health: HealthMonitor,
    rendezvous: RwLock<RendezvousTracker>,
    diagnostics: RwLock<DiagnosticsLog>,
    limiter: Mutex<ValidationLogLimiter>,
    controls: RwLock<ControlFlags>,
    pending: RwLock<BTreeMap<PeerId, PeerRecord>>,
    discovered: RwLock<BTreeMap<PeerId, PeerRecord>>,
    commands: mpsc::UnboundedSender<ControlCommand>,
    messages: mpsc::Sender<(PeerId, MeshMessage)>,
}

impl ControlPlane {
    /// Validate `mesh`, load the blocklist from `backend` and start the
    /// persistence worker.
    ///
    /// An invalid configuration is an error. A failed blocklist load is not:
    /// the node starts with an empty blocklist, the persistence status shows
    /// the error and a diagnostic is recorded.
    pub async fn open(
        mesh: MeshConfig,
        backend: Arc<dyn BlocklistPersistence>,
        now: TimestampMs,
    ) -> Result<(Arc<Self>, PlaneChannels), PlexusError> {
        Self::open_with_retry(mesh, backend, RetryPolicy::default(), now).await
    }

    pub async fn open_with_retry(
        mesh: MeshConfig,
        backend: Arc<dyn BlocklistPersistence>,
        retry: RetryPolicy,
        now: TimestampMs,
    ) -> Result<(Arc<Self>, PlaneChannels), PlexusError> {
        mesh.validate()?;
        let policy = mesh.policy.clone();

        let (write_tx, write_rx) = mpsc::unbounded_channel();
        let mut blocklist = BlocklistStore::with_persistence(write_tx);
        let mut diagnostics = DiagnosticsLog::new(policy.diagnostics_capacity);

        blocklist.begin_load();
        match backend.load().await {
            Ok(entries) => blocklist.finish_load(entries, now),
            Err(err) => {
                blocklist.load_failed(&err);
                diagnostics.record(
                    DiagnosticLevel::Error,
                    "persistence.load_failed",
                    format!("blocklist load failed: {err}"),
                    "blocklist",
                    None,
                    now,
                );
            }
        }
        PersistenceWorker::new(backend, write_rx, blocklist.status_handle(), retry).spawn();

        let stats = Arc::new(StatsRecorder::new(now));
        let rendezvous = RendezvousTracker::new(policy.clone(), mesh.rendezvous.refresh_interval_ms, Arc::clone(&stats));
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (msg_tx, msg_rx) = mpsc::channel(MESSAGE_BUFFER);

        info!(
            community = %mesh.rendezvous.community,
            beacons = mesh.rendezvous.beacons.len(),
            capsules = mesh.rendezvous.capsules.len(),
            blocked = blocklist.len(),
            "control: opened"
        );

        let plane = Self {
            health: HealthMonitor::new(policy.clone()),
            limiter: Mutex::new(ValidationLogLimiter::new(
                policy.validation_log_burst,
                policy.validation_log_window_ms,
            )),
            mesh,
            stats,
            blocklist: RwLock::new(blocklist),
            rendezvous: RwLock::new(rendezvous),
            diagnostics: RwLock::new(diagnostics),
            controls: RwLock::new(ControlFlags::default()),
            pending: RwLock::new(BTreeMap::new()),
            discovered: RwLock::new(BTreeMap::new()),
            commands: cmd_tx,
            messages: msg_tx,
        };
        Ok((Arc::new(plane), PlaneChannels { commands: cmd_rx, messages: msg_rx }))
    }

    /// Apply transport events and drive rendezvous until `events` closes or
    /// `shutdown` flips to `true`.
    pub async fn run(self: &Arc<Self>, mut events: mpsc::Receiver<TransportEvent>, mut shutdown: watch::Receiver<bool>) {
        let mut tick = tokio::time::interval(TICK_INTERVAL);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => self.apply(event, now_ms()),
                    None => {
                        info!("control: transport event channel closed");
                        break;
                    }
                },
                _ = tick.tick() => {
                    self.poll_rendezvous(now_ms());
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("control: shutdown requested");
                        break;
                    }
                }
            }
        }
    }

    /// Apply one transport event at `now`.
    pub fn apply(&self, event: TransportEvent, now: TimestampMs) {
        match event {
            TransportEvent::Connected { peer, user } => {
                self.stats.connection_attempt();
                self.stats.connection_succeeded(now);
                self.health.connection_opened(&peer, user, now);
                self.pending.write().remove(&peer);
                info!(%peer, "control: peer connected");
            }
            TransportEvent::Disconnected { peer } => {
                self.health.connection_closed(&peer);
                self.limiter.lock().remove_peer(&peer);
                info!(%peer, "control: peer disconnected");
            }
            TransportEvent::RttSample { peer, rtt_ms } => self.health.record_sample(&peer, rtt_ms, now),
            TransportEvent::Activity { peer } => self.health.record_activity(&peer, now),
            TransportEvent::ProbeFailed { peer } => self.health.record_probe_failure(&peer, now),
            TransportEvent::ConnectFailed { peer, reason } => {
                self.stats.connection_attempt();
                self.stats.connection_failed();
                debug!(%peer, %reason, "control: connect failed");
            }
            TransportEvent::BytesTransferred { up, down } => {
                self.stats.bytes_up(up);
                self.stats.bytes_down(down);
            }
            TransportEvent::Relay => self.stats.relay(),
            TransportEvent::Ping => self.stats.ping(),
            TransportEvent::TransportFallback { from, to } => {
                self.stats.transport_fallback(now);
                self.record(
                    DiagnosticLevel::Info,
                    "transport.fallback",
                    format!("transport fell back from {from} to {to}"),
                    "transport",
                    Some(json!({ "from": from, "to": to })),
                    now,
                );
            }
            TransportEvent::RendezvousAttempt => self.rendezvous.write().attempt(now),
            TransportEvent::RendezvousSuccess { peers, latency_ms } => {
                self.rendezvous_succeeded(&peers, latency_ms, now);
            }
            TransportEvent::RendezvousFailure { reason } => self.rendezvous_failed(&reason, now),
            TransportEvent::Message { peer, bytes } => {
                // Rejections are already counted and logged.
                if let Ok(msg) = self.accept_message(&peer, &bytes, now) {
                    self.deliver(peer, msg);
                }
            }
            TransportEvent::InboundRequest { peer, user } => {
                self.on_inbound_request(&peer, user, now);
            }
        }
    }

    // --- Gating ---

    pub fn allow_inbound(&self, peer: &PeerId) -> GateDecision {
        gate::allow_inbound(&self.controls.read(), &self.blocklist.read(), peer)
    }

    pub fn allow_outbound(&self, peer: &PeerId) -> GateDecision {
        gate::allow_outbound(&self.controls.read(), &self.blocklist.read(), peer)
    }

    /// Decide on an inbound connection request. With manual accept on, an
    /// allowed peer is queued for the operator instead.
    pub fn on_inbound_request(&self, peer: &PeerId, user: Option<UserId>, now: TimestampMs) -> InboundDecision {
        if let GateDecision::Deny(reason) = self.allow_inbound(peer) {
            debug!(%peer, %reason, "control: inbound request rejected");
            return InboundDecision::Reject(reason);
        }
        if gate::needs_manual_accept(&self.controls.read()) {
            self.pending.write().insert(
                peer.clone(),
                PeerRecord { peer_id: peer.clone(), user_id: user, seen_at: now },
            );
            info!(%peer, "control: inbound request queued for manual accept");
            return InboundDecision::Queue;
        }
        InboundDecision::Accept
    }

    /// Take a queued peer off the pending list so the transport can accept it.
    pub fn accept_pending(&self, peer: &PeerId) -> Option<PeerRecord> {
        self.pending.write().remove(peer)
    }

    pub fn reject_pending(&self, peer: &PeerId) -> bool {
        self.pending.write().remove(peer).is_some()
    }

    /// Gate then validate an inbound frame. Validation failures are recorded
    /// as rate-limited diagnostics and the frame is dropped.
    pub fn accept_message(&self, peer: &PeerId, raw: &[u8], now: TimestampMs) -> Result<MeshMessage, Rejection> {
        if let GateDecision::Deny(reason) = self.allow_inbound(peer) {
            debug!(%peer, %reason, "control: message from gated peer dropped");
            return Err(Rejection::Denied(reason));
        }
        let msg = match protocol::validate_bytes(raw) {
            Ok(msg) => msg,
            Err(err) => {
                self.report_invalid(peer, &err, now);
                return Err(err.into());
            }
        };
        self.health.record_activity(peer, now);
        self.learn_peers(&msg, now);
        Ok(msg)
    }

    fn deliver(&self, peer: PeerId, msg: MeshMessage) {
        match self.messages.try_send((peer, msg)) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full((peer, msg))) => {
                warn!(%peer, kind = msg.kind().as_str(), "control: inbound message queue full; message dropped");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("control: no message consumer; message dropped");
            }
        }
    }

    /// Validate and serialize an outbound message. Returns `None` if the
    /// gate forbids sending to `peer`.
    pub fn prepare_outbound(&self, peer: &PeerId, msg: &MeshMessage) -> Result<Option<Vec<u8>>, ValidationError> {
        if let GateDecision::Deny(reason) = self.allow_outbound(peer) {
            debug!(%peer, %reason, "control: outbound message suppressed");
            return Ok(None);
        }
        msg.encode().map(Some)
    }

    fn report_invalid(&self, peer: &PeerId, err: &ValidationError, now: TimestampMs) {
        let decision = self.limiter.lock().check(peer, now);
        if let LogDecision::Emit { suppressed } = decision {
            self.record(
                DiagnosticLevel::Warn,
                err.code(),
                format!("invalid message from {peer}: {err}"),
                "protocol",
                Some(json!({ "peer": peer.as_str(), "suppressed": suppressed })),
                now,
            );
        }
    }

    fn learn_peers(&self, msg: &MeshMessage, now: TimestampMs) {
        let learned: Vec<(PeerId, Option<UserId>)> = match msg {
            MeshMessage::GossipPeers(m) => m.peers.iter().map(|p| (p.peer_id.clone(), p.user_id.clone())).collect(),
            MeshMessage::Pex(m) => m.peers.iter().map(|p| (p.clone(), None)).collect(),
            MeshMessage::PresenceTicket(t) => {
                let rv = &self.mesh.rendezvous;
                let trusted = rv.trusted_ticket_public_keys.is_empty()
                    || rv.trusted_ticket_public_keys.iter().any(|k| *k == t.public_key);
                if t.community != rv.community || t.expires_at <= now || !trusted {
                    debug!(peer = %t.peer_id, community = %t.community, "control: presence ticket ignored");
                    return;
                }
                vec![(t.peer_id.clone(), t.user_id.clone())]
            }
            _ => return,
        };
        self.remember_discovered(learned, now);
    }

    fn remember_discovered(&self, peers: Vec<(PeerId, Option<UserId>)>, now: TimestampMs) {
        if peers.is_empty() {
            return;
        }
        let mut discovered = self.discovered.write();
        for (peer_id, user_id) in peers {
            discovered.insert(peer_id.clone(), PeerRecord { peer_id, user_id, seen_at: now });
        }
        while discovered.len() > MAX_DISCOVERED {
            let oldest = discovered
                .values()
                .min_by_key(|r| r.seen_at)
                .map(|r| r.peer_id.clone());
            match oldest {
                Some(id) => {
                    discovered.remove(&id);
                }
                None => break,
            }
        }
    }

    // --- Blocklist ---

    /// Block `peer`. Live connections covered by the new entry are asked to close.
    pub fn block(
        &self,
        peer: &PeerId,
        direction: Direction,
        reason: Option<String>,
        now: TimestampMs,
    ) -> Result<(), BlocklistError> {
        self.blocklist.write().block(peer, direction, reason.clone(), now)?;
        if direction != Direction::Outbound {
            self.pending.write().remove(peer);
        }
        if self.health.contains(peer) {
            let reason = reason.unwrap_or_else(|| "blocked".to_string());
            let _ = self.commands.send(ControlCommand::Disconnect { peer: peer.clone(), reason });
        }
        self.record(
            DiagnosticLevel::Info,
            "blocklist.blocked",
            format!("blocked {peer} ({direction})"),
            "blocklist",
            None,
            now,
        );
        Ok(())
    }

    pub fn unblock(&self, peer: &PeerId, direction: Option<Direction>, now: TimestampMs) -> Result<usize, BlocklistError> {
        let removed = self.blocklist.write().unblock(peer, direction)?;
        if removed > 0 {
            self.record(
                DiagnosticLevel::Info,
                "blocklist.unblocked",
                format!("unblocked {peer} ({removed} entries)"),
                "blocklist",
                None,
                now,
            );
        }
        Ok(removed)
    }

    pub fn blocklist(&self) -> BlocklistView {
        self.blocklist.read().list()
    }

    pub fn persistence_status(&self) -> PersistenceStatus {
        self.blocklist.read().status()
    }

    pub fn subscribe_persistence(&self) -> watch::Receiver<PersistenceStatus> {
        self.blocklist.read().subscribe()
    }

    /// Wait until every queued blocklist write has been applied, up to `timeout`.
    /// Returns `false` on timeout.
    pub async fn flush_persistence(&self, timeout: Duration) -> bool {
        let mut rx = self.subscribe_persistence();
        let drained = tokio::time::timeout(
            timeout,
            rx.wait_for(|s| s.pending_writes == 0 && s.status != PersistencePhase::Saving),
        )
        .await;
        matches!(drained, Ok(Ok(_)))
    }

    // --- Controls and rendezvous ---

    pub fn controls(&self) -> ControlFlags {
        *self.controls.read()
    }

    pub fn set_controls(&self, flags: ControlFlags, now: TimestampMs) {
        let previous = std::mem::replace(&mut *self.controls.write(), flags);
        if previous != flags {
            self.record(
                DiagnosticLevel::Info,
                "controls.updated",
                "connection controls updated",
                "controls",
                Some(json!(flags)),
                now,
            );
        }
    }

    pub fn set_mesh_enabled(&self, enabled: bool, now: TimestampMs) {
        self.rendezvous.write().set_enabled(enabled);
        let (code, message) = if enabled {
            ("rendezvous.enabled", "rendezvous mesh enabled by operator")
        } else {
            ("rendezvous.disabled", "rendezvous mesh disabled by operator")
        };
        self.record(DiagnosticLevel::Info, code, message, "rendezvous", None, now);
    }

    /// Drive the rendezvous state machine. A due round is counted and handed
    /// to the transport as [`ControlCommand::StartRendezvousRound`].
    pub fn poll_rendezvous(&self, now: TimestampMs) -> SyncAction {
        let (action, tripped) = {
            let mut tracker = self.rendezvous.write();
            let before = tracker.disabled_reason();
            let action = tracker.poll(now);
            if action == SyncAction::StartRound {
                tracker.attempt(now);
            }
            let tripped = before.is_none() && tracker.disabled_reason() == Some(DisabledReason::Failure);
            (action, tripped)
        };
        match action {
            SyncAction::StartRound => {
                if self.commands.send(ControlCommand::StartRendezvousRound).is_err() {
                    debug!("control: no transport listening for commands");
                }
            }
            SyncAction::TimedOut { elapsed_ms } => {
                self.record(
                    DiagnosticLevel::Warn,
                    "rendezvous.timeout",
                    format!("rendezvous round timed out after {elapsed_ms}ms"),
                    "rendezvous",
                    None,
                    now,
                );
                if tripped {
                    self.record_auto_disabled(now);
                }
            }
            SyncAction::Wait { .. } | SyncAction::Disabled => {}
        }
        action
    }

    fn rendezvous_succeeded(&self, peers: &[PeerId], latency_ms: u64, now: TimestampMs) {
        let recovered = {
            let mut tracker = self.rendezvous.write();
            let was_failed = tracker.disabled_reason() == Some(DisabledReason::Failure);
            tracker.success(peers.len(), latency_ms, now);
            was_failed
        };
        self.remember_discovered(peers.iter().map(|p| (p.clone(), None)).collect(), now);
        if recovered {
            self.record(
                DiagnosticLevel::Info,
                "rendezvous.recovered",
                "rendezvous mesh re-enabled after a successful retry",
                "rendezvous",
                None,
                now,
            );
        }
    }

    fn rendezvous_failed(&self, reason: &DiscoveryFailure, now: TimestampMs) {
        let (tripped, streak) = {
            let mut tracker = self.rendezvous.write();
            let tripped = tracker.failure(now, reason);
            (tripped, tracker.failure_streak())
        };
        self.record(
            DiagnosticLevel::Warn,
            "rendezvous.failure",
            format!("rendezvous round failed: {reason}"),
            "rendezvous",
            Some(json!({ "streak": streak })),
            now,
        );
        if tripped {
            self.record_auto_disabled(now);
        }
    }

    fn record_auto_disabled(&self, now: TimestampMs) {
        warn!("control: rendezvous mesh auto-disabled");
        self.record(
            DiagnosticLevel::Error,
            "rendezvous.auto_disabled",
            "rendezvous mesh disabled after repeated failures; retrying with backoff",
            "rendezvous",
            None,
            now,
        );
    }

    // --- Diagnostics and snapshot ---

    fn record(
        &self,
        level: DiagnosticLevel,
        code: &str,
        message: impl Into<String>,
        source: &str,
        context: Option<serde_json::Value>,
        now: TimestampMs,
    ) {
        self.diagnostics.write().record(level, code, message, source, context, now);
    }

    /// Up to `n` most recent diagnostics, newest first.
    pub fn diagnostics(&self, n: usize) -> Vec<DiagnosticEvent> {
        self.diagnostics.read().recent(n)
    }

    pub fn subscribe_diagnostics(&self) -> broadcast::Receiver<DiagnosticEvent> {
        self.diagnostics.read().subscribe()
    }

    pub fn stats(&self) -> P2PStats {
        self.stats.snapshot()
    }

    pub fn mesh(&self) -> &MeshConfig {
        &self.mesh
    }

    /// Build the operator snapshot at `now`.
    pub fn snapshot(&self, now: TimestampMs) -> NodeDashboardSnapshot {
        let source = SnapshotSource {
            now,
            stats: self.stats.snapshot(),
            controls: *self.controls.read(),
            blocklist: self.blocklist.read().entries(),
            pending: self.pending.read().values().cloned().collect(),
            discovered: self.discovered.read().values().cloned().collect(),
            connections: self.health.connections(now),
            summary: self.health.summary(now),
            last_handshake_at: self.health.last_handshake_at(),
            rendezvous: self.rendezvous.read().state(),
            diagnostics: self.diagnostics.read().recent(SNAPSHOT_DIAGNOSTICS),
        };
        snapshot::build(&source)
    }
}
