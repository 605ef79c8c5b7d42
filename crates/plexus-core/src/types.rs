//! Shared data model for the control plane.
//!
//! Everything here is plain owned data. Components hold their own state and
//! hand out these types by value, so a [`NodeDashboardSnapshot`] never aliases
//! live component state.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Milliseconds since the Unix epoch.
pub type TimestampMs = u64;

/// Transport-level peer identifier. Opaque to the control plane.
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Application-level identity. A peer carries zero or one of these.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

// ------------------------------------------------------------------
// Blocklist
// ------------------------------------------------------------------

/// Scope of a blocklist entry.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Inbound,
    Outbound,
    All,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inbound => "inbound",
            Self::Outbound => "outbound",
            Self::All => "all",
        }
    }

    /// Parse the lowercase wire name.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "inbound" => Some(Self::Inbound),
            "outbound" => Some(Self::Outbound),
            "all" => Some(Self::All),
            _ => None,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Direction of a concrete transport operation. Unlike [`Direction`] this
/// can never be `All`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrafficDirection {
    Inbound,
    Outbound,
}

impl From<TrafficDirection> for Direction {
    fn from(d: TrafficDirection) -> Self {
        match d {
            TrafficDirection::Inbound => Direction::Inbound,
            TrafficDirection::Outbound => Direction::Outbound,
        }
    }
}

/// A durable operator block decision. Keyed by `(peer_id, direction)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
#[serde(rename_all = "camelCase")]
pub struct BlocklistEntry {
    pub peer_id: PeerId,
    pub direction: Direction,
    pub reason: Option<String>,
    pub added_at: TimestampMs,
}

/// Blocklist partitioned for display. `all` holds every entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlocklistView {
    pub all: Vec<BlocklistEntry>,
    pub inbound: Vec<BlocklistEntry>,
    pub outbound: Vec<BlocklistEntry>,
}

/// Persistence phase of the blocklist store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PersistencePhase {
    #[default]
    Idle,
    Loading,
    Saving,
    Error,
}

/// Status published to persistence subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistenceStatus {
    pub status: PersistencePhase,
    pub pending_writes: u64,
    pub last_synced_at: Option<TimestampMs>,
    pub error: Option<String>,
}

// ------------------------------------------------------------------
// Connections
// ------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Healthy,
    Degraded,
    Stale,
}

/// A live connection as classified at read time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    pub peer_id: PeerId,
    pub user_id: Option<UserId>,
    pub status: ConnectionStatus,
    pub connected_at: TimestampMs,
    pub last_activity: Option<TimestampMs>,
    pub avg_rtt_ms: Option<f64>,
    pub packet_loss: f64,
    pub last_seen_at: TimestampMs,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionHealthSummary {
    pub total: usize,
    pub healthy: usize,
    pub degraded: usize,
    pub stale: usize,
    pub avg_rtt_ms: f64,
    pub avg_packet_loss: f64,
    pub handshake_confidence: f64,
}

// ------------------------------------------------------------------
// Counters and controls
// ------------------------------------------------------------------

/// Raw network counters. Rates are derived from these at snapshot time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct P2PStats {
    pub connection_attempts: u64,
    pub successful_connections: u64,
    pub failed_connection_attempts: u64,
    pub rendezvous_attempts: u64,
    pub rendezvous_successes: u64,
    pub rendezvous_failures: u64,
    pub rendezvous_failure_streak: u64,
    pub bytes_uploaded: u64,
    pub bytes_downloaded: u64,
    pub relay_count: u64,
    pub ping_count: u64,
    pub time_to_first_peer_ms: Option<u64>,
    pub last_beacon_latency_ms: Option<u64>,
    pub transport_fallbacks: u64,
    pub last_transport_fallback_at: Option<TimestampMs>,
    /// Origin for uptime-based rates.
    pub started_at: TimestampMs,
}

/// Operator connection policy consulted before accepting or initiating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlFlags {
    pub auto_connect: bool,
    pub manual_accept: bool,
    pub isolate: bool,
    pub paused: bool,
    pub pause_inbound: bool,
    pub pause_outbound: bool,
}

impl Default for ControlFlags {
    fn default() -> Self {
        Self {
            auto_connect: true,
            manual_accept: false,
            isolate: false,
            paused: false,
            pause_inbound: false,
            pause_outbound: false,
        }
    }
}

/// A peer awaiting manual accept or learned through discovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerRecord {
    pub peer_id: PeerId,
    pub user_id: Option<UserId>,
    pub seen_at: TimestampMs,
}

// ------------------------------------------------------------------
// Diagnostics
// ------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticLevel {
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticEvent {
    pub level: DiagnosticLevel,
    pub code: String,
    pub message: String,
    pub source: String,
    pub timestamp: TimestampMs,
    pub context: Option<serde_json::Value>,
}

// ------------------------------------------------------------------
// Dashboard snapshot
// ------------------------------------------------------------------

/// Why the rendezvous mesh is not running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisabledReason {
    /// The failure streak reached the configured ceiling. Retries after backoff.
    Failure,
    /// An operator switched the mesh off. Requires an explicit re-enable.
    Manual,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RendezvousView {
    pub enabled: bool,
    pub disabled_reason: Option<DisabledReason>,
    pub success_rate: f64,
    pub peer_count: usize,
    pub failure_streak: u32,
    pub last_sync: Option<TimestampMs>,
    pub last_beacon_latency_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionHealthView {
    pub summary: ConnectionHealthSummary,
    pub last_handshake_at: Option<TimestampMs>,
    /// Fraction of connections classified healthy.
    pub strength: f64,
    pub packet_loss: f64,
    pub handshake_confidence: f64,
    pub connections: Vec<Connection>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsView {
    pub failure_rate: f64,
    pub rendezvous_success_rate: f64,
    pub avg_packet_loss: f64,
    pub bandwidth_kbps: f64,
    pub time_to_first_peer_ms: Option<u64>,
    pub handshake_confidence: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeersView {
    pub pending: Vec<PeerRecord>,
    pub discovered: Vec<PeerRecord>,
}

/// Point-in-time operator view. Built fresh on each request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeDashboardSnapshot {
    pub built_at: TimestampMs,
    pub rendezvous: RendezvousView,
    pub connection_health: ConnectionHealthView,
    pub metrics: MetricsView,
    pub controls: ControlFlags,
    pub peers: PeersView,
    pub diagnostics: Vec<DiagnosticEvent>,
    pub blocklist: BlocklistView,
}
