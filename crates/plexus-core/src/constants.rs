//! Control plane constants. All durations are in milliseconds unless the name
//! says otherwise.

/// Default TCP port for the operator JSON-RPC server.
pub const DEFAULT_RPC_PORT: u16 = 17_420;

/// Largest raw inbound frame the validator will attempt to parse.
pub const MAX_MESSAGE_SIZE: usize = 256 * 1024;

/// Maximum hop count a gossip message may carry.
pub const GOSSIP_TTL_MAX: u64 = 10;

/// Maximum number of peers in a single gossip or pex message.
pub const MAX_PEER_LIST: usize = 256;

/// Maximum number of ids or items in a sync request/response.
pub const MAX_ID_LIST: usize = 512;

/// Maximum nesting depth for signed envelopes (an envelope may not wrap an envelope).
pub const MAX_ENVELOPE_DEPTH: usize = 1;

// --- Health classification ---

/// A connection with no activity for this long is stale (5 minutes).
pub const DEFAULT_STALE_AFTER_MS: u64 = 5 * 60 * 1000;

/// Mean RTT above this marks a connection degraded.
pub const DEFAULT_DEGRADED_RTT_MS: f64 = 500.0;

/// Packet loss fraction above this marks a connection degraded.
pub const DEFAULT_DEGRADED_PACKET_LOSS: f64 = 0.10;

// --- Rendezvous ---

/// Consecutive rendezvous failures before the mesh auto-disables.
pub const DEFAULT_FAILURE_STREAK_CEILING: u32 = 5;

/// A rendezvous round that has not completed after this long is failed.
pub const DEFAULT_SYNC_TIMEOUT_MS: u64 = 15_000;

/// First backoff delay after a failed round.
pub const DEFAULT_BACKOFF_BASE_MS: u64 = 2_000;

/// Backoff delay ceiling.
pub const DEFAULT_BACKOFF_MAX_MS: u64 = 5 * 60 * 1000;

pub const DEFAULT_ANNOUNCE_INTERVAL_MS: u64 = 30_000;
pub const DEFAULT_REFRESH_INTERVAL_MS: u64 = 60_000;
pub const DEFAULT_TICKET_TTL_MS: u64 = 10 * 60 * 1000;

/// Default rendezvous community name.
pub const DEFAULT_COMMUNITY: &str = "plexus-main";

// --- Diagnostics ---

/// Number of diagnostic events retained in the ring buffer.
pub const DEFAULT_DIAGNOSTICS_CAPACITY: usize = 200;

/// Number of diagnostic events copied into a dashboard snapshot.
pub const SNAPSHOT_DIAGNOSTICS: usize = 50;

/// Validation-failure diagnostics allowed per peer per window.
pub const DEFAULT_VALIDATION_LOG_BURST: usize = 5;

/// Sliding window for validation-failure log limiting (60 seconds).
pub const DEFAULT_VALIDATION_LOG_WINDOW_MS: u64 = 60_000;

// --- Persistence ---

/// First retry delay after a failed blocklist write.
pub const PERSIST_RETRY_BASE_MS: u64 = 250;

/// Retry delay ceiling for blocklist writes.
pub const PERSIST_RETRY_MAX_MS: u64 = 30_000;
