//! # plexus-network: the peer-mesh control plane.
//!
//! Validates inbound protocol messages, enforces directional blocklists,
//! classifies connection health, tracks rendezvous discovery and keeps a
//! bounded diagnostics log. [`snapshot::build`] folds the state of all of
//! these into one immutable [`plexus_core::types::NodeDashboardSnapshot`].
//!
//! The transport itself lives elsewhere: this crate consumes transport events
//! and answers accept/send questions through [`gate`].

pub mod blocklist;
pub mod config;
pub mod diagnostics;
pub mod gate;
pub mod health;
pub mod protocol;
pub mod rate_limiter;
pub mod rendezvous;
pub mod snapshot;
pub mod stats;

pub use blocklist::{BlocklistStore, BlocklistWrite, StatusHandle};
pub use config::{MeshConfig, MeshPolicy, RendezvousMeshConfig};
pub use diagnostics::DiagnosticsLog;
pub use gate::{DenyReason, GateDecision};
pub use health::HealthMonitor;
pub use protocol::{MeshMessage, MessageKind};
pub use rate_limiter::{LogDecision, ValidationLogLimiter};
pub use rendezvous::{RendezvousState, RendezvousTracker, SyncAction, SyncState};
pub use snapshot::{build, SnapshotSource};
pub use stats::StatsRecorder;
