//! Accept/send gating for transport connections.
//!
//! The transport asks before it accepts an inbound connection or dials out.
//! Checks run from the broadest switch to the narrowest: global pause, then
//! isolation, then per-direction pause, then the blocklist.

use plexus_core::types::{ControlFlags, PeerId, TrafficDirection};
use serde::Serialize;
use thiserror::Error;

use crate::blocklist::BlocklistStore;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    #[error("networking is paused")] Paused,
    #[error("node is isolated")] Isolated,
    #[error("inbound connections are paused")] InboundPaused,
    #[error("outbound connections are paused")] OutboundPaused,
    #[error("peer is blocklisted")] Blocked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Allow,
    Deny(DenyReason),
}

impl GateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }
}

pub fn allow_inbound(flags: &ControlFlags, blocklist: &BlocklistStore, peer: &PeerId) -> GateDecision {
    decide(flags, blocklist, peer, TrafficDirection::Inbound)
}

pub fn allow_outbound(flags: &ControlFlags, blocklist: &BlocklistStore, peer: &PeerId) -> GateDecision {
    decide(flags, blocklist, peer, TrafficDirection::Outbound)
}

/// An allowed inbound peer still waits for the operator when manual accept is on.
pub fn needs_manual_accept(flags: &ControlFlags) -> bool {
    flags.manual_accept
}

fn decide(flags: &ControlFlags, blocklist: &BlocklistStore, peer: &PeerId, dir: TrafficDirection) -> GateDecision {
    let paused_dir = match dir {
        TrafficDirection::Inbound => flags.pause_inbound.then_some(DenyReason::InboundPaused),
        TrafficDirection::Outbound => flags.pause_outbound.then_some(DenyReason::OutboundPaused),
    };
    let reason = if flags.paused {
        Some(DenyReason::Paused)
    } else if flags.isolate {
        Some(DenyReason::Isolated)
    } else if paused_dir.is_some() {
        paused_dir
    } else if blocklist.is_blocked(peer, dir) {
        Some(DenyReason::Blocked)
    } else {
        None
    };
    reason.map_or(GateDecision::Allow, GateDecision::Deny)
}
