//! Mesh configuration for the control plane.
//!
//! [`RendezvousMeshConfig`] describes where and how to discover peers and is
//! immutable once loaded; changing it means building a new value and
//! reconfiguring. [`MeshPolicy`] holds the injectable thresholds used by
//! health classification, rendezvous backoff and diagnostics.

use plexus_core::constants::{
    DEFAULT_ANNOUNCE_INTERVAL_MS, DEFAULT_BACKOFF_BASE_MS, DEFAULT_BACKOFF_MAX_MS, DEFAULT_COMMUNITY,
    DEFAULT_DEGRADED_PACKET_LOSS, DEFAULT_DEGRADED_RTT_MS, DEFAULT_DIAGNOSTICS_CAPACITY,
    DEFAULT_FAILURE_STREAK_CEILING, DEFAULT_REFRESH_INTERVAL_MS, DEFAULT_STALE_AFTER_MS, DEFAULT_SYNC_TIMEOUT_MS,
    DEFAULT_TICKET_TTL_MS, DEFAULT_VALIDATION_LOG_BURST, DEFAULT_VALIDATION_LOG_WINDOW_MS,
};
use plexus_core::error::ConfigError;
use serde::{Deserialize, Serialize};

/// Beacon/capsule discovery configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendezvousMeshConfig {
    /// Beacon endpoints polled for peer announcements.
    pub beacons: Vec<String>,
    /// Capsule endpoints holding signed peer bundles.
    pub capsules: Vec<String>,
    /// Community namespace peers announce under.
    pub community: String,
    /// Public keys trusted to sign presence tickets.
    pub trusted_ticket_public_keys: Vec<String>,
    /// Public keys trusted to sign capsules.
    pub trusted_capsule_public_keys: Vec<String>,
    pub announce_interval_ms: u64,
    pub refresh_interval_ms: u64,
    pub ticket_ttl_ms: u64,
}

impl Default for RendezvousMeshConfig {
    fn default() -> Self {
        Self {
            beacons: Vec::new(),
            capsules: Vec::new(),
            community: DEFAULT_COMMUNITY.to_string(),
            trusted_ticket_public_keys: Vec::new(),
            trusted_capsule_public_keys: Vec::new(),
            announce_interval_ms: DEFAULT_ANNOUNCE_INTERVAL_MS,
            refresh_interval_ms: DEFAULT_REFRESH_INTERVAL_MS,
            ticket_ttl_ms: DEFAULT_TICKET_TTL_MS,
        }
    }
}

/// Thresholds that would otherwise be hard-coded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshPolicy {
    /// No activity for longer than this marks a connection stale.
    pub stale_after_ms: u64,
    /// Mean RTT above this marks a connection degraded.
    pub degraded_rtt_ms: f64,
    /// Packet loss above this marks a connection degraded.
    pub degraded_packet_loss: f64,
    /// Consecutive rendezvous failures that auto-disable the mesh.
    pub failure_streak_ceiling: u32,
    pub sync_timeout_ms: u64,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub diagnostics_capacity: usize,
    pub validation_log_burst: usize,
    pub validation_log_window_ms: u64,
}

impl Default for MeshPolicy {
    fn default() -> Self {
        Self {
            stale_after_ms: DEFAULT_STALE_AFTER_MS,
            degraded_rtt_ms: DEFAULT_DEGRADED_RTT_MS,
            degraded_packet_loss: DEFAULT_DEGRADED_PACKET_LOSS,
            failure_streak_ceiling: DEFAULT_FAILURE_STREAK_CEILING,
            sync_timeout_ms: DEFAULT_SYNC_TIMEOUT_MS,
            backoff_base_ms: DEFAULT_BACKOFF_BASE_MS,
            backoff_max_ms: DEFAULT_BACKOFF_MAX_MS,
            diagnostics_capacity: DEFAULT_DIAGNOSTICS_CAPACITY,
            validation_log_burst: DEFAULT_VALIDATION_LOG_BURST,
            validation_log_window_ms: DEFAULT_VALIDATION_LOG_WINDOW_MS,
        }
    }
}

/// Full mesh configuration: discovery endpoints plus policy.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshConfig {
    pub rendezvous: RendezvousMeshConfig,
    pub policy: MeshPolicy,
}

impl MeshConfig {
    /// Preset for the public test mesh: shorter intervals, quicker auto-disable.
    pub fn testnet() -> Self {
        Self {
            rendezvous: RendezvousMeshConfig {
                beacons: vec!["wss://beacon.testnet.plexus.invalid".to_string()],
                community: "plexus-testnet".to_string(),
                announce_interval_ms: 10_000,
                refresh_interval_ms: 20_000,
                ticket_ttl_ms: 120_000,
                ..RendezvousMeshConfig::default()
            },
            policy: MeshPolicy {
                failure_streak_ceiling: 3,
                ..MeshPolicy::default()
            },
        }
    }

    /// Reject configurations the control plane cannot run with.
    ///
    /// Called once at startup; any error is fatal.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let rv = &self.rendezvous;
        if rv.community.trim().is_empty() {
            return Err(invalid("rendezvous.community", "must be non-empty"));
        }
        if rv.beacons.is_empty() && rv.capsules.is_empty() {
            return Err(invalid("rendezvous.beacons", "at least one beacon or capsule is required"));
        }
        if let Some(b) = rv.beacons.iter().chain(rv.capsules.iter()).find(|b| b.trim().is_empty()) {
            return Err(invalid("rendezvous.beacons", format!("empty endpoint {b:?}")));
        }
        if rv.announce_interval_ms == 0 {
            return Err(invalid("rendezvous.announce_interval_ms", "must be positive"));
        }
        if rv.refresh_interval_ms == 0 {
            return Err(invalid("rendezvous.refresh_interval_ms", "must be positive"));
        }
        if rv.ticket_ttl_ms < rv.refresh_interval_ms {
            return Err(invalid(
                "rendezvous.ticket_ttl_ms",
                format!("{} is shorter than refresh interval {}", rv.ticket_ttl_ms, rv.refresh_interval_ms),
            ));
        }

        let p = &self.policy;
        if p.stale_after_ms == 0 {
            return Err(invalid("policy.stale_after_ms", "must be positive"));
        }
        if !(p.degraded_rtt_ms.is_finite() && p.degraded_rtt_ms > 0.0) {
            return Err(invalid("policy.degraded_rtt_ms", "must be a positive number"));
        }
        if !(0.0..=1.0).contains(&p.degraded_packet_loss) {
            return Err(invalid("policy.degraded_packet_loss", "must be within [0, 1]"));
        }
        if p.failure_streak_ceiling == 0 {
            return Err(invalid("policy.failure_streak_ceiling", "must be positive"));
        }
        if p.sync_timeout_ms == 0 {
            return Err(invalid("policy.sync_timeout_ms", "must be positive"));
        }
        if p.backoff_base_ms == 0 || p.backoff_max_ms < p.backoff_base_ms {
            return Err(invalid("policy.backoff_max_ms", "must be >= backoff_base_ms > 0"));
        }
        if p.diagnostics_capacity == 0 {
            return Err(invalid("policy.diagnostics_capacity", "must be positive"));
        }
        if p.validation_log_burst == 0 || p.validation_log_window_ms == 0 {
            return Err(invalid("policy.validation_log_burst", "burst and window must be positive"));
        }
        Ok(())
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid { field, reason: reason.into() }
}
