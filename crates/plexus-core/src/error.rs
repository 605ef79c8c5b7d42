//! Error types for the Plexus control plane.
use std::fmt;

use thiserror::Error;

/// The rule a message field violated.
#[derive(Debug, Clone, PartialEq)]
pub enum Constraint {
    /// The field is absent.
    Required,
    /// The field has the wrong JSON type.
    Type(&'static str),
    /// The string is empty.
    NonEmpty,
    /// The timestamp is zero or negative.
    PositiveTimestamp,
    /// The number is outside `[min, max]`.
    Range { min: f64, max: f64 },
    /// The string is not a UUID.
    Uuid,
    /// The string is not standard base64.
    Base64,
    /// The list has more than this many items.
    MaxItems(usize),
    /// The field must be strictly after another timestamp field.
    After(&'static str),
    /// Signed envelopes may not be nested.
    NestedEnvelope,
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Required => write!(f, "required"),
            Self::Type(t) => write!(f, "must be {t}"),
            Self::NonEmpty => write!(f, "must be non-empty"),
            Self::PositiveTimestamp => write!(f, "must be a positive timestamp"),
            Self::Range { min, max } => write!(f, "must be within [{min}, {max}]"),
            Self::Uuid => write!(f, "must be a UUID"),
            Self::Base64 => write!(f, "must be base64"),
            Self::MaxItems(n) => write!(f, "must have at most {n} items"),
            Self::After(other) => write!(f, "must be after {other}"),
            Self::NestedEnvelope => write!(f, "must not nest a signed envelope"),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("message too large: {size} > {max}")] TooLarge { size: usize, max: usize },
    #[error("malformed payload: {0}")] Malformed(String),
    #[error("payload is not an object")] NotAnObject,
    #[error("missing discriminant field `type`")] MissingType,
    #[error("unknown message type: {0}")] UnknownType(String),
    #[error("expected {expected} message, got {got}")] KindMismatch { expected: String, got: String },
    #[error("field `{path}` {constraint}")] Field { path: String, constraint: Constraint },
}

impl ValidationError {
    pub fn field(path: impl Into<String>, constraint: Constraint) -> Self {
        Self::Field { path: path.into(), constraint }
    }

    /// Short stable code used in diagnostics.
    pub fn code(&self) -> &'static str {
        match self {
            Self::TooLarge { .. } => "validation.too_large",
            Self::Malformed(_) => "validation.malformed",
            Self::NotAnObject => "validation.not_object",
            Self::MissingType => "validation.missing_type",
            Self::UnknownType(_) => "validation.unknown_type",
            Self::KindMismatch { .. } => "validation.kind_mismatch",
            Self::Field { .. } => "validation.field",
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PersistenceError {
    #[error("storage: {0}")] Storage(String),
    #[error("encoding: {0}")] Encoding(String),
    #[error("persistence unavailable")] Unavailable,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryFailure {
    #[error("rendezvous round timed out after {elapsed_ms}ms")] Timeout { elapsed_ms: u64 },
    #[error("no beacon answered")] NoBeacons,
    #[error("rendezvous rejected: {0}")] Rejected(String),
    #[error("transport: {0}")] Transport(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")] Invalid { field: &'static str, reason: String },
    #[error("load: {0}")] Load(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BlocklistError {
    #[error("peer id must be non-empty")] EmptyPeerId,
}

#[derive(Error, Debug)]
pub enum PlexusError {
    #[error(transparent)] Validation(#[from] ValidationError),
    #[error(transparent)] Persistence(#[from] PersistenceError),
    #[error(transparent)] Discovery(#[from] DiscoveryFailure),
    #[error(transparent)] Config(#[from] ConfigError),
    #[error(transparent)] Blocklist(#[from] BlocklistError),
    #[error("rpc: {0}")] Rpc(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_error_names_path_and_constraint() {
        let err = ValidationError::field("ttl", Constraint::Range { min: 0.0, max: 10.0 });
        assert_eq!(err.to_string(), "field `ttl` must be within [0, 10]");
        assert_eq!(err.code(), "validation.field");
    }

    #[test]
    fn umbrella_wraps_component_errors() {
        let err: PlexusError = ConfigError::Invalid { field: "community", reason: "empty".into() }.into();
        assert!(matches!(err, PlexusError::Config(_)));
        assert_eq!(err.to_string(), "invalid community: empty");
    }
}
