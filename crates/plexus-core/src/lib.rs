//! # plexus-core
//! Foundation types and traits for the Plexus peer-mesh control plane.

pub mod constants;
pub mod error;
pub mod memory;
pub mod traits;
pub mod types;
