//! # plexus-node-lib: control plane node composition, storage and RPC.
//!
//! - [`storage::RocksBlocklistStore`] durable blocklist backed by RocksDB
//! - [`persistence::PersistenceWorker`] applies queued blocklist writes with retry
//! - [`node::ControlPlane`] wires the mesh components together and runs the event loop
//! - [`rpc`] JSON-RPC operator surface
//! - [`config::NodeConfig`] layered node configuration

pub mod config;
pub mod node;
pub mod persistence;
pub mod rpc;
pub mod storage;

pub use config::NodeConfig;
pub use node::{ControlCommand, ControlPlane, InboundDecision, PlaneChannels, Rejection, TransportEvent};
pub use rpc::start_rpc_server;
pub use storage::RocksBlocklistStore;
