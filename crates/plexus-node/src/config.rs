//! Node configuration for the Plexus control plane.
//!
//! [`NodeConfig`] is layered with the `config` crate: built-in defaults, then
//! an optional TOML file, then `PLEXUS_*` environment variables. Nested keys
//! use a double underscore, e.g. `PLEXUS_MESH__POLICY__STALE_AFTER_MS`.
//! Any failure to load or validate is fatal at startup.

use std::path::{Path, PathBuf};

use config::builder::DefaultState;
use config::{ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use plexus_core::constants::DEFAULT_RPC_PORT;
use plexus_core::error::ConfigError;
use plexus_network::MeshConfig;

/// Configuration for a control plane node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Root directory for all persistent data.
    pub data_dir: PathBuf,
    /// IP address for the JSON-RPC server to bind to.
    pub rpc_bind: String,
    /// Port for the JSON-RPC server.
    pub rpc_port: u16,
    /// Log level filter string (e.g. "info", "debug", "plexus_network=trace").
    pub log_level: String,
    /// Rendezvous endpoints and health/backoff thresholds.
    pub mesh: MeshConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        let data_dir = dirs::data_dir().unwrap_or_else(|| PathBuf::from(".")).join("plexus");

        Self {
            data_dir,
            rpc_bind: "127.0.0.1".to_string(),
            rpc_port: DEFAULT_RPC_PORT,
            log_level: "info".to_string(),
            mesh: MeshConfig::default(),
        }
    }
}

impl NodeConfig {
    /// Preset for the public test mesh, stored apart from mainnet data.
    pub fn testnet() -> Self {
        let base = Self::default();
        Self {
            data_dir: base.data_dir.join("testnet"),
            rpc_port: DEFAULT_RPC_PORT + 1,
            mesh: MeshConfig::testnet(),
            ..base
        }
    }

    /// Load from defaults, the optional TOML file at `path`, and the environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::from_builder(Self::builder(&Self::default(), path)?)
    }

    /// The layered source stack without building it: `base`, then the file,
    /// then the environment. Callers add overrides on top.
    pub fn builder(base: &NodeConfig, path: Option<&Path>) -> Result<ConfigBuilder<DefaultState>, ConfigError> {
        let base = config::Config::try_from(base).map_err(|e| ConfigError::Load(e.to_string()))?;
        let mut builder = config::Config::builder().add_source(base);
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).format(FileFormat::Toml).required(true));
        }
        Ok(builder.add_source(
            Environment::with_prefix("PLEXUS")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("mesh.rendezvous.beacons")
                .with_list_parse_key("mesh.rendezvous.capsules")
                .with_list_parse_key("mesh.rendezvous.trusted_ticket_public_keys")
                .with_list_parse_key("mesh.rendezvous.trusted_capsule_public_keys"),
        ))
    }

    /// Build, deserialize and validate.
    pub fn from_builder(builder: ConfigBuilder<DefaultState>) -> Result<Self, ConfigError> {
        let cfg: Self = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| ConfigError::Load(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rpc_bind.trim().is_empty() {
            return Err(ConfigError::Invalid { field: "rpc_bind", reason: "must be non-empty".into() });
        }
        if self.rpc_port == 0 {
            return Err(ConfigError::Invalid { field: "rpc_port", reason: "must be non-zero".into() });
        }
        if self.log_level.trim().is_empty() {
            return Err(ConfigError::Invalid { field: "log_level", reason: "must be non-empty".into() });
        }
        self.mesh.validate()
    }

    /// Path to the RocksDB blocklist directory.
    pub fn blocklist_db_path(&self) -> PathBuf {
        self.data_dir.join("blocklist")
    }

    /// Socket address string for the RPC server.
    pub fn rpc_addr(&self) -> String {
        format!("{}:{}", self.rpc_bind, self.rpc_port)
    }
}
