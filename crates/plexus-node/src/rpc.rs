//! JSON-RPC operator surface.
//!
//! Uses jsonrpsee 0.24 to expose the dashboard snapshot, blocklist management,
//! diagnostics and connection controls. All methods are thin wrappers around
//! [`ControlPlane`]; timestamps come from the node clock.

use std::sync::Arc;

use jsonrpsee::core::async_trait;
use jsonrpsee::proc_macros::rpc;
use jsonrpsee::server::{Server, ServerHandle};
use jsonrpsee::types::ErrorObjectOwned;
use serde::{Deserialize, Serialize};

use plexus_core::constants::SNAPSHOT_DIAGNOSTICS;
use plexus_core::error::PlexusError;
use plexus_core::types::{
    BlocklistView, ControlFlags, DiagnosticEvent, Direction, NodeDashboardSnapshot, PeerId, PersistenceStatus,
};

use crate::node::{now_ms, ControlPlane};

const INVALID_PARAMS: i32 = -32602;

/// Result of `unblockpeer`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnblockJson {
    pub removed: usize,
}

/// Parse a direction name, or `None` for an absent parameter.
pub fn parse_direction(direction: Option<&str>) -> Result<Option<Direction>, ErrorObjectOwned> {
    match direction {
        None => Ok(None),
        Some(s) => Direction::parse(s)
            .map(Some)
            .ok_or_else(|| rpc_error(INVALID_PARAMS, "direction must be inbound, outbound or all")),
    }
}

/// Create a JSON-RPC error.
fn rpc_error(code: i32, msg: &str) -> ErrorObjectOwned {
    ErrorObjectOwned::owned(code, msg.to_string(), None::<()>)
}

/// The Plexus operator JSON-RPC interface.
#[rpc(server)]
pub trait PlexusRpc {
    /// Returns a freshly built dashboard snapshot.
    #[method(name = "getsnapshot")]
    async fn get_snapshot(&self) -> Result<NodeDashboardSnapshot, ErrorObjectOwned>;

    /// Returns the blocklist partitioned by direction.
    #[method(name = "getblocklist")]
    async fn get_blocklist(&self) -> Result<BlocklistView, ErrorObjectOwned>;

    /// Blocks a peer. `direction` defaults to `all`.
    #[method(name = "blockpeer")]
    async fn block_peer(
        &self,
        peer_id: String,
        direction: Option<String>,
        reason: Option<String>,
    ) -> Result<bool, ErrorObjectOwned>;

    /// Removes one entry, or every entry for the peer when `direction` is omitted.
    #[method(name = "unblockpeer")]
    async fn unblock_peer(&self, peer_id: String, direction: Option<String>) -> Result<UnblockJson, ErrorObjectOwned>;

    /// Returns up to `limit` recent diagnostics, newest first.
    #[method(name = "getdiagnostics")]
    async fn get_diagnostics(&self, limit: Option<usize>) -> Result<Vec<DiagnosticEvent>, ErrorObjectOwned>;

    /// Returns the blocklist persistence status.
    #[method(name = "getpersistencestatus")]
    async fn get_persistence_status(&self) -> Result<PersistenceStatus, ErrorObjectOwned>;

    /// Replaces the connection control flags and returns them.
    #[method(name = "setcontrols")]
    async fn set_controls(&self, controls: ControlFlags) -> Result<ControlFlags, ErrorObjectOwned>;

    /// Enables or disables the rendezvous mesh.
    #[method(name = "setmeshenabled")]
    async fn set_mesh_enabled(&self, enabled: bool) -> Result<bool, ErrorObjectOwned>;
}

/// Implementation of the Plexus JSON-RPC server.
pub struct RpcServerImpl {
    plane: Arc<ControlPlane>,
}

impl RpcServerImpl {
    pub fn new(plane: Arc<ControlPlane>) -> Self {
        Self { plane }
    }
}

#[async_trait]
impl PlexusRpcServer for RpcServerImpl {
    async fn get_snapshot(&self) -> Result<NodeDashboardSnapshot, ErrorObjectOwned> {
        Ok(self.plane.snapshot(now_ms()))
    }

    async fn get_blocklist(&self) -> Result<BlocklistView, ErrorObjectOwned> {
        Ok(self.plane.blocklist())
    }

    async fn block_peer(
        &self,
        peer_id: String,
        direction: Option<String>,
        reason: Option<String>,
    ) -> Result<bool, ErrorObjectOwned> {
        let direction = parse_direction(direction.as_deref())?.unwrap_or(Direction::All);
        self.plane
            .block(&PeerId::new(peer_id), direction, reason, now_ms())
            .map_err(|e| rpc_error(INVALID_PARAMS, &e.to_string()))?;
        Ok(true)
    }

    async fn unblock_peer(&self, peer_id: String, direction: Option<String>) -> Result<UnblockJson, ErrorObjectOwned> {
        let direction = parse_direction(direction.as_deref())?;
        let removed = self
            .plane
            .unblock(&PeerId::new(peer_id), direction, now_ms())
            .map_err(|e| rpc_error(INVALID_PARAMS, &e.to_string()))?;
        Ok(UnblockJson { removed })
    }

    async fn get_diagnostics(&self, limit: Option<usize>) -> Result<Vec<DiagnosticEvent>, ErrorObjectOwned> {
        Ok(self.plane.diagnostics(limit.unwrap_or(SNAPSHOT_DIAGNOSTICS)))
    }

    async fn get_persistence_status(&self) -> Result<PersistenceStatus, ErrorObjectOwned> {
        Ok(self.plane.persistence_status())
    }

    async fn set_controls(&self, controls: ControlFlags) -> Result<ControlFlags, ErrorObjectOwned> {
        self.plane.set_controls(controls, now_ms());
        Ok(self.plane.controls())
    }

    async fn set_mesh_enabled(&self, enabled: bool) -> Result<bool, ErrorObjectOwned> {
        self.plane.set_mesh_enabled(enabled, now_ms());
        Ok(self.plane.snapshot(now_ms()).rendezvous.enabled)
    }
}

/// Start the JSON-RPC server on `addr`.
pub async fn start_rpc_server(addr: &str, plane: Arc<ControlPlane>) -> Result<ServerHandle, PlexusError> {
    let server = Server::builder()
        .build(addr)
        .await
        .map_err(|e| PlexusError::Rpc(format!("RPC server error: {e}")))?;

    let rpc_impl = RpcServerImpl::new(plane);
    Ok(server.start(rpc_impl.into_rpc()))
}

#[cfg(test)]
mod tests {
    use jsonrpsee::core::client::ClientT;
    use jsonrpsee::http_client::HttpClientBuilder;
    use jsonrpsee::rpc_params;
    use plexus_core::memory::MemoryBlocklistStore;
    use plexus_network::{MeshConfig, RendezvousMeshConfig};

    use super::*;

    #[test]
    fn parse_direction_names() {
        assert_eq!(parse_direction(None).unwrap(), None);
        assert_eq!(parse_direction(Some("inbound")).unwrap(), Some(Direction::Inbound));
        assert_eq!(parse_direction(Some("all")).unwrap(), Some(Direction::All));
    }

    #[test]
    fn parse_direction_rejects_unknown() {
        let err = parse_direction(Some("both")).unwrap_err();
        assert_eq!(err.code(), INVALID_PARAMS);
        assert!(err.message().contains("inbound"));
    }

    async fn serve() -> (ServerHandle, String, Arc<ControlPlane>) {
        let mesh = MeshConfig {
            rendezvous: RendezvousMeshConfig { beacons: vec!["wss://b".into()], ..RendezvousMeshConfig::default() },
            ..MeshConfig::default()
        };
        let (plane, _channels) = ControlPlane::open(mesh, Arc::new(MemoryBlocklistStore::new()), now_ms())
            .await
            .unwrap();
        let server = Server::builder().build("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr().unwrap();
        let handle = server.start(RpcServerImpl::new(Arc::clone(&plane)).into_rpc());
        (handle, format!("http://{addr}"), plane)
    }

    #[tokio::test]
    async fn block_and_list_over_http() {
        let (handle, url, _plane) = serve().await;
        let client = HttpClientBuilder::default().build(&url).unwrap();

        let ok: bool = client
            .request("blockpeer", rpc_params!["peer-1", "inbound", "spam"])
            .await
            .unwrap();
        assert!(ok);
        let view: BlocklistView = client.request("getblocklist", rpc_params![]).await.unwrap();
        assert_eq!(view.inbound.len(), 1);

        let res: UnblockJson = client.request("unblockpeer", rpc_params!["peer-1"]).await.unwrap();
        assert_eq!(res.removed, 1);

        handle.stop().unwrap();
    }

    #[tokio::test]
    async fn empty_peer_is_an_error() {
        let (handle, url, _plane) = serve().await;
        let client = HttpClientBuilder::default().build(&url).unwrap();
        let res: Result<bool, _> = client.request("blockpeer", rpc_params!["", "all"]).await;
        assert!(res.is_err());
        handle.stop().unwrap();
    }

    #[tokio::test]
    async fn mesh_toggle_and_snapshot() {
        let (handle, url, _plane) = serve().await;
        let client = HttpClientBuilder::default().build(&url).unwrap();
        let enabled: bool = client.request("setmeshenabled", rpc_params![false]).await.unwrap();
        assert!(!enabled);
        let snap: serde_json::Value = client.request("getsnapshot", rpc_params![]).await.unwrap();
        assert_eq!(snap["rendezvous"]["enabled"], false);
        assert_eq!(snap["rendezvous"]["disabledReason"], "manual");
        handle.stop().unwrap();
    }
}
