//! Loop-device backend for ephemeral inline volumes.
//!
//! [`LoopBackend`] answers the identity and controller services with static
//! data and forwards node publish/unpublish to a [`VolumeManager`].  It keeps
//! no per-volume state of its own.

use async_trait::async_trait;
use tracing::instrument;

use crate::controller::CsiController;
use crate::error::CsiError;
use crate::identity::CsiIdentity;
use crate::node::CsiNode;
use crate::types::*;
use crate::volume::VolumeManager;

/// Name the plugin registers under.
pub const PLUGIN_NAME: &str = "loop.csi.k8s.io";

/// CSI backend that provisions each volume as a loop-mounted image file.
pub struct LoopBackend {
    manager: VolumeManager,
    node_id: String,
}

impl LoopBackend {
    /// * `manager`: lifecycle manager bound to the process environment
    /// * `node_id`: identifier reported by `NodeGetInfo`
    pub fn new(manager: VolumeManager, node_id: impl Into<String>) -> Self {
        Self {
            manager,
            node_id: node_id.into(),
        }
    }

    pub fn manager(&self) -> &VolumeManager {
        &self.manager
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }
}

// ---------------------------------------------------------------------------
// CsiIdentity
// ---------------------------------------------------------------------------

#[async_trait]
impl CsiIdentity for LoopBackend {
    async fn get_plugin_info(&self) -> Result<PluginInfo, CsiError> {
        Ok(PluginInfo {
            name: PLUGIN_NAME.to_owned(),
            vendor_version: format!("v{}", env!("CARGO_PKG_VERSION")),
        })
    }

    async fn probe(&self) -> Result<bool, CsiError> {
        Ok(true)
    }

    async fn get_plugin_capabilities(&self) -> Result<Vec<PluginCapability>, CsiError> {
        Ok(Vec::new())
    }
}

// ---------------------------------------------------------------------------
// CsiController
// ---------------------------------------------------------------------------

#[async_trait]
impl CsiController for LoopBackend {
    async fn controller_get_capabilities(&self) -> Result<Vec<ControllerCapability>, CsiError> {
        Ok(Vec::new())
    }
}

// ---------------------------------------------------------------------------
// CsiNode
// ---------------------------------------------------------------------------

#[async_trait]
impl CsiNode for LoopBackend {
    #[instrument(skip(self), fields(volume_id = %req.volume_id))]
    async fn publish_volume(&self, req: NodePublishVolumeRequest) -> Result<(), CsiError> {
        let size = req.size().ok_or_else(|| {
            CsiError::InvalidArgument(format!("volume context is missing {SIZE_KEY:?}"))
        })?;
        self.manager
            .publish(&req.volume_id, &req.target_path, size)
            .await
    }

    async fn unpublish_volume(
        &self,
        volume_id: &VolumeId,
        target_path: &str,
    ) -> Result<(), CsiError> {
        self.manager.unpublish(volume_id, target_path).await
    }

    async fn node_get_capabilities(&self) -> Result<Vec<NodeCapability>, CsiError> {
        Ok(Vec::new())
    }

    async fn get_info(&self) -> Result<NodeInfo, CsiError> {
        Ok(NodeInfo {
            node_id: self.node_id.clone(),
            max_volumes: 0,
        })
    }
}
