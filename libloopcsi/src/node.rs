//! CSI Node service trait.
//!
//! The Node service runs on each worker node and handles the local filesystem
//! operations required to make an ephemeral volume available to a Pod:
//!
//! 1. **Publish**: create a sized image file, format it and loop-mount it
//!    at the target path.
//! 2. **Unpublish**: unmount, then delete the image file and target path.
//!
//! There is no staging step: ephemeral inline volumes are never staged.

use async_trait::async_trait;

use crate::error::CsiError;
use crate::types::{NodeCapability, NodeInfo, NodePublishVolumeRequest, VolumeId};

/// Node service: local provisioning and teardown.
#[async_trait]
pub trait CsiNode: Send + Sync {
    /// Publish a volume: provision the backing image and mount it at
    /// `req.target_path`.
    ///
    /// Fails fast: the first failing step aborts the call and nothing that
    /// was already created is rolled back.
    async fn publish_volume(&self, req: NodePublishVolumeRequest) -> Result<(), CsiError>;

    /// Unpublish a volume: unmount and delete everything publish created.
    ///
    /// This is idempotent and best-effort; it succeeds even when nothing
    /// exists for `volume_id`.
    async fn unpublish_volume(
        &self,
        volume_id: &VolumeId,
        target_path: &str,
    ) -> Result<(), CsiError>;

    /// Advertise the node capabilities of this plugin.
    async fn node_get_capabilities(&self) -> Result<Vec<NodeCapability>, CsiError>;

    /// Return information about the node on which this service is running.
    async fn get_info(&self) -> Result<NodeInfo, CsiError>;
}
