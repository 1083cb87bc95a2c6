//! Core CSI types: volume ids, requests, capabilities and plugin metadata.
//!
//! These types form the data model shared by the CSI traits, the transport
//! layer and the loop-device backend.  They are all
//! [`Serialize`]/[`Deserialize`] so they can cross the plugin socket as JSON.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Key in [`NodePublishVolumeRequest::volume_context`] carrying the
/// requested volume size as a quantity string (e.g. `"1Gi"`).
pub const SIZE_KEY: &str = "size";

// ---------------------------------------------------------------------------
// Volume identity
// ---------------------------------------------------------------------------

/// Opaque, caller-supplied identifier for a volume.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct VolumeId(pub String);

impl fmt::Display for VolumeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for VolumeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for VolumeId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// Request to publish an ephemeral volume at a target path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodePublishVolumeRequest {
    /// Volume to publish.
    pub volume_id: VolumeId,
    /// Directory the loop filesystem is mounted on,
    /// e.g. `/var/lib/kubelet/pods/<pod-uid>/volumes/<vol-name>/mount`.
    pub target_path: String,
    /// Inline volume attributes.  Must contain [`SIZE_KEY`].
    #[serde(default)]
    pub volume_context: HashMap<String, String>,
}

impl NodePublishVolumeRequest {
    /// Requested size literal, if the caller supplied one.
    pub fn size(&self) -> Option<&str> {
        self.volume_context.get(SIZE_KEY).map(String::as_str)
    }
}

// ---------------------------------------------------------------------------
// Plugin & node info
// ---------------------------------------------------------------------------

/// Information about the CSI plugin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginInfo {
    /// Plugin name, e.g. `"loop.csi.k8s.io"`.
    pub name: String,
    /// Vendor-provided version string.
    pub vendor_version: String,
}

/// Capabilities advertised by the CSI plugin.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum PluginCapability {
    /// Plugin provides a Controller service.
    ControllerService,
    /// Plugin supports volume topology constraints.
    VolumeAccessibilityConstraints,
}

/// Capabilities a Controller service may advertise.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ControllerCapability {
    CreateDeleteVolume,
    PublishUnpublishVolume,
    ListVolumes,
    GetCapacity,
    CreateDeleteSnapshot,
    ExpandVolume,
}

/// Capabilities a Node service may advertise.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum NodeCapability {
    StageUnstageVolume,
    GetVolumeStats,
    ExpandVolume,
}

/// Information about the node on which the CSI Node service runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeInfo {
    /// Unique node identifier.
    pub node_id: String,
    /// Maximum number of volumes the node can host; `0` means unbounded.
    #[serde(default)]
    pub max_volumes: u64,
}

// ---------------------------------------------------------------------------
// Unsupported surface
// ---------------------------------------------------------------------------

/// Every protocol method that is outside this driver's ephemeral-volume
/// surface.  All of them are answered with
/// [`CsiError::Unimplemented`](crate::CsiError::Unimplemented).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum UnsupportedRpc {
    // Node
    NodeStageVolume,
    NodeUnstageVolume,
    NodeGetVolumeStats,
    NodeExpandVolume,
    // Controller
    CreateVolume,
    DeleteVolume,
    ControllerPublishVolume,
    ControllerUnpublishVolume,
    ValidateVolumeCapabilities,
    ListVolumes,
    GetCapacity,
    CreateSnapshot,
    DeleteSnapshot,
    ListSnapshots,
    ControllerExpandVolume,
    ControllerGetVolume,
    ControllerModifyVolume,
}

impl UnsupportedRpc {
    /// Whether the method belongs to the Node service.
    pub fn is_node_rpc(self) -> bool {
        matches!(
            self,
            Self::NodeStageVolume
                | Self::NodeUnstageVolume
                | Self::NodeGetVolumeStats
                | Self::NodeExpandVolume
        )
    }
}

impl fmt::Display for UnsupportedRpc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}
