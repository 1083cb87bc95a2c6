//! CSI protocol messages exchanged over the plugin socket.
//!
//! [`CsiMessage`] is the top-level envelope for all request and response
//! variants exchanged between the orchestrator-side client and the plugin.
//! Every protocol method the driver does not implement travels as
//! [`CsiMessage::Unsupported`], so the dispatcher answers all of them from a
//! single branch.

use serde::{Deserialize, Serialize};

use crate::error::CsiError;
use crate::types::*;

/// Top-level message envelope.
///
/// Each connection carries exactly one request followed by one response.
/// The client sends a *request* variant and the server replies with the
/// corresponding *response* variant (or [`CsiMessage::Error`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CsiMessage {
    // ----- Requests --------------------------------------------------------
    /// Health probe (Identity).
    Probe,
    /// Query plugin info (Identity).
    GetPluginInfo,
    /// Query plugin capabilities (Identity).
    GetPluginCapabilities,

    /// Query controller capabilities (Controller).
    GetControllerCapabilities,

    /// Create and mount an ephemeral volume (Node).
    PublishVolume(NodePublishVolumeRequest),
    /// Unmount and delete an ephemeral volume (Node).
    UnpublishVolume {
        volume_id: VolumeId,
        target_path: String,
    },
    /// Query node capabilities (Node).
    GetNodeCapabilities,
    /// Query node info (Node).
    GetNodeInfo,

    /// Any protocol method outside the supported surface.
    Unsupported(UnsupportedRpc),

    // ----- Responses -------------------------------------------------------
    /// Plugin information.
    PluginInfoResponse(PluginInfo),
    /// Plugin capabilities.
    PluginCapabilitiesResponse(Vec<PluginCapability>),
    /// Controller capabilities.
    ControllerCapabilitiesResponse(Vec<ControllerCapability>),
    /// Node capabilities.
    NodeCapabilitiesResponse(Vec<NodeCapability>),
    /// Node information.
    NodeInfoResponse(NodeInfo),

    /// Generic success acknowledgement (no payload).
    Ok,
    /// Probe result.
    ProbeResult(bool),
    /// An error occurred.
    Error(CsiError),
}

impl std::fmt::Display for CsiMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Probe => f.write_str("Probe"),
            Self::GetPluginInfo => f.write_str("GetPluginInfo"),
            Self::GetPluginCapabilities => f.write_str("GetPluginCapabilities"),
            Self::GetControllerCapabilities => f.write_str("GetControllerCapabilities"),
            Self::PublishVolume(req) => write!(f, "PublishVolume({})", req.volume_id),
            Self::UnpublishVolume { volume_id, .. } => {
                write!(f, "UnpublishVolume({})", volume_id)
            }
            Self::GetNodeCapabilities => f.write_str("GetNodeCapabilities"),
            Self::GetNodeInfo => f.write_str("GetNodeInfo"),
            Self::Unsupported(rpc) => write!(f, "Unsupported({})", rpc),
            Self::PluginInfoResponse(info) => {
                write!(f, "PluginInfo(name={})", info.name)
            }
            Self::PluginCapabilitiesResponse(caps) => {
                write!(f, "PluginCapabilities(count={})", caps.len())
            }
            Self::ControllerCapabilitiesResponse(caps) => {
                write!(f, "ControllerCapabilities(count={})", caps.len())
            }
            Self::NodeCapabilitiesResponse(caps) => {
                write!(f, "NodeCapabilities(count={})", caps.len())
            }
            Self::NodeInfoResponse(info) => write!(f, "NodeInfo({})", info.node_id),
            Self::Ok => f.write_str("Ok"),
            Self::ProbeResult(ok) => write!(f, "ProbeResult({})", ok),
            Self::Error(e) => write!(f, "Error({})", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_request_serde() {
        let msg = CsiMessage::Unsupported(UnsupportedRpc::NodeExpandVolume);
        let json = serde_json::to_string(&msg).expect("serialize");
        let de: CsiMessage = serde_json::from_str(&json).expect("deserialize");
        assert!(matches!(
            de,
            CsiMessage::Unsupported(UnsupportedRpc::NodeExpandVolume)
        ));
    }

    #[test]
    fn error_message_keeps_variant() {
        let msg = CsiMessage::Error(CsiError::InvalidArgument("bad".into()));
        let json = serde_json::to_string(&msg).expect("serialize");
        let de: CsiMessage = serde_json::from_str(&json).expect("deserialize");
        assert!(matches!(de, CsiMessage::Error(CsiError::InvalidArgument(_))));
    }

    #[test]
    fn display_formatting() {
        assert_eq!(CsiMessage::Ok.to_string(), "Ok");
        assert_eq!(CsiMessage::Probe.to_string(), "Probe");
        let msg = CsiMessage::UnpublishVolume {
            volume_id: "vol-9".into(),
            target_path: "/mnt/x".into(),
        };
        assert_eq!(msg.to_string(), "UnpublishVolume(vol-9)");
    }
}
