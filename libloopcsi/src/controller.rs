//! CSI Controller service trait.
//!
//! Ephemeral inline volumes never go through the controller, so the only
//! operation a driver has to answer is capability negotiation.  Every other
//! controller RPC arrives as an
//! [`UnsupportedRpc`](crate::types::UnsupportedRpc) and is rejected by the
//! transport dispatcher.

use async_trait::async_trait;

use crate::error::CsiError;
use crate::types::ControllerCapability;

/// Controller service: capability negotiation only.
#[async_trait]
pub trait CsiController: Send + Sync {
    /// Advertise the controller capabilities of this plugin.
    async fn controller_get_capabilities(&self) -> Result<Vec<ControllerCapability>, CsiError>;
}
