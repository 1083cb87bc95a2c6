//! Unix-socket server that runs on each worker node and dispatches incoming
//! CSI requests to the appropriate trait implementations.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, error, info, instrument, warn};

use super::MAX_MESSAGE_SIZE;
use crate::controller::CsiController;
use crate::error::{CsiError, StatusCode};
use crate::identity::CsiIdentity;
use crate::message::CsiMessage;
use crate::node::CsiNode;

/// A CSI server that accepts socket connections and dispatches
/// [`CsiMessage`] requests to an [`CsiIdentity`] + [`CsiController`] +
/// [`CsiNode`] implementation.
pub struct CsiServer<T> {
    listener: UnixListener,
    socket_path: PathBuf,
    handler: Arc<T>,
}

impl<T> CsiServer<T>
where
    T: CsiIdentity + CsiController + CsiNode + 'static,
{
    /// Bind a listener at `socket_path`.
    ///
    /// A socket file left behind by a previous run is removed first; the
    /// parent directory must already exist.
    pub async fn bind(socket_path: impl Into<PathBuf>, handler: Arc<T>) -> Result<Self, CsiError> {
        let socket_path = socket_path.into();
        match tokio::fs::remove_file(&socket_path).await {
            Ok(()) => debug!(path = %socket_path.display(), "removed stale socket"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(CsiError::TransportError(format!(
                    "remove stale socket {}: {e}",
                    socket_path.display()
                )));
            }
        }

        let listener = UnixListener::bind(&socket_path).map_err(|e| {
            CsiError::TransportError(format!("bind {}: {e}", socket_path.display()))
        })?;
        info!(path = %socket_path.display(), "CSI server listening");
        Ok(Self {
            listener,
            socket_path,
            handler,
        })
    }

    /// Accept connections in a loop.  Each connection is handled on its own
    /// Tokio task.
    pub async fn serve(&self) -> Result<(), CsiError> {
        loop {
            let (stream, _) = self.listener.accept().await.map_err(CsiError::transport)?;
            let handler = Arc::clone(&self.handler);
            tokio::spawn(async move {
                if let Err(e) = Self::handle_connection(stream, &handler).await {
                    error!(error = %e, "CSI connection handler error");
                }
            });
        }
    }

    /// Process a single connection: read request → dispatch → write response.
    #[instrument(skip_all)]
    async fn handle_connection(mut stream: UnixStream, handler: &T) -> Result<(), CsiError> {
        let mut buf = Vec::new();
        (&mut stream)
            .take(MAX_MESSAGE_SIZE + 1)
            .read_to_end(&mut buf)
            .await
            .map_err(CsiError::transport)?;

        let response = if buf.len() as u64 > MAX_MESSAGE_SIZE {
            warn!(len = buf.len(), "request exceeds size limit");
            CsiMessage::Error(CsiError::InvalidArgument(format!(
                "request larger than {MAX_MESSAGE_SIZE} bytes"
            )))
        } else {
            match serde_json::from_slice::<CsiMessage>(&buf) {
                Ok(request) => {
                    debug!(%request, "CSI request received");
                    let response = Self::dispatch(handler, request).await;
                    if let CsiMessage::Error(e) = &response {
                        log_failure(e);
                    }
                    response
                }
                Err(e) => {
                    warn!(error = %e, "malformed CSI request");
                    CsiMessage::Error(CsiError::InvalidArgument(format!("malformed request: {e}")))
                }
            }
        };

        let payload = serde_json::to_vec(&response).map_err(CsiError::internal)?;
        stream
            .write_all(&payload)
            .await
            .map_err(CsiError::transport)?;
        stream.shutdown().await.map_err(CsiError::transport)?;
        Ok(())
    }

    /// Map a [`CsiMessage`] request to the correct trait method call and
    /// wrap the result in a response [`CsiMessage`].
    pub async fn dispatch(handler: &T, request: CsiMessage) -> CsiMessage {
        match request {
            // --- Identity ---------------------------------------------------
            CsiMessage::Probe => match handler.probe().await {
                Ok(ok) => CsiMessage::ProbeResult(ok),
                Err(e) => CsiMessage::Error(e),
            },
            CsiMessage::GetPluginInfo => match handler.get_plugin_info().await {
                Ok(info) => CsiMessage::PluginInfoResponse(info),
                Err(e) => CsiMessage::Error(e),
            },
            CsiMessage::GetPluginCapabilities => match handler.get_plugin_capabilities().await {
                Ok(caps) => CsiMessage::PluginCapabilitiesResponse(caps),
                Err(e) => CsiMessage::Error(e),
            },

            // --- Controller -------------------------------------------------
            CsiMessage::GetControllerCapabilities => {
                match handler.controller_get_capabilities().await {
                    Ok(caps) => CsiMessage::ControllerCapabilitiesResponse(caps),
                    Err(e) => CsiMessage::Error(e),
                }
            }

            // --- Node -------------------------------------------------------
            CsiMessage::PublishVolume(req) => match handler.publish_volume(req).await {
                Ok(()) => CsiMessage::Ok,
                Err(e) => CsiMessage::Error(e),
            },
            CsiMessage::UnpublishVolume {
                volume_id,
                target_path,
            } => match handler.unpublish_volume(&volume_id, &target_path).await {
                Ok(()) => CsiMessage::Ok,
                Err(e) => CsiMessage::Error(e),
            },
            CsiMessage::GetNodeCapabilities => match handler.node_get_capabilities().await {
                Ok(caps) => CsiMessage::NodeCapabilitiesResponse(caps),
                Err(e) => CsiMessage::Error(e),
            },
            CsiMessage::GetNodeInfo => match handler.get_info().await {
                Ok(info) => CsiMessage::NodeInfoResponse(info),
                Err(e) => CsiMessage::Error(e),
            },

            // --- Outside the supported surface ------------------------------
            CsiMessage::Unsupported(rpc) => {
                let service = if rpc.is_node_rpc() { "node" } else { "controller" };
                debug!(%rpc, service, "rejecting unimplemented RPC");
                CsiMessage::Error(CsiError::Unimplemented(rpc))
            }

            // --- Response variants should never arrive as requests ----------
            other => {
                warn!(msg = %other, "unexpected message variant received as request");
                CsiMessage::Error(CsiError::InvalidArgument(format!(
                    "unexpected message: {other}"
                )))
            }
        }
    }

    /// Path of the listening socket.
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }
}

/// Log a failed request at a level matching its status code.
fn log_failure(e: &CsiError) {
    match e.code() {
        StatusCode::InvalidArgument | StatusCode::Unimplemented => {
            debug!(code = %e.code(), error = %e, "CSI request rejected");
        }
        StatusCode::Internal | StatusCode::Unavailable => {
            warn!(code = %e.code(), error = %e, "CSI request failed");
        }
    }
}
