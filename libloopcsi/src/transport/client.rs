//! Unix-socket client used to issue CSI requests to a node plugin.

use std::path::{Path, PathBuf};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tracing::{debug, instrument};

use super::MAX_MESSAGE_SIZE;
use crate::error::CsiError;
use crate::message::CsiMessage;

/// A lightweight CSI client.  Every request opens a fresh connection to the
/// plugin socket.
#[derive(Debug, Clone)]
pub struct CsiClient {
    socket_path: PathBuf,
}

impl CsiClient {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Send a request and wait for the corresponding response.
    ///
    /// The JSON-serialized request is written and the write half shut down;
    /// the response is read until the server closes the connection.
    #[instrument(skip(self), fields(msg = %msg))]
    pub async fn request(&self, msg: &CsiMessage) -> Result<CsiMessage, CsiError> {
        let mut stream = UnixStream::connect(&self.socket_path)
            .await
            .map_err(|e| {
                CsiError::TransportError(format!("connect {}: {e}", self.socket_path.display()))
            })?;

        let payload = serde_json::to_vec(msg).map_err(CsiError::internal)?;
        stream
            .write_all(&payload)
            .await
            .map_err(CsiError::transport)?;
        stream.shutdown().await.map_err(CsiError::transport)?;

        let mut buf = Vec::new();
        stream
            .take(MAX_MESSAGE_SIZE + 1)
            .read_to_end(&mut buf)
            .await
            .map_err(CsiError::transport)?;
        if buf.len() as u64 > MAX_MESSAGE_SIZE {
            return Err(CsiError::TransportError(format!(
                "response larger than {MAX_MESSAGE_SIZE} bytes"
            )));
        }

        let response: CsiMessage = serde_json::from_slice(&buf).map_err(CsiError::transport)?;
        debug!(%response, "CSI response received");
        Ok(response)
    }

    /// Like [`Self::request`], but turns a [`CsiMessage::Error`] reply into
    /// `Err`.
    pub async fn call(&self, msg: &CsiMessage) -> Result<CsiMessage, CsiError> {
        match self.request(msg).await? {
            CsiMessage::Error(e) => Err(e),
            other => Ok(other),
        }
    }
}
