//! CSI error types.
//!
//! All errors surfaced to callers of the plugin are represented by the
//! [`CsiError`] enum, which derives [`thiserror::Error`] and also implements
//! [`Serialize`]/[`Deserialize`] so errors can travel across the socket
//! transport unchanged.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::UnsupportedRpc;

/// Unified error type for CSI operations.
#[derive(Debug, Error, Serialize, Deserialize, Clone)]
pub enum CsiError {
    /// The caller supplied an invalid argument, e.g. a malformed size.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Creating or sizing the backing image file failed.
    #[error("failed to create backing file {path}: {reason}")]
    BackingFileFailed {
        /// Path of the backing image.
        path: String,
        /// Human-readable failure reason.
        reason: String,
    },

    /// Formatting the backing image failed.
    #[error("failed to format {path}: {reason}")]
    FormatFailed {
        /// Path of the backing image.
        path: String,
        /// Human-readable failure reason.
        reason: String,
    },

    /// A mount operation (or preparing its target directory) failed.
    #[error("failed to mount at {path}: {reason}")]
    MountFailed {
        /// Filesystem path where the mount was attempted.
        path: String,
        /// Human-readable failure reason.
        reason: String,
    },

    /// An unmount operation failed.
    #[error("failed to unmount {path}: {reason}")]
    UnmountFailed {
        /// Filesystem path where the unmount was attempted.
        path: String,
        /// Human-readable failure reason.
        reason: String,
    },

    /// The method is part of the protocol but not of this driver's surface.
    #[error("not implemented: {0}")]
    Unimplemented(UnsupportedRpc),

    /// A socket / transport-level error.
    #[error("transport error: {0}")]
    TransportError(String),

    /// An unclassified internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl CsiError {
    /// Create a [`CsiError::TransportError`] from anything that implements
    /// [`std::fmt::Display`].
    pub fn transport<E: fmt::Display>(e: E) -> Self {
        Self::TransportError(e.to_string())
    }

    /// Create a [`CsiError::Internal`] from anything that implements
    /// [`std::fmt::Display`].
    pub fn internal<E: fmt::Display>(e: E) -> Self {
        Self::Internal(e.to_string())
    }

    /// Status code a gRPC front-end would report for this error.
    pub fn code(&self) -> StatusCode {
        match self {
            Self::InvalidArgument(_) => StatusCode::InvalidArgument,
            Self::Unimplemented(_) => StatusCode::Unimplemented,
            Self::TransportError(_) => StatusCode::Unavailable,
            Self::BackingFileFailed { .. }
            | Self::FormatFailed { .. }
            | Self::MountFailed { .. }
            | Self::UnmountFailed { .. }
            | Self::Internal(_) => StatusCode::Internal,
        }
    }
}

/// The subset of gRPC status codes this plugin produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatusCode {
    /// Client specified an invalid argument.
    InvalidArgument = 3,
    /// Operation is not implemented or not supported.
    Unimplemented = 12,
    /// Internal error.
    Internal = 13,
    /// The service is currently unavailable.
    Unavailable = 14,
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::InvalidArgument => "InvalidArgument",
            Self::Unimplemented => "Unimplemented",
            Self::Internal => "Internal",
            Self::Unavailable => "Unavailable",
        };
        f.write_str(name)
    }
}
