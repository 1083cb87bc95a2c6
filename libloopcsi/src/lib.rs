//! # libloopcsi: CSI node plugin for loop-mounted ephemeral volumes
//!
//! `libloopcsi` provisions ephemeral inline volumes by creating a sparse
//! image file per volume, formatting it and loop-mounting it at the target
//! path chosen by the orchestrator.  Teardown unmounts the filesystem and
//! deletes both the image and the target directory.
//!
//! CSI messages travel as JSON over a Unix-domain socket.  The crate follows
//! the usual conventions: Tokio async runtime, `tracing` for observability,
//! `thiserror` for structured errors.
//!
//! ## Module overview
//!
//! | Module | Purpose |
//! |---|---|
//! | [`types`] | Core data model: `VolumeId`, requests, capabilities, node info. |
//! | [`error`] | [`CsiError`] enum covering all failure modes. |
//! | [`message`] | [`CsiMessage`] protocol envelope for the socket transport. |
//! | [`identity`] | [`CsiIdentity`] trait: plugin discovery & health. |
//! | [`controller`] | [`CsiController`] trait: capability negotiation. |
//! | [`node`] | [`CsiNode`] trait: publish and unpublish. |
//! | [`env`] | Filesystem, path mapping and command execution profiles. |
//! | [`quantity`] | Kubernetes quantity strings to byte counts. |
//! | [`volume`] | [`VolumeManager`]: the publish / unpublish lifecycle. |
//! | [`backend`] | [`LoopBackend`]: the three CSI services over a `VolumeManager`. |
//! | [`transport`] | Unix-socket client/server. |

pub mod backend;
pub mod controller;
pub mod env;
pub mod error;
pub mod identity;
pub mod message;
pub mod node;
pub mod quantity;
pub mod transport;
pub mod types;
pub mod volume;

// Re-export the most commonly used items at crate root for convenience.
pub use backend::LoopBackend;
pub use controller::CsiController;
pub use env::Environment;
pub use error::CsiError;
pub use identity::CsiIdentity;
pub use message::CsiMessage;
pub use node::CsiNode;
pub use transport::client::CsiClient;
pub use transport::server::CsiServer;
pub use types::*;
pub use volume::{LoopConfig, VolumeManager};
