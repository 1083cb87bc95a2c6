//! Loop-volume lifecycle.
//!
//! [`VolumeManager`] turns a `(volume id, size, target path)` tuple into a
//! mounted filesystem and back:
//!
//! ```text
//! publish:    parse size ─▶ mkdir backing dir ─▶ truncate <id>.img
//!             ─▶ mkfs.<fs> ─▶ mkdir target ─▶ mount -o loop
//! unpublish:  umount (warn only) ─▶ rm <id>.img ─▶ rmdir target
//! ```
//!
//! The filesystem is the only record of whether a volume exists.  The only
//! in-memory state is a table of per-volume locks that serialises calls for
//! the same id; entries disappear once nobody holds them.
//!
//! # On-disk layout
//!
//! ```text
//! <backing_dir>/
//!   <volume-id>.img   # sparse image, formatted and loop-mounted at the target
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, instrument, warn};

use crate::env::{CommandLine, Environment};
use crate::error::CsiError;
use crate::quantity::parse_quantity;
use crate::types::VolumeId;

/// Directory holding one backing image per volume.
pub const DEFAULT_BACKING_DIR: &str = "/var/lib/csi-loop";

/// Filesystem the images are formatted with.
pub const DEFAULT_FS_TYPE: &str = "btrfs";

/// Extension of every backing image.
pub const IMAGE_EXTENSION: &str = "img";

const DIR_MODE: u32 = 0o755;

/// Where images live and how they are formatted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopConfig {
    /// Virtual directory holding `<volume-id>.img` files.
    pub backing_dir: PathBuf,
    /// Filesystem type; formatting runs `mkfs.<fs_type>`.
    pub fs_type: String,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            backing_dir: PathBuf::from(DEFAULT_BACKING_DIR),
            fs_type: DEFAULT_FS_TYPE.to_owned(),
        }
    }
}

/// Orchestrates publish / unpublish over an [`Environment`].
pub struct VolumeManager {
    env: Environment,
    config: LoopConfig,
    /// Per-volume locks; present only while some call holds or awaits one.
    locks: DashMap<VolumeId, Arc<Mutex<()>>>,
}

impl VolumeManager {
    pub fn new(env: Environment, config: LoopConfig) -> Self {
        Self {
            env,
            config,
            locks: DashMap::new(),
        }
    }

    pub fn config(&self) -> &LoopConfig {
        &self.config
    }

    pub fn env(&self) -> &Environment {
        &self.env
    }

    /// Virtual path of the backing image for `volume_id`.
    pub fn backing_file(&self, volume_id: &VolumeId) -> PathBuf {
        self.config
            .backing_dir
            .join(format!("{}.{}", volume_id.0, IMAGE_EXTENSION))
    }

    /// Number of volumes with a call currently in flight.
    pub fn in_flight(&self) -> usize {
        self.locks.len()
    }

    async fn lock(&self, volume_id: &VolumeId) -> VolumeLock<'_> {
        let lock = self.locks.entry(volume_id.clone()).or_default().clone();
        let guard = lock.lock_owned().await;
        VolumeLock {
            locks: &self.locks,
            volume_id: volume_id.clone(),
            guard: Some(guard),
        }
    }

    /// Provision and mount the volume.
    ///
    /// Steps run strictly in order and the first failure is returned as-is.
    /// Nothing created by earlier steps is rolled back: after a failed mount
    /// the formatted image stays on disk until [`Self::unpublish`] runs.
    ///
    /// The image is reformatted on every call, so publishing an id again
    /// destroys its previous contents.  The one exception is a target that is
    /// already a mount point, which is treated as a retry of a publish that
    /// succeeded and left untouched.
    #[instrument(skip(self), fields(volume_id = %volume_id))]
    pub async fn publish(
        &self,
        volume_id: &VolumeId,
        target_path: &str,
        size: &str,
    ) -> Result<(), CsiError> {
        require_non_empty(volume_id, target_path)?;
        let size_bytes = parse_quantity(size)?;
        let backing_file = self.backing_file(volume_id);
        let target = Path::new(target_path);

        let _lock = self.lock(volume_id).await;
        debug!(size_bytes, backing_file = %backing_file.display(), "publishing");

        if self.is_mounted(target).await {
            info!(target_path, "target already mounted, assuming idempotent retry");
            return Ok(());
        }

        self.env
            .fs()
            .create_dir_all(&self.config.backing_dir, DIR_MODE)
            .await
            .map_err(|e| CsiError::BackingFileFailed {
                path: self.config.backing_dir.display().to_string(),
                reason: format!("create backing directory: {e}"),
            })?;

        self.env
            .fs()
            .truncate(&backing_file, size_bytes)
            .await
            .map_err(|e| CsiError::BackingFileFailed {
                path: backing_file.display().to_string(),
                reason: e.to_string(),
            })?;
        debug!(size_bytes, "backing file sized");

        let real_backing = self.env.real_path(&backing_file);
        let mkfs = CommandLine::new(format!("mkfs.{}", self.config.fs_type))
            .arg(force_flag(&self.config.fs_type))
            .arg(&real_backing);
        self.env
            .run(&mkfs)
            .await
            .map_err(|e| CsiError::FormatFailed {
                path: backing_file.display().to_string(),
                reason: e.to_string(),
            })?;
        debug!(fs_type = %self.config.fs_type, "backing file formatted");

        self.env
            .fs()
            .create_dir_all(target, DIR_MODE)
            .await
            .map_err(|e| CsiError::MountFailed {
                path: target_path.to_owned(),
                reason: format!("create target directory: {e}"),
            })?;

        let mount = CommandLine::new("mount")
            .args(["-o", "loop"])
            .arg(&real_backing)
            .arg(self.env.real_path(target));
        self.env
            .run(&mount)
            .await
            .map_err(|e| CsiError::MountFailed {
                path: target_path.to_owned(),
                reason: e.to_string(),
            })?;

        info!(target_path, size_bytes, "volume published");
        Ok(())
    }

    /// Unmount the volume and delete its image and target directory.
    ///
    /// Best-effort and idempotent: every step is attempted, failures are
    /// logged, and the call succeeds even if nothing existed.
    #[instrument(skip(self), fields(volume_id = %volume_id))]
    pub async fn unpublish(
        &self,
        volume_id: &VolumeId,
        target_path: &str,
    ) -> Result<(), CsiError> {
        require_non_empty(volume_id, target_path)?;
        let backing_file = self.backing_file(volume_id);
        let target = Path::new(target_path);

        let _lock = self.lock(volume_id).await;

        let umount = CommandLine::new("umount").arg(self.env.real_path(target));
        if let Err(e) = self.env.run(&umount).await {
            warn!(target_path, error = %e, "failed to unmount (may not be mounted)");
        }

        if let Err(e) = self.env.fs().remove(&backing_file).await {
            warn!(
                backing_file = %backing_file.display(),
                error = %e,
                "failed to remove backing file",
            );
        }

        if let Err(e) = self.env.fs().remove(target).await {
            warn!(target_path, error = %e, "failed to remove target directory");
        }

        info!(target_path, "volume unpublished");
        Ok(())
    }

    /// `mountpoint -q` exits zero only for an active mount point.
    async fn is_mounted(&self, target: &Path) -> bool {
        if !self.env.fs().dir_exists(target).await {
            return false;
        }
        let check = CommandLine::new("mountpoint")
            .arg("-q")
            .arg(self.env.real_path(target));
        self.env.run(&check).await.is_ok()
    }
}

/// Holds a volume's lock and prunes its table entry on release.
struct VolumeLock<'a> {
    locks: &'a DashMap<VolumeId, Arc<Mutex<()>>>,
    volume_id: VolumeId,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for VolumeLock<'_> {
    fn drop(&mut self) {
        // Release the mutex first so its Arc count reflects only waiters.
        self.guard.take();
        self.locks
            .remove_if(&self.volume_id, |_, lock| Arc::strong_count(lock) == 1);
    }
}

fn require_non_empty(volume_id: &VolumeId, target_path: &str) -> Result<(), CsiError> {
    if volume_id.0.is_empty() {
        return Err(CsiError::InvalidArgument("volume id is required".into()));
    }
    if target_path.is_empty() {
        return Err(CsiError::InvalidArgument("target path is required".into()));
    }
    Ok(())
}

/// Flag that makes `mkfs.<fs_type>` overwrite an existing signature.
fn force_flag(fs_type: &str) -> &'static str {
    match fs_type {
        "ext2" | "ext3" | "ext4" => "-F",
        _ => "-f",
    }
}
