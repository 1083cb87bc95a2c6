//! Real filesystem and real process execution.

use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use super::{CommandError, CommandLine, CommandRunner, Filesystem, PathMapper};

/// [`Filesystem`] backed by the operating system, optionally rooted under a
/// private directory.
#[derive(Debug, Clone)]
pub struct OsFs {
    paths: PathMapper,
}

impl OsFs {
    pub fn new(paths: PathMapper) -> Self {
        Self { paths }
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        self.paths.map(path)
    }
}

#[async_trait]
impl Filesystem for OsFs {
    async fn create_dir_all(&self, path: &Path, mode: u32) -> io::Result<()> {
        tokio::fs::DirBuilder::new()
            .recursive(true)
            .mode(mode)
            .create(self.resolve(path))
            .await
    }

    async fn remove(&self, path: &Path) -> io::Result<()> {
        let path = self.resolve(path);
        let meta = match tokio::fs::symlink_metadata(&path).await {
            Ok(m) => m,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e),
        };
        let result = if meta.is_dir() {
            tokio::fs::remove_dir(&path).await
        } else {
            tokio::fs::remove_file(&path).await
        };
        match result {
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }

    async fn exists(&self, path: &Path) -> bool {
        tokio::fs::try_exists(self.resolve(path))
            .await
            .unwrap_or(false)
    }

    async fn dir_exists(&self, path: &Path) -> bool {
        tokio::fs::metadata(self.resolve(path))
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
    }

    async fn truncate(&self, path: &Path, len: u64) -> io::Result<()> {
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(self.resolve(path))
            .await?;
        file.set_len(len).await
    }
}

/// [`CommandRunner`] that spawns real processes.
///
/// The child is killed if it outlives `timeout` or if the calling future is
/// dropped, so a hung `mkfs`/`mount` cannot pin a request handler forever.
#[derive(Debug, Clone)]
pub struct SystemRunner {
    timeout: Duration,
}

impl SystemRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, command: &CommandLine) -> Result<(), CommandError> {
        let program = command.program().to_owned();
        let child = Command::new(command.program())
            .args(command.get_args())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(self.timeout, child)
            .await
            .map_err(|_| CommandError::TimedOut {
                program: program.clone(),
                timeout: self.timeout,
            })?
            .map_err(|source| CommandError::Spawn {
                program: program.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(CommandError::Failed {
                program,
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rooted_fs_lifecycle() {
        let tmp = tempfile::tempdir().unwrap();
        let fs = OsFs::new(PathMapper::Rooted(tmp.path().to_path_buf()));

        fs.create_dir_all(Path::new("/var/lib/csi-loop"), 0o755)
            .await
            .unwrap();
        assert!(tmp.path().join("var/lib/csi-loop").is_dir());

        let image = Path::new("/var/lib/csi-loop/vol-1.img");
        fs.truncate(image, 1 << 20).await.unwrap();
        let meta = std::fs::metadata(tmp.path().join("var/lib/csi-loop/vol-1.img")).unwrap();
        assert_eq!(meta.len(), 1 << 20);

        // Shrinking works too, like `truncate -s`.
        fs.truncate(image, 4096).await.unwrap();
        let meta = std::fs::metadata(tmp.path().join("var/lib/csi-loop/vol-1.img")).unwrap();
        assert_eq!(meta.len(), 4096);

        assert!(fs.exists(image).await);
        assert!(!fs.dir_exists(image).await);
        fs.remove(image).await.unwrap();
        assert!(!fs.exists(image).await);

        // Removing again is a no-op.
        fs.remove(image).await.unwrap();
    }

    #[tokio::test]
    async fn remove_refuses_non_empty_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let fs = OsFs::new(PathMapper::Rooted(tmp.path().to_path_buf()));
        fs.create_dir_all(Path::new("/mnt/a/b"), 0o755).await.unwrap();
        assert!(fs.remove(Path::new("/mnt/a")).await.is_err());
        fs.remove(Path::new("/mnt/a/b")).await.unwrap();
        fs.remove(Path::new("/mnt/a")).await.unwrap();
        assert!(!fs.dir_exists(Path::new("/mnt/a")).await);
    }

    #[tokio::test]
    async fn system_runner_reports_exit_status() {
        let runner = SystemRunner::new(Duration::from_secs(10));
        runner.run(&CommandLine::new("true")).await.unwrap();

        let err = runner
            .run(&CommandLine::new("sh").args(["-c", "echo boom >&2; exit 3"]))
            .await
            .unwrap_err();
        match err {
            CommandError::Failed { program, stderr, .. } => {
                assert_eq!(program, "sh");
                assert_eq!(stderr, "boom");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn system_runner_missing_program() {
        let runner = SystemRunner::new(Duration::from_secs(10));
        let err = runner
            .run(&CommandLine::new("definitely-not-a-real-program-xyz"))
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::Spawn { .. }));
    }

    #[tokio::test]
    async fn system_runner_times_out() {
        let runner = SystemRunner::new(Duration::from_millis(100));
        let err = runner
            .run(&CommandLine::new("sleep").arg("5"))
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::TimedOut { .. }));
    }
}
