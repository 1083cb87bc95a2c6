//! Environment abstraction: filesystem access, path translation and external
//! command execution.
//!
//! The volume lifecycle never touches the OS directly.  Everything goes
//! through an [`Environment`] value that is built once at startup and shared
//! read-only afterwards.  Three profiles exist:
//!
//! | Profile | Filesystem | Paths | Commands |
//! |---|---|---|---|
//! | [`Environment::native`] | [`OsFs`] on `/` | identity | [`SystemRunner`] |
//! | [`Environment::sandboxed`] | [`OsFs`] rooted at a private dir | rooted | [`SystemRunner`] |
//! | [`Environment::in_memory`] | [`MemFs`] | identity | [`ScriptedRunner`] |

mod memory;
mod os;

use std::ffi::{OsStr, OsString};
use std::fmt;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

pub use memory::{MemFs, ScriptedRunner};
pub use os::{OsFs, SystemRunner};

/// Default upper bound on how long a single external command may run.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(120);

// ---------------------------------------------------------------------------
// Filesystem
// ---------------------------------------------------------------------------

/// Filesystem primitives used by the volume lifecycle.
///
/// All paths are *virtual*: implementations decide where they really live.
#[async_trait]
pub trait Filesystem: Send + Sync {
    /// Create `path` and all missing parents with permission bits `mode`.
    async fn create_dir_all(&self, path: &Path, mode: u32) -> io::Result<()>;

    /// Remove a file or an empty directory.  A missing path is not an error.
    async fn remove(&self, path: &Path) -> io::Result<()>;

    /// Whether anything exists at `path`.
    async fn exists(&self, path: &Path) -> bool;

    /// Whether a directory exists at `path`.
    async fn dir_exists(&self, path: &Path) -> bool;

    /// Create `path` if needed and set its length to exactly `len` bytes.
    /// Growth is sparse.
    async fn truncate(&self, path: &Path, len: u64) -> io::Result<()>;
}

// ---------------------------------------------------------------------------
// Path translation
// ---------------------------------------------------------------------------

/// Translates virtual paths into the concrete paths handed to the OS and to
/// external commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathMapper {
    /// Virtual and real paths are the same.
    Identity,
    /// Virtual `/` maps to the given directory; `..` can never climb above it.
    Rooted(PathBuf),
}

impl PathMapper {
    /// Map a virtual path to its real location.
    pub fn map(&self, virtual_path: &Path) -> PathBuf {
        match self {
            Self::Identity => virtual_path.to_path_buf(),
            Self::Rooted(base) => base.join(normalize(virtual_path)),
        }
    }
}

/// Lexically normalise `path` into a relative path without `.`/`..`
/// components.  `..` at the top is dropped.
pub(crate) fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::ParentDir => {
                out.pop();
            }
            Component::RootDir | Component::CurDir | Component::Prefix(_) => {}
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Command execution
// ---------------------------------------------------------------------------

/// A program invocation: program name plus arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    program: String,
    args: Vec<OsString>,
}

impl CommandLine {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn get_args(&self) -> &[OsString] {
        &self.args
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg.to_string_lossy())?;
        }
        Ok(())
    }
}

/// Failure of an external command.
#[derive(Debug, Error)]
pub enum CommandError {
    /// The program could not be started at all.
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    /// The program ran and exited unsuccessfully.
    #[error("{program} exited with {status}: {stderr}")]
    Failed {
        program: String,
        status: String,
        stderr: String,
    },

    /// The program did not finish in time and was killed.
    #[error("{program} did not finish within {timeout:?}")]
    TimedOut { program: String, timeout: Duration },

    /// A scripted test runner returned a failure for this program.
    #[error("{program}: {message}")]
    Scripted { program: String, message: String },

    /// A scripted test runner had no expectation for this command.
    #[error("command not scripted in test environment: {0}")]
    NotScripted(String),
}

/// Runs external programs synchronously from the caller's point of view.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `command` to completion.  Any non-success outcome is an error.
    async fn run(&self, command: &CommandLine) -> Result<(), CommandError>;
}

// ---------------------------------------------------------------------------
// Environment
// ---------------------------------------------------------------------------

/// The bundle of filesystem, path mapping and command runner a lifecycle
/// manager operates on.
#[derive(Clone)]
pub struct Environment {
    fs: Arc<dyn Filesystem>,
    runner: Arc<dyn CommandRunner>,
    paths: PathMapper,
}

impl Environment {
    /// Assemble an environment from its parts.
    pub fn new(fs: Arc<dyn Filesystem>, runner: Arc<dyn CommandRunner>, paths: PathMapper) -> Self {
        Self { fs, runner, paths }
    }

    /// Production profile: the real root filesystem and real commands.
    pub fn native(command_timeout: Duration) -> Self {
        Self::new(
            Arc::new(OsFs::new(PathMapper::Identity)),
            Arc::new(SystemRunner::new(command_timeout)),
            PathMapper::Identity,
        )
    }

    /// Development profile: every virtual path lives under `root`, commands
    /// are real and receive the translated paths.
    pub fn sandboxed(root: impl Into<PathBuf>, command_timeout: Duration) -> Self {
        let paths = PathMapper::Rooted(root.into());
        Self::new(
            Arc::new(OsFs::new(paths.clone())),
            Arc::new(SystemRunner::new(command_timeout)),
            paths,
        )
    }

    /// Test profile: an in-memory tree and a scripted command runner.
    pub fn in_memory(fs: Arc<MemFs>, runner: Arc<ScriptedRunner>) -> Self {
        Self::new(fs, runner, PathMapper::Identity)
    }

    pub fn fs(&self) -> &dyn Filesystem {
        self.fs.as_ref()
    }

    /// Translate a virtual path into the path passed to external commands.
    pub fn real_path(&self, virtual_path: &Path) -> PathBuf {
        self.paths.map(virtual_path)
    }

    /// Run an external command.
    pub async fn run(&self, command: &CommandLine) -> Result<(), CommandError> {
        debug!(%command, "running command");
        self.runner.run(command).await
    }

    /// Create the directories the plugin expects to exist before serving.
    pub async fn prepare(&self, dirs: &[&Path]) -> io::Result<()> {
        for dir in dirs {
            self.fs.create_dir_all(dir, 0o755).await?;
        }
        Ok(())
    }
}

impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Environment")
            .field("paths", &self.paths)
            .finish_non_exhaustive()
    }
}
