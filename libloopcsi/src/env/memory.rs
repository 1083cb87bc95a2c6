//! In-memory test doubles for the environment.

use std::collections::{BTreeMap, HashMap};
use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{CommandError, CommandLine, CommandRunner, Filesystem, normalize};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Node {
    Dir { mode: u32 },
    File { len: u64 },
}

/// A directory tree held entirely in memory.
///
/// Paths are normalised lexically and always treated as absolute.  Files only
/// carry a length, which is all the volume lifecycle ever writes.
#[derive(Debug, Default)]
pub struct MemFs {
    nodes: Mutex<BTreeMap<PathBuf, Node>>,
}

impl MemFs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Length of the file at `path`, or `None` if it is absent or a directory.
    pub fn file_len(&self, path: &Path) -> Option<u64> {
        match self.nodes.lock().get(&key(path)) {
            Some(Node::File { len }) => Some(*len),
            _ => None,
        }
    }

    /// Permission bits of the directory at `path`.
    pub fn dir_mode(&self, path: &Path) -> Option<u32> {
        match self.nodes.lock().get(&key(path)) {
            Some(Node::Dir { mode }) => Some(*mode),
            _ => None,
        }
    }

    /// Create a file of the given length, creating parents as needed.
    pub fn seed_file(&self, path: &Path, len: u64) {
        let path = key(path);
        let mut nodes = self.nodes.lock();
        for ancestor in path.ancestors().skip(1) {
            if !ancestor.as_os_str().is_empty() {
                nodes
                    .entry(ancestor.to_path_buf())
                    .or_insert(Node::Dir { mode: 0o755 });
            }
        }
        nodes.insert(path, Node::File { len });
    }

    /// Every path currently present, in lexical order.
    pub fn paths(&self) -> Vec<PathBuf> {
        self.nodes
            .lock()
            .keys()
            .map(|p| Path::new("/").join(p))
            .collect()
    }
}

/// Map any path to the relative key used inside the tree; the root is `""`.
fn key(path: &Path) -> PathBuf {
    normalize(path)
}

fn is_root(path: &Path) -> bool {
    path.as_os_str().is_empty()
}

#[async_trait]
impl Filesystem for MemFs {
    async fn create_dir_all(&self, path: &Path, mode: u32) -> io::Result<()> {
        let path = key(path);
        let mut nodes = self.nodes.lock();

        let mut missing = Vec::new();
        for ancestor in path.ancestors().filter(|p| !is_root(p)) {
            match nodes.get(ancestor) {
                Some(Node::Dir { .. }) => break,
                Some(Node::File { .. }) => {
                    return Err(io::Error::new(
                        io::ErrorKind::NotADirectory,
                        format!("/{} is not a directory", ancestor.display()),
                    ));
                }
                None => missing.push(ancestor.to_path_buf()),
            }
        }
        for dir in missing {
            nodes.insert(dir, Node::Dir { mode });
        }
        Ok(())
    }

    async fn remove(&self, path: &Path) -> io::Result<()> {
        let path = key(path);
        if is_root(&path) {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "cannot remove the root directory",
            ));
        }
        let mut nodes = self.nodes.lock();
        match nodes.get(&path).copied() {
            None => Ok(()),
            Some(Node::File { .. }) => {
                nodes.remove(&path);
                Ok(())
            }
            Some(Node::Dir { .. }) => {
                let has_children = nodes
                    .range(path.clone()..)
                    .nth(1)
                    .is_some_and(|(child, _)| child.starts_with(&path));
                if has_children {
                    return Err(io::Error::new(
                        io::ErrorKind::DirectoryNotEmpty,
                        format!("/{} is not empty", path.display()),
                    ));
                }
                nodes.remove(&path);
                Ok(())
            }
        }
    }

    async fn exists(&self, path: &Path) -> bool {
        let path = key(path);
        is_root(&path) || self.nodes.lock().contains_key(&path)
    }

    async fn dir_exists(&self, path: &Path) -> bool {
        let path = key(path);
        is_root(&path) || matches!(self.nodes.lock().get(&path), Some(Node::Dir { .. }))
    }

    async fn truncate(&self, path: &Path, len: u64) -> io::Result<()> {
        let path = key(path);
        let mut nodes = self.nodes.lock();

        if let Some(parent) = path.parent().filter(|p| !is_root(p))
            && !matches!(nodes.get(parent), Some(Node::Dir { .. }))
        {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("/{} does not exist", parent.display()),
            ));
        }
        match nodes.get_mut(&path) {
            Some(Node::Dir { .. }) => Err(io::Error::new(
                io::ErrorKind::IsADirectory,
                format!("/{} is a directory", path.display()),
            )),
            Some(Node::File { len: current }) => {
                *current = len;
                Ok(())
            }
            None => {
                nodes.insert(path, Node::File { len });
                Ok(())
            }
        }
    }
}

/// Deterministic [`CommandRunner`] for tests.
///
/// Every program fails unless a result was scripted for it, so each test has
/// to declare exactly which commands it expects to succeed.  All invocations
/// are recorded in order.
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    results: Mutex<HashMap<String, Result<(), String>>>,
    calls: Mutex<Vec<CommandLine>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every future run of `program` succeed.
    pub fn succeed(&self, program: &str) -> &Self {
        self.results.lock().insert(program.to_owned(), Ok(()));
        self
    }

    /// Make every future run of `program` fail with `message`.
    pub fn fail(&self, program: &str, message: &str) -> &Self {
        self.results
            .lock()
            .insert(program.to_owned(), Err(message.to_owned()));
        self
    }

    /// Every command run so far, in order.
    pub fn calls(&self) -> Vec<CommandLine> {
        self.calls.lock().clone()
    }

    /// Program names of every command run so far, in order.
    pub fn programs(&self) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .map(|c| c.program().to_owned())
            .collect()
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, command: &CommandLine) -> Result<(), CommandError> {
        self.calls.lock().push(command.clone());
        match self.results.lock().get(command.program()) {
            Some(Ok(())) => Ok(()),
            Some(Err(message)) => Err(CommandError::Scripted {
                program: command.program().to_owned(),
                message: message.clone(),
            }),
            None => Err(CommandError::NotScripted(command.to_string())),
        }
    }
}
