//! Driver configuration.
//!
//! Every setting is a command-line flag; the ones a pod spec typically
//! injects also fall back to an environment variable:
//! - `NODE_ID`: identifier reported by `NodeGetInfo`. Required.
//! - `CSI_ENDPOINT`: socket the plugin listens on. Defaults to
//!   `unix:///csi/csi.sock`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, ValueEnum};

use libloopcsi::env::DEFAULT_COMMAND_TIMEOUT;
use libloopcsi::transport::{DEFAULT_ENDPOINT, parse_endpoint};
use libloopcsi::volume::{DEFAULT_BACKING_DIR, DEFAULT_FS_TYPE};
use libloopcsi::{Environment, LoopConfig};

/// Where filesystem operations and commands take effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Profile {
    /// Real root filesystem.
    Native,
    /// All paths rebased under `--sandbox-root`.
    Sandbox,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "csi-loop-driver", version, about = "CSI node plugin for loop-mounted ephemeral volumes")]
pub struct DriverArgs {
    /// Node identifier reported to the orchestrator
    #[arg(long, alias = "nodeid", env = "NODE_ID", value_name = "ID")]
    pub node_id: Option<String>,

    /// Socket endpoint (unix:///path or a bare path)
    #[arg(long, env = "CSI_ENDPOINT", default_value = DEFAULT_ENDPOINT, value_name = "URL")]
    pub endpoint: String,

    /// Directory holding one backing image per volume
    #[arg(long, default_value = DEFAULT_BACKING_DIR, value_name = "DIR")]
    pub backing_dir: PathBuf,

    /// Filesystem the images are formatted with (runs mkfs.<TYPE>)
    #[arg(long, default_value = DEFAULT_FS_TYPE, value_name = "TYPE")]
    pub fs_type: String,

    /// Run against the real root or a private sandbox directory
    #[arg(long, value_enum, default_value = "native")]
    pub profile: Profile,

    /// Root directory for the sandbox profile
    #[arg(long, default_value = "./tmp", value_name = "DIR")]
    pub sandbox_root: PathBuf,

    /// Seconds an external command may run before it is killed
    #[arg(long, default_value_t = DEFAULT_COMMAND_TIMEOUT.as_secs(), value_name = "SECONDS")]
    pub command_timeout: u64,

    /// Log output format
    #[arg(long, value_enum, default_value = "text")]
    pub log_format: LogFormat,
}

/// Validated configuration the driver runs with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverConfig {
    pub node_id: String,
    /// Virtual path of the listening socket.
    pub socket_path: PathBuf,
    pub loop_config: LoopConfig,
    pub profile: Profile,
    /// Absolute sandbox root; only used by [`Profile::Sandbox`].
    pub sandbox_root: PathBuf,
    pub command_timeout: Duration,
}

impl DriverConfig {
    /// Build the environment every lifecycle operation goes through.
    pub fn environment(&self) -> Environment {
        match self.profile {
            Profile::Native => Environment::native(self.command_timeout),
            Profile::Sandbox => Environment::sandboxed(&self.sandbox_root, self.command_timeout),
        }
    }

    /// Virtual directories that must exist before the socket is bound.
    pub fn plugin_dirs(&self) -> [&Path; 2] {
        [
            self.socket_path.parent().unwrap_or(Path::new("/")),
            self.loop_config.backing_dir.as_path(),
        ]
    }
}

impl TryFrom<DriverArgs> for DriverConfig {
    type Error = anyhow::Error;

    fn try_from(args: DriverArgs) -> Result<Self> {
        let node_id = match args.node_id {
            Some(id) if !id.trim().is_empty() => id,
            _ => bail!("node id is required (set --node-id or NODE_ID)"),
        };
        let socket_path = parse_endpoint(&args.endpoint)
            .with_context(|| format!("invalid endpoint {:?}", args.endpoint))?;
        if args.fs_type.is_empty() {
            bail!("filesystem type must not be empty");
        }
        if args.command_timeout == 0 {
            bail!("command timeout must be at least one second");
        }
        let sandbox_root = std::path::absolute(&args.sandbox_root).with_context(|| {
            format!("resolve sandbox root {}", args.sandbox_root.display())
        })?;

        Ok(Self {
            node_id,
            socket_path,
            loop_config: LoopConfig {
                backing_dir: args.backing_dir,
                fs_type: args.fs_type,
            },
            profile: args.profile,
            sandbox_root,
            command_timeout: Duration::from_secs(args.command_timeout),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<DriverConfig> {
        let mut argv = vec!["csi-loop-driver"];
        argv.extend_from_slice(args);
        DriverConfig::try_from(DriverArgs::parse_from(argv))
    }

    #[test]
    fn defaults() {
        let config = parse(&["--node-id", "node-1"]).unwrap();
        assert_eq!(config.node_id, "node-1");
        assert_eq!(config.socket_path, PathBuf::from("/csi/csi.sock"));
        assert_eq!(config.loop_config, LoopConfig::default());
        assert_eq!(config.profile, Profile::Native);
        assert_eq!(config.command_timeout, Duration::from_secs(120));
        assert!(config.sandbox_root.is_absolute());
        assert!(config.sandbox_root.ends_with("tmp"));
    }

    #[test]
    fn overrides() {
        let config = parse(&[
            "--node-id",
            "node-2",
            "--endpoint",
            "unix:///run/loop/csi.sock",
            "--backing-dir",
            "/data/images",
            "--fs-type",
            "ext4",
            "--profile",
            "sandbox",
            "--sandbox-root",
            "/srv/sandbox",
            "--command-timeout",
            "30",
        ])
        .unwrap();
        assert_eq!(config.socket_path, PathBuf::from("/run/loop/csi.sock"));
        assert_eq!(config.loop_config.backing_dir, PathBuf::from("/data/images"));
        assert_eq!(config.loop_config.fs_type, "ext4");
        assert_eq!(config.profile, Profile::Sandbox);
        assert_eq!(config.command_timeout, Duration::from_secs(30));

        let env = config.environment();
        assert_eq!(
            env.real_path(Path::new("/run/loop/csi.sock")),
            PathBuf::from("/srv/sandbox/run/loop/csi.sock")
        );
    }

    #[test]
    fn node_id_is_required() {
        // An explicit flag wins over any NODE_ID in the test environment.
        assert!(parse(&["--node-id", ""]).is_err());
        let err = parse(&["--node-id", "  "]).unwrap_err();
        assert!(err.to_string().contains("node id"));
    }

    #[test]
    fn tcp_endpoint_is_rejected() {
        let err = parse(&["--node-id", "n", "--endpoint", "tcp://0.0.0.0:9000"]).unwrap_err();
        assert!(format!("{err:#}").contains("tcp"));
    }

    #[test]
    fn zero_timeout_is_rejected() {
        assert!(parse(&["--node-id", "n", "--command-timeout", "0"]).is_err());
    }

    #[tokio::test]
    async fn sandbox_startup_stays_under_root() {
        let root = tempfile::tempdir().unwrap();
        let config = parse(&[
            "--node-id",
            "node-1",
            "--profile",
            "sandbox",
            "--sandbox-root",
            root.path().to_str().unwrap(),
        ])
        .unwrap();

        let env = config.environment();
        env.prepare(&config.plugin_dirs()).await.unwrap();

        assert!(root.path().join("csi").is_dir());
        assert!(root.path().join("var/lib/csi-loop").is_dir());
        assert_eq!(
            env.real_path(&config.socket_path),
            root.path().join("csi/csi.sock")
        );
    }
}
