//! End-to-end lifecycle behaviour over the in-memory environment.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;

use libloopcsi::env::{
    CommandError, CommandLine, CommandRunner, Environment, Filesystem, MemFs, PathMapper,
    ScriptedRunner,
};
use libloopcsi::{
    CsiController, CsiError, CsiMessage, CsiNode, CsiServer, LoopBackend, LoopConfig,
    NodePublishVolumeRequest, SIZE_KEY, UnsupportedRpc, VolumeId, VolumeManager,
};

const IMAGE: &str = "/var/lib/csi-loop/vol-1.img";
const TARGET: &str = "/var/lib/kubelet/pods/p1/volumes/scratch/mount";

struct Harness {
    backend: Arc<LoopBackend>,
    fs: Arc<MemFs>,
    runner: Arc<ScriptedRunner>,
}

fn harness() -> Harness {
    let fs = Arc::new(MemFs::new());
    let runner = Arc::new(ScriptedRunner::new());
    let env = Environment::in_memory(fs.clone(), runner.clone());
    let manager = VolumeManager::new(env, LoopConfig::default());
    Harness {
        backend: Arc::new(LoopBackend::new(manager, "node-a")),
        fs,
        runner,
    }
}

fn publish_request(id: &str, target: &str, size: &str) -> NodePublishVolumeRequest {
    NodePublishVolumeRequest {
        volume_id: id.into(),
        target_path: target.into(),
        volume_context: HashMap::from([(SIZE_KEY.to_owned(), size.to_owned())]),
    }
}

#[tokio::test]
async fn invalid_size_touches_nothing() {
    let h = harness();
    let err = h
        .backend
        .publish_volume(publish_request("vol-1", TARGET, "invalid-size"))
        .await
        .unwrap_err();

    assert!(matches!(err, CsiError::InvalidArgument(_)));
    assert!(err.to_string().contains("invalid-size"));
    assert!(h.fs.paths().is_empty());
    assert!(h.runner.calls().is_empty());
}

#[tokio::test]
async fn unpublish_without_publish_succeeds() {
    let h = harness();
    h.backend
        .unpublish_volume(&VolumeId::from("vol-1"), TARGET)
        .await
        .unwrap();
    h.backend
        .unpublish_volume(&VolumeId::from("vol-1"), TARGET)
        .await
        .unwrap();

    assert!(h.fs.paths().is_empty());
    assert_eq!(h.runner.programs(), vec!["umount", "umount"]);
}

#[tokio::test]
async fn publish_then_unpublish_leaves_nothing_behind() {
    let h = harness();
    h.runner
        .succeed("mkfs.btrfs")
        .succeed("mount")
        .succeed("umount");

    h.backend
        .publish_volume(publish_request("vol-1", TARGET, "1Gi"))
        .await
        .unwrap();
    assert_eq!(h.fs.file_len(Path::new(IMAGE)), Some(1_073_741_824));
    assert!(h.fs.dir_exists(Path::new(TARGET)).await);

    h.backend
        .unpublish_volume(&VolumeId::from("vol-1"), TARGET)
        .await
        .unwrap();
    assert!(!h.fs.exists(Path::new(IMAGE)).await);
    assert!(!h.fs.exists(Path::new(TARGET)).await);
    // The backing directory itself is kept for the next volume.
    assert!(h.fs.dir_exists(Path::new("/var/lib/csi-loop")).await);

    assert_eq!(h.runner.programs(), vec!["mkfs.btrfs", "mount", "umount"]);
}

#[tokio::test]
async fn mount_failure_keeps_formatted_image() {
    let h = harness();
    h.runner
        .succeed("mkfs.btrfs")
        .fail("mount", "wrong fs type, bad option, bad superblock");

    let err = h
        .backend
        .publish_volume(publish_request("vol-1", TARGET, "500Mi"))
        .await
        .unwrap_err();

    match &err {
        CsiError::MountFailed { path, reason } => {
            assert_eq!(path, TARGET);
            assert!(reason.contains("bad superblock"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(err.to_string().contains("mount"));
    assert_eq!(h.fs.file_len(Path::new(IMAGE)), Some(524_288_000));
}

#[tokio::test]
async fn format_failure_is_reported() {
    let h = harness();
    h.runner.fail("mkfs.btrfs", "device too small");

    let err = h
        .backend
        .publish_volume(publish_request("vol-1", TARGET, "1Ki"))
        .await
        .unwrap_err();

    assert!(matches!(err, CsiError::FormatFailed { .. }));
    assert!(h.fs.exists(Path::new(IMAGE)).await);
    assert!(!h.fs.exists(Path::new(TARGET)).await);
    assert_eq!(h.runner.programs(), vec!["mkfs.btrfs"]);
}

#[tokio::test]
async fn unmount_failure_still_cleans_up() {
    let h = harness();
    h.runner.succeed("mkfs.btrfs").succeed("mount");
    h.backend
        .publish_volume(publish_request("vol-1", TARGET, "1Gi"))
        .await
        .unwrap();

    h.runner.fail("umount", "target is busy");
    h.backend
        .unpublish_volume(&VolumeId::from("vol-1"), TARGET)
        .await
        .unwrap();

    assert!(!h.fs.exists(Path::new(IMAGE)).await);
    assert!(!h.fs.exists(Path::new(TARGET)).await);
}

#[tokio::test]
async fn republish_reformats_unless_mounted() {
    let h = harness();
    h.runner.succeed("mkfs.btrfs").succeed("mount");

    h.backend
        .publish_volume(publish_request("vol-1", TARGET, "1Gi"))
        .await
        .unwrap();
    // `mountpoint` is not scripted, so the target reads as unmounted and the
    // image is resized and formatted again.
    h.backend
        .publish_volume(publish_request("vol-1", TARGET, "2Gi"))
        .await
        .unwrap();
    assert_eq!(h.fs.file_len(Path::new(IMAGE)), Some(2 * 1_073_741_824));
    assert_eq!(
        h.runner.programs(),
        vec!["mkfs.btrfs", "mount", "mountpoint", "mkfs.btrfs", "mount"]
    );

    h.runner.succeed("mountpoint");
    h.backend
        .publish_volume(publish_request("vol-1", TARGET, "4Gi"))
        .await
        .unwrap();
    assert_eq!(h.fs.file_len(Path::new(IMAGE)), Some(2 * 1_073_741_824));
    assert_eq!(h.runner.programs().last().map(String::as_str), Some("mountpoint"));
}

/// Succeeds every command, but parks any `mkfs` whose arguments mention
/// `gate_on` until `release` is notified.
struct GatedRunner {
    gate_on: String,
    entered: Notify,
    release: Notify,
    calls: Mutex<Vec<String>>,
}

impl GatedRunner {
    fn new(gate_on: &str) -> Self {
        Self {
            gate_on: gate_on.to_owned(),
            entered: Notify::new(),
            release: Notify::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl CommandRunner for GatedRunner {
    async fn run(&self, command: &CommandLine) -> Result<(), CommandError> {
        let line = command.to_string();
        self.calls.lock().push(line.clone());
        if command.program().starts_with("mkfs.") && line.contains(&self.gate_on) {
            self.entered.notify_one();
            self.release.notified().await;
        }
        Ok(())
    }
}

#[tokio::test]
async fn same_volume_calls_are_serialised() {
    let fs = Arc::new(MemFs::new());
    let runner = Arc::new(GatedRunner::new("vol-1.img"));
    let env = Environment::new(fs.clone(), runner.clone(), PathMapper::Identity);
    let backend = Arc::new(LoopBackend::new(
        VolumeManager::new(env, LoopConfig::default()),
        "node-a",
    ));

    let publisher = {
        let backend = Arc::clone(&backend);
        tokio::spawn(async move {
            backend
                .publish_volume(publish_request("vol-1", "/mnt/vol-1", "1Mi"))
                .await
        })
    };
    // Publish now holds the vol-1 lock and is parked inside mkfs.
    runner.entered.notified().await;

    let unpublisher = {
        let backend = Arc::clone(&backend);
        tokio::spawn(async move {
            backend
                .unpublish_volume(&VolumeId::from("vol-1"), "/mnt/vol-1")
                .await
        })
    };

    // A different volume is not held up by the vol-1 lock.
    tokio::time::timeout(
        Duration::from_secs(5),
        backend.publish_volume(publish_request("vol-2", "/mnt/vol-2", "1Mi")),
    )
    .await
    .expect("vol-2 publish waited on vol-1")
    .unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(
        !runner.calls().iter().any(|c| c.starts_with("umount")),
        "unpublish ran while publish was in progress: {:?}",
        runner.calls()
    );
    assert_eq!(backend.manager().in_flight(), 1);

    runner.release.notify_one();
    publisher.await.unwrap().unwrap();
    unpublisher.await.unwrap().unwrap();

    let vol1: Vec<String> = runner
        .calls()
        .into_iter()
        .filter(|c| c.contains("vol-1"))
        .collect();
    assert_eq!(
        vol1,
        vec![
            "mkfs.btrfs -f /var/lib/csi-loop/vol-1.img",
            "mount -o loop /var/lib/csi-loop/vol-1.img /mnt/vol-1",
            "umount /mnt/vol-1",
        ]
    );
    assert!(!fs.exists(Path::new("/var/lib/csi-loop/vol-1.img")).await);
    assert!(!fs.exists(Path::new("/mnt/vol-1")).await);
    assert!(fs.exists(Path::new("/var/lib/csi-loop/vol-2.img")).await);
    assert_eq!(backend.manager().in_flight(), 0);
}

#[tokio::test]
async fn distinct_volumes_do_not_share_images() {
    let h = harness();
    h.runner.succeed("mkfs.btrfs").succeed("mount").succeed("umount");

    h.backend
        .publish_volume(publish_request("vol-a", "/mnt/a", "1Mi"))
        .await
        .unwrap();
    h.backend
        .publish_volume(publish_request("vol-b", "/mnt/b", "2Mi"))
        .await
        .unwrap();
    h.backend
        .unpublish_volume(&VolumeId::from("vol-a"), "/mnt/a")
        .await
        .unwrap();

    assert!(!h.fs.exists(Path::new("/var/lib/csi-loop/vol-a.img")).await);
    assert_eq!(
        h.fs.file_len(Path::new("/var/lib/csi-loop/vol-b.img")),
        Some(2 * 1024 * 1024)
    );
    assert!(h.fs.dir_exists(Path::new("/mnt/b")).await);
}

#[tokio::test]
async fn capabilities_are_empty() {
    let h = harness();
    assert!(h.backend.controller_get_capabilities().await.unwrap().is_empty());
    assert!(h.backend.node_get_capabilities().await.unwrap().is_empty());
}

#[tokio::test]
async fn unsupported_rpcs_are_unimplemented() {
    let h = harness();
    for rpc in [
        UnsupportedRpc::NodeStageVolume,
        UnsupportedRpc::NodeUnstageVolume,
        UnsupportedRpc::NodeExpandVolume,
        UnsupportedRpc::NodeGetVolumeStats,
        UnsupportedRpc::CreateVolume,
        UnsupportedRpc::DeleteVolume,
        UnsupportedRpc::ControllerPublishVolume,
        UnsupportedRpc::ListSnapshots,
    ] {
        let response = CsiServer::dispatch(&*h.backend, CsiMessage::Unsupported(rpc)).await;
        match response {
            CsiMessage::Error(CsiError::Unimplemented(got)) => assert_eq!(got, rpc),
            other => panic!("{rpc}: unexpected response {other}"),
        }
    }
    assert!(h.runner.calls().is_empty());
}

#[tokio::test]
async fn response_variant_as_request_is_rejected() {
    let h = harness();
    let response = CsiServer::dispatch(&*h.backend, CsiMessage::ProbeResult(true)).await;
    assert!(matches!(
        response,
        CsiMessage::Error(CsiError::InvalidArgument(_))
    ));
}
