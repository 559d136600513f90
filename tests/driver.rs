//! End-to-end scenarios driven entirely through the `FilesystemDriver`
//! dispatch surface, the way a host would.

use std::sync::Arc;

use futures_util::StreamExt;

use ferrofs::driver::FilesystemDriver;
use ferrofs::fs::{AccessMode, FerroFs, SetAttrs, SyncMode};
use ferrofs::mount::MountOptions;
use ferrofs::store::cache::CachedDevice;
use ferrofs::store::dirfs::DirBlockDevice;
use ferrofs::store::mem::MemBlockDevice;
use ferrofs::{DirCursor, DriverRegistry, FsError};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn mount_mem(capacity: u64) -> Arc<dyn FilesystemDriver> {
    FerroFs::mount(MemBlockDevice::new(capacity), MountOptions::default()).unwrap()
}

async fn collect_names(fs: &Arc<dyn FilesystemDriver>, dir: ferrofs::Ino) -> Vec<String> {
    let mut names = Vec::new();
    let mut stream = fs.readdir(dir, DirCursor::START).await.unwrap();
    while let Some(entry) = stream.next().await {
        names.push(entry.unwrap().name);
    }
    names
}

#[tokio::test]
async fn file_lifecycle_create_write_read_remove() {
    init_logging();
    let fs = mount_mem(256);
    let root = fs.root_ino();

    let ino = fs.create(root, "notes.txt", 0o644).await.unwrap();
    let h = fs.open(ino, AccessMode::READ | AccessMode::WRITE).await.unwrap();
    assert_eq!(fs.write(&h, 0, b"first line\n").await.unwrap(), 11);
    fs.fsync(&h, SyncMode::Blocking).await.unwrap();

    let back = fs.read(&h, 0, 64).await.unwrap();
    assert_eq!(&back[..], b"first line\n");
    fs.close(h).await;

    fs.remove(root, "notes.txt").await.unwrap();
    assert!(matches!(
        fs.lookup(root, "notes.txt").await,
        Err(FsError::NotFound)
    ));
    // All space is back once the file is gone.
    let stats = fs.statistics();
    assert_eq!(stats.free_blocks, stats.total_blocks);
    fs.unmount(false).await.unwrap();
}

#[tokio::test]
async fn directory_tree_build_walk_teardown() {
    init_logging();
    let fs = mount_mem(256);
    let root = fs.root_ino();

    let etc = fs.mkdir(root, "etc", 0o755).await.unwrap();
    let var = fs.mkdir(root, "var", 0o755).await.unwrap();
    let log = fs.mkdir(var, "log", 0o755).await.unwrap();
    fs.create(etc, "hosts", 0o644).await.unwrap();
    fs.create(log, "syslog", 0o640).await.unwrap();

    assert_eq!(collect_names(&fs, root).await, vec![".", "..", "etc", "var"]);
    assert_eq!(fs.lookup(log, "..").await.unwrap(), var);
    assert_eq!(
        fs.lookup(fs.lookup(root, "var").await.unwrap(), "log")
            .await
            .unwrap(),
        log
    );

    assert!(matches!(fs.rmdir(root, "var").await, Err(FsError::NotEmpty)));
    fs.remove(log, "syslog").await.unwrap();
    fs.rmdir(var, "log").await.unwrap();
    fs.rmdir(root, "var").await.unwrap();
    assert_eq!(collect_names(&fs, root).await, vec![".", "..", "etc"]);
    fs.unmount(true).await.unwrap();
}

#[tokio::test]
async fn rename_and_symlink_traversal() {
    init_logging();
    let fs = mount_mem(256);
    let root = fs.root_ino();

    let src = fs.mkdir(root, "staging", 0o755).await.unwrap();
    let dst = fs.mkdir(root, "live", 0o755).await.unwrap();
    let cfg = fs.create(src, "app.conf", 0o644).await.unwrap();

    let h = fs.open(cfg, AccessMode::WRITE).await.unwrap();
    fs.write(&h, 0, b"threads = 4\n").await.unwrap();
    fs.close(h).await;

    fs.rename(src, "app.conf", dst, "app.conf").await.unwrap();
    assert_eq!(fs.lookup(dst, "app.conf").await.unwrap(), cfg);

    let link = fs.symlink(root, "current", "live/app.conf").await.unwrap();
    assert_eq!(fs.readlink(link).await.unwrap(), "live/app.conf");
    let attr = fs.getattr(link).await.unwrap();
    assert_eq!(attr.size, "live/app.conf".len() as u64);

    // Contents rode along with the rename.
    let h = fs.open(cfg, AccessMode::READ).await.unwrap();
    assert_eq!(&fs.read(&h, 0, 64).await.unwrap()[..], b"threads = 4\n");
    fs.close(h).await;
    fs.unmount(false).await.unwrap();
}

#[tokio::test]
async fn unmount_busy_until_handles_closed() {
    init_logging();
    let fs = mount_mem(64);
    let root = fs.root_ino();
    let ino = fs.create(root, "held", 0o644).await.unwrap();
    let h = fs.open(ino, AccessMode::READ).await.unwrap();

    assert!(matches!(fs.unmount(false).await, Err(FsError::Busy)));
    // Still usable after the refused unmount.
    assert_eq!(fs.lookup(root, "held").await.unwrap(), ino);

    fs.close(h).await;
    fs.unmount(false).await.unwrap();
    assert!(fs.lookup(root, "held").await.is_err());
}

#[tokio::test]
async fn forced_unmount_drops_open_handles() {
    init_logging();
    let fs = mount_mem(64);
    let root = fs.root_ino();
    let ino = fs.create(root, "held", 0o644).await.unwrap();
    let h = fs.open(ino, AccessMode::WRITE).await.unwrap();

    fs.unmount(true).await.unwrap();
    assert!(matches!(fs.write(&h, 0, b"late").await, Err(_)));
}

#[tokio::test]
async fn setattr_and_truncate_through_dispatch() {
    init_logging();
    let fs = mount_mem(64);
    let root = fs.root_ino();
    let ino = fs.create(root, "grow", 0o644).await.unwrap();

    let attr = fs
        .setattr(
            ino,
            SetAttrs {
                mode: Some(0o600),
                size: Some(10_000),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(attr.mode, 0o600);
    assert_eq!(attr.size, 10_000);

    fs.truncate(ino, 0).await.unwrap();
    assert_eq!(fs.getattr(ino).await.unwrap().size, 0);
    fs.unmount(false).await.unwrap();
}

#[tokio::test]
async fn registry_tracks_mounts_across_lifecycles() {
    init_logging();
    let registry = DriverRegistry::new();
    let data = mount_mem(64);
    let scratch = mount_mem(16);

    let data_token = registry.register("data", data.clone()).unwrap();
    let scratch_token = registry.register("scratch", scratch.clone()).unwrap();
    assert_eq!(registry.names(), vec!["data", "scratch"]);

    let by_name = registry.get("data").unwrap();
    let root = by_name.root_ino();
    by_name.create(root, "via-registry", 0o644).await.unwrap();
    assert!(data.lookup(root, "via-registry").await.is_ok());

    scratch.unmount(false).await.unwrap();
    registry.withdraw(scratch_token).unwrap();
    data.unmount(false).await.unwrap();
    registry.withdraw(data_token).unwrap();
    assert!(registry.is_empty());
}

#[tokio::test]
async fn directory_backed_device_persists_within_mount() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let device = DirBlockDevice::new(dir.path(), 128);
    let fs: Arc<dyn FilesystemDriver> =
        FerroFs::mount(device, MountOptions::default()).unwrap();
    let root = fs.root_ino();

    let ino = fs.create(root, "blob", 0o644).await.unwrap();
    let h = fs.open(ino, AccessMode::READ | AccessMode::WRITE).await.unwrap();
    let payload: Vec<u8> = (0..20_000u32).map(|i| (i % 239) as u8).collect();
    fs.write(&h, 0, &payload).await.unwrap();
    fs.fsync(&h, SyncMode::Blocking).await.unwrap();

    let back = fs.read(&h, 0, payload.len()).await.unwrap();
    assert_eq!(&back[..], &payload[..]);
    fs.close(h).await;
    fs.unmount(false).await.unwrap();

    // Block files exist on the local filesystem under the device root.
    let blocks_dir = dir.path().join("blocks");
    assert!(blocks_dir.is_dir());
}

#[tokio::test]
async fn mount_over_cached_device() {
    init_logging();
    let device = CachedDevice::new(MemBlockDevice::new(128));
    let fs: Arc<dyn FilesystemDriver> =
        FerroFs::mount(device, MountOptions::default()).unwrap();
    let root = fs.root_ino();

    let ino = fs.create(root, "hot", 0o644).await.unwrap();
    let h = fs.open(ino, AccessMode::READ | AccessMode::WRITE).await.unwrap();
    fs.write(&h, 0, b"version 1").await.unwrap();
    assert_eq!(&fs.read(&h, 0, 64).await.unwrap()[..], b"version 1");
    // The cached copy must not shadow the overwrite.
    fs.write(&h, 8, b"2").await.unwrap();
    assert_eq!(&fs.read(&h, 0, 64).await.unwrap()[..], b"version 2");
    fs.close(h).await;
    fs.unmount(false).await.unwrap();
}

#[tokio::test]
async fn readdir_cursor_survives_concurrent_removal() {
    init_logging();
    let fs = mount_mem(64);
    let root = fs.root_ino();
    for name in ["a", "b", "c", "d"] {
        fs.create(root, name, 0o644).await.unwrap();
    }

    let mut stream = fs.readdir(root, DirCursor::START).await.unwrap();
    let first = stream.next().await.unwrap().unwrap();
    assert_eq!(first.name, ".");
    let resume = first.cursor;
    drop(stream);

    // Mutating the directory between batches does not break iteration.
    fs.remove(root, "b").await.unwrap();
    let mut seen = Vec::new();
    let mut stream = fs.readdir(root, resume).await.unwrap();
    while let Some(entry) = stream.next().await {
        seen.push(entry.unwrap().name);
    }
    assert!(seen.contains(&"a".to_string()));
    assert!(seen.contains(&"d".to_string()));
    assert!(!seen.contains(&".".to_string()));
    fs.unmount(true).await.unwrap();
}
