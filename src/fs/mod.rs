//! The concrete filesystem: mount lifecycle plus the directory, file and
//! attribute operation sets, split across submodules.

pub mod attr;
pub mod dir;
pub mod file;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use log::{debug, warn};

use crate::error::{FsError, FsResult};
use crate::mount::{MountContext, MountOptions, MountState, StatsSnapshot, Superblock};
use crate::node::{Ino, Node, NodeCache, NodeKind, NodePayload, ROOT_INO};
use crate::store::layout::BlockLayout;
use crate::store::BlockDevice;

pub use attr::{FileAttr, SetAttrs};
pub use file::{AccessMode, Handle, SyncMode};

#[derive(Debug, Clone, Copy)]
pub(crate) struct OpenHandle {
    pub ino: Ino,
    pub access: AccessMode,
}

/// One mounted FerroFS instance. The host reaches it through the
/// `FilesystemDriver` dispatch trait; everything here is also callable
/// directly for embedding.
#[derive(Debug)]
pub struct FerroFs<D: BlockDevice> {
    pub(crate) ctx: MountContext,
    pub(crate) cache: NodeCache,
    pub(crate) device: Arc<D>,
    pub(crate) layout: BlockLayout,
    pub(crate) handles: Mutex<HashMap<u64, OpenHandle>>,
    /// Read side held by node-creating and node-destroying operations,
    /// write side by unmount, so teardown never interleaves with an
    /// operation that is mid-flight past its mount-state check.
    pub(crate) gate: tokio::sync::RwLock<()>,
    /// Serializes cross-directory renames; a directory move's ancestry
    /// check stays valid until it commits.
    pub(crate) rename_lock: tokio::sync::Mutex<()>,
    next_fh: AtomicU64,
}

impl<D: BlockDevice + 'static> FerroFs<D> {
    /// Mount a backing device. Fails atomically: on error nothing is
    /// published and all partial state is dropped.
    pub fn mount(device: D, opts: MountOptions) -> FsResult<Arc<Self>> {
        if opts.block_size == 0 || !opts.block_size.is_power_of_two() {
            return Err(FsError::InvalidArgument("block size must be a power of two"));
        }
        if opts.name_max == 0 {
            return Err(FsError::InvalidArgument("name_max must be nonzero"));
        }
        let sb = Superblock::new(device.capacity_blocks(), opts.block_size, opts.name_max);
        let ctx = MountContext::new(sb);
        let cache = NodeCache::new();
        let root = cache.allocate(NodeKind::Dir, 0o755, NodePayload::empty_dir(ROOT_INO));
        debug_assert_eq!(root.ino, ROOT_INO);
        // Root rests Inactive until a handle needs it; a fresh mount must
        // report zero live nodes so it can be unmounted right away.
        cache.release(root.ino);
        ctx.set_state(MountState::Mounted);
        debug!(
            "mounted ferrofs: {} blocks of {} bytes",
            ctx.sb.total_blocks, ctx.sb.block_size
        );
        Ok(Arc::new(Self {
            ctx,
            cache,
            device: Arc::new(device),
            layout: BlockLayout::new(opts.block_size),
            handles: Mutex::new(HashMap::new()),
            gate: tokio::sync::RwLock::new(()),
            rename_lock: tokio::sync::Mutex::new(()),
            next_fh: AtomicU64::new(1),
        }))
    }

    /// Unmount. Refused with `Busy` while any node holds a live reference,
    /// unless `force`, which drops open handles first; every node is
    /// forcibly reclaimed.
    pub async fn unmount(&self, force: bool) -> FsResult<()> {
        // Wait out in-flight node-creating operations; once held, anything
        // arriving later fails its mount-state check instead of allocating
        // into a cache we are about to drain.
        let _gate = self.gate.write().await;
        self.ctx.transition(|state| match state {
            MountState::Mounted => {
                if !force && self.cache.live_count() > 0 {
                    return Err(FsError::Busy);
                }
                Ok(MountState::Unmounting)
            }
            _ => Err(FsError::InvalidArgument("filesystem not mounted")),
        })?;
        if force {
            let dropped = {
                let mut handles = self.handles.lock().unwrap();
                let n = handles.len();
                handles.clear();
                n
            };
            if dropped > 0 {
                warn!("forced unmount dropped {dropped} open handles");
            }
        }
        // Push pending data out before teardown; a genuine storage failure
        // aborts the unmount and leaves the filesystem mounted.
        if let Err(e) = self.device.flush().await {
            self.ctx.set_state(MountState::Mounted);
            return Err(e);
        }
        let drained = self.cache.reclaim_all();
        debug!("unmounted ferrofs, reclaimed {} nodes", drained.len());
        self.ctx.set_state(MountState::Unmounted);
        Ok(())
    }

    /// Host-facing statistics snapshot. Inode counts derive from the node
    /// cache; free-inode capacity is not tracked.
    pub fn statistics(&self) -> StatsSnapshot {
        let sb = &self.ctx.sb;
        StatsSnapshot {
            total_blocks: sb.total_blocks,
            free_blocks: sb.free_blocks(),
            avail_blocks: sb.free_blocks(),
            total_inodes: self.cache.cached_count() as u64,
            free_inodes: 0,
            block_size: sb.block_size,
            io_size: sb.block_size,
            name_max: sb.name_max,
        }
    }

    pub fn fs_type(&self) -> &'static str {
        "ferrofs"
    }

    pub fn root_ino(&self) -> Ino {
        ROOT_INO
    }

    pub(crate) fn node(&self, ino: Ino) -> FsResult<Arc<Node>> {
        self.ctx.ensure_mounted()?;
        self.cache.peek(ino)
    }

    pub(crate) fn dir_node(&self, ino: Ino) -> FsResult<Arc<Node>> {
        let node = self.node(ino)?;
        if !node.is_dir() {
            return Err(FsError::NotADirectory);
        }
        Ok(node)
    }

    pub(crate) fn check_name(&self, name: &str) -> FsResult<()> {
        if name.is_empty() || name == "." || name == ".." {
            return Err(FsError::InvalidArgument("empty or reserved name"));
        }
        if name.contains('/') || name.contains('\0') {
            return Err(FsError::InvalidArgument("name contains separator"));
        }
        if name.len() > self.ctx.sb.name_max {
            return Err(FsError::InvalidArgument("name too long"));
        }
        Ok(())
    }

    /// Drop an orphaned node's data blocks and give them back to the
    /// superblock. Best-effort: runs on never-fail paths (close, release).
    pub(crate) async fn discard_node_data(&self, node: &Node) {
        let mut payload = node.payload.write().await;
        if let NodePayload::File { blocks } = &mut *payload {
            let doomed = std::mem::take(blocks);
            let count = doomed.len() as u64;
            let discards = doomed.iter().map(|index| self.device.discard(node.ino, *index));
            for (index, res) in doomed.iter().zip(futures::future::join_all(discards).await) {
                if let Err(e) = res {
                    warn!("discard of block {index} (node {}) failed: {e}", node.ino);
                }
            }
            self.ctx.sb.release_blocks(count);
        }
    }

    pub(crate) fn next_fh(&self) -> u64 {
        self.next_fh.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn now() -> SystemTime {
        SystemTime::now()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::mem::MemBlockDevice;

    fn mount_mem(capacity: u64) -> Arc<FerroFs<MemBlockDevice>> {
        FerroFs::mount(MemBlockDevice::new(capacity), MountOptions::default()).unwrap()
    }

    #[tokio::test]
    async fn fresh_mount_reports_device_capacity() {
        let fs = mount_mem(16);
        let stats = fs.statistics();
        assert_eq!(stats.total_blocks, 16);
        assert_eq!(stats.free_blocks, 16);
        assert_eq!(stats.block_size, stats.io_size);
        // Root is cached from mount time.
        assert_eq!(stats.total_inodes, 1);
    }

    #[tokio::test]
    async fn zero_capacity_device_reports_zero_blocks() {
        let fs = mount_mem(0);
        let stats = fs.statistics();
        assert_eq!(stats.total_blocks, 0);
        assert_eq!(stats.free_blocks, 0);
    }

    #[test]
    fn mount_rejects_bad_block_size() {
        let opts = MountOptions {
            block_size: 1000,
            ..Default::default()
        };
        let err = FerroFs::mount(MemBlockDevice::new(1), opts).unwrap_err();
        assert!(matches!(err, FsError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn unmount_never_interleaves_with_node_creation() {
        let fs = mount_mem(64);
        let mut creates = Vec::new();
        for i in 0..32 {
            let fs = fs.clone();
            creates.push(tokio::spawn(async move {
                fs.create(ROOT_INO, &format!("f{i}"), 0o644).await
            }));
        }
        let teardown = {
            let fs = fs.clone();
            tokio::spawn(async move { fs.unmount(true).await })
        };
        for task in creates {
            // Each create either finished before teardown or was refused.
            let _ = task.await.unwrap();
        }
        teardown.await.unwrap().unwrap();
        // No create slipped a node into the cache after it was drained.
        assert_eq!(fs.cache.cached_count(), 0);
    }

    #[tokio::test]
    async fn unmount_idle_mount_succeeds() {
        let fs = mount_mem(4);
        fs.unmount(false).await.unwrap();
        assert_eq!(fs.ctx.state(), MountState::Unmounted);
        // Operations after unmount are rejected.
        assert!(fs.node(ROOT_INO).is_err());
        // A second unmount is an error, not a hang.
        assert!(fs.unmount(false).await.is_err());
    }
}
