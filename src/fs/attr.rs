//! Attribute operation set: getattr, setattr, access.

use std::time::SystemTime;

use crate::error::{FsError, FsResult};
use crate::node::{Ino, Node, NodeKind};
use crate::store::BlockDevice;

use super::file::AccessMode;
use super::FerroFs;

/// Attribute snapshot handed to the host.
#[derive(Debug, Clone, Copy)]
pub struct FileAttr {
    pub ino: Ino,
    pub kind: NodeKind,
    pub mode: u32,
    pub nlink: u32,
    pub size: u64,
    pub atime: SystemTime,
    pub mtime: SystemTime,
    pub ctime: SystemTime,
}

impl FileAttr {
    pub(crate) fn of(node: &Node) -> Self {
        let a = node.attrs();
        Self {
            ino: node.ino,
            kind: node.kind,
            mode: a.mode,
            nlink: a.nlink,
            size: a.size,
            atime: a.atime,
            mtime: a.mtime,
            ctime: a.ctime,
        }
    }
}

/// Fields to change in `setattr`; unset fields are left alone.
#[derive(Debug, Clone, Copy, Default)]
pub struct SetAttrs {
    pub mode: Option<u32>,
    pub size: Option<u64>,
    pub atime: Option<SystemTime>,
    pub mtime: Option<SystemTime>,
}

impl<D: BlockDevice + 'static> FerroFs<D> {
    /// Fetch a node's attributes.
    pub async fn getattr(&self, ino: Ino) -> FsResult<FileAttr> {
        let node = self.node(ino)?;
        Ok(FileAttr::of(&node))
    }

    /// Apply the set fields of `changes` and return the resulting
    /// attributes. A size change routes through `truncate`, so it carries
    /// the same kind restrictions and block accounting.
    pub async fn setattr(&self, ino: Ino, changes: SetAttrs) -> FsResult<FileAttr> {
        let node = self.node(ino)?;
        if let Some(mode) = changes.mode {
            if mode & !0o7777 != 0 {
                return Err(FsError::InvalidArgument("bad mode bits"));
            }
        }
        if let Some(size) = changes.size {
            self.truncate(ino, size).await?;
        }
        let now = Self::now();
        node.update_attrs(|a| {
            if let Some(mode) = changes.mode {
                a.mode = mode;
            }
            if let Some(atime) = changes.atime {
                a.atime = atime;
            }
            if let Some(mtime) = changes.mtime {
                a.mtime = mtime;
            }
            a.ctime = now;
        });
        Ok(FileAttr::of(&node))
    }

    /// Check whether `requested` access would be granted by the node's
    /// owner permission bits. Purely advisory; `open` re-checks.
    pub async fn access(&self, ino: Ino, requested: AccessMode) -> FsResult<()> {
        let node = self.node(ino)?;
        let owner = (node.attrs().mode >> 6) & 0o7;
        if requested.bits() & !owner != 0 {
            return Err(FsError::PermissionDenied);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::{Duration, SystemTime};

    use super::*;
    use crate::fs::FerroFs;
    use crate::mount::MountOptions;
    use crate::node::ROOT_INO;
    use crate::store::mem::MemBlockDevice;

    async fn mount_mem() -> Arc<FerroFs<MemBlockDevice>> {
        FerroFs::mount(MemBlockDevice::new(64), MountOptions::default()).unwrap()
    }

    #[tokio::test]
    async fn getattr_reports_identity_and_kind() {
        let fs = mount_mem().await;
        let root = fs.getattr(ROOT_INO).await.unwrap();
        assert_eq!(root.ino, ROOT_INO);
        assert_eq!(root.kind, NodeKind::Dir);
        assert_eq!(root.mode, 0o755);

        let f = fs.create(ROOT_INO, "f", 0o640).await.unwrap();
        let attr = fs.getattr(f).await.unwrap();
        assert_eq!(attr.kind, NodeKind::File);
        assert_eq!(attr.mode, 0o640);
        assert_eq!(attr.nlink, 1);
        assert_eq!(attr.size, 0);
    }

    #[tokio::test]
    async fn setattr_changes_only_set_fields() {
        let fs = mount_mem().await;
        let f = fs.create(ROOT_INO, "f", 0o644).await.unwrap();
        let stamp = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000_000);
        let attr = fs
            .setattr(
                f,
                SetAttrs {
                    mode: Some(0o600),
                    mtime: Some(stamp),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(attr.mode, 0o600);
        assert_eq!(attr.mtime, stamp);
        assert_eq!(attr.size, 0);
        // ctime moved past the explicit mtime.
        assert!(attr.ctime > stamp);
    }

    #[tokio::test]
    async fn setattr_size_truncates() {
        let fs = mount_mem().await;
        let f = fs.create(ROOT_INO, "f", 0o644).await.unwrap();
        let attr = fs
            .setattr(
                f,
                SetAttrs {
                    size: Some(8192),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(attr.size, 8192);

        let d = fs.mkdir(ROOT_INO, "d", 0o755).await.unwrap();
        assert!(matches!(
            fs.setattr(
                d,
                SetAttrs {
                    size: Some(0),
                    ..Default::default()
                }
            )
            .await,
            Err(FsError::IsADirectory)
        ));
    }

    #[tokio::test]
    async fn setattr_rejects_bad_mode() {
        let fs = mount_mem().await;
        let f = fs.create(ROOT_INO, "f", 0o644).await.unwrap();
        assert!(matches!(
            fs.setattr(
                f,
                SetAttrs {
                    mode: Some(0o170000),
                    ..Default::default()
                }
            )
            .await,
            Err(FsError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn access_follows_owner_bits() {
        let fs = mount_mem().await;
        let f = fs.create(ROOT_INO, "f", 0o400).await.unwrap();
        fs.access(f, AccessMode::READ).await.unwrap();
        assert!(matches!(
            fs.access(f, AccessMode::WRITE).await,
            Err(FsError::PermissionDenied)
        ));
        assert!(matches!(
            fs.access(f, AccessMode::READ | AccessMode::EXEC).await,
            Err(FsError::PermissionDenied)
        ));
    }
}
