//! Host-facing dispatch surface.
//!
//! `FilesystemDriver` is the full operation table a mounted filesystem
//! exposes to the host: lifecycle, directory, file and attribute calls.
//! Operations a driver does not implement fall through to default bodies
//! returning `NotSupported`, so the host can probe capabilities by calling
//! rather than by inspecting.

pub mod registry;

use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::Stream;

use crate::error::{FsError, FsResult};
use crate::fs::{AccessMode, FerroFs, FileAttr, Handle, SetAttrs, SyncMode};
use crate::mount::StatsSnapshot;
use crate::node::{DirCursor, DirEntry, Ino};
use crate::store::BlockDevice;

pub use registry::{DriverRegistry, Registration};

/// Stream of directory entries produced by `readdir`.
pub type DirStream = Pin<Box<dyn Stream<Item = FsResult<DirEntry>> + Send + 'static>>;

/// The operation table the host dispatches through. One instance per
/// mounted filesystem.
#[async_trait]
pub trait FilesystemDriver: Send + Sync {
    /// Filesystem type name, e.g. for a mount table listing.
    fn fs_type(&self) -> &'static str;

    /// Inode of the mount's root directory.
    fn root_ino(&self) -> Ino;

    /// Tear the mount down. Without `force` this fails `Busy` while any
    /// node is still referenced.
    async fn unmount(&self, force: bool) -> FsResult<()>;

    /// Capacity and usage snapshot.
    fn statistics(&self) -> StatsSnapshot;

    // Directory operations.

    async fn lookup(&self, dir: Ino, name: &str) -> FsResult<Ino>;
    async fn create(&self, dir: Ino, name: &str, mode: u32) -> FsResult<Ino>;
    async fn mkdir(&self, dir: Ino, name: &str, mode: u32) -> FsResult<Ino>;
    async fn rmdir(&self, dir: Ino, name: &str) -> FsResult<()>;
    async fn remove(&self, dir: Ino, name: &str) -> FsResult<()>;
    async fn rename(
        &self,
        src_dir: Ino,
        src_name: &str,
        dst_dir: Ino,
        dst_name: &str,
    ) -> FsResult<()>;
    async fn symlink(&self, dir: Ino, name: &str, target: &str) -> FsResult<Ino>;
    async fn readlink(&self, ino: Ino) -> FsResult<String>;
    async fn readdir(&self, dir: Ino, cursor: DirCursor) -> FsResult<DirStream>;

    // File operations.

    async fn open(&self, ino: Ino, access: AccessMode) -> FsResult<Handle>;
    async fn close(&self, handle: Handle);
    async fn read(&self, handle: &Handle, offset: u64, len: usize) -> FsResult<Bytes>;
    async fn write(&self, handle: &Handle, offset: u64, data: &[u8]) -> FsResult<usize>;
    async fn truncate(&self, ino: Ino, new_size: u64) -> FsResult<()>;
    async fn fsync(&self, handle: &Handle, mode: SyncMode) -> FsResult<()>;

    /// Device-specific control calls. Unhandled by default.
    async fn ioctl(&self, _handle: &Handle, _cmd: u64, _arg: &[u8]) -> FsResult<Bytes> {
        Err(FsError::NotSupported)
    }

    /// Readiness polling. Unhandled by default; the host treats that as
    /// always ready.
    async fn poll(&self, _handle: &Handle) -> FsResult<u32> {
        Err(FsError::NotSupported)
    }

    // Attribute operations.

    async fn getattr(&self, ino: Ino) -> FsResult<FileAttr>;
    async fn setattr(&self, ino: Ino, changes: SetAttrs) -> FsResult<FileAttr>;
    async fn access(&self, ino: Ino, requested: AccessMode) -> FsResult<()>;
}

#[async_trait]
impl<D: BlockDevice + 'static> FilesystemDriver for FerroFs<D> {
    fn fs_type(&self) -> &'static str {
        FerroFs::fs_type(self)
    }

    fn root_ino(&self) -> Ino {
        FerroFs::root_ino(self)
    }

    async fn unmount(&self, force: bool) -> FsResult<()> {
        FerroFs::unmount(self, force).await
    }

    fn statistics(&self) -> StatsSnapshot {
        FerroFs::statistics(self)
    }

    async fn lookup(&self, dir: Ino, name: &str) -> FsResult<Ino> {
        FerroFs::lookup(self, dir, name).await
    }

    async fn create(&self, dir: Ino, name: &str, mode: u32) -> FsResult<Ino> {
        FerroFs::create(self, dir, name, mode).await
    }

    async fn mkdir(&self, dir: Ino, name: &str, mode: u32) -> FsResult<Ino> {
        FerroFs::mkdir(self, dir, name, mode).await
    }

    async fn rmdir(&self, dir: Ino, name: &str) -> FsResult<()> {
        FerroFs::rmdir(self, dir, name).await
    }

    async fn remove(&self, dir: Ino, name: &str) -> FsResult<()> {
        FerroFs::remove(self, dir, name).await
    }

    async fn rename(
        &self,
        src_dir: Ino,
        src_name: &str,
        dst_dir: Ino,
        dst_name: &str,
    ) -> FsResult<()> {
        FerroFs::rename(self, src_dir, src_name, dst_dir, dst_name).await
    }

    async fn symlink(&self, dir: Ino, name: &str, target: &str) -> FsResult<Ino> {
        FerroFs::symlink(self, dir, name, target).await
    }

    async fn readlink(&self, ino: Ino) -> FsResult<String> {
        FerroFs::readlink(self, ino).await
    }

    async fn readdir(&self, dir: Ino, cursor: DirCursor) -> FsResult<DirStream> {
        FerroFs::readdir(self, dir, cursor).await
    }

    async fn open(&self, ino: Ino, access: AccessMode) -> FsResult<Handle> {
        FerroFs::open(self, ino, access).await
    }

    async fn close(&self, handle: Handle) {
        FerroFs::close(self, handle).await
    }

    async fn read(&self, handle: &Handle, offset: u64, len: usize) -> FsResult<Bytes> {
        FerroFs::read(self, handle, offset, len).await
    }

    async fn write(&self, handle: &Handle, offset: u64, data: &[u8]) -> FsResult<usize> {
        FerroFs::write(self, handle, offset, data).await
    }

    async fn truncate(&self, ino: Ino, new_size: u64) -> FsResult<()> {
        FerroFs::truncate(self, ino, new_size).await
    }

    async fn fsync(&self, handle: &Handle, mode: SyncMode) -> FsResult<()> {
        FerroFs::fsync(self, handle, mode).await
    }

    async fn getattr(&self, ino: Ino) -> FsResult<FileAttr> {
        FerroFs::getattr(self, ino).await
    }

    async fn setattr(&self, ino: Ino, changes: SetAttrs) -> FsResult<FileAttr> {
        FerroFs::setattr(self, ino, changes).await
    }

    async fn access(&self, ino: Ino, requested: AccessMode) -> FsResult<()> {
        FerroFs::access(self, ino, requested).await
    }
}
