//! File operation set: open, close, read, write, truncate, fsync.
//!
//! Reads and writes run under the file's payload lock (shared for reads,
//! exclusive for writes), so a read never observes a half-applied write.
//! Block space is reserved from the superblock before any device write,
//! which keeps a failed write from leaking space or landing partially.

use std::sync::Arc;

use bitflags::bitflags;
use bytes::Bytes;
use log::{debug, warn};

use crate::error::{FsError, FsResult};
use crate::node::{Ino, NodeKind, NodePayload};
use crate::store::{BlockDevice, split_range_into_blocks};

use super::{FerroFs, OpenHandle};

bitflags! {
    /// Requested access for `open`, checked against the owner permission
    /// bits of the node's mode.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AccessMode: u32 {
        const EXEC = 1;
        const WRITE = 2;
        const READ = 4;
    }
}

/// Durability contract for `fsync`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// Return only after the device flush completes.
    Blocking,
    /// Schedule the flush and return immediately.
    NonBlocking,
}

/// An open file handle. Holds a node reference until closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Handle {
    pub(crate) fh: u64,
    pub ino: Ino,
    pub access: AccessMode,
}

fn mode_allows(mode: u32, requested: AccessMode) -> bool {
    let owner = (mode >> 6) & 0o7;
    requested.bits() & !owner == 0
}

impl<D: BlockDevice + 'static> FerroFs<D> {
    /// Open a file, taking a node reference that `close` gives back.
    pub async fn open(&self, ino: Ino, access: AccessMode) -> FsResult<Handle> {
        let _gate = self.gate.read().await;
        let node = self.node(ino)?;
        if node.kind == NodeKind::Dir {
            return Err(FsError::IsADirectory);
        }
        if !mode_allows(node.attrs().mode, access) {
            return Err(FsError::PermissionDenied);
        }
        self.cache.acquire(ino)?;
        let fh = self.next_fh();
        self.handles
            .lock()
            .unwrap()
            .insert(fh, OpenHandle { ino, access });
        debug!("open ino {ino} access {access:?} -> fh {fh}");
        Ok(Handle { fh, ino, access })
    }

    /// Close a handle. Never fails; closing an unknown handle is a no-op.
    /// If this was the last reference to an unlinked node its data is
    /// discarded here.
    pub async fn close(&self, handle: Handle) {
        let removed = self.handles.lock().unwrap().remove(&handle.fh);
        if removed.is_none() {
            return;
        }
        if let Some(orphan) = self.cache.release(handle.ino) {
            self.discard_node_data(&orphan).await;
        }
        debug!("close fh {} (ino {})", handle.fh, handle.ino);
    }

    /// Read up to `len` bytes at `offset`. Reads at or past EOF return an
    /// empty buffer; reads crossing EOF are clamped.
    pub async fn read(&self, handle: &Handle, offset: u64, len: usize) -> FsResult<Bytes> {
        let node = self.handle_node(handle, AccessMode::READ)?;
        let payload = node.payload.read().await;
        let NodePayload::File { .. } = &*payload else {
            return Err(FsError::InvalidArgument("not a regular file"));
        };

        let size = node.attrs().size;
        if offset >= size || len == 0 {
            return Ok(Bytes::new());
        }
        let len = len.min((size - offset) as usize);

        let mut buf = Vec::with_capacity(len);
        for span in split_range_into_blocks(self.layout, offset, len) {
            let part = self
                .device
                .read_block_range(
                    handle.ino,
                    span.index,
                    span.offset_in_block,
                    span.len,
                    self.layout,
                )
                .await?;
            buf.extend_from_slice(&part);
        }
        drop(payload);
        node.update_attrs(|a| a.atime = Self::now());
        Ok(Bytes::from(buf))
    }

    /// Write `data` at `offset`, extending the file if needed. Space for
    /// newly materialized blocks is reserved up front, so a full device
    /// rejects the whole write rather than applying part of it.
    pub async fn write(&self, handle: &Handle, offset: u64, data: &[u8]) -> FsResult<usize> {
        let node = self.handle_node(handle, AccessMode::WRITE)?;
        if data.is_empty() {
            return Ok(0);
        }
        let end = offset
            .checked_add(data.len() as u64)
            .ok_or(FsError::InvalidArgument("write range overflows file offset"))?;
        let mut payload = node.payload.write().await;
        let NodePayload::File { blocks } = &mut *payload else {
            return Err(FsError::InvalidArgument("not a regular file"));
        };

        let spans = split_range_into_blocks(self.layout, offset, data.len());
        let fresh: Vec<u64> = spans
            .iter()
            .map(|s| s.index)
            .filter(|i| !blocks.contains(i))
            .collect();
        self.ctx.sb.alloc_blocks(fresh.len() as u64)?;

        let mut written = 0usize;
        let mut materialized = 0u64;
        for span in &spans {
            let chunk = &data[written..written + span.len];
            if let Err(e) = self
                .device
                .write_block_range(handle.ino, span.index, span.offset_in_block, chunk, self.layout)
                .await
            {
                // Refund the reservation for blocks never materialized.
                self.ctx
                    .sb
                    .release_blocks(fresh.len() as u64 - materialized);
                return Err(e);
            }
            if blocks.insert(span.index) {
                materialized += 1;
            }
            written += span.len;
        }
        drop(payload);

        let now = Self::now();
        node.update_attrs(|a| {
            a.size = a.size.max(end);
            a.mtime = now;
            a.ctime = now;
        });
        node.mark_dirty();
        debug!("write ino {} offset {offset} len {}", handle.ino, data.len());
        Ok(written)
    }

    /// Set a file's size. Growing leaves a hole that reads as zeros;
    /// shrinking discards blocks past the new end and zeros the tail of
    /// the boundary block so stale bytes never reappear on regrowth.
    pub async fn truncate(&self, ino: Ino, new_size: u64) -> FsResult<()> {
        let node = self.node(ino)?;
        match node.kind {
            NodeKind::File => {}
            NodeKind::Dir => return Err(FsError::IsADirectory),
            NodeKind::Symlink => return Err(FsError::InvalidArgument("cannot truncate symlink")),
        }
        let mut payload = node.payload.write().await;
        let NodePayload::File { blocks } = &mut *payload else {
            unreachable!("file node carries file payload");
        };

        let old_size = node.attrs().size;
        if new_size < old_size {
            let keep = self.layout.blocks_spanned(new_size);
            let doomed: Vec<u64> = blocks.range(keep..).copied().collect();
            for index in &doomed {
                blocks.remove(index);
                if let Err(e) = self.device.discard(ino, *index).await {
                    warn!("discard of block {index} for ino {ino} failed: {e}");
                }
            }
            self.ctx.sb.release_blocks(doomed.len() as u64);

            // Zero the cut tail of the boundary block if it is materialized.
            let tail_off = self.layout.within_block_offset(new_size);
            if tail_off != 0 {
                let boundary = self.layout.block_index_of(new_size);
                if blocks.contains(&boundary) {
                    let zeros = vec![0u8; (self.layout.block_size - tail_off) as usize];
                    self.device
                        .write_block_range(ino, boundary, tail_off, &zeros, self.layout)
                        .await?;
                }
            }
        }
        drop(payload);

        let now = Self::now();
        node.update_attrs(|a| {
            a.size = new_size;
            a.mtime = now;
            a.ctime = now;
        });
        node.mark_dirty();
        Ok(())
    }

    /// Flush a file's state to the device. A clean node is a cheap no-op.
    pub async fn fsync(&self, handle: &Handle, mode: SyncMode) -> FsResult<()> {
        let node = self.handle_node(handle, AccessMode::empty())?;
        if !node.take_dirty() {
            return Ok(());
        }
        match mode {
            SyncMode::Blocking => {
                if let Err(e) = self.device.flush().await {
                    // Still dirty; a later fsync must retry.
                    node.mark_dirty();
                    return Err(e);
                }
                Ok(())
            }
            SyncMode::NonBlocking => {
                let device = Arc::clone(&self.device);
                let node = Arc::clone(&node);
                tokio::spawn(async move {
                    if let Err(e) = device.flush().await {
                        // Leave the node dirty so the next blocking fsync
                        // retries the flush and surfaces the failure.
                        node.mark_dirty();
                        warn!("background flush for ino {} failed: {e}", node.ino);
                    }
                });
                Ok(())
            }
        }
    }

    /// Validate a handle against the open table and its granted access.
    fn handle_node(
        &self,
        handle: &Handle,
        need: AccessMode,
    ) -> FsResult<Arc<crate::node::Node>> {
        let table = self.handles.lock().unwrap();
        let open = table
            .get(&handle.fh)
            .ok_or(FsError::InvalidArgument("stale file handle"))?;
        if open.ino != handle.ino {
            return Err(FsError::InvalidArgument("stale file handle"));
        }
        if !open.access.contains(need) {
            return Err(FsError::PermissionDenied);
        }
        drop(table);
        self.node(handle.ino)
    }
}
