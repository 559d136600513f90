//! Storage collaborator: block-level read/write/flush behind an async trait.
//!
//! The driver core never touches a concrete on-disk layout; it hands the
//! device a `(owner inode, block index)` pair and a byte range. Unwritten
//! ranges read back as zeros, which is how file holes stay logically
//! zero-filled without any allocation.
//!
//! Implementations:
//! - `MemBlockDevice`: in-memory map, for tests and RAM-backed mounts
//! - `DirBlockDevice`: one file per block under a local directory
//! - `CachedDevice`: read-through block cache wrapping any other device

pub mod cache;
pub mod dirfs;
pub mod layout;
pub mod mem;

use async_trait::async_trait;

use crate::error::FsResult;

pub use layout::{BlockLayout, BlockSpan, split_range_into_blocks};

/// Abstract block storage. `owner` is the inode number the block belongs to;
/// callers guarantee `offset_in_block + len <= layout.block_size`.
#[async_trait]
pub trait BlockDevice: Send + Sync {
    /// Total capacity in blocks. Zero means the device reports no capacity.
    fn capacity_blocks(&self) -> u64;

    /// Read a range inside one block. Holes are zero-filled.
    async fn read_block_range(
        &self,
        owner: u64,
        index: u64,
        offset_in_block: u32,
        len: usize,
        layout: BlockLayout,
    ) -> FsResult<Vec<u8>>;

    /// Write a range inside one block, materializing it if absent.
    async fn write_block_range(
        &self,
        owner: u64,
        index: u64,
        offset_in_block: u32,
        data: &[u8],
        layout: BlockLayout,
    ) -> FsResult<()>;

    /// Drop one block entirely. Absent blocks are not an error.
    async fn discard(&self, owner: u64, index: u64) -> FsResult<()>;

    /// Push all pending writes to stable storage.
    async fn flush(&self) -> FsResult<()>;
}
