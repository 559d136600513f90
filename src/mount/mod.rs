//! Per-mount identity: superblock, mount state machine, statistics.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::error::{FsError, FsResult};
use crate::store::layout::DEFAULT_BLOCK_SIZE;

/// "FRFS", identifies the filesystem type.
pub const FERROFS_MAGIC: u32 = 0x4652_4653;

/// Shared host-wide filename length limit.
pub const NAME_MAX: usize = 255;

#[derive(Debug, Clone, Copy)]
pub struct MountOptions {
    pub block_size: u32,
    pub name_max: usize,
}

impl Default for MountOptions {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            name_max: NAME_MAX,
        }
    }
}

/// Immutable-after-mount identification and capacity summary. Only the
/// free-block counter moves, and it never exceeds `total_blocks`.
#[derive(Debug)]
pub struct Superblock {
    pub magic: u32,
    pub total_blocks: u64,
    free_blocks: AtomicU64,
    pub block_size: u32,
    pub name_max: usize,
}

impl Superblock {
    pub fn new(total_blocks: u64, block_size: u32, name_max: usize) -> Self {
        Self {
            magic: FERROFS_MAGIC,
            total_blocks,
            free_blocks: AtomicU64::new(total_blocks),
            block_size,
            name_max,
        }
    }

    pub fn free_blocks(&self) -> u64 {
        self.free_blocks.load(Ordering::Acquire)
    }

    /// Reserve `n` blocks or fail with `NoSpace` leaving the count intact.
    pub fn alloc_blocks(&self, n: u64) -> FsResult<()> {
        if n == 0 {
            return Ok(());
        }
        let mut cur = self.free_blocks.load(Ordering::Acquire);
        loop {
            if cur < n {
                return Err(FsError::NoSpace);
            }
            match self.free_blocks.compare_exchange_weak(
                cur,
                cur - n,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(()),
                Err(actual) => cur = actual,
            }
        }
    }

    /// Return `n` blocks to the free pool, clamped at capacity.
    pub fn release_blocks(&self, n: u64) {
        if n == 0 {
            return;
        }
        let mut cur = self.free_blocks.load(Ordering::Acquire);
        loop {
            let next = (cur + n).min(self.total_blocks);
            match self.free_blocks.compare_exchange_weak(
                cur,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return,
                Err(actual) => cur = actual,
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountState {
    Unmounted,
    Mounting,
    Mounted,
    Unmounting,
}

/// Owns the superblock and serializes mount-wide transitions against each
/// other. Node-level operations only check the state; unmount quiescence is
/// enforced in the filesystem layer where the node cache lives.
#[derive(Debug)]
pub struct MountContext {
    pub sb: Superblock,
    state: Mutex<MountState>,
}

impl MountContext {
    pub fn new(sb: Superblock) -> Self {
        Self {
            sb,
            state: Mutex::new(MountState::Mounting),
        }
    }

    pub fn state(&self) -> MountState {
        *self.state.lock().unwrap()
    }

    pub(crate) fn set_state(&self, next: MountState) {
        *self.state.lock().unwrap() = next;
    }

    /// Transition under the state lock; `f` decides the next state or fails.
    pub(crate) fn transition(
        &self,
        f: impl FnOnce(MountState) -> FsResult<MountState>,
    ) -> FsResult<()> {
        let mut state = self.state.lock().unwrap();
        *state = f(*state)?;
        Ok(())
    }

    pub fn ensure_mounted(&self) -> FsResult<()> {
        match self.state() {
            MountState::Mounted => Ok(()),
            _ => Err(FsError::InvalidArgument("filesystem not mounted")),
        }
    }
}

/// Host-facing statfs snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub total_blocks: u64,
    pub free_blocks: u64,
    /// May diverge from `free_blocks` once reserved space is modeled.
    pub avail_blocks: u64,
    pub total_inodes: u64,
    pub free_inodes: u64,
    pub block_size: u32,
    pub io_size: u32,
    pub name_max: usize,
}
