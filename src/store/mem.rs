//! In-memory block device for local development and tests.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use super::layout::BlockLayout;
use super::BlockDevice;
use crate::error::FsResult;

type BlockKey = (u64 /* owner */, u64 /* index */);

#[derive(Debug)]
pub struct MemBlockDevice {
    capacity: u64,
    blocks: Mutex<HashMap<BlockKey, Vec<u8>>>,
}

impl MemBlockDevice {
    /// `capacity` is the advertised block count; it bounds superblock
    /// accounting, not this map.
    pub fn new(capacity: u64) -> Self {
        Self {
            capacity,
            blocks: Mutex::new(HashMap::new()),
        }
    }

    #[cfg(test)]
    pub(crate) fn block_count(&self) -> usize {
        self.blocks.lock().unwrap().len()
    }
}

#[async_trait]
impl BlockDevice for MemBlockDevice {
    fn capacity_blocks(&self) -> u64 {
        self.capacity
    }

    async fn read_block_range(
        &self,
        owner: u64,
        index: u64,
        offset_in_block: u32,
        len: usize,
        _layout: BlockLayout,
    ) -> FsResult<Vec<u8>> {
        let blocks = self.blocks.lock().unwrap();
        let mut out = vec![0u8; len];
        if let Some(buf) = blocks.get(&(owner, index)) {
            let start = offset_in_block as usize;
            let copy_end = (start + len).min(buf.len());
            if copy_end > start {
                out[..copy_end - start].copy_from_slice(&buf[start..copy_end]);
            }
        }
        Ok(out)
    }

    async fn write_block_range(
        &self,
        owner: u64,
        index: u64,
        offset_in_block: u32,
        data: &[u8],
        layout: BlockLayout,
    ) -> FsResult<()> {
        let block_size = layout.block_size as usize;
        let mut blocks = self.blocks.lock().unwrap();
        let buf = blocks
            .entry((owner, index))
            .or_insert_with(|| vec![0u8; block_size]);
        if buf.len() < block_size {
            buf.resize(block_size, 0);
        }
        let start = offset_in_block as usize;
        let end = start + data.len();
        debug_assert!(end <= block_size, "write exceeds block boundary");
        buf[start..end].copy_from_slice(data);
        Ok(())
    }

    async fn discard(&self, owner: u64, index: u64) -> FsResult<()> {
        self.blocks.lock().unwrap().remove(&(owner, index));
        Ok(())
    }

    async fn flush(&self) -> FsResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_then_read_back() {
        let layout = BlockLayout::default();
        let dev = MemBlockDevice::new(128);
        let data = vec![7u8; layout.block_size as usize / 2];
        dev.write_block_range(42, 3, layout.block_size / 4, &data, layout)
            .await
            .unwrap();
        let out = dev
            .read_block_range(42, 3, layout.block_size / 4, data.len(), layout)
            .await
            .unwrap();
        assert_eq!(out, data);
    }

    #[tokio::test]
    async fn holes_read_as_zeros() {
        let layout = BlockLayout::default();
        let dev = MemBlockDevice::new(128);
        let out = dev.read_block_range(1, 0, 0, 64, layout).await.unwrap();
        assert!(out.iter().all(|&b| b == 0));
    }

    #[tokio::test]
    async fn discard_forgets_block() {
        let layout = BlockLayout::default();
        let dev = MemBlockDevice::new(128);
        dev.write_block_range(1, 0, 0, &[1, 2, 3], layout)
            .await
            .unwrap();
        assert_eq!(dev.block_count(), 1);
        dev.discard(1, 0).await.unwrap();
        assert_eq!(dev.block_count(), 0);
        // Discarding an absent block is fine.
        dev.discard(1, 0).await.unwrap();
    }
}
