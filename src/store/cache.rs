//! Read-through block cache layered over any `BlockDevice`.
//!
//! Whole blocks are cached; writes and discards invalidate the cached copy
//! so readers always observe the latest bytes.

use async_trait::async_trait;
use bytes::Bytes;

use super::layout::BlockLayout;
use super::BlockDevice;
use crate::error::FsResult;

type BlockKey = (u64, u64);

pub struct CachedDevice<D: BlockDevice> {
    inner: D,
    cache: moka::future::Cache<BlockKey, Bytes>,
}

impl<D: BlockDevice> CachedDevice<D> {
    pub fn new(inner: D) -> Self {
        Self::with_capacity(inner, 10_000)
    }

    pub fn with_capacity(inner: D, max_blocks: u64) -> Self {
        Self {
            inner,
            cache: moka::future::Cache::new(max_blocks),
        }
    }
}

#[async_trait]
impl<D: BlockDevice> BlockDevice for CachedDevice<D> {
    fn capacity_blocks(&self) -> u64 {
        self.inner.capacity_blocks()
    }

    async fn read_block_range(
        &self,
        owner: u64,
        index: u64,
        offset_in_block: u32,
        len: usize,
        layout: BlockLayout,
    ) -> FsResult<Vec<u8>> {
        let key = (owner, index);
        let block = match self.cache.get(&key).await {
            Some(block) => block,
            None => {
                let full = self
                    .inner
                    .read_block_range(owner, index, 0, layout.block_size as usize, layout)
                    .await?;
                let block = Bytes::from(full);
                self.cache.insert(key, block.clone()).await;
                block
            }
        };
        let start = offset_in_block as usize;
        Ok(block[start..start + len].to_vec())
    }

    async fn write_block_range(
        &self,
        owner: u64,
        index: u64,
        offset_in_block: u32,
        data: &[u8],
        layout: BlockLayout,
    ) -> FsResult<()> {
        self.inner
            .write_block_range(owner, index, offset_in_block, data, layout)
            .await?;
        self.cache.invalidate(&(owner, index)).await;
        Ok(())
    }

    async fn discard(&self, owner: u64, index: u64) -> FsResult<()> {
        self.inner.discard(owner, index).await?;
        self.cache.invalidate(&(owner, index)).await;
        Ok(())
    }

    async fn flush(&self) -> FsResult<()> {
        self.inner.flush().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::mem::MemBlockDevice;

    #[tokio::test]
    async fn cached_reads_see_later_writes() {
        let layout = BlockLayout::default();
        let dev = CachedDevice::new(MemBlockDevice::new(64));

        dev.write_block_range(1, 0, 0, &[1u8; 16], layout).await.unwrap();
        let first = dev.read_block_range(1, 0, 0, 16, layout).await.unwrap();
        assert_eq!(first, vec![1u8; 16]);

        // Overwrite must invalidate the cached block.
        dev.write_block_range(1, 0, 0, &[2u8; 16], layout).await.unwrap();
        let second = dev.read_block_range(1, 0, 0, 16, layout).await.unwrap();
        assert_eq!(second, vec![2u8; 16]);

        dev.discard(1, 0).await.unwrap();
        let third = dev.read_block_range(1, 0, 0, 16, layout).await.unwrap();
        assert_eq!(third, vec![0u8; 16]);
    }
}
