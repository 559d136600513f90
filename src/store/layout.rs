//! Block geometry helpers: map file byte ranges onto device blocks.

/// Default block size matches the host's native page size.
pub const DEFAULT_BLOCK_SIZE: u32 = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockLayout {
    pub block_size: u32,
}

impl Default for BlockLayout {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
        }
    }
}

impl BlockLayout {
    pub fn new(block_size: u32) -> Self {
        Self { block_size }
    }

    pub fn block_index_of(&self, offset: u64) -> u64 {
        offset / self.block_size as u64
    }

    pub fn within_block_offset(&self, offset: u64) -> u32 {
        (offset % self.block_size as u64) as u32
    }

    /// Number of blocks needed to cover `size` bytes.
    pub fn blocks_spanned(&self, size: u64) -> u64 {
        size.div_ceil(self.block_size as u64)
    }
}

/// A file byte range projected into one block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockSpan {
    pub index: u64,
    pub offset_in_block: u32,
    pub len: usize,
}

/// Split the file range `[offset, offset + len)` into per-block spans.
pub fn split_range_into_blocks(layout: BlockLayout, mut offset: u64, len: usize) -> Vec<BlockSpan> {
    let mut remaining = len as u64;
    let mut out = Vec::new();
    while remaining > 0 {
        let index = layout.block_index_of(offset);
        let offset_in_block = layout.within_block_offset(offset);
        let cap = layout.block_size as u64 - offset_in_block as u64;
        let take = cap.min(remaining);
        out.push(BlockSpan {
            index,
            offset_in_block,
            len: take as usize,
        });
        offset += take;
        remaining -= take;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_within_single_block() {
        let layout = BlockLayout::default();
        let spans = split_range_into_blocks(layout, 123, 1024);
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].index, 0);
        assert_eq!(spans[0].offset_in_block, 123);
        assert_eq!(spans[0].len, 1024);
    }

    #[test]
    fn split_across_two_blocks() {
        let layout = BlockLayout::default();
        let start = layout.block_size as u64 - 10;
        let spans = split_range_into_blocks(layout, start, 100);
        assert_eq!(spans.len(), 2);
        assert_eq!(spans[0].index, 0);
        assert_eq!(spans[0].offset_in_block, layout.block_size - 10);
        assert_eq!(spans[0].len, 10);
        assert_eq!(spans[1].index, 1);
        assert_eq!(spans[1].offset_in_block, 0);
        assert_eq!(spans[1].len, 90);
    }

    #[test]
    fn split_zero_len() {
        let layout = BlockLayout::default();
        assert!(split_range_into_blocks(layout, 0, 0).is_empty());
    }

    #[test]
    fn blocks_spanned_rounds_up() {
        let layout = BlockLayout::default();
        assert_eq!(layout.blocks_spanned(0), 0);
        assert_eq!(layout.blocks_spanned(1), 1);
        assert_eq!(layout.blocks_spanned(layout.block_size as u64), 1);
        assert_eq!(layout.blocks_spanned(layout.block_size as u64 + 1), 2);
    }
}
