//! Local-directory block device: each block persisted as one file under
//! `blocks/{owner}/{index}`. Writes are read-modify-write of the whole
//! block file; `flush` fsyncs every file touched since the last flush.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use super::layout::BlockLayout;
use super::BlockDevice;
use crate::error::FsResult;

pub struct DirBlockDevice {
    root: PathBuf,
    capacity: u64,
    dirty: Mutex<HashSet<PathBuf>>,
}

impl DirBlockDevice {
    pub fn new<P: AsRef<Path>>(root: P, capacity: u64) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            capacity,
            dirty: Mutex::new(HashSet::new()),
        }
    }

    fn path_for(&self, owner: u64, index: u64) -> PathBuf {
        self.root.join("blocks").join(owner.to_string()).join(index.to_string())
    }
}

#[async_trait]
impl BlockDevice for DirBlockDevice {
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
        let path = self.path_for(owner, index);
        let mut out = vec![0u8; len];
        match fs::read(&path).await {
            Ok(buf) => {
                let start = offset_in_block as usize;
                let copy_end = (start + len).min(buf.len());
                if copy_end > start {
                    out[..copy_end - start].copy_from_slice(&buf[start..copy_end]);
                }
                Ok(out)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(out),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_block_range(
        &self,
        owner: u64,
        index: u64,
        offset_in_block: u32,
        data: &[u8],
        layout: BlockLayout,
    ) -> FsResult<()> {
        let path = self.path_for(owner, index);
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).await?;
        }
        let block_size = layout.block_size as usize;
        let mut buf = match fs::read(&path).await {
            Ok(existing) => existing,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => vec![0u8; block_size],
            Err(e) => return Err(e.into()),
        };
        if buf.len() < block_size {
            buf.resize(block_size, 0);
        }
        let start = offset_in_block as usize;
        buf[start..start + data.len()].copy_from_slice(data);
        let mut f = fs::File::create(&path).await?;
        f.write_all(&buf).await?;
        self.dirty.lock().unwrap().insert(path);
        Ok(())
    }

    async fn discard(&self, owner: u64, index: u64) -> FsResult<()> {
        let path = self.path_for(owner, index);
        self.dirty.lock().unwrap().remove(&path);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn flush(&self) -> FsResult<()> {
        let pending: Vec<PathBuf> = self.dirty.lock().unwrap().drain().collect();
        for path in pending {
            match fs::File::open(&path).await {
                Ok(f) => f.sync_all().await?,
                // A dirty block discarded before the flush is not an error.
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn persists_blocks_under_root() {
        let layout = BlockLayout::default();
        let tmp = tempfile::tempdir().unwrap();
        let dev = DirBlockDevice::new(tmp.path(), 64);

        let data = vec![9u8; 100];
        dev.write_block_range(5, 2, 50, &data, layout).await.unwrap();
        let out = dev.read_block_range(5, 2, 50, 100, layout).await.unwrap();
        assert_eq!(out, data);
        assert!(tmp.path().join("blocks/5/2").exists());

        dev.flush().await.unwrap();
        dev.discard(5, 2).await.unwrap();
        assert!(!tmp.path().join("blocks/5/2").exists());
    }

    #[tokio::test]
    async fn missing_block_reads_zeros() {
        let layout = BlockLayout::default();
        let tmp = tempfile::tempdir().unwrap();
        let dev = DirBlockDevice::new(tmp.path(), 64);
        let out = dev.read_block_range(1, 0, 0, 32, layout).await.unwrap();
        assert_eq!(out, vec![0u8; 32]);
    }

    #[tokio::test]
    async fn flush_after_discard_is_ok() {
        let layout = BlockLayout::default();
        let tmp = tempfile::tempdir().unwrap();
        let dev = DirBlockDevice::new(tmp.path(), 64);
        dev.write_block_range(1, 0, 0, &[1u8; 8], layout).await.unwrap();
        dev.discard(1, 0).await.unwrap();
        dev.flush().await.unwrap();
    }
}
