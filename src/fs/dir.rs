//! Directory operation set: lookup, create, mkdir, rmdir, remove, rename,
//! symlink, readlink, readdir.
//!
//! Every structural mutation runs under the parent directory's payload
//! write lock, so concurrent lookups and mutations observe a consistent
//! entry set. Lock order is parent before child, and for rename the two
//! parents are taken in inode order.

use std::collections::HashSet;

use futures_util::stream;
use log::debug;

use crate::driver::DirStream;
use crate::error::{FsError, FsResult};
use crate::node::{DirCursor, DirEntry, DirSlot, Ino, NodeKind, NodePayload, ROOT_INO};
use crate::store::BlockDevice;

use super::FerroFs;

impl<D: BlockDevice + 'static> FerroFs<D> {
    /// Resolve `name` inside `dir`. `.`/`..` are synthesized, so the root
    /// is resolvable before any other traversal.
    pub async fn lookup(&self, dir: Ino, name: &str) -> FsResult<Ino> {
        let d = self.dir_node(dir)?;
        let payload = d.payload.read().await;
        let NodePayload::Dir { parent, entries } = &*payload else {
            unreachable!("directory node carries dir payload");
        };
        match name {
            "." => Ok(dir),
            ".." => Ok(*parent),
            _ => entries.get(name).map(|s| s.ino).ok_or(FsError::NotFound),
        }
    }

    /// Create a regular file.
    pub async fn create(&self, dir: Ino, name: &str, mode: u32) -> FsResult<Ino> {
        self.check_name(name)?;
        if mode & !0o7777 != 0 {
            return Err(FsError::InvalidArgument("bad mode bits"));
        }
        let _gate = self.gate.read().await;
        let d = self.dir_node(dir)?;
        let mut payload = d.payload.write().await;
        let NodePayload::Dir { entries, .. } = &mut *payload else {
            unreachable!("directory node carries dir payload");
        };
        if entries.contains_key(name) {
            return Err(FsError::AlreadyExists);
        }
        let node = self
            .cache
            .allocate(NodeKind::File, mode, NodePayload::empty_file());
        entries.insert(
            name.to_string(),
            DirSlot {
                ino: node.ino,
                kind: NodeKind::File,
            },
        );
        drop(payload);
        let now = Self::now();
        d.update_attrs(|a| {
            a.mtime = now;
            a.ctime = now;
        });
        // The new node starts Inactive; opening it takes the references.
        self.cache.release(node.ino);
        debug!("create {name:?} in dir {dir} -> ino {}", node.ino);
        Ok(node.ino)
    }

    /// Create a directory. The child starts with no stored entries;
    /// `.`/`..` come from synthesis.
    pub async fn mkdir(&self, dir: Ino, name: &str, mode: u32) -> FsResult<Ino> {
        self.check_name(name)?;
        if mode & !0o7777 != 0 {
            return Err(FsError::InvalidArgument("bad mode bits"));
        }
        let _gate = self.gate.read().await;
        let d = self.dir_node(dir)?;
        let mut payload = d.payload.write().await;
        let NodePayload::Dir { entries, .. } = &mut *payload else {
            unreachable!("directory node carries dir payload");
        };
        if entries.contains_key(name) {
            return Err(FsError::AlreadyExists);
        }
        let node = self
            .cache
            .allocate(NodeKind::Dir, mode, NodePayload::empty_dir(dir));
        entries.insert(
            name.to_string(),
            DirSlot {
                ino: node.ino,
                kind: NodeKind::Dir,
            },
        );
        drop(payload);
        let now = Self::now();
        d.update_attrs(|a| {
            // The child's ".." points back here.
            a.nlink += 1;
            a.mtime = now;
            a.ctime = now;
        });
        self.cache.release(node.ino);
        debug!("mkdir {name:?} in dir {dir} -> ino {}", node.ino);
        Ok(node.ino)
    }

    /// Remove an empty directory.
    pub async fn rmdir(&self, dir: Ino, name: &str) -> FsResult<()> {
        let _gate = self.gate.read().await;
        let d = self.dir_node(dir)?;
        let mut payload = d.payload.write().await;
        let NodePayload::Dir { entries, .. } = &mut *payload else {
            unreachable!("directory node carries dir payload");
        };
        let slot = *entries.get(name).ok_or(FsError::NotFound)?;
        if slot.kind != NodeKind::Dir {
            return Err(FsError::NotADirectory);
        }
        let child = self.cache.peek(slot.ino)?;
        {
            // Parent-then-child order; only `.`/`..` (synthesized) may remain.
            let child_payload = child.payload.read().await;
            let NodePayload::Dir { entries: child_entries, .. } = &*child_payload else {
                unreachable!("directory node carries dir payload");
            };
            if !child_entries.is_empty() {
                return Err(FsError::NotEmpty);
            }
        }
        entries.remove(name);
        drop(payload);
        let now = Self::now();
        child.update_attrs(|a| a.nlink = 0);
        d.update_attrs(|a| {
            a.nlink = a.nlink.saturating_sub(1);
            a.mtime = now;
            a.ctime = now;
        });
        if let Some(orphan) = self.cache.reclaim_if_orphan(slot.ino) {
            self.discard_node_data(&orphan).await;
        }
        debug!("rmdir {name:?} in dir {dir} (ino {})", slot.ino);
        Ok(())
    }

    /// Unlink a file or symlink. Data is discarded once both the link
    /// count and the reference count reach zero.
    pub async fn remove(&self, dir: Ino, name: &str) -> FsResult<()> {
        let _gate = self.gate.read().await;
        let d = self.dir_node(dir)?;
        let mut payload = d.payload.write().await;
        let NodePayload::Dir { entries, .. } = &mut *payload else {
            unreachable!("directory node carries dir payload");
        };
        let slot = *entries.get(name).ok_or(FsError::NotFound)?;
        if slot.kind == NodeKind::Dir {
            return Err(FsError::IsADirectory);
        }
        entries.remove(name);
        drop(payload);
        let now = Self::now();
        let target = self.cache.peek(slot.ino)?;
        target.update_attrs(|a| {
            a.nlink = a.nlink.saturating_sub(1);
            a.ctime = now;
        });
        d.update_attrs(|a| {
            a.mtime = now;
            a.ctime = now;
        });
        if let Some(orphan) = self.cache.reclaim_if_orphan(slot.ino) {
            self.discard_node_data(&orphan).await;
        }
        debug!("remove {name:?} from dir {dir} (ino {})", slot.ino);
        Ok(())
    }

    /// Rename, atomically with respect to concurrent lookups: either the
    /// old name is gone and the new one live, or neither change is seen.
    pub async fn rename(
        &self,
        src_dir: Ino,
        src_name: &str,
        dst_dir: Ino,
        dst_name: &str,
    ) -> FsResult<()> {
        self.check_name(dst_name)?;
        let _gate = self.gate.read().await;
        let src = self.dir_node(src_dir)?;
        let dst = self.dir_node(dst_dir)?;

        // Cross-directory moves serialize on the mount-wide rename lock,
        // so the ancestry check below cannot be invalidated by an opposing
        // move between here and the commit. The entry set itself is still
        // re-read under the write locks.
        let _topology = if src_dir != dst_dir {
            Some(self.rename_lock.lock().await)
        } else {
            None
        };
        let moving = {
            let payload = src.payload.read().await;
            let NodePayload::Dir { entries, .. } = &*payload else {
                unreachable!("directory node carries dir payload");
            };
            *entries.get(src_name).ok_or(FsError::NotFound)?
        };
        if moving.kind == NodeKind::Dir {
            if moving.ino == dst_dir {
                return Err(FsError::InvalidArgument("cannot move directory into itself"));
            }
            self.ensure_not_ancestor(moving.ino, dst_dir).await?;
        }

        let overwritten = if src_dir == dst_dir {
            if src_name == dst_name {
                return Ok(());
            }
            let mut payload = src.payload.write().await;
            let NodePayload::Dir { entries, .. } = &mut *payload else {
                unreachable!("directory node carries dir payload");
            };
            let slot = *entries.get(src_name).ok_or(FsError::NotFound)?;
            let replaced = match entries.get(dst_name).copied() {
                Some(existing) => {
                    self.check_overwrite(slot, existing, src_dir).await?;
                    Some(existing)
                }
                None => None,
            };
            entries.remove(src_name);
            entries.insert(dst_name.to_string(), slot);
            replaced
        } else {
            // Two distinct parents: take their locks in inode order.
            let (first, second) = if src_dir < dst_dir { (&src, &dst) } else { (&dst, &src) };
            let mut guard_a = first.payload.write().await;
            let mut guard_b = second.payload.write().await;
            let (src_payload, dst_payload) = if src_dir < dst_dir {
                (&mut *guard_a, &mut *guard_b)
            } else {
                (&mut *guard_b, &mut *guard_a)
            };
            let NodePayload::Dir { entries: src_entries, .. } = src_payload else {
                unreachable!("directory node carries dir payload");
            };
            let NodePayload::Dir { entries: dst_entries, .. } = dst_payload else {
                unreachable!("directory node carries dir payload");
            };
            let slot = *src_entries.get(src_name).ok_or(FsError::NotFound)?;
            let replaced = match dst_entries.get(dst_name).copied() {
                Some(existing) => {
                    self.check_overwrite(slot, existing, src_dir).await?;
                    Some(existing)
                }
                None => None,
            };
            src_entries.remove(src_name);
            dst_entries.insert(dst_name.to_string(), slot);
            drop(guard_b);
            drop(guard_a);

            if slot.kind == NodeKind::Dir {
                // Repoint the moved directory's synthesized "..".
                let child = self.cache.peek(slot.ino)?;
                let mut child_payload = child.payload.write().await;
                if let NodePayload::Dir { parent, .. } = &mut *child_payload {
                    *parent = dst_dir;
                }
                src.update_attrs(|a| a.nlink = a.nlink.saturating_sub(1));
                dst.update_attrs(|a| a.nlink += 1);
            }
            replaced
        };

        let now = Self::now();
        src.update_attrs(|a| {
            a.mtime = now;
            a.ctime = now;
        });
        if src_dir != dst_dir {
            dst.update_attrs(|a| {
                a.mtime = now;
                a.ctime = now;
            });
        }

        if let Some(existing) = overwritten {
            let target = self.cache.peek(existing.ino)?;
            if existing.kind == NodeKind::Dir {
                target.update_attrs(|a| a.nlink = 0);
                dst.update_attrs(|a| a.nlink = a.nlink.saturating_sub(1));
            } else {
                target.update_attrs(|a| {
                    a.nlink = a.nlink.saturating_sub(1);
                    a.ctime = now;
                });
            }
            if let Some(orphan) = self.cache.reclaim_if_orphan(existing.ino) {
                self.discard_node_data(&orphan).await;
            }
        }
        debug!("rename {src_name:?} (dir {src_dir}) -> {dst_name:?} (dir {dst_dir})");
        Ok(())
    }

    /// Create a symbolic link.
    pub async fn symlink(&self, dir: Ino, name: &str, target: &str) -> FsResult<Ino> {
        self.check_name(name)?;
        if target.is_empty() {
            return Err(FsError::InvalidArgument("empty symlink target"));
        }
        let _gate = self.gate.read().await;
        let d = self.dir_node(dir)?;
        let mut payload = d.payload.write().await;
        let NodePayload::Dir { entries, .. } = &mut *payload else {
            unreachable!("directory node carries dir payload");
        };
        if entries.contains_key(name) {
            return Err(FsError::AlreadyExists);
        }
        let node = self.cache.allocate(
            NodeKind::Symlink,
            0o777,
            NodePayload::Symlink(target.to_string()),
        );
        entries.insert(
            name.to_string(),
            DirSlot {
                ino: node.ino,
                kind: NodeKind::Symlink,
            },
        );
        drop(payload);
        let now = Self::now();
        d.update_attrs(|a| {
            a.mtime = now;
            a.ctime = now;
        });
        self.cache.release(node.ino);
        Ok(node.ino)
    }

    /// Read a symlink's target.
    pub async fn readlink(&self, ino: Ino) -> FsResult<String> {
        let node = self.node(ino)?;
        let payload = node.payload.read().await;
        match &*payload {
            NodePayload::Symlink(target) => Ok(target.clone()),
            _ => Err(FsError::InvalidArgument("not a symlink")),
        }
    }

    /// Stream entries starting just past `cursor`. The snapshot is taken
    /// under the directory's read lock; entries created or removed while
    /// iterating may or may not appear (weak consistency), but iteration
    /// never fails because of them. Offsets 1 and 2 are the synthesized
    /// `.`/`..`.
    pub async fn readdir(&self, dir: Ino, cursor: DirCursor) -> FsResult<DirStream> {
        let d = self.dir_node(dir)?;
        let mut all: Vec<DirEntry>;
        {
            let payload = d.payload.read().await;
            let NodePayload::Dir { parent, entries } = &*payload else {
                unreachable!("directory node carries dir payload");
            };
            all = Vec::with_capacity(entries.len() + 2);
            all.push(DirEntry {
                name: ".".to_string(),
                ino: dir,
                kind: NodeKind::Dir,
                cursor: DirCursor(1),
            });
            all.push(DirEntry {
                name: "..".to_string(),
                ino: *parent,
                kind: NodeKind::Dir,
                cursor: DirCursor(2),
            });
            for (i, (name, slot)) in entries.iter().enumerate() {
                all.push(DirEntry {
                    name: name.clone(),
                    ino: slot.ino,
                    kind: slot.kind,
                    cursor: DirCursor(i as u64 + 3),
                });
            }
        }
        d.update_attrs(|a| a.atime = Self::now());
        let after = cursor.0;
        let items = all
            .into_iter()
            .filter(move |e| e.cursor.0 > after)
            .map(Ok);
        Ok(Box::pin(stream::iter(items)))
    }

    /// Overwrite rules for rename: types must be compatible, a directory
    /// target must be empty, and overwriting the source's own parent is
    /// never legal.
    async fn check_overwrite(&self, slot: DirSlot, existing: DirSlot, src_dir: Ino) -> FsResult<()> {
        if existing.ino == src_dir {
            return Err(FsError::InvalidArgument("cannot overwrite source parent"));
        }
        match (slot.kind == NodeKind::Dir, existing.kind == NodeKind::Dir) {
            (true, true) => {
                let target = self.cache.peek(existing.ino)?;
                let payload = target.payload.read().await;
                let NodePayload::Dir { entries, .. } = &*payload else {
                    unreachable!("directory node carries dir payload");
                };
                if !entries.is_empty() {
                    return Err(FsError::NotEmpty);
                }
                Ok(())
            }
            (false, false) => Ok(()),
            _ => Err(FsError::AlreadyExists),
        }
    }

    /// Reject moving a directory under one of its own descendants by
    /// walking `start`'s parent chain up to the root. Revisiting an inode
    /// means the walk stopped making progress; bail out rather than spin.
    async fn ensure_not_ancestor(&self, maybe_ancestor: Ino, start: Ino) -> FsResult<()> {
        let mut seen = HashSet::new();
        let mut cur = start;
        loop {
            if cur == maybe_ancestor {
                return Err(FsError::InvalidArgument("cannot move directory under itself"));
            }
            if cur == ROOT_INO || !seen.insert(cur) {
                return Ok(());
            }
            let node = self.cache.peek(cur)?;
            let payload = node.payload.read().await;
            cur = match &*payload {
                NodePayload::Dir { parent, .. } => *parent,
                _ => return Ok(()),
            };
        }
    }
}
