//! In-memory node model: one `Node` per live filesystem object.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;
use std::time::SystemTime;

pub type Ino = u64;

/// The root directory's inode number is fixed and resolvable from mount time.
pub const ROOT_INO: Ino = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    File,
    Dir,
    Symlink,
}

/// Attribute snapshot; `getattr` returns a copy of this plus identity.
#[derive(Debug, Clone, Copy)]
pub struct NodeAttrs {
    pub mode: u32,
    pub nlink: u32,
    pub size: u64,
    pub atime: SystemTime,
    pub mtime: SystemTime,
    pub ctime: SystemTime,
}

/// A directory entry as stored in the parent's payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirSlot {
    pub ino: Ino,
    pub kind: NodeKind,
}

/// Type-specific payload. Directory entries never contain `.`/`..`; those
/// are synthesized by lookup and readdir. A file's payload is the set of
/// device blocks it has materialized.
#[derive(Debug)]
pub enum NodePayload {
    Dir {
        parent: Ino,
        entries: BTreeMap<String, DirSlot>,
    },
    File {
        blocks: BTreeSet<u64>,
    },
    Symlink(String),
}

impl NodePayload {
    pub fn empty_dir(parent: Ino) -> Self {
        NodePayload::Dir {
            parent,
            entries: BTreeMap::new(),
        }
    }

    pub fn empty_file() -> Self {
        NodePayload::File {
            blocks: BTreeSet::new(),
        }
    }
}

#[derive(Debug)]
pub struct Node {
    pub ino: Ino,
    pub kind: NodeKind,
    attrs: RwLock<NodeAttrs>,
    /// Structural lock for directories, reader/writer data lock for files.
    pub(crate) payload: tokio::sync::RwLock<NodePayload>,
    dirty: AtomicBool,
}

impl Node {
    pub(crate) fn new(ino: Ino, kind: NodeKind, mode: u32, payload: NodePayload) -> Self {
        let now = SystemTime::now();
        let (nlink, size) = match &payload {
            // "." plus the parent's entry.
            NodePayload::Dir { .. } => (2, 0),
            NodePayload::File { .. } => (1, 0),
            NodePayload::Symlink(target) => (1, target.len() as u64),
        };
        Self {
            ino,
            kind,
            attrs: RwLock::new(NodeAttrs {
                mode,
                nlink,
                size,
                atime: now,
                mtime: now,
                ctime: now,
            }),
            payload: tokio::sync::RwLock::new(payload),
            dirty: AtomicBool::new(false),
        }
    }

    pub fn is_dir(&self) -> bool {
        self.kind == NodeKind::Dir
    }

    pub fn attrs(&self) -> NodeAttrs {
        *self.attrs.read().unwrap()
    }

    pub(crate) fn update_attrs(&self, f: impl FnOnce(&mut NodeAttrs)) {
        f(&mut self.attrs.write().unwrap());
    }

    pub(crate) fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }

    /// Clear and return the dirty flag; fsync uses this for idempotency.
    pub(crate) fn take_dirty(&self) -> bool {
        self.dirty.swap(false, Ordering::AcqRel)
    }
}

/// Item produced by readdir. `cursor` restarts iteration just past this
/// entry when passed back in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub ino: Ino,
    pub kind: NodeKind,
    pub cursor: DirCursor,
}

/// Opaque readdir restart token.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct DirCursor(pub(crate) u64);

impl DirCursor {
    /// Start of a directory scan.
    pub const START: DirCursor = DirCursor(0);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_dir_has_two_links() {
        let node = Node::new(2, NodeKind::Dir, 0o755, NodePayload::empty_dir(ROOT_INO));
        assert_eq!(node.attrs().nlink, 2);
        assert!(node.is_dir());
    }

    #[test]
    fn symlink_size_is_target_len() {
        let node = Node::new(
            3,
            NodeKind::Symlink,
            0o777,
            NodePayload::Symlink("/tmp/target".into()),
        );
        assert_eq!(node.attrs().size, 11);
        assert_eq!(node.attrs().nlink, 1);
    }

    #[test]
    fn dirty_flag_is_taken_once() {
        let node = Node::new(4, NodeKind::File, 0o644, NodePayload::empty_file());
        assert!(!node.take_dirty());
        node.mark_dirty();
        assert!(node.take_dirty());
        assert!(!node.take_dirty());
    }
}
