//! Node cache: the arena mapping inode numbers to live nodes.
//!
//! At most one `Node` exists per inode number; `acquire` returns the cached
//! one with its reference count bumped instead of creating a duplicate.
//! Per-node lifecycle: `Active` (refs > 0) -> `Inactive` (refs == 0, still
//! cached) -> `Reclaimed` (slot dropped, inode number back in the reuse
//! pool). Unlinked nodes whose last reference goes away are reclaimed
//! immediately and handed back to the caller so their data blocks can be
//! discarded; linked nodes stay cached for the life of the mount because
//! node metadata has no backing store to refill them from.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use log::debug;

use super::node::{Ino, Node, NodeKind, NodePayload, ROOT_INO};
use crate::error::{FsError, FsResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Active,
    Inactive,
    Reclaimed,
}

#[derive(Debug)]
struct Slot {
    node: Arc<Node>,
    refs: u32,
    state: NodeState,
}

#[derive(Debug)]
struct Inner {
    map: HashMap<Ino, Slot>,
    next_ino: Ino,
    free_inos: Vec<Ino>,
}

#[derive(Debug)]
pub struct NodeCache {
    inner: Mutex<Inner>,
}

impl Default for NodeCache {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeCache {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                map: HashMap::new(),
                next_ino: ROOT_INO,
                free_inos: Vec::new(),
            }),
        }
    }

    /// Create a node with a fresh (or recycled) inode number, refs == 1.
    pub fn allocate(&self, kind: NodeKind, mode: u32, payload: NodePayload) -> Arc<Node> {
        let mut inner = self.inner.lock().unwrap();
        let ino = inner.free_inos.pop().unwrap_or_else(|| {
            let ino = inner.next_ino;
            inner.next_ino += 1;
            ino
        });
        let node = Arc::new(Node::new(ino, kind, mode, payload));
        inner.map.insert(
            ino,
            Slot {
                node: node.clone(),
                refs: 1,
                state: NodeState::Active,
            },
        );
        node
    }

    /// Take a counted reference on an existing node.
    pub fn acquire(&self, ino: Ino) -> FsResult<Arc<Node>> {
        let mut inner = self.inner.lock().unwrap();
        let slot = inner.map.get_mut(&ino).ok_or(FsError::NotFound)?;
        slot.refs += 1;
        slot.state = NodeState::Active;
        Ok(slot.node.clone())
    }

    /// Borrow a node without touching its reference count. Used by short
    /// operations that do not outlive the call (getattr, lookup, ...).
    pub fn peek(&self, ino: Ino) -> FsResult<Arc<Node>> {
        let inner = self.inner.lock().unwrap();
        inner
            .map
            .get(&ino)
            .map(|s| s.node.clone())
            .ok_or(FsError::NotFound)
    }

    /// Drop one counted reference. Never fails. When the last reference
    /// goes away the node turns Inactive; if it is also unlinked it is
    /// reclaimed on the spot and returned so the caller can discard its
    /// data blocks.
    pub fn release(&self, ino: Ino) -> Option<Arc<Node>> {
        let mut inner = self.inner.lock().unwrap();
        let slot = inner.map.get_mut(&ino)?;
        slot.refs = slot.refs.saturating_sub(1);
        if slot.refs > 0 {
            return None;
        }
        if slot.node.attrs().nlink == 0 {
            debug!("node {ino} inactive and unlinked, reclaiming");
            return Self::reclaim_locked(&mut inner, ino);
        }
        slot.state = NodeState::Inactive;
        None
    }

    /// Reclaim an unlinked node right away if nothing references it.
    /// Called after remove/rename drops the last link.
    pub fn reclaim_if_orphan(&self, ino: Ino) -> Option<Arc<Node>> {
        let mut inner = self.inner.lock().unwrap();
        let slot = inner.map.get(&ino)?;
        if slot.refs == 0 && slot.node.attrs().nlink == 0 {
            return Self::reclaim_locked(&mut inner, ino);
        }
        None
    }

    fn reclaim_locked(inner: &mut Inner, ino: Ino) -> Option<Arc<Node>> {
        let slot = inner.map.remove(&ino)?;
        inner.free_inos.push(ino);
        Some(slot.node)
    }

    /// Nodes currently holding at least one counted reference.
    pub fn live_count(&self) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.map.values().filter(|s| s.refs > 0).count()
    }

    pub fn cached_count(&self) -> usize {
        self.inner.lock().unwrap().map.len()
    }

    pub fn state_of(&self, ino: Ino) -> NodeState {
        let inner = self.inner.lock().unwrap();
        inner
            .map
            .get(&ino)
            .map(|s| s.state)
            .unwrap_or(NodeState::Reclaimed)
    }

    /// Tear down every slot regardless of reference counts. Only valid
    /// during unmount, after the quiescence check (or under force).
    pub fn reclaim_all(&self) -> Vec<Arc<Node>> {
        let mut inner = self.inner.lock().unwrap();
        let nodes = inner.map.drain().map(|(_, s)| s.node).collect();
        inner.free_inos.clear();
        inner.next_ino = ROOT_INO;
        nodes
    }
}
