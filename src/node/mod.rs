//! Node model and the per-mount node cache.

pub mod cache;
pub mod node;

pub use cache::{NodeCache, NodeState};
pub use node::{DirCursor, DirEntry, DirSlot, Ino, Node, NodeAttrs, NodeKind, NodePayload, ROOT_INO};
