//! FerroFS: an embeddable filesystem driver with an in-memory node layer
//! and pluggable block storage.
//!
//! A mount wires three layers together:
//! - a [`store::BlockDevice`] holding file data in fixed-size blocks,
//! - the [`node`] layer caching live filesystem objects and their
//!   reference counts,
//! - [`fs::FerroFs`], which implements the full operation table and is
//!   dispatched by hosts through [`driver::FilesystemDriver`].
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use ferrofs::driver::FilesystemDriver;
//! use ferrofs::fs::{AccessMode, FerroFs};
//! use ferrofs::mount::MountOptions;
//! use ferrofs::store::mem::MemBlockDevice;
//!
//! # async fn demo() -> ferrofs::error::FsResult<()> {
//! let fs: Arc<dyn FilesystemDriver> =
//!     FerroFs::mount(MemBlockDevice::new(1024), MountOptions::default())?;
//! let ino = fs.create(fs.root_ino(), "hello.txt", 0o644).await?;
//! let h = fs.open(ino, AccessMode::READ | AccessMode::WRITE).await?;
//! fs.write(&h, 0, b"hello").await?;
//! fs.close(h).await;
//! fs.unmount(false).await?;
//! # Ok(())
//! # }
//! ```

pub mod driver;
pub mod error;
pub mod fs;
pub mod mount;
pub mod node;
pub mod store;

pub use driver::{DirStream, DriverRegistry, FilesystemDriver, Registration};
pub use error::{FsError, FsResult};
pub use fs::{AccessMode, FerroFs, FileAttr, Handle, SetAttrs, SyncMode};
pub use mount::{MountOptions, StatsSnapshot};
pub use node::{DirCursor, DirEntry, Ino, NodeKind, ROOT_INO};
