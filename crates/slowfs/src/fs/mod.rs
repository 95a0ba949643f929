//! Pass-through filesystem
//!
//! [`Operations`] is the capability set shared by every front end (the FUSE
//! adapter, tests, embedders). [`PassthroughFs`] implements it over a real
//! backing directory, consulting the delay engine before each call.
//!
//! # Security
//!
//! - Protocol paths cannot leave the backing root (`..` and symlinked
//!   parents are rejected with [`Error::PathEscape`](crate::Error::PathEscape))
//! - Final symlinks are never followed by slowfs itself
//! - Handles are opaque; stale or forged ids fail with `EBADF`

mod handles;
mod passthrough;
mod path;
mod sys;
mod traits;

pub use passthrough::{PassthroughFs, PassthroughFsBuilder};
pub use traits::{DirEntry, FileAttr, FileType, Handle, Operations, SetTime, StatFs};
