//! slowfs - Slow pass-through filesystem for simulating overloaded storage
//!
//! Mirrors a real directory and delays (or fails) selected operations
//! according to a per-category configuration that can be changed while the
//! filesystem is in use, either directly through [`ConfigStore`] or over
//! HTTP through [`ControlApi`].
//!
//! # Example
//!
//! ```rust,no_run
//! use slowfs::{ConfigStore, DelayModel, ErrorCode, OperationCategory, Operations, PassthroughFs};
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> slowfs::Result<()> {
//!     let store = Arc::new(ConfigStore::new());
//!     let fs = PassthroughFs::builder("/srv/data")
//!         .store(Arc::clone(&store))
//!         .build()?;
//!
//!     // Every fsync now takes 1-2 seconds and one in ten fails with EIO.
//!     store.set_category(
//!         OperationCategory::Fsync,
//!         DelayModel::range(1.0, 2.0).with_failure(0.1, ErrorCode::Io),
//!     )?;
//!
//!     let attr = fs.getattr(Path::new("/")).await?;
//!     assert!(attr.kind.is_dir());
//!     Ok(())
//! }
//! ```
//!
//! # Features
//!
//! - `fuse`: kernel mount through `fuser` ([`fuse::mount`])
//! - `failpoints`: fail points for fault-injection tests

mod control;
mod delay;
mod error;
mod fs;
mod logging_impl;

#[cfg(feature = "fuse")]
pub mod fuse;

pub use control::{ControlApi, ErrorBody, MAX_BODY_BYTES, Status};
pub use delay::{
    ConfigStore, ConfigTable, DelayEngine, DelayModel, ErrorCode, OperationCategory, Outcome,
    RandomSource, StdRandom,
};
pub use error::{Error, Result};
pub use fs::{
    DirEntry, FileAttr, FileType, Handle, Operations, PassthroughFs, PassthroughFsBuilder,
    SetTime, StatFs,
};
pub use logging_impl::{LogConfig, format_path_for_log, sanitize_for_log};

// Re-export async_trait for custom Operations implementations
pub use async_trait::async_trait;
