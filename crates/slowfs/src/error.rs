//! Error types for slowfs
//!
//! Two audiences consume these errors:
//! - the kernel interface, which only understands an errno ([`Error::errno`])
//! - the HTTP control plane, which reports [`Error::InvalidConfig`] as a 4xx
//!   with the message as description
//!
//! Nothing in the crate swallows or retries an error; every variant reaches
//! the caller that issued the operation.

use crate::delay::ErrorCode;
use thiserror::Error;

/// Result type alias using slowfs's Error.
pub type Result<T> = std::result::Result<T, Error>;

/// slowfs error types.
#[derive(Error, Debug)]
pub enum Error {
    /// Delay or fault parameters were malformed or out of range.
    ///
    /// The configuration store is left unchanged when this is returned.
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// A synthetic failure chosen by the delay engine.
    #[error("injected fault: {0}")]
    InjectedFault(ErrorCode),

    /// The requested path resolves outside the backing root.
    #[error("path escapes backing root")]
    PathEscape,

    /// The handle was never issued or has already been released.
    #[error("invalid handle: {0}")]
    InvalidHandle(u64),

    /// I/O error from the backing filesystem.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Backing store failure that carries no errno, e.g. a blocking worker
    /// that panicked.
    #[error("backing store unavailable: {0}")]
    Unavailable(String),
}

impl Error {
    /// Create an invalid-config error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }

    /// The errno reported to the kernel for this error.
    pub fn errno(&self) -> i32 {
        match self {
            Self::InvalidConfig(_) => libc::EINVAL,
            Self::InjectedFault(code) => code.errno(),
            Self::PathEscape => libc::EACCES,
            Self::InvalidHandle(_) => libc::EBADF,
            Self::Io(err) => err.raw_os_error().unwrap_or(libc::EIO),
            Self::Unavailable(_) => libc::EIO,
        }
    }
}
