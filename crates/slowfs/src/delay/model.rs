//! Delay and fault parameters for one operation category.

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize, Serializer};
use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Error, Result};

/// Class of filesystem operation sharing one delay/fault configuration.
///
/// `create` is accounted under [`OperationCategory::Open`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationCategory {
    Open,
    Read,
    Write,
    Release,
    Truncate,
    Getattr,
    Readdir,
    Mkdir,
    Rmdir,
    Unlink,
    Rename,
    Symlink,
    Readlink,
    Link,
    Chmod,
    Chown,
    Utimens,
    Statfs,
    Fsync,
    Mknod,
}

impl OperationCategory {
    /// Every category, in table order.
    pub const ALL: [OperationCategory; 20] = [
        Self::Open,
        Self::Read,
        Self::Write,
        Self::Release,
        Self::Truncate,
        Self::Getattr,
        Self::Readdir,
        Self::Mkdir,
        Self::Rmdir,
        Self::Unlink,
        Self::Rename,
        Self::Symlink,
        Self::Readlink,
        Self::Link,
        Self::Chmod,
        Self::Chown,
        Self::Utimens,
        Self::Statfs,
        Self::Fsync,
        Self::Mknod,
    ];

    /// Number of categories.
    pub const COUNT: usize = Self::ALL.len();

    /// Position of this category in [`OperationCategory::ALL`].
    pub fn index(self) -> usize {
        self as usize
    }

    /// Wire name of the category.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Read => "read",
            Self::Write => "write",
            Self::Release => "release",
            Self::Truncate => "truncate",
            Self::Getattr => "getattr",
            Self::Readdir => "readdir",
            Self::Mkdir => "mkdir",
            Self::Rmdir => "rmdir",
            Self::Unlink => "unlink",
            Self::Rename => "rename",
            Self::Symlink => "symlink",
            Self::Readlink => "readlink",
            Self::Link => "link",
            Self::Chmod => "chmod",
            Self::Chown => "chown",
            Self::Utimens => "utimens",
            Self::Statfs => "statfs",
            Self::Fsync => "fsync",
            Self::Mknod => "mknod",
        }
    }
}

impl fmt::Display for OperationCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationCategory {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|category| category.as_str() == s)
            .ok_or_else(|| Error::invalid_config(format!("unknown operation category: {s}")))
    }
}

/// Error surfaced when a failure is injected.
///
/// Written as the errno name (`EIO`). Parsing, from JSON or the command
/// line, ignores case and also accepts `IOError` for `EIO`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    Io,
    NoSpace,
    Access,
    Permission,
    NotFound,
    Exists,
    NotEmpty,
    IsDirectory,
    NotDirectory,
    ReadOnly,
    Busy,
    Again,
    TimedOut,
    Interrupted,
    QuotaExceeded,
    Stale,
}

impl ErrorCode {
    const NAMES: [(ErrorCode, &'static str); 16] = [
        (Self::Io, "EIO"),
        (Self::NoSpace, "ENOSPC"),
        (Self::Access, "EACCES"),
        (Self::Permission, "EPERM"),
        (Self::NotFound, "ENOENT"),
        (Self::Exists, "EEXIST"),
        (Self::NotEmpty, "ENOTEMPTY"),
        (Self::IsDirectory, "EISDIR"),
        (Self::NotDirectory, "ENOTDIR"),
        (Self::ReadOnly, "EROFS"),
        (Self::Busy, "EBUSY"),
        (Self::Again, "EAGAIN"),
        (Self::TimedOut, "ETIMEDOUT"),
        (Self::Interrupted, "EINTR"),
        (Self::QuotaExceeded, "EDQUOT"),
        (Self::Stale, "ESTALE"),
    ];

    /// The errno name, e.g. `EIO`.
    pub fn name(self) -> &'static str {
        Self::NAMES
            .iter()
            .find(|(code, _)| *code == self)
            .map(|(_, name)| *name)
            .unwrap_or("EIO")
    }

    /// The platform errno value.
    pub fn errno(self) -> i32 {
        match self {
            Self::Io => libc::EIO,
            Self::NoSpace => libc::ENOSPC,
            Self::Access => libc::EACCES,
            Self::Permission => libc::EPERM,
            Self::NotFound => libc::ENOENT,
            Self::Exists => libc::EEXIST,
            Self::NotEmpty => libc::ENOTEMPTY,
            Self::IsDirectory => libc::EISDIR,
            Self::NotDirectory => libc::ENOTDIR,
            Self::ReadOnly => libc::EROFS,
            Self::Busy => libc::EBUSY,
            Self::Again => libc::EAGAIN,
            Self::TimedOut => libc::ETIMEDOUT,
            Self::Interrupted => libc::EINTR,
            Self::QuotaExceeded => libc::EDQUOT,
            Self::Stale => libc::ESTALE,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl ErrorCode {
    fn parse(s: &str) -> Option<Self> {
        if s.eq_ignore_ascii_case("IOError") {
            return Some(Self::Io);
        }
        Self::NAMES
            .iter()
            .find(|(_, name)| name.eq_ignore_ascii_case(s))
            .map(|(code, _)| *code)
    }
}

impl FromStr for ErrorCode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s).ok_or_else(|| Error::invalid_config(format!("unknown error code: {s}")))
    }
}

impl Serialize for ErrorCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

impl<'de> Deserialize<'de> for ErrorCode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let name = Cow::<str>::deserialize(deserializer)?;
        Self::parse(&name)
            .ok_or_else(|| de::Error::custom(format!("unknown error code: {name}")))
    }
}

/// How long to wait, and how likely to fail, for one operation category.
///
/// The default value is a no-op: no added latency and no injected failure.
///
/// # Example
///
/// ```rust
/// use slowfs::{DelayModel, ErrorCode};
///
/// let model = DelayModel::range(0.1, 0.5).with_failure(0.25, ErrorCode::Io);
/// assert!(model.validate().is_ok());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct DelayModel {
    /// Lower bound of the injected wait, in seconds.
    #[serde(default)]
    pub min_delay_seconds: f64,

    /// Upper bound of the injected wait, in seconds.
    #[serde(default)]
    pub max_delay_seconds: f64,

    /// Probability in `[0, 1]` that the operation fails after waiting.
    #[serde(default)]
    pub failure_probability: f64,

    /// Error returned when a failure is injected.
    #[serde(default)]
    pub failure_error_code: Option<ErrorCode>,
}

impl DelayModel {
    /// The no-op model.
    pub fn new() -> Self {
        Self::default()
    }

    /// A fixed delay of `seconds`.
    pub fn fixed(seconds: f64) -> Self {
        Self::range(seconds, seconds)
    }

    /// A delay drawn uniformly from `[min, max]` seconds.
    pub fn range(min: f64, max: f64) -> Self {
        Self {
            min_delay_seconds: min,
            max_delay_seconds: max,
            ..Self::default()
        }
    }

    /// Set failure probability and the error to surface.
    pub fn with_failure(mut self, probability: f64, code: ErrorCode) -> Self {
        self.failure_probability = probability;
        self.failure_error_code = Some(code);
        self
    }

    /// True when this model adds neither latency nor failures.
    pub fn is_noop(&self) -> bool {
        self.max_delay_seconds == 0.0 && self.failure_probability == 0.0
    }

    /// Check ranges without clamping anything.
    pub fn validate(&self) -> Result<()> {
        let (min, max, p) = (
            self.min_delay_seconds,
            self.max_delay_seconds,
            self.failure_probability,
        );
        if !min.is_finite() || !max.is_finite() || !p.is_finite() {
            return Err(Error::invalid_config("values must be finite numbers"));
        }
        if min < 0.0 {
            return Err(Error::invalid_config(format!(
                "minDelaySeconds must be >= 0, got {min}"
            )));
        }
        if min > max {
            return Err(Error::invalid_config(format!(
                "minDelaySeconds ({min}) must be <= maxDelaySeconds ({max})"
            )));
        }
        if Duration::try_from_secs_f64(max).is_err() {
            return Err(Error::invalid_config(format!(
                "maxDelaySeconds ({max}) is too large"
            )));
        }
        if !(0.0..=1.0).contains(&p) {
            return Err(Error::invalid_config(format!(
                "failureProbability must be within [0, 1], got {p}"
            )));
        }
        if p > 0.0 && self.failure_error_code.is_none() {
            return Err(Error::invalid_config(
                "failureErrorCode is required when failureProbability > 0",
            ));
        }
        Ok(())
    }

    /// Wait for a uniform sample `u` in `[0, 1)`.
    ///
    /// Assumes a validated model.
    pub fn delay_for(&self, u: f64) -> Duration {
        let span = self.max_delay_seconds - self.min_delay_seconds;
        let seconds = (self.min_delay_seconds + span * u.clamp(0.0, 1.0))
            .min(self.max_delay_seconds);
        Duration::try_from_secs_f64(seconds).unwrap_or(Duration::ZERO)
    }
}
