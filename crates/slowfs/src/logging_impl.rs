//! Logging helpers for slowfs
//!
//! Events are emitted with `tracing`; the binary decides where they go.
//!
//! # Log Levels
//!
//! - **ERROR**: Control server or mount failures
//! - **WARN**: Rejected control-plane requests, failed blocking workers
//! - **INFO**: Mount and control-plane lifecycle
//! - **DEBUG**: Injected faults, configuration updates
//! - **TRACE**: Per-operation dispatch and injected delays
//!
//! # File names
//!
//! Names arrive from arbitrary applications and may contain newlines or
//! terminal escapes. Paths are always passed through [`format_path_for_log`]
//! so a crafted file name cannot forge log lines.

use std::borrow::Cow;
use std::path::Path;

/// Configuration for logging behavior
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Whether to include paths in per-operation events (default: true)
    pub log_paths: bool,

    /// Maximum length of logged values before truncation (default: 200)
    pub max_value_length: usize,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            log_paths: true,
            max_value_length: 200,
        }
    }
}

impl LogConfig {
    /// Create a new log configuration with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Omit paths from per-operation events
    pub fn hide_paths(mut self) -> Self {
        self.log_paths = false;
        self
    }

    /// Set maximum length for logged values
    pub fn max_value_length(mut self, len: usize) -> Self {
        self.max_value_length = len;
        self
    }

    /// Truncate value if it exceeds max length
    ///
    /// Handles UTF-8 char boundaries properly to avoid panics on multi-byte chars.
    fn truncate<'a>(&self, value: &'a str) -> Cow<'a, str> {
        if value.len() <= self.max_value_length {
            Cow::Borrowed(value)
        } else {
            let mut end = self.max_value_length;
            while end > 0 && !value.is_char_boundary(end) {
                end -= 1;
            }
            Cow::Owned(format!(
                "{}...[truncated {} bytes]",
                &value[..end],
                value.len() - end
            ))
        }
    }
}

/// Escape characters that could be used for log injection.
pub fn sanitize_for_log(input: &str) -> String {
    input
        .replace('\n', "\\n")
        .replace('\r', "\\r")
        .replace('\t', "\\t")
        .chars()
        .filter(|c| !c.is_control() || *c == ' ')
        .collect()
}

/// Format a protocol path for an event.
pub fn format_path_for_log(path: &Path, config: &LogConfig) -> String {
    if !config.log_paths {
        return "[path]".to_string();
    }
    let sanitized = sanitize_for_log(&path.to_string_lossy());
    config.truncate(&sanitized).into_owned()
}
