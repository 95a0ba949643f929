//! Mapping of protocol paths onto the backing directory.
//!
//! Protocol paths are absolute within the mount (`/a/b`). They are normalized
//! lexically first; a `..` that would climb above `/` is a [`PathEscape`].
//! The parent directory is then canonicalized against the real filesystem so
//! an intermediate symlink cannot lead outside the root either. The final
//! component is left alone: callers never follow it.
//!
//! [`PathEscape`]: crate::Error::PathEscape

use std::io;
use std::path::{Component, Path, PathBuf};

use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub(crate) struct BackingRoot {
    root: PathBuf,
}

impl BackingRoot {
    /// Canonicalize `root`, which must be an existing directory.
    pub(crate) fn new(root: &Path) -> Result<Self> {
        let root = std::fs::canonicalize(root)?;
        if !root.is_dir() {
            return Err(io::Error::from_raw_os_error(libc::ENOTDIR).into());
        }
        Ok(Self { root })
    }

    pub(crate) fn path(&self) -> &Path {
        &self.root
    }

    /// Relative form of a protocol path, with `.` and `..` resolved.
    pub(crate) fn normalize(path: &Path) -> Result<PathBuf> {
        let mut result = PathBuf::new();
        for component in path.components() {
            match component {
                Component::RootDir | Component::CurDir | Component::Prefix(_) => {}
                Component::Normal(name) => result.push(name),
                Component::ParentDir => {
                    if !result.pop() {
                        return Err(Error::PathEscape);
                    }
                }
            }
        }
        Ok(result)
    }

    /// Backing path for a protocol path. Blocking.
    pub(crate) fn resolve(&self, path: &Path) -> Result<PathBuf> {
        let relative = Self::normalize(path)?;
        let Some(parent) = relative.parent() else {
            return Ok(self.root.clone());
        };
        if !parent.as_os_str().is_empty() {
            let real_parent = std::fs::canonicalize(self.root.join(parent))?;
            if !real_parent.starts_with(&self.root) {
                return Err(Error::PathEscape);
            }
        }
        Ok(self.root.join(relative))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::symlink;

    #[test]
    fn test_normalize() {
        assert_eq!(BackingRoot::normalize(Path::new("/")).ok(), Some(PathBuf::new()));
        assert_eq!(
            BackingRoot::normalize(Path::new("/a/./b/../c")).ok(),
            Some(PathBuf::from("a/c"))
        );
        assert!(matches!(
            BackingRoot::normalize(Path::new("/a/../../etc")),
            Err(Error::PathEscape)
        ));
        assert!(matches!(
            BackingRoot::normalize(Path::new("/..")),
            Err(Error::PathEscape)
        ));
    }

    #[test]
    fn test_resolve_stays_under_root() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir(dir.path().join("sub")).expect("mkdir");
        let root = BackingRoot::new(dir.path()).expect("root");

        assert_eq!(root.resolve(Path::new("/")).ok(), Some(root.path().to_path_buf()));
        assert_eq!(
            root.resolve(Path::new("/sub/file")).ok(),
            Some(root.path().join("sub/file"))
        );
    }

    #[test]
    fn test_resolve_rejects_symlinked_parent_outside_root() {
        let outside = tempfile::tempdir().expect("tempdir");
        let dir = tempfile::tempdir().expect("tempdir");
        symlink(outside.path(), dir.path().join("escape")).expect("symlink");
        let root = BackingRoot::new(dir.path()).expect("root");

        assert!(matches!(
            root.resolve(Path::new("/escape/secret")),
            Err(Error::PathEscape)
        ));
        // The link itself is inside the root and may be inspected.
        assert!(root.resolve(Path::new("/escape")).is_ok());
    }

    #[test]
    fn test_resolve_missing_parent_is_not_found() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = BackingRoot::new(dir.path()).expect("root");
        let err = root
            .resolve(Path::new("/missing/file"))
            .expect_err("missing parent");
        assert_eq!(err.errno(), libc::ENOENT);
    }

    #[test]
    fn test_root_must_be_directory() {
        let file = tempfile::NamedTempFile::new().expect("tempfile");
        let err = BackingRoot::new(file.path()).expect_err("not a directory");
        assert_eq!(err.errno(), libc::ENOTDIR);
    }
}
