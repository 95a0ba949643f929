//! Filesystem operation trait definitions

use async_trait::async_trait;
use std::ffi::OsString;
use std::fs::Metadata;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::error::Result;

/// Opaque identifier for an open file.
///
/// Issued by `open`/`create` and required by `read`, `write`, `fsync`,
/// `fgetattr` and `release` on the same file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle(pub u64);

impl Handle {
    /// Raw id, as handed to the kernel.
    pub fn id(self) -> u64 {
        self.0
    }
}

/// The fixed capability set a slow filesystem exposes.
///
/// Paths are protocol-absolute (`/dir/file`), interpreted relative to the
/// mount root. Each method maps to one
/// [`OperationCategory`](crate::OperationCategory); `create` shares the
/// `open` category.
#[async_trait]
pub trait Operations: Send + Sync {
    /// Open an existing file. `flags` are `open(2)` flags.
    async fn open(&self, path: &Path, flags: i32) -> Result<Handle>;

    /// Create and open a file.
    async fn create(&self, path: &Path, mode: u32, flags: i32) -> Result<Handle>;

    /// Read up to `size` bytes at `offset`. Short at end of file.
    async fn read(&self, handle: Handle, offset: u64, size: u32) -> Result<Vec<u8>>;

    /// Write `data` at `offset`, extending the file as needed.
    async fn write(&self, handle: Handle, offset: u64, data: &[u8]) -> Result<u32>;

    /// Free the handle. A second release of the same handle is an error.
    async fn release(&self, handle: Handle) -> Result<()>;

    /// Set the file length, through `handle` when one is open.
    async fn truncate(&self, path: &Path, handle: Option<Handle>, size: u64) -> Result<()>;

    /// Attributes of the entry itself; symlinks are not followed.
    async fn getattr(&self, path: &Path) -> Result<FileAttr>;

    /// Attributes of an open file. Works after the file was unlinked.
    async fn fgetattr(&self, handle: Handle) -> Result<FileAttr>;

    /// Snapshot of directory entries, without `.` and `..`.
    async fn readdir(&self, path: &Path) -> Result<Vec<DirEntry>>;

    /// Create a directory.
    async fn mkdir(&self, path: &Path, mode: u32) -> Result<()>;

    /// Remove an empty directory.
    async fn rmdir(&self, path: &Path) -> Result<()>;

    /// Remove a non-directory entry.
    async fn unlink(&self, path: &Path) -> Result<()>;

    /// Atomically rename, replacing `to` per `rename(2)`.
    async fn rename(&self, from: &Path, to: &Path) -> Result<()>;

    /// Create a symbolic link at `link` pointing to `target` (stored verbatim).
    async fn symlink(&self, target: &Path, link: &Path) -> Result<()>;

    /// Read a symbolic link's target.
    async fn readlink(&self, path: &Path) -> Result<PathBuf>;

    /// Create a hard link `new` to `existing`.
    async fn link(&self, existing: &Path, new: &Path) -> Result<()>;

    /// Change permission bits, through `handle` when one is open.
    async fn chmod(&self, path: &Path, handle: Option<Handle>, mode: u32) -> Result<()>;

    /// Change owner and/or group, through `handle` when one is open.
    async fn chown(
        &self,
        path: &Path,
        handle: Option<Handle>,
        uid: Option<u32>,
        gid: Option<u32>,
    ) -> Result<()>;

    /// Set access and modification times, through `handle` when one is open.
    async fn utimens(
        &self,
        path: &Path,
        handle: Option<Handle>,
        atime: SetTime,
        mtime: SetTime,
    ) -> Result<()>;

    /// Filesystem statistics of the backing store.
    async fn statfs(&self, path: &Path) -> Result<StatFs>;

    /// Flush file data (and metadata unless `datasync`) to stable storage.
    async fn fsync(&self, handle: Handle, datasync: bool) -> Result<()>;

    /// Create a filesystem node (regular file, FIFO, socket or device).
    async fn mknod(&self, path: &Path, mode: u32, rdev: u64) -> Result<()>;
}

/// New value for a timestamp in [`Operations::utimens`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetTime {
    /// Current time.
    Now,
    /// Explicit time.
    At(SystemTime),
    /// Leave unchanged.
    Omit,
}

/// File type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    /// Regular file
    File,
    /// Directory
    Directory,
    /// Symbolic link
    Symlink,
    /// Named pipe
    NamedPipe,
    /// Character device
    CharDevice,
    /// Block device
    BlockDevice,
    /// Unix domain socket
    Socket,
}

impl FileType {
    /// Classify from the `S_IFMT` bits of a mode.
    pub fn from_mode(mode: u32) -> Self {
        match mode & libc::S_IFMT as u32 {
            m if m == libc::S_IFDIR as u32 => FileType::Directory,
            m if m == libc::S_IFLNK as u32 => FileType::Symlink,
            m if m == libc::S_IFIFO as u32 => FileType::NamedPipe,
            m if m == libc::S_IFCHR as u32 => FileType::CharDevice,
            m if m == libc::S_IFBLK as u32 => FileType::BlockDevice,
            m if m == libc::S_IFSOCK as u32 => FileType::Socket,
            _ => FileType::File,
        }
    }

    /// Check if this is a file.
    pub fn is_file(&self) -> bool {
        matches!(self, FileType::File)
    }

    /// Check if this is a directory.
    pub fn is_dir(&self) -> bool {
        matches!(self, FileType::Directory)
    }

    /// Check if this is a symlink.
    pub fn is_symlink(&self) -> bool {
        matches!(self, FileType::Symlink)
    }
}

/// File attributes, as reported by `lstat(2)` on the backing entry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FileAttr {
    /// Backing inode number
    pub ino: u64,
    /// Size in bytes
    pub size: u64,
    /// Allocated 512-byte blocks
    pub blocks: u64,
    pub atime: SystemTime,
    pub mtime: SystemTime,
    pub ctime: SystemTime,
    /// File type
    pub kind: FileType,
    /// Permission bits (`mode & 0o7777`)
    pub perm: u16,
    pub nlink: u32,
    pub uid: u32,
    pub gid: u32,
    pub rdev: u64,
    pub blksize: u32,
}

impl From<&Metadata> for FileAttr {
    fn from(meta: &Metadata) -> Self {
        Self {
            ino: meta.ino(),
            size: meta.size(),
            blocks: meta.blocks(),
            atime: system_time(meta.atime(), meta.atime_nsec()),
            mtime: system_time(meta.mtime(), meta.mtime_nsec()),
            ctime: system_time(meta.ctime(), meta.ctime_nsec()),
            kind: FileType::from_mode(meta.mode()),
            perm: (meta.mode() & 0o7777) as u16,
            nlink: meta.nlink() as u32,
            uid: meta.uid(),
            gid: meta.gid(),
            rdev: meta.rdev(),
            blksize: meta.blksize() as u32,
        }
    }
}

/// Seconds and nanoseconds since the epoch, possibly negative.
fn system_time(secs: i64, nsec: i64) -> SystemTime {
    let nanos = Duration::from_nanos(nsec.clamp(0, 999_999_999) as u64);
    if secs >= 0 {
        UNIX_EPOCH + Duration::from_secs(secs as u64) + nanos
    } else {
        UNIX_EPOCH - Duration::from_secs(secs.unsigned_abs()) + nanos
    }
}

/// Directory entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    /// Entry name (not full path); not necessarily UTF-8
    pub name: OsString,
    /// Entry type
    pub kind: FileType,
    /// Backing inode number
    pub ino: u64,
}

/// Filesystem statistics, as reported by `statvfs(3)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatFs {
    pub blocks: u64,
    pub bfree: u64,
    pub bavail: u64,
    pub files: u64,
    pub ffree: u64,
    pub bsize: u32,
    pub namelen: u32,
    pub frsize: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_type_from_mode() {
        assert_eq!(FileType::from_mode(0o100644), FileType::File);
        assert_eq!(FileType::from_mode(0o040755), FileType::Directory);
        assert_eq!(FileType::from_mode(0o120777), FileType::Symlink);
        assert_eq!(FileType::from_mode(0o010600), FileType::NamedPipe);
        assert!(FileType::from_mode(0o040755).is_dir());
    }

    #[test]
    fn test_system_time_handles_pre_epoch() {
        assert_eq!(system_time(0, 0), UNIX_EPOCH);
        assert_eq!(
            system_time(-2, 500_000_000),
            UNIX_EPOCH - Duration::from_millis(1_500)
        );
        assert_eq!(system_time(10, 5), UNIX_EPOCH + Duration::new(10, 5));
    }
}
