//! Pass-through filesystem over a real directory, slowed down on demand.
//!
//! Every operation first consults the [`DelayEngine`] for its category. An
//! injected fault is returned before anything touches the backing store;
//! otherwise the equivalent real syscall runs on the blocking pool and its
//! result or errno is handed back unchanged. Nothing is retried.
//!
//! # Example
//!
//! ```rust,no_run
//! use slowfs::{ConfigStore, DelayModel, OperationCategory, Operations, PassthroughFs};
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! # async fn demo() -> slowfs::Result<()> {
//! let store = Arc::new(ConfigStore::new());
//! store.set_category(OperationCategory::Read, DelayModel::fixed(0.2))?;
//!
//! let fs = PassthroughFs::builder("/srv/data").store(store).build()?;
//! let handle = fs.open(Path::new("/a.txt"), libc::O_RDONLY).await?;
//! let data = fs.read(handle, 0, 4096).await?; // takes ~200ms
//! fs.release(handle).await?;
//! # let _ = data;
//! # Ok(())
//! # }
//! ```
//!
//! # Fail Points (enabled with `failpoints` feature)
//!
//! - `passthrough::register` - Fail after the backing file was opened but
//!   before its handle is registered

use async_trait::async_trait;
use std::fs::{self, DirBuilder, File, OpenOptions, Permissions};
use std::io::{self, ErrorKind};
use std::os::unix::fs::{
    self as unix_fs, DirBuilderExt, DirEntryExt, FileExt, FileTypeExt, OpenOptionsExt,
    PermissionsExt,
};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[cfg(feature = "failpoints")]
use fail::fail_point;

use super::handles::HandleTable;
use super::path::BackingRoot;
use super::sys;
use super::traits::{DirEntry, FileAttr, FileType, Handle, Operations, SetTime, StatFs};
use crate::delay::{ConfigStore, DelayEngine, OperationCategory, RandomSource, StdRandom};
use crate::error::{Error, Result};
use crate::logging_impl::{LogConfig, format_path_for_log};

/// Run a blocking backing-store call off the async workers.
async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await.map_err(|e| {
        tracing::warn!(error = %e, "blocking worker failed");
        Error::Unavailable(format!("blocking task failed: {e}"))
    })?
}

/// `OpenOptions` equivalent to `open(2)` with `flags`, never following a
/// final symlink. `create_mode` adds `O_CREAT` with that mode.
fn open_options(flags: i32, create_mode: Option<u32>) -> OpenOptions {
    let mut options = OpenOptions::new();
    match flags & libc::O_ACCMODE {
        libc::O_WRONLY => options.write(true),
        libc::O_RDWR => options.read(true).write(true),
        _ => options.read(true),
    };
    // Creation and truncation go through custom flags so read-only creates
    // and truncating opens keep their open(2) meaning.
    let mut custom = (flags & !libc::O_ACCMODE) | libc::O_NOFOLLOW;
    match create_mode {
        Some(mode) => {
            options.mode(mode);
            custom |= libc::O_CREAT;
        }
        None => custom &= !(libc::O_CREAT | libc::O_EXCL),
    }
    options.custom_flags(custom);
    options
}

fn kind_of(file_type: fs::FileType) -> FileType {
    if file_type.is_dir() {
        FileType::Directory
    } else if file_type.is_symlink() {
        FileType::Symlink
    } else if file_type.is_fifo() {
        FileType::NamedPipe
    } else if file_type.is_char_device() {
        FileType::CharDevice
    } else if file_type.is_block_device() {
        FileType::BlockDevice
    } else if file_type.is_socket() {
        FileType::Socket
    } else {
        FileType::File
    }
}

/// Pass-through filesystem rooted at a backing directory.
pub struct PassthroughFs {
    root: Arc<BackingRoot>,
    engine: DelayEngine,
    handles: HandleTable,
    log: LogConfig,
}

impl PassthroughFs {
    /// Pass-through over `root`, reading delays from `store`.
    pub fn new(root: impl AsRef<Path>, store: Arc<ConfigStore>) -> Result<Self> {
        Self::builder(root.as_ref()).store(store).build()
    }

    /// Create a builder for customized configuration.
    pub fn builder(root: impl Into<PathBuf>) -> PassthroughFsBuilder {
        PassthroughFsBuilder {
            root: root.into(),
            store: None,
            random: None,
            log: LogConfig::default(),
        }
    }

    /// Canonical backing root.
    pub fn root(&self) -> &Path {
        self.root.path()
    }

    /// The delay engine consulted by every operation.
    pub fn engine(&self) -> &DelayEngine {
        &self.engine
    }

    /// The live configuration store.
    pub fn store(&self) -> &Arc<ConfigStore> {
        self.engine.store()
    }

    /// Number of handles currently open.
    pub fn open_handles(&self) -> usize {
        self.handles.len()
    }

    /// Trace the dispatch, then wait/fault as configured.
    async fn enter(&self, category: OperationCategory, path: Option<&Path>) -> Result<()> {
        if tracing::enabled!(tracing::Level::TRACE) {
            let path = path
                .map(|p| format_path_for_log(p, &self.log))
                .unwrap_or_default();
            tracing::trace!(op = %category, %path, "dispatch");
        }
        self.engine.check(category).await
    }

    /// Resolve `path` and run `f` on the backing path, off the async workers.
    async fn on_path<T, F>(&self, path: &Path, f: F) -> Result<T>
    where
        F: FnOnce(PathBuf) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let root = Arc::clone(&self.root);
        let path = path.to_path_buf();
        blocking(move || f(root.resolve(&path)?)).await
    }

    /// Like [`PassthroughFs::on_path`] for operations naming two paths.
    async fn on_paths<T, F>(&self, first: &Path, second: &Path, f: F) -> Result<T>
    where
        F: FnOnce(PathBuf, PathBuf) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let root = Arc::clone(&self.root);
        let (first, second) = (first.to_path_buf(), second.to_path_buf());
        blocking(move || f(root.resolve(&first)?, root.resolve(&second)?)).await
    }

    /// Run `f` on the file behind `handle` while holding its lock.
    async fn on_handle<T, F>(&self, handle: Handle, f: F) -> Result<T>
    where
        F: FnOnce(&File) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let file = self.handles.get(handle)?;
        let guard = file.lock_owned().await;
        blocking(move || f(&guard)).await
    }

    async fn open_file(&self, path: &Path, flags: i32, create_mode: Option<u32>) -> Result<Handle> {
        let options = open_options(flags, create_mode);
        let file = self
            .on_path(path, move |target| Ok(options.open(target)?))
            .await?;

        #[cfg(feature = "failpoints")]
        fail_point!("passthrough::register", |_| {
            Err(Error::Unavailable("handle registration failed".into()))
        });

        Ok(self.handles.insert(file))
    }
}

#[async_trait]
impl Operations for PassthroughFs {
    async fn open(&self, path: &Path, flags: i32) -> Result<Handle> {
        self.enter(OperationCategory::Open, Some(path)).await?;
        self.open_file(path, flags, None).await
    }

    async fn create(&self, path: &Path, mode: u32, flags: i32) -> Result<Handle> {
        self.enter(OperationCategory::Open, Some(path)).await?;
        self.open_file(path, flags, Some(mode)).await
    }

    async fn read(&self, handle: Handle, offset: u64, size: u32) -> Result<Vec<u8>> {
        self.enter(OperationCategory::Read, None).await?;
        self.on_handle(handle, move |file| {
            let mut buf = vec![0u8; size as usize];
            let mut filled = 0;
            while filled < buf.len() {
                match file.read_at(&mut buf[filled..], offset + filled as u64) {
                    Ok(0) => break,
                    Ok(n) => filled += n,
                    Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                    Err(e) => return Err(e.into()),
                }
            }
            buf.truncate(filled);
            Ok(buf)
        })
        .await
    }

    async fn write(&self, handle: Handle, offset: u64, data: &[u8]) -> Result<u32> {
        self.enter(OperationCategory::Write, None).await?;
        let len = u32::try_from(data.len())
            .map_err(|_| io::Error::from_raw_os_error(libc::EFBIG))?;
        let data = data.to_vec();
        self.on_handle(handle, move |file| {
            file.write_all_at(&data, offset)?;
            Ok(len)
        })
        .await
    }

    async fn release(&self, handle: Handle) -> Result<()> {
        self.enter(OperationCategory::Release, None).await?;
        self.handles.remove(handle)?;
        Ok(())
    }

    async fn truncate(&self, path: &Path, handle: Option<Handle>, size: u64) -> Result<()> {
        self.enter(OperationCategory::Truncate, Some(path)).await?;
        match handle {
            Some(handle) => {
                self.on_handle(handle, move |file| Ok(file.set_len(size)?))
                    .await
            }
            None => {
                self.on_path(path, move |target| {
                    let file = OpenOptions::new()
                        .write(true)
                        .custom_flags(libc::O_NOFOLLOW)
                        .open(target)?;
                    file.set_len(size)?;
                    Ok(())
                })
                .await
            }
        }
    }

    async fn getattr(&self, path: &Path) -> Result<FileAttr> {
        self.enter(OperationCategory::Getattr, Some(path)).await?;
        self.on_path(path, |target| {
            Ok(FileAttr::from(&fs::symlink_metadata(target)?))
        })
        .await
    }

    async fn fgetattr(&self, handle: Handle) -> Result<FileAttr> {
        self.enter(OperationCategory::Getattr, None).await?;
        self.on_handle(handle, |file| Ok(FileAttr::from(&file.metadata()?)))
            .await
    }

    async fn readdir(&self, path: &Path) -> Result<Vec<DirEntry>> {
        self.enter(OperationCategory::Readdir, Some(path)).await?;
        self.on_path(path, |target| {
            let mut entries = Vec::new();
            for entry in fs::read_dir(target)? {
                let entry = entry?;
                entries.push(DirEntry {
                    name: entry.file_name(),
                    kind: kind_of(entry.file_type()?),
                    ino: entry.ino(),
                });
            }
            Ok(entries)
        })
        .await
    }

    async fn mkdir(&self, path: &Path, mode: u32) -> Result<()> {
        self.enter(OperationCategory::Mkdir, Some(path)).await?;
        self.on_path(path, move |target| {
            DirBuilder::new().mode(mode).create(target)?;
            Ok(())
        })
        .await
    }

    async fn rmdir(&self, path: &Path) -> Result<()> {
        self.enter(OperationCategory::Rmdir, Some(path)).await?;
        self.on_path(path, |target| Ok(fs::remove_dir(target)?))
            .await
    }

    async fn unlink(&self, path: &Path) -> Result<()> {
        self.enter(OperationCategory::Unlink, Some(path)).await?;
        self.on_path(path, |target| Ok(fs::remove_file(target)?))
            .await
    }

    async fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        self.enter(OperationCategory::Rename, Some(from)).await?;
        self.on_paths(from, to, |from, to| Ok(fs::rename(from, to)?))
            .await
    }

    async fn symlink(&self, target: &Path, link: &Path) -> Result<()> {
        self.enter(OperationCategory::Symlink, Some(link)).await?;
        let target = target.to_path_buf();
        self.on_path(link, move |link| {
            unix_fs::symlink(target, link)?;
            Ok(())
        })
        .await
    }

    async fn readlink(&self, path: &Path) -> Result<PathBuf> {
        self.enter(OperationCategory::Readlink, Some(path)).await?;
        self.on_path(path, |target| Ok(fs::read_link(target)?))
            .await
    }

    async fn link(&self, existing: &Path, new: &Path) -> Result<()> {
        self.enter(OperationCategory::Link, Some(new)).await?;
        self.on_paths(existing, new, |existing, new| {
            Ok(fs::hard_link(existing, new)?)
        })
        .await
    }

    async fn chmod(&self, path: &Path, handle: Option<Handle>, mode: u32) -> Result<()> {
        self.enter(OperationCategory::Chmod, Some(path)).await?;
        let permissions = Permissions::from_mode(mode & 0o7777);
        match handle {
            Some(handle) => {
                self.on_handle(handle, move |file| Ok(file.set_permissions(permissions)?))
                    .await
            }
            None => {
                self.on_path(path, move |target| {
                    // Symlink permissions are fixed; following it could leave the root.
                    if fs::symlink_metadata(&target)?.file_type().is_symlink() {
                        return Err(io::Error::from_raw_os_error(libc::EOPNOTSUPP).into());
                    }
                    fs::set_permissions(target, permissions)?;
                    Ok(())
                })
                .await
            }
        }
    }

    async fn chown(
        &self,
        path: &Path,
        handle: Option<Handle>,
        uid: Option<u32>,
        gid: Option<u32>,
    ) -> Result<()> {
        self.enter(OperationCategory::Chown, Some(path)).await?;
        match handle {
            Some(handle) => {
                self.on_handle(handle, move |file| Ok(unix_fs::fchown(file, uid, gid)?))
                    .await
            }
            None => {
                self.on_path(path, move |target| Ok(unix_fs::lchown(target, uid, gid)?))
                    .await
            }
        }
    }

    async fn utimens(
        &self,
        path: &Path,
        handle: Option<Handle>,
        atime: SetTime,
        mtime: SetTime,
    ) -> Result<()> {
        self.enter(OperationCategory::Utimens, Some(path)).await?;
        match handle {
            Some(handle) => {
                self.on_handle(handle, move |file| {
                    Ok(sys::futimens(file.as_raw_fd(), atime, mtime)?)
                })
                .await
            }
            None => {
                self.on_path(path, move |target| Ok(sys::utimens(&target, atime, mtime)?))
                    .await
            }
        }
    }

    async fn statfs(&self, path: &Path) -> Result<StatFs> {
        self.enter(OperationCategory::Statfs, Some(path)).await?;
        self.on_path(path, |target| Ok(sys::statvfs(&target)?))
            .await
    }

    async fn fsync(&self, handle: Handle, datasync: bool) -> Result<()> {
        self.enter(OperationCategory::Fsync, None).await?;
        self.on_handle(handle, move |file| {
            if datasync {
                file.sync_data()?;
            } else {
                file.sync_all()?;
            }
            Ok(())
        })
        .await
    }

    async fn mknod(&self, path: &Path, mode: u32, rdev: u64) -> Result<()> {
        self.enter(OperationCategory::Mknod, Some(path)).await?;
        self.on_path(path, move |target| Ok(sys::mknod(&target, mode, rdev)?))
            .await
    }
}

/// Builder for [`PassthroughFs`].
pub struct PassthroughFsBuilder {
    root: PathBuf,
    store: Option<Arc<ConfigStore>>,
    random: Option<Arc<dyn RandomSource>>,
    log: LogConfig,
}

impl PassthroughFsBuilder {
    /// Share an existing configuration store (e.g. with the control API).
    pub fn store(mut self, store: Arc<ConfigStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Use a custom random source.
    pub fn random(mut self, random: Arc<dyn RandomSource>) -> Self {
        self.random = Some(random);
        self
    }

    /// Use a reproducible random stream.
    pub fn seed(self, seed: u64) -> Self {
        self.random(Arc::new(StdRandom::seeded(seed)))
    }

    /// Set logging behavior.
    pub fn log_config(mut self, log: LogConfig) -> Self {
        self.log = log;
        self
    }

    /// Build the filesystem.
    ///
    /// # Errors
    /// - `Io` if the root does not exist or is not a directory
    pub fn build(self) -> Result<PassthroughFs> {
        let root = BackingRoot::new(&self.root)?;
        let store = self.store.unwrap_or_default();
        let random = self
            .random
            .unwrap_or_else(|| Arc::new(StdRandom::from_entropy()));
        Ok(PassthroughFs {
            root: Arc::new(root),
            engine: DelayEngine::new(store, random),
            handles: HandleTable::new(),
            log: self.log,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn setup() -> (tempfile::TempDir, PassthroughFs) {
        let dir = tempfile::tempdir().expect("tempdir");
        let fs = PassthroughFs::builder(dir.path())
            .seed(1)
            .build()
            .expect("build");
        (dir, fs)
    }

    #[test]
    fn test_open_options_strip_create_without_mode() {
        let dir = tempfile::tempdir().expect("tempdir");
        let missing = dir.path().join("missing");
        let err = open_options(libc::O_RDWR | libc::O_CREAT, None)
            .open(&missing)
            .expect_err("no create without mode");
        assert_eq!(err.kind(), ErrorKind::NotFound);

        open_options(libc::O_RDONLY, Some(0o600))
            .open(&missing)
            .expect("read-only create");
        assert!(missing.exists());
    }

    #[tokio::test]
    async fn test_create_write_read() {
        let (dir, fs) = setup();
        let handle = fs
            .create(Path::new("/a.txt"), 0o644, libc::O_RDWR)
            .await
            .expect("create");
        assert_eq!(fs.write(handle, 0, b"hello").await.expect("write"), 5);
        assert_eq!(fs.read(handle, 1, 10).await.expect("read"), b"ello");
        fs.release(handle).await.expect("release");
        assert_eq!(fs.open_handles(), 0);
        assert_eq!(std::fs::read(dir.path().join("a.txt")).expect("backing"), b"hello");
    }

    #[tokio::test]
    async fn test_open_does_not_follow_final_symlink() {
        let (dir, fs) = setup();
        std::fs::write(dir.path().join("real"), b"x").expect("write");
        std::os::unix::fs::symlink("real", dir.path().join("link")).expect("symlink");
        let err = fs
            .open(Path::new("/link"), libc::O_RDONLY)
            .await
            .expect_err("O_NOFOLLOW");
        assert_eq!(err.errno(), libc::ELOOP);
    }

    #[tokio::test]
    async fn test_dotdot_escape_is_rejected_before_io() {
        let (_dir, fs) = setup();
        let err = fs
            .getattr(Path::new("/../etc/passwd"))
            .await
            .expect_err("escape");
        assert!(matches!(err, Error::PathEscape));
    }
}
