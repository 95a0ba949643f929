//! Kernel binding through `fuser`.
//!
//! The kernel speaks in inode numbers; [`Operations`] speaks in paths. The
//! adapter keeps the mapping (root is inode 1) and hands every request to a
//! tokio task, so a delayed operation never holds up the session thread or
//! other requests. Directory listings are snapshotted at `opendir` and paged
//! out of memory by `readdir`.
//!
//! Inodes are reference counted by kernel lookups and evicted on `forget`.
//! An unlinked file that is still open keeps its inode, and attribute
//! requests on it go through the open handle.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use fuser::{
    BackgroundSession, FUSE_ROOT_ID, Filesystem, KernelConfig, MountOption, ReplyAttr,
    ReplyCreate, ReplyData, ReplyDirectory, ReplyEmpty, ReplyEntry, ReplyOpen, ReplyStatfs,
    ReplyWrite, Request, TimeOrNow,
};
use tokio::runtime::Handle as Runtime;

use crate::fs::{FileAttr, FileType, Handle, Operations, SetTime};

const TTL: Duration = Duration::from_secs(1);

/// Mount-time options.
#[derive(Debug, Clone)]
pub struct MountConfig {
    /// Name shown in the mount table.
    pub fs_name: String,
    /// Let users other than the mounting one access the mount.
    pub allow_other: bool,
}

impl Default for MountConfig {
    fn default() -> Self {
        Self {
            fs_name: "slowfs".to_string(),
            allow_other: false,
        }
    }
}

impl MountConfig {
    fn options(&self) -> Vec<MountOption> {
        let mut options = vec![
            MountOption::FSName(self.fs_name.clone()),
            MountOption::Subtype("slowfs".to_string()),
            MountOption::DefaultPermissions,
            MountOption::AutoUnmount,
        ];
        if self.allow_other {
            options.push(MountOption::AllowOther);
        }
        options
    }
}

/// Mount `ops` at `mountpoint` on a background session thread.
///
/// Requests are executed on `runtime`. Dropping the returned session
/// unmounts.
pub fn mount<O: Operations + 'static>(
    ops: Arc<O>,
    mountpoint: &Path,
    config: &MountConfig,
    runtime: Runtime,
) -> io::Result<BackgroundSession> {
    tracing::info!(mountpoint = %mountpoint.display(), "mounting");
    fuser::spawn_mount2(SlowFuse::new(ops, runtime), mountpoint, &config.options())
}

/// Inode number reported for listed entries the kernel has not looked up.
const UNKNOWN_INO: u64 = 0xffff_ffff;

#[derive(Debug)]
struct Node {
    path: PathBuf,
    /// Entry replies the kernel has not forgotten yet.
    lookups: u64,
    /// Cleared once the name is unlinked or renamed over.
    linked: bool,
    /// Open file handles on this inode.
    handles: Vec<u64>,
}

impl Node {
    fn idle(&self) -> bool {
        self.lookups == 0 && self.handles.is_empty()
    }
}

/// Inode numbers handed to the kernel and the paths behind them.
///
/// A node lives until the kernel forgets every lookup and every handle on it
/// is released, so an unlinked but open file keeps answering by inode.
#[derive(Debug, Default)]
struct InodeTable {
    nodes: HashMap<u64, Node>,
    by_path: HashMap<PathBuf, u64>,
    next_ino: u64,
}

impl InodeTable {
    fn new() -> Self {
        let mut table = Self {
            next_ino: FUSE_ROOT_ID + 1,
            ..Self::default()
        };
        table.nodes.insert(
            FUSE_ROOT_ID,
            Node {
                path: PathBuf::from("/"),
                lookups: 1,
                linked: true,
                handles: Vec::new(),
            },
        );
        table.by_path.insert(PathBuf::from("/"), FUSE_ROOT_ID);
        table
    }

    fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Path of an inode that still has a name.
    fn path(&self, ino: u64) -> Option<PathBuf> {
        self.nodes
            .get(&ino)
            .filter(|node| node.linked)
            .map(|node| node.path.clone())
    }

    fn ino(&self, path: &Path) -> Option<u64> {
        self.by_path.get(path).copied()
    }

    /// Count one entry reply for `path` and return its inode.
    fn lookup(&mut self, path: &Path) -> u64 {
        if let Some(&ino) = self.by_path.get(path) {
            if let Some(node) = self.nodes.get_mut(&ino) {
                node.lookups += 1;
                return ino;
            }
        }
        let ino = self.next_ino;
        self.next_ino += 1;
        self.nodes.insert(
            ino,
            Node {
                path: path.to_path_buf(),
                lookups: 1,
                linked: true,
                handles: Vec::new(),
            },
        );
        self.by_path.insert(path.to_path_buf(), ino);
        ino
    }

    fn forget(&mut self, ino: u64, nlookup: u64) {
        if let Some(node) = self.nodes.get_mut(&ino) {
            node.lookups = node.lookups.saturating_sub(nlookup);
        }
        self.evict_if_idle(ino);
    }

    fn evict_if_idle(&mut self, ino: u64) {
        if ino == FUSE_ROOT_ID || !self.nodes.get(&ino).is_some_and(Node::idle) {
            return;
        }
        if let Some(node) = self.nodes.remove(&ino) {
            if node.linked && self.by_path.get(&node.path) == Some(&ino) {
                self.by_path.remove(&node.path);
            }
        }
    }

    /// The name `path` is gone. Its inode stays known until it goes idle.
    fn detach(&mut self, path: &Path) {
        if let Some(ino) = self.by_path.remove(path) {
            if let Some(node) = self.nodes.get_mut(&ino) {
                node.linked = false;
            }
            self.evict_if_idle(ino);
        }
    }

    fn opened(&mut self, ino: u64, fh: u64) {
        if let Some(node) = self.nodes.get_mut(&ino) {
            node.handles.push(fh);
        }
    }

    fn closed(&mut self, ino: u64, fh: u64) {
        if let Some(node) = self.nodes.get_mut(&ino) {
            node.handles.retain(|open| *open != fh);
        }
        self.evict_if_idle(ino);
    }

    /// Path and handle for an attribute request on `ino`.
    ///
    /// The kernel's handle wins. Without one, an unlinked inode falls back to
    /// any handle still open on it, since its path may now name another file.
    fn target(&self, ino: u64, fh: Option<u64>) -> Option<(PathBuf, Option<Handle>)> {
        let node = self.nodes.get(&ino)?;
        let fh = match fh {
            Some(fh) => Some(fh),
            None if node.linked => None,
            None => Some(*node.handles.first()?),
        };
        Some((node.path.clone(), fh.map(Handle)))
    }

    /// Move `from` and everything below it to `to`, detaching whatever `to`
    /// named before.
    fn rename(&mut self, from: &Path, to: &Path) {
        if from == to {
            return;
        }
        self.detach(to);
        let moved: Vec<(PathBuf, u64)> = self
            .by_path
            .iter()
            .filter(|(path, _)| path.starts_with(from))
            .map(|(path, ino)| (path.clone(), *ino))
            .collect();
        for (old, ino) in moved {
            let new = match old.strip_prefix(from) {
                Ok(rest) if rest.as_os_str().is_empty() => to.to_path_buf(),
                Ok(rest) => to.join(rest),
                Err(_) => continue,
            };
            self.by_path.remove(&old);
            self.by_path.insert(new.clone(), ino);
            if let Some(node) = self.nodes.get_mut(&ino) {
                node.path = new;
            }
        }
    }
}

struct Listing {
    ino: u64,
    kind: fuser::FileType,
    name: std::ffi::OsString,
}

struct Inner<O> {
    ops: Arc<O>,
    inodes: Mutex<InodeTable>,
    dirs: Mutex<HashMap<u64, Arc<Vec<Listing>>>>,
    next_dir: AtomicU64,
}

impl<O: Operations> Inner<O> {
    fn inodes(&self) -> std::sync::MutexGuard<'_, InodeTable> {
        self.inodes.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn path(&self, ino: u64) -> Option<PathBuf> {
        self.inodes().path(ino)
    }

    fn child(&self, parent: u64, name: &OsStr) -> Option<PathBuf> {
        self.path(parent).map(|dir| dir.join(name))
    }

    /// Kernel attributes for an entry reply, counting the lookup.
    fn entry(&self, path: &Path, attr: &FileAttr) -> fuser::FileAttr {
        kernel_attr(self.inodes().lookup(path), attr)
    }

    /// Look `path` up and answer an entry reply, as after a create.
    async fn reply_entry(&self, path: &Path, reply: ReplyEntry) {
        match self.ops.getattr(path).await {
            Ok(attr) => reply.entry(&TTL, &self.entry(path, &attr), 0),
            Err(e) => reply.error(e.errno()),
        }
    }

    async fn attr_of(&self, path: &Path, handle: Option<Handle>) -> crate::Result<FileAttr> {
        match handle {
            Some(handle) => self.ops.fgetattr(handle).await,
            None => self.ops.getattr(path).await,
        }
    }
}

fn kernel_kind(kind: FileType) -> fuser::FileType {
    match kind {
        FileType::File => fuser::FileType::RegularFile,
        FileType::Directory => fuser::FileType::Directory,
        FileType::Symlink => fuser::FileType::Symlink,
        FileType::NamedPipe => fuser::FileType::NamedPipe,
        FileType::CharDevice => fuser::FileType::CharDevice,
        FileType::BlockDevice => fuser::FileType::BlockDevice,
        FileType::Socket => fuser::FileType::Socket,
    }
}

fn kernel_attr(ino: u64, attr: &FileAttr) -> fuser::FileAttr {
    fuser::FileAttr {
        ino,
        size: attr.size,
        blocks: attr.blocks,
        atime: attr.atime,
        mtime: attr.mtime,
        ctime: attr.ctime,
        crtime: attr.ctime,
        kind: kernel_kind(attr.kind),
        perm: attr.perm,
        nlink: attr.nlink,
        uid: attr.uid,
        gid: attr.gid,
        rdev: attr.rdev as u32,
        blksize: attr.blksize,
        flags: 0,
    }
}

fn set_time(time: Option<TimeOrNow>) -> SetTime {
    match time {
        None => SetTime::Omit,
        Some(TimeOrNow::Now) => SetTime::Now,
        Some(TimeOrNow::SpecificTime(t)) => SetTime::At(t),
    }
}

/// `fuser` filesystem dispatching to an [`Operations`] implementation.
pub struct SlowFuse<O> {
    inner: Arc<Inner<O>>,
    runtime: Runtime,
}

impl<O: Operations + 'static> SlowFuse<O> {
    pub fn new(ops: Arc<O>, runtime: Runtime) -> Self {
        Self {
            inner: Arc::new(Inner {
                ops,
                inodes: Mutex::new(InodeTable::new()),
                dirs: Mutex::new(HashMap::new()),
                next_dir: AtomicU64::new(1),
            }),
            runtime,
        }
    }

    fn spawn<F, Fut>(&self, f: F)
    where
        F: FnOnce(Arc<Inner<O>>) -> Fut,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        self.runtime.spawn(f(Arc::clone(&self.inner)));
    }
}

impl<O: Operations + 'static> Filesystem for SlowFuse<O> {
    fn init(&mut self, _req: &Request<'_>, _config: &mut KernelConfig) -> Result<(), libc::c_int> {
        tracing::info!("filesystem mounted");
        Ok(())
    }

    fn destroy(&mut self) {
        tracing::info!("filesystem unmounted");
    }

    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let Some(path) = self.inner.child(parent, name) else {
            return reply.error(libc::ENOENT);
        };
        self.spawn(|inner| async move { inner.reply_entry(&path, reply).await });
    }

    fn forget(&mut self, _req: &Request<'_>, ino: u64, nlookup: u64) {
        self.inner.inodes().forget(ino, nlookup);
    }

    fn batch_forget(&mut self, _req: &Request<'_>, nodes: &[fuser::fuse_forget_one]) {
        let mut inodes = self.inner.inodes();
        for node in nodes {
            inodes.forget(node.nodeid, node.nlookup);
        }
        tracing::trace!(count = nodes.len(), live = inodes.len(), "batch forget");
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, fh: Option<u64>, reply: ReplyAttr) {
        let Some((path, handle)) = self.inner.inodes().target(ino, fh) else {
            return reply.error(libc::ENOENT);
        };
        self.spawn(|inner| async move {
            match inner.attr_of(&path, handle).await {
                Ok(attr) => reply.attr(&TTL, &kernel_attr(ino, &attr)),
                Err(e) => reply.error(e.errno()),
            }
        });
    }

    fn setattr(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        mode: Option<u32>,
        uid: Option<u32>,
        gid: Option<u32>,
        size: Option<u64>,
        atime: Option<TimeOrNow>,
        mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        let Some((path, handle)) = self.inner.inodes().target(ino, fh) else {
            return reply.error(libc::ENOENT);
        };
        self.spawn(|inner| async move {
            let ops = &inner.ops;
            let result = async {
                if let Some(mode) = mode {
                    ops.chmod(&path, handle, mode).await?;
                }
                if uid.is_some() || gid.is_some() {
                    ops.chown(&path, handle, uid, gid).await?;
                }
                if let Some(size) = size {
                    ops.truncate(&path, handle, size).await?;
                }
                if atime.is_some() || mtime.is_some() {
                    ops.utimens(&path, handle, set_time(atime), set_time(mtime))
                        .await?;
                }
                inner.attr_of(&path, handle).await
            }
            .await;
            match result {
                Ok(attr) => reply.attr(&TTL, &kernel_attr(ino, &attr)),
                Err(e) => reply.error(e.errno()),
            }
        });
    }

    fn readlink(&mut self, _req: &Request<'_>, ino: u64, reply: ReplyData) {
        let Some(path) = self.inner.path(ino) else {
            return reply.error(libc::ENOENT);
        };
        self.spawn(|inner| async move {
            match inner.ops.readlink(&path).await {
                Ok(target) => reply.data(target.as_os_str().as_bytes()),
                Err(e) => reply.error(e.errno()),
            }
        });
    }

    fn mknod(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        umask: u32,
        rdev: u32,
        reply: ReplyEntry,
    ) {
        let Some(path) = self.inner.child(parent, name) else {
            return reply.error(libc::ENOENT);
        };
        self.spawn(|inner| async move {
            match inner.ops.mknod(&path, mode & !umask, u64::from(rdev)).await {
                Ok(()) => inner.reply_entry(&path, reply).await,
                Err(e) => reply.error(e.errno()),
            }
        });
    }

    fn mkdir(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        umask: u32,
        reply: ReplyEntry,
    ) {
        let Some(path) = self.inner.child(parent, name) else {
            return reply.error(libc::ENOENT);
        };
        self.spawn(|inner| async move {
            match inner.ops.mkdir(&path, mode & !umask).await {
                Ok(()) => inner.reply_entry(&path, reply).await,
                Err(e) => reply.error(e.errno()),
            }
        });
    }

    fn unlink(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let Some(path) = self.inner.child(parent, name) else {
            return reply.error(libc::ENOENT);
        };
        self.spawn(|inner| async move {
            match inner.ops.unlink(&path).await {
                Ok(()) => {
                    inner.inodes().detach(&path);
                    reply.ok();
                }
                Err(e) => reply.error(e.errno()),
            }
        });
    }

    fn rmdir(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let Some(path) = self.inner.child(parent, name) else {
            return reply.error(libc::ENOENT);
        };
        self.spawn(|inner| async move {
            match inner.ops.rmdir(&path).await {
                Ok(()) => {
                    inner.inodes().detach(&path);
                    reply.ok();
                }
                Err(e) => reply.error(e.errno()),
            }
        });
    }

    fn symlink(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        link_name: &OsStr,
        target: &Path,
        reply: ReplyEntry,
    ) {
        let Some(link) = self.inner.child(parent, link_name) else {
            return reply.error(libc::ENOENT);
        };
        let target = target.to_path_buf();
        self.spawn(|inner| async move {
            match inner.ops.symlink(&target, &link).await {
                Ok(()) => inner.reply_entry(&link, reply).await,
                Err(e) => reply.error(e.errno()),
            }
        });
    }

    fn rename(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        flags: u32,
        reply: ReplyEmpty,
    ) {
        // RENAME_NOREPLACE and RENAME_EXCHANGE have no rename(2) equivalent.
        if flags != 0 {
            return reply.error(libc::EINVAL);
        }
        let (Some(from), Some(to)) = (
            self.inner.child(parent, name),
            self.inner.child(newparent, newname),
        ) else {
            return reply.error(libc::ENOENT);
        };
        self.spawn(|inner| async move {
            match inner.ops.rename(&from, &to).await {
                Ok(()) => {
                    inner.inodes().rename(&from, &to);
                    reply.ok();
                }
                Err(e) => reply.error(e.errno()),
            }
        });
    }

    fn link(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        newparent: u64,
        newname: &OsStr,
        reply: ReplyEntry,
    ) {
        let (Some(existing), Some(new)) = (
            self.inner.path(ino),
            self.inner.child(newparent, newname),
        ) else {
            return reply.error(libc::ENOENT);
        };
        self.spawn(|inner| async move {
            match inner.ops.link(&existing, &new).await {
                Ok(()) => inner.reply_entry(&new, reply).await,
                Err(e) => reply.error(e.errno()),
            }
        });
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        let Some(path) = self.inner.path(ino) else {
            return reply.error(libc::ENOENT);
        };
        self.spawn(|inner| async move {
            match inner.ops.open(&path, flags).await {
                Ok(handle) => {
                    inner.inodes().opened(ino, handle.id());
                    reply.opened(handle.id(), 0);
                }
                Err(e) => reply.error(e.errno()),
            }
        });
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        let Ok(offset) = u64::try_from(offset) else {
            return reply.error(libc::EINVAL);
        };
        self.spawn(|inner| async move {
            match inner.ops.read(Handle(fh), offset, size).await {
                Ok(data) => reply.data(&data),
                Err(e) => reply.error(e.errno()),
            }
        });
    }

    fn write(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        let Ok(offset) = u64::try_from(offset) else {
            return reply.error(libc::EINVAL);
        };
        let data = data.to_vec();
        self.spawn(|inner| async move {
            match inner.ops.write(Handle(fh), offset, &data).await {
                Ok(written) => reply.written(written),
                Err(e) => reply.error(e.errno()),
            }
        });
    }

    fn flush(&mut self, _req: &Request<'_>, _ino: u64, _fh: u64, _lock_owner: u64, reply: ReplyEmpty) {
        reply.ok();
    }

    fn release(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        self.spawn(|inner| async move {
            match inner.ops.release(Handle(fh)).await {
                Ok(()) => {
                    inner.inodes().closed(ino, fh);
                    reply.ok();
                }
                Err(e) => reply.error(e.errno()),
            }
        });
    }

    fn fsync(&mut self, _req: &Request<'_>, _ino: u64, fh: u64, datasync: bool, reply: ReplyEmpty) {
        self.spawn(|inner| async move {
            match inner.ops.fsync(Handle(fh), datasync).await {
                Ok(()) => reply.ok(),
                Err(e) => reply.error(e.errno()),
            }
        });
    }

    fn opendir(&mut self, _req: &Request<'_>, ino: u64, _flags: i32, reply: ReplyOpen) {
        let Some(path) = self.inner.path(ino) else {
            return reply.error(libc::ENOENT);
        };
        self.spawn(|inner| async move {
            let entries = match inner.ops.readdir(&path).await {
                Ok(entries) => entries,
                Err(e) => return reply.error(e.errno()),
            };
            let inodes = inner.inodes();
            let known = |path: &Path| inodes.ino(path).unwrap_or(UNKNOWN_INO);
            let parent = path.parent().map_or(ino, known);
            let mut listing = Vec::with_capacity(entries.len() + 2);
            listing.push(Listing {
                ino,
                kind: fuser::FileType::Directory,
                name: ".".into(),
            });
            listing.push(Listing {
                ino: parent,
                kind: fuser::FileType::Directory,
                name: "..".into(),
            });
            for entry in entries {
                listing.push(Listing {
                    ino: known(&path.join(&entry.name)),
                    kind: kernel_kind(entry.kind),
                    name: entry.name,
                });
            }
            drop(inodes);
            let fh = inner.next_dir.fetch_add(1, Ordering::Relaxed);
            inner
                .dirs
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .insert(fh, Arc::new(listing));
            reply.opened(fh, 0);
        });
    }

    fn readdir(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        let listing = self
            .inner
            .dirs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&fh)
            .cloned();
        let Some(listing) = listing else {
            return reply.error(libc::EBADF);
        };
        let start = usize::try_from(offset).unwrap_or(0);
        for (i, entry) in listing.iter().enumerate().skip(start) {
            if reply.add(entry.ino, (i + 1) as i64, entry.kind, &entry.name) {
                break;
            }
        }
        reply.ok();
    }

    fn releasedir(&mut self, _req: &Request<'_>, _ino: u64, fh: u64, _flags: i32, reply: ReplyEmpty) {
        self.inner
            .dirs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&fh);
        reply.ok();
    }

    fn statfs(&mut self, _req: &Request<'_>, ino: u64, reply: ReplyStatfs) {
        let path = self.inner.path(ino).unwrap_or_else(|| PathBuf::from("/"));
        self.spawn(|inner| async move {
            match inner.ops.statfs(&path).await {
                Ok(st) => reply.statfs(
                    st.blocks, st.bfree, st.bavail, st.files, st.ffree, st.bsize, st.namelen,
                    st.frsize,
                ),
                Err(e) => reply.error(e.errno()),
            }
        });
    }

    fn create(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        umask: u32,
        flags: i32,
        reply: ReplyCreate,
    ) {
        let Some(path) = self.inner.child(parent, name) else {
            return reply.error(libc::ENOENT);
        };
        self.spawn(|inner| async move {
            let handle = match inner.ops.create(&path, mode & !umask, flags).await {
                Ok(handle) => handle,
                Err(e) => return reply.error(e.errno()),
            };
            match inner.ops.getattr(&path).await {
                Ok(attr) => {
                    let attr = inner.entry(&path, &attr);
                    inner.inodes().opened(attr.ino, handle.id());
                    reply.created(&TTL, &attr, 0, handle.id(), 0);
                }
                Err(e) => {
                    // The kernel never learns about the handle; close it here.
                    if let Err(release) = inner.ops.release(handle).await {
                        tracing::debug!(error = %release, "release after failed create");
                    }
                    reply.error(e.errno());
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_root_is_inode_one() {
        let table = InodeTable::new();
        assert_eq!(table.path(FUSE_ROOT_ID), Some(PathBuf::from("/")));
    }

    #[test]
    fn test_lookup_is_stable() {
        let mut table = InodeTable::new();
        let a = table.lookup(Path::new("/a"));
        let b = table.lookup(Path::new("/b"));
        assert_ne!(a, b);
        assert_eq!(table.lookup(Path::new("/a")), a);
        assert_ne!(a, FUSE_ROOT_ID);
    }

    #[test]
    fn test_forget_evicts_at_zero_lookups() {
        let mut table = InodeTable::new();
        let ino = table.lookup(Path::new("/f"));
        table.lookup(Path::new("/f"));
        assert_eq!(table.len(), 2);

        table.forget(ino, 1);
        assert_eq!(table.path(ino), Some(PathBuf::from("/f")));
        table.forget(ino, 1);
        assert_eq!(table.path(ino), None);
        assert_eq!(table.ino(Path::new("/f")), None);
        assert_eq!(table.len(), 1);

        assert_ne!(table.lookup(Path::new("/f")), ino);
    }

    #[test]
    fn test_root_is_never_evicted() {
        let mut table = InodeTable::new();
        table.forget(FUSE_ROOT_ID, 10);
        assert_eq!(table.path(FUSE_ROOT_ID), Some(PathBuf::from("/")));
    }

    #[test]
    fn test_many_lookups_do_not_accumulate() {
        let mut table = InodeTable::new();
        for i in 0..1000 {
            let ino = table.lookup(&PathBuf::from(format!("/file{i}")));
            table.forget(ino, 1);
        }
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_unlinked_open_file_is_served_by_handle() {
        let mut table = InodeTable::new();
        let ino = table.lookup(Path::new("/tmpfile"));
        table.opened(ino, 42);

        table.detach(Path::new("/tmpfile"));
        assert_eq!(table.path(ino), None);
        assert_eq!(
            table.target(ino, None),
            Some((PathBuf::from("/tmpfile"), Some(Handle(42))))
        );
        assert_eq!(
            table.target(ino, Some(7)),
            Some((PathBuf::from("/tmpfile"), Some(Handle(7))))
        );

        // A new file under the old name gets its own inode.
        let reused = table.lookup(Path::new("/tmpfile"));
        assert_ne!(reused, ino);
        assert_eq!(table.target(reused, None), Some((PathBuf::from("/tmpfile"), None)));

        table.closed(ino, 42);
        assert_eq!(table.target(ino, None), None);
        table.forget(ino, 1);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_unlinked_without_handle_is_not_found() {
        let mut table = InodeTable::new();
        let ino = table.lookup(Path::new("/gone"));
        table.detach(Path::new("/gone"));
        assert_eq!(table.target(ino, None), None);
        assert_eq!(table.path(ino), None);
    }

    #[test]
    fn test_rename_moves_descendants() {
        let mut table = InodeTable::new();
        let dir = table.lookup(Path::new("/dir"));
        let file = table.lookup(Path::new("/dir/file"));
        let other = table.lookup(Path::new("/dirty"));
        let replaced = table.lookup(Path::new("/new"));
        table.opened(replaced, 9);

        table.rename(Path::new("/dir"), Path::new("/new"));

        assert_eq!(table.path(dir), Some(PathBuf::from("/new")));
        assert_eq!(table.path(file), Some(PathBuf::from("/new/file")));
        assert_eq!(table.path(other), Some(PathBuf::from("/dirty")));
        assert_eq!(table.path(replaced), None);
        assert_eq!(table.ino(Path::new("/new")), Some(dir));
        // The replaced file is still open and keeps answering by handle.
        assert_eq!(
            table.target(replaced, None),
            Some((PathBuf::from("/new"), Some(Handle(9))))
        );
    }

    #[test]
    fn test_rename_onto_itself_keeps_entry() {
        let mut table = InodeTable::new();
        let ino = table.lookup(Path::new("/same"));
        table.rename(Path::new("/same"), Path::new("/same"));
        assert_eq!(table.path(ino), Some(PathBuf::from("/same")));
    }

    #[test]
    fn test_set_time_mapping() {
        assert_eq!(set_time(None), SetTime::Omit);
        assert_eq!(set_time(Some(TimeOrNow::Now)), SetTime::Now);
        let t = SystemTime::UNIX_EPOCH + Duration::from_secs(3);
        assert_eq!(set_time(Some(TimeOrNow::SpecificTime(t))), SetTime::At(t));
    }

    #[test]
    fn test_mount_options() {
        let config = MountConfig {
            allow_other: true,
            ..MountConfig::default()
        };
        let options = config.options();
        assert!(options.contains(&MountOption::AllowOther));
        assert!(options.contains(&MountOption::FSName("slowfs".to_string())));
        assert!(!MountConfig::default().options().contains(&MountOption::AllowOther));
    }
}
