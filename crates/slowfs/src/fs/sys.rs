//! Thin wrappers for backing-store syscalls that `std` does not expose.

use std::ffi::CString;
use std::io;
use std::mem::MaybeUninit;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::io::RawFd;
use std::path::Path;
use std::time::UNIX_EPOCH;

use super::traits::{SetTime, StatFs};

fn c_path(path: &Path) -> io::Result<CString> {
    CString::new(path.as_os_str().as_bytes())
        .map_err(|_| io::Error::from_raw_os_error(libc::EINVAL))
}

fn check(ret: libc::c_int) -> io::Result<()> {
    if ret == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

pub(crate) fn mknod(path: &Path, mode: u32, rdev: u64) -> io::Result<()> {
    let path = c_path(path)?;
    // SAFETY: `path` is a valid NUL-terminated string for the duration of the call.
    check(unsafe { libc::mknod(path.as_ptr(), mode as libc::mode_t, rdev as libc::dev_t) })
}

pub(crate) fn statvfs(path: &Path) -> io::Result<StatFs> {
    let path = c_path(path)?;
    let mut buf = MaybeUninit::<libc::statvfs>::uninit();
    // SAFETY: `buf` is valid for writes of one `statvfs`; it is only read after success.
    check(unsafe { libc::statvfs(path.as_ptr(), buf.as_mut_ptr()) })?;
    // SAFETY: statvfs returned 0, so the struct is initialized.
    let st = unsafe { buf.assume_init() };
    Ok(StatFs {
        blocks: st.f_blocks as u64,
        bfree: st.f_bfree as u64,
        bavail: st.f_bavail as u64,
        files: st.f_files as u64,
        ffree: st.f_ffree as u64,
        bsize: st.f_bsize as u32,
        namelen: st.f_namemax as u32,
        frsize: st.f_frsize as u32,
    })
}

fn timespec(time: SetTime) -> libc::timespec {
    let (tv_sec, tv_nsec) = match time {
        SetTime::Now => (0, libc::UTIME_NOW),
        SetTime::Omit => (0, libc::UTIME_OMIT),
        SetTime::At(t) => match t.duration_since(UNIX_EPOCH) {
            Ok(d) => (d.as_secs() as libc::time_t, d.subsec_nanos() as _),
            Err(e) => {
                let before = e.duration();
                let mut secs = -(before.as_secs() as libc::time_t);
                let mut nanos = before.subsec_nanos() as i64;
                if nanos > 0 {
                    secs -= 1;
                    nanos = 1_000_000_000 - nanos;
                }
                (secs, nanos as _)
            }
        },
    };
    libc::timespec { tv_sec, tv_nsec }
}

/// `utimensat(2)` without following a final symlink.
pub(crate) fn utimens(path: &Path, atime: SetTime, mtime: SetTime) -> io::Result<()> {
    let path = c_path(path)?;
    let times = [timespec(atime), timespec(mtime)];
    // SAFETY: `path` is NUL-terminated and `times` points to two timespecs.
    check(unsafe {
        libc::utimensat(
            libc::AT_FDCWD,
            path.as_ptr(),
            times.as_ptr(),
            libc::AT_SYMLINK_NOFOLLOW,
        )
    })
}

/// `futimens(2)` on an open file.
pub(crate) fn futimens(fd: RawFd, atime: SetTime, mtime: SetTime) -> io::Result<()> {
    let times = [timespec(atime), timespec(mtime)];
    // SAFETY: `times` points to two timespecs; a stale `fd` only yields EBADF.
    check(unsafe { libc::futimens(fd, times.as_ptr()) })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_timespec_conversion() {
        let ts = timespec(SetTime::At(UNIX_EPOCH + Duration::new(5, 7)));
        assert_eq!((ts.tv_sec as i64, ts.tv_nsec as i64), (5, 7));

        let ts = timespec(SetTime::At(UNIX_EPOCH - Duration::from_millis(1_500)));
        assert_eq!((ts.tv_sec as i64, ts.tv_nsec as i64), (-2, 500_000_000));

        assert_eq!(timespec(SetTime::Omit).tv_nsec as i64, libc::UTIME_OMIT as i64);
    }

    #[test]
    fn test_statvfs_on_tempdir() {
        let dir = tempfile::tempdir().expect("tempdir");
        let st = statvfs(dir.path()).expect("statvfs");
        assert!(st.bsize > 0);
        assert!(st.namelen > 0);
    }

    #[test]
    fn test_path_with_nul_is_rejected() {
        let path = Path::new("a\0b");
        let err = mknod(path, libc::S_IFIFO as u32 | 0o600, 0).expect_err("interior NUL");
        assert_eq!(err.raw_os_error(), Some(libc::EINVAL));
    }
}
