//! Thin wrappers over the few syscalls std does not expose.

use std::ffi::CString;
use std::io;
use std::os::fd::RawFd;
use std::os::unix::ffi::OsStrExt as _;
use std::path::Path;
use std::time::SystemTime;

/// A timestamp argument for [`utimens`].
#[derive(Debug, Clone, Copy)]
pub enum Timestamp {
    /// Leave the current value untouched.
    Omit,
    /// Use the current time.
    Now,
    /// Set an explicit time.
    At(SystemTime),
}

fn cpath(path: &Path) -> io::Result<CString> {
    CString::new(path.as_os_str().as_bytes())
        .map_err(|_| io::Error::from_raw_os_error(libc::EINVAL))
}

fn timespec(t: Timestamp) -> libc::timespec {
    match t {
        Timestamp::Omit => libc::timespec {
            tv_sec: 0,
            tv_nsec: libc::UTIME_OMIT,
        },
        Timestamp::Now => libc::timespec {
            tv_sec: 0,
            tv_nsec: libc::UTIME_NOW,
        },
        Timestamp::At(st) => {
            let d = st
                .duration_since(SystemTime::UNIX_EPOCH)
                .unwrap_or_default();
            libc::timespec {
                tv_sec: d.as_secs() as libc::time_t,
                tv_nsec: libc::c_long::from(d.subsec_nanos()),
            }
        }
    }
}

/// Set access and modification times, following symlinks.
pub fn utimens(path: &Path, atime: Timestamp, mtime: Timestamp) -> io::Result<()> {
    let p = cpath(path)?;
    let times = [timespec(atime), timespec(mtime)];
    let rc = unsafe { libc::utimensat(libc::AT_FDCWD, p.as_ptr(), times.as_ptr(), 0) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

/// Change ownership without following a final symlink.
pub fn lchown(path: &Path, uid: Option<u32>, gid: Option<u32>) -> io::Result<()> {
    let p = cpath(path)?;
    // -1 leaves the respective id unchanged.
    let rc = unsafe {
        libc::lchown(
            p.as_ptr(),
            uid.unwrap_or(libc::uid_t::MAX),
            gid.unwrap_or(libc::gid_t::MAX),
        )
    };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

/// Reposition an open file description.
pub fn lseek(fd: RawFd, offset: i64, whence: i32) -> io::Result<i64> {
    let rc = unsafe { libc::lseek(fd, offset as libc::off_t, whence) };
    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(rc as i64)
    }
}

/// Kernel-side range copy between two open files.
pub fn copy_file_range(
    fd_in: RawFd,
    off_in: u64,
    fd_out: RawFd,
    off_out: u64,
    len: usize,
) -> io::Result<usize> {
    let mut off_in = off_in as libc::loff_t;
    let mut off_out = off_out as libc::loff_t;
    let rc = unsafe { libc::copy_file_range(fd_in, &mut off_in, fd_out, &mut off_out, len, 0) };
    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(rc as usize)
    }
}
