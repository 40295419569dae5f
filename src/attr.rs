//! Attribute and flag types crossing the host boundary.
//!
//! These abstract away the raw `mode_t`/`flags` integers so handlers never
//! test bits by hand.

use std::time::{Duration, SystemTime};

use bitflags::bitflags;
use std::ffi::OsString;

use crate::dentry::FileKind;

/// A host-visible file handle.
pub type FileHandle = u64;

bitflags! {
    /// The permission bits of a mode word.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Permissions: u16 {
        const OTHER_EXECUTE = 1 << 0;
        const OTHER_WRITE   = 1 << 1;
        const OTHER_READ    = 1 << 2;

        const GROUP_EXECUTE = 1 << 3;
        const GROUP_WRITE   = 1 << 4;
        const GROUP_READ    = 1 << 5;

        const OWNER_EXECUTE = 1 << 6;
        const OWNER_WRITE   = 1 << 7;
        const OWNER_READ    = 1 << 8;

        const STICKY        = 1 << 9;
        const SETGID        = 1 << 10;
        const SETUID        = 1 << 11;
    }
}

bitflags! {
    /// Open flags as delivered by the host.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct OpenFlags: i32 {
        // Access modes (mutually exclusive, resolved via `access_mode`)
        const RDONLY = libc::O_RDONLY;
        const WRONLY = libc::O_WRONLY;
        const RDWR = libc::O_RDWR;

        // Creation/status flags
        const APPEND = libc::O_APPEND;
        const TRUNC = libc::O_TRUNC;
        const CREAT = libc::O_CREAT;
        const EXCL = libc::O_EXCL;

        // Behavior flags
        const NONBLOCK = libc::O_NONBLOCK;
        const NOFOLLOW = libc::O_NOFOLLOW;
        const DIRECTORY = libc::O_DIRECTORY;
    }
}

impl OpenFlags {
    /// The access-mode portion of the flags (`O_RDONLY`/`O_WRONLY`/`O_RDWR`).
    ///
    /// `O_RDONLY` is zero, so access modes cannot be tested with `contains`;
    /// they have to be masked out and compared.
    pub fn access_mode(self) -> i32 {
        self.bits() & libc::O_ACCMODE
    }

    pub fn wants_read(self) -> bool {
        self.access_mode() != libc::O_WRONLY
    }

    pub fn wants_write(self) -> bool {
        matches!(self.access_mode(), libc::O_WRONLY | libc::O_RDWR)
    }
}

/// Attributes of one backing entry, reported to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileAttr {
    pub ino: u64,
    pub kind: FileKind,
    pub size: u64,
    pub blocks: u64,
    pub atime: SystemTime,
    pub mtime: SystemTime,
    pub ctime: SystemTime,
    pub perm: Permissions,
    pub nlink: u32,
    pub uid: u32,
    pub gid: u32,
    pub blksize: u32,
}

impl FileAttr {
    /// Build attributes from a backing `stat`, reporting the dentry's inode
    /// number instead of the backing one.
    ///
    /// Returns `None` when the backing entry is not a regular file,
    /// directory or symlink.
    pub fn from_metadata(ino: u64, meta: &std::fs::Metadata) -> Option<Self> {
        use std::os::unix::fs::MetadataExt as _;

        fn to_systime(secs: i64, nsecs: i64) -> SystemTime {
            // nsecs from MetadataExt is always in [0, 999_999_999].
            if secs >= 0 {
                SystemTime::UNIX_EPOCH + Duration::new(secs as u64, nsecs as u32)
            } else {
                SystemTime::UNIX_EPOCH - Duration::from_secs((-secs) as u64)
                    + Duration::from_nanos(nsecs as u64)
            }
        }

        let kind = FileKind::from_file_type(&meta.file_type())?;

        Some(Self {
            ino,
            kind,
            size: meta.len(),
            blocks: meta.blocks(),
            atime: to_systime(meta.atime(), meta.atime_nsec()),
            mtime: to_systime(meta.mtime(), meta.mtime_nsec()),
            ctime: to_systime(meta.ctime(), meta.ctime_nsec()),
            perm: Permissions::from_bits_truncate(meta.mode() as u16),
            nlink: meta.nlink() as u32,
            uid: meta.uid(),
            gid: meta.gid(),
            blksize: meta.blksize() as u32,
        })
    }
}

/// One entry reported by `readdir`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub ino: u64,
    pub name: OsString,
    pub kind: FileKind,
}

/// Filesystem-level statistics for the host's `statfs` reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilesystemStats {
    pub block_size: u32,
    pub fragment_size: u32,
    pub total_blocks: u64,
    pub free_blocks: u64,
    pub available_blocks: u64,
    pub total_inodes: u64,
    pub free_inodes: u64,
    pub max_filename_length: u32,
}
