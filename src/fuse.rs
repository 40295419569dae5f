//! The FUSE host binding.
//!
//! The kernel side speaks inodes while the core speaks logical paths, so
//! every handler first reconstructs the logical path from the dentry table,
//! then calls the corresponding [`TierFs`] operation and converts its result
//! into the reply the kernel expects.

use std::ffi::OsStr;
use std::os::unix::ffi::OsStrExt as _;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use fuser::{
    Filesystem, KernelConfig, ReplyAttr, ReplyCreate, ReplyData, ReplyDirectory, ReplyEmpty,
    ReplyEntry, ReplyLseek, ReplyOpen, ReplyStatfs, ReplyWrite, ReplyXattr, Request, TimeOrNow,
};
use tracing::debug;

use crate::attr::{FileAttr, OpenFlags};
use crate::dentry::FileKind;
use crate::fs::TierFs;
use crate::sys::Timestamp;

/// How long the kernel may cache entries and attributes before asking again.
const KERNEL_TTL: Duration = Duration::from_secs(1);

impl From<FileKind> for fuser::FileType {
    fn from(kind: FileKind) -> Self {
        match kind {
            FileKind::Regular => Self::RegularFile,
            FileKind::Directory => Self::Directory,
            FileKind::Symlink => Self::Symlink,
        }
    }
}

impl From<FileAttr> for fuser::FileAttr {
    fn from(attr: FileAttr) -> Self {
        Self {
            ino: attr.ino,
            size: attr.size,
            blocks: attr.blocks,
            atime: attr.atime,
            mtime: attr.mtime,
            ctime: attr.ctime,
            crtime: SystemTime::UNIX_EPOCH,
            kind: attr.kind.into(),
            perm: attr.perm.bits(),
            nlink: attr.nlink,
            uid: attr.uid,
            gid: attr.gid,
            rdev: 0,
            blksize: attr.blksize,
            flags: 0,
        }
    }
}

fn timestamp(t: Option<TimeOrNow>) -> Timestamp {
    match t {
        None => Timestamp::Omit,
        Some(TimeOrNow::Now) => Timestamp::Now,
        Some(TimeOrNow::SpecificTime(st)) => Timestamp::At(st),
    }
}

/// Adapter placing a [`TierFs`] behind the kernel's userspace filesystem
/// interface.
pub struct TierFuse {
    fs: TierFs,
}

impl TierFuse {
    pub fn new(fs: TierFs) -> Self {
        Self { fs }
    }

    fn path_of(&self, ino: u64) -> Option<PathBuf> {
        self.fs.logical_path(ino)
    }

    fn child_path(&self, parent: u64, name: &OsStr) -> Option<PathBuf> {
        Some(self.path_of(parent)?.join(name))
    }
}

impl Filesystem for TierFuse {
    fn init(&mut self, _req: &Request<'_>, _config: &mut KernelConfig) -> Result<(), libc::c_int> {
        debug!("filesystem handshake complete");
        Ok(())
    }

    fn destroy(&mut self) {
        self.fs.shutdown();
    }

    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let Some(path) = self.child_path(parent, name) else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.fs.getattr(&path) {
            Ok(attr) => reply.entry(&KERNEL_TTL, &attr.into(), 0),
            Err(e) => reply.error(e.into()),
        }
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        let Some(path) = self.path_of(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.fs.getattr(&path) {
            Ok(attr) => reply.attr(&KERNEL_TTL, &attr.into()),
            Err(e) => reply.error(e.into()),
        }
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
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        let Some(path) = self.path_of(ino) else {
            reply.error(libc::ENOENT);
            return;
        };

        if let Some(mode) = mode
            && let Err(e) = self.fs.chmod(&path, mode)
        {
            reply.error(e.into());
            return;
        }
        if (uid.is_some() || gid.is_some())
            && let Err(e) = self.fs.chown(&path, uid, gid)
        {
            reply.error(e.into());
            return;
        }
        if let Some(size) = size
            && let Err(e) = self.fs.truncate(&path, size)
        {
            reply.error(e.into());
            return;
        }
        if (atime.is_some() || mtime.is_some())
            && let Err(e) = self.fs.utimens(&path, timestamp(atime), timestamp(mtime))
        {
            reply.error(e.into());
            return;
        }

        match self.fs.getattr(&path) {
            Ok(attr) => reply.attr(&KERNEL_TTL, &attr.into()),
            Err(e) => reply.error(e.into()),
        }
    }

    fn readlink(&mut self, _req: &Request<'_>, ino: u64, reply: ReplyData) {
        let Some(path) = self.path_of(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.fs.readlink(&path) {
            Ok(target) => reply.data(target.as_os_str().as_bytes()),
            Err(e) => reply.error(e.into()),
        }
    }

    fn mkdir(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        reply: ReplyEntry,
    ) {
        let Some(path) = self.child_path(parent, name) else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.fs.mkdir(&path, mode) {
            Ok(attr) => reply.entry(&KERNEL_TTL, &attr.into(), 0),
            Err(e) => reply.error(e.into()),
        }
    }

    fn unlink(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let Some(path) = self.child_path(parent, name) else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.fs.unlink(&path) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.into()),
        }
    }

    fn rmdir(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let Some(path) = self.child_path(parent, name) else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.fs.rmdir(&path) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.into()),
        }
    }

    fn symlink(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        link_name: &OsStr,
        target: &Path,
        reply: ReplyEntry,
    ) {
        let Some(path) = self.child_path(parent, link_name) else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.fs.symlink(target, &path) {
            Ok(attr) => reply.entry(&KERNEL_TTL, &attr.into(), 0),
            Err(e) => reply.error(e.into()),
        }
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
        let (Some(old), Some(new)) = (
            self.child_path(parent, name),
            self.child_path(newparent, newname),
        ) else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.fs.rename(&old, &new, flags) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.into()),
        }
    }

    fn link(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        newparent: u64,
        newname: &OsStr,
        reply: ReplyEntry,
    ) {
        let (Some(old), Some(new)) = (self.path_of(ino), self.child_path(newparent, newname))
        else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.fs.link(&old, &new) {
            Ok(attr) => reply.entry(&KERNEL_TTL, &attr.into(), 0),
            Err(e) => reply.error(e.into()),
        }
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        let Some(path) = self.path_of(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.fs.open(&path, OpenFlags::from_bits_truncate(flags)) {
            Ok(fh) => reply.opened(fh, 0),
            Err(e) => reply.error(e.into()),
        }
    }

    fn create(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        flags: i32,
        reply: ReplyCreate,
    ) {
        let Some(path) = self.child_path(parent, name) else {
            reply.error(libc::ENOENT);
            return;
        };
        match self
            .fs
            .create(&path, mode, OpenFlags::from_bits_truncate(flags))
        {
            Ok((attr, fh)) => reply.created(&KERNEL_TTL, &attr.into(), 0, fh, 0),
            Err(e) => reply.error(e.into()),
        }
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        let Some(path) = self.path_of(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.fs.read(&path, Some(fh), offset as u64, size) {
            Ok(data) => reply.data(&data),
            Err(e) => reply.error(e.into()),
        }
    }

    fn write(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        let Some(path) = self.path_of(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.fs.write(&path, Some(fh), offset as u64, data) {
            Ok(written) => reply.written(written),
            Err(e) => reply.error(e.into()),
        }
    }

    fn flush(&mut self, _req: &Request<'_>, _ino: u64, fh: u64, _lock_owner: u64, reply: ReplyEmpty) {
        match self.fs.flush(fh) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.into()),
        }
    }

    fn release(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        match self.fs.release(fh) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.into()),
        }
    }

    fn fsync(&mut self, _req: &Request<'_>, _ino: u64, fh: u64, datasync: bool, reply: ReplyEmpty) {
        match self.fs.fsync(fh, datasync) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.into()),
        }
    }

    fn readdir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        let Some(path) = self.path_of(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        let entries = match self.fs.readdir(&path) {
            Ok(entries) => entries,
            Err(e) => {
                reply.error(e.into());
                return;
            }
        };
        let parent_ino = self.fs.parent_ino(ino).unwrap_or(ino);

        let offset = offset as usize;
        let mut i = 0usize;

        if i >= offset
            && reply.add(ino, (i + 1) as i64, fuser::FileType::Directory, OsStr::new("."))
        {
            reply.ok();
            return;
        }
        i += 1;

        if i >= offset
            && reply.add(
                parent_ino,
                (i + 1) as i64,
                fuser::FileType::Directory,
                OsStr::new(".."),
            )
        {
            reply.ok();
            return;
        }
        i += 1;

        for entry in &entries {
            if i >= offset
                && reply.add(entry.ino, (i + 1) as i64, entry.kind.into(), &entry.name)
            {
                break;
            }
            i += 1;
        }

        reply.ok();
    }

    fn statfs(&mut self, _req: &Request<'_>, _ino: u64, reply: ReplyStatfs) {
        match self.fs.statfs() {
            Ok(stats) => reply.statfs(
                stats.total_blocks,
                stats.free_blocks,
                stats.available_blocks,
                stats.total_inodes,
                stats.free_inodes,
                stats.block_size,
                stats.max_filename_length,
                stats.fragment_size,
            ),
            Err(e) => reply.error(e.into()),
        }
    }

    fn setxattr(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        name: &OsStr,
        value: &[u8],
        _flags: i32,
        _position: u32,
        reply: ReplyEmpty,
    ) {
        let Some(path) = self.path_of(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.fs.setxattr(&path, name, value) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.into()),
        }
    }

    fn getxattr(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        name: &OsStr,
        size: u32,
        reply: ReplyXattr,
    ) {
        let Some(path) = self.path_of(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.fs.getxattr(&path, name) {
            Ok(value) => {
                if size == 0 {
                    reply.size(value.len() as u32);
                } else if size >= value.len() as u32 {
                    reply.data(&value);
                } else {
                    reply.error(libc::ERANGE);
                }
            }
            Err(e) => reply.error(e.into()),
        }
    }

    fn listxattr(&mut self, _req: &Request<'_>, ino: u64, size: u32, reply: ReplyXattr) {
        let Some(path) = self.path_of(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.fs.listxattr(&path) {
            Ok(names) => {
                let mut data = Vec::new();
                for name in names {
                    data.extend_from_slice(name.as_bytes());
                    data.push(0);
                }
                if size == 0 {
                    reply.size(data.len() as u32);
                } else if size >= data.len() as u32 {
                    reply.data(&data);
                } else {
                    reply.error(libc::ERANGE);
                }
            }
            Err(e) => reply.error(e.into()),
        }
    }

    fn removexattr(&mut self, _req: &Request<'_>, ino: u64, name: &OsStr, reply: ReplyEmpty) {
        let Some(path) = self.path_of(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.fs.removexattr(&path, name) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.into()),
        }
    }

    fn access(&mut self, _req: &Request<'_>, ino: u64, mask: i32, reply: ReplyEmpty) {
        let Some(path) = self.path_of(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.fs.access(&path, mask) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.into()),
        }
    }

    fn copy_file_range(
        &mut self,
        _req: &Request<'_>,
        ino_in: u64,
        fh_in: u64,
        offset_in: i64,
        ino_out: u64,
        fh_out: u64,
        offset_out: i64,
        len: u64,
        _flags: u32,
        reply: ReplyWrite,
    ) {
        let (Some(src), Some(dst)) = (self.path_of(ino_in), self.path_of(ino_out)) else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.fs.copy_file_range(
            &src,
            Some(fh_in),
            offset_in as u64,
            &dst,
            Some(fh_out),
            offset_out as u64,
            len,
        ) {
            Ok(copied) => reply.written(copied as u32),
            Err(e) => reply.error(e.into()),
        }
    }

    fn lseek(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        offset: i64,
        whence: i32,
        reply: ReplyLseek,
    ) {
        match self.fs.lseek(Some(fh), offset, whence) {
            Ok(position) => reply.offset(position),
            Err(e) => reply.error(e.into()),
        }
    }
}
