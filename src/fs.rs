//! The operation dispatcher.
//!
//! [`TierFs`] owns the dentry table, the mount configuration and the table of
//! host-opened file handles. One handler per host operation: each resolves
//! the dentry, validates its kind, performs the underlying syscall on the
//! resolved tier path(s), updates the index, and (for size-changing writes)
//! consults the migration policy.
//!
//! The host delivers one operation at a time and every handler runs to
//! completion before the next, so no locking is needed anywhere here.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::os::fd::AsRawFd as _;
use std::os::unix::fs::{
    DirBuilderExt as _, FileExt as _, MetadataExt as _, OpenOptionsExt as _, PermissionsExt as _,
};
use std::path::{Path, PathBuf};

use bytes::Bytes;
use nix::unistd::{AccessFlags, Gid, Uid};
use tracing::{debug, info, warn};

use crate::attr::{DirEntry, FileAttr, FileHandle, FilesystemStats, OpenFlags};
use crate::config::MountConfig;
use crate::dentry::{DentryId, DentryTable, FileKind, ROOT_INO, Tier};
use crate::error::{FsError, FsResult};
use crate::migrate;
use crate::resolve;
use crate::sys::{self, Timestamp};

/// Mode bits used when the host creates a file through `open(O_CREAT)`
/// without supplying a mode of its own.
const DEFAULT_FILE_MODE: u32 = 0o644;

/// A file to do I/O against: either a host-owned open handle or a file we
/// opened just for this operation.
enum FileSource<'a> {
    Handle(&'a File),
    Opened(File),
}

impl FileSource<'_> {
    fn as_file(&self) -> &File {
        match self {
            Self::Handle(f) => f,
            Self::Opened(f) => f,
        }
    }
}

/// The tiered filesystem core.
pub struct TierFs {
    cfg: MountConfig,
    dentries: DentryTable,
    open_files: HashMap<FileHandle, File>,
    next_fh: FileHandle,
}

impl TierFs {
    /// Initialize the mount: wipe and recreate both backing trees and
    /// install the root dentry.
    pub fn mount(cfg: MountConfig) -> FsResult<Self> {
        for root in [cfg.fast_root(), cfg.slow_root()] {
            match fs::remove_dir_all(root) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
            fs::create_dir_all(root)?;
        }
        info!(
            fast = %cfg.fast_root().display(),
            slow = %cfg.slow_root().display(),
            "backing trees initialized"
        );

        Ok(Self {
            cfg,
            dentries: DentryTable::new(),
            open_files: HashMap::new(),
            next_fh: 1,
        })
    }

    /// Tear down: drop every open handle and the whole dentry tree.
    pub fn shutdown(&mut self) {
        self.open_files.clear();
        self.dentries.clear();
        info!("dentry tree released");
    }

    pub fn config(&self) -> &MountConfig {
        &self.cfg
    }

    pub fn dentries(&self) -> &DentryTable {
        &self.dentries
    }

    /// Reconstruct the logical path of an inode, relative to the mount root.
    pub fn logical_path(&self, ino: u64) -> Option<PathBuf> {
        self.dentries.logical_path(ino)
    }

    /// The inode of a dentry's parent directory; the root is its own parent.
    pub fn parent_ino(&self, ino: u64) -> Option<u64> {
        let dentry = self.dentries.get(ino)?;
        Some(dentry.parent.unwrap_or(ROOT_INO))
    }

    /// The tier currently holding a path, if it names a dentry.
    pub fn tier_of(&self, logical: &Path) -> Option<Tier> {
        let id = self.dentries.find(logical)?;
        Some(self.dentries.get(id)?.tier)
    }

    // ── Lookup helpers ──────────────────────────────────────────────────

    fn require(&self, logical: &Path) -> FsResult<DentryId> {
        self.dentries.find(logical).ok_or(FsError::NotFound)
    }

    fn require_parent(&self, logical: &Path) -> FsResult<(DentryId, std::ffi::OsString)> {
        self.dentries.find_parent(logical).ok_or(FsError::NotFound)
    }

    fn attr_of(&self, id: DentryId, logical: &Path) -> FsResult<FileAttr> {
        let dentry = self.dentries.get(id).ok_or(FsError::NotFound)?;
        let backing = resolve::backing_path(&self.cfg, dentry, logical);
        let meta = fs::symlink_metadata(&backing)?;
        FileAttr::from_metadata(dentry.ino, &meta).ok_or(FsError::InvalidKind)
    }

    fn register(&mut self, file: File) -> FileHandle {
        let fh = self.next_fh;
        self.next_fh += 1;
        self.open_files.insert(fh, file);
        fh
    }

    fn handle(&self, fh: FileHandle) -> FsResult<&File> {
        self.open_files.get(&fh).ok_or(FsError::InvalidHandle)
    }

    /// Resolve the file to do data I/O against: the host's handle when one
    /// was passed, otherwise a one-shot open on the owning tier.
    fn data_file(&self, logical: &Path, fh: Option<FileHandle>, write: bool) -> FsResult<FileSource<'_>> {
        if let Some(fh) = fh {
            return Ok(FileSource::Handle(self.handle(fh)?));
        }

        let id = self.require(logical)?;
        let dentry = self.dentries.get(id).ok_or(FsError::NotFound)?;
        match dentry.kind {
            FileKind::Regular => {}
            FileKind::Directory => return Err(FsError::IsDirectory),
            FileKind::Symlink => return Err(FsError::InvalidKind),
        }
        let backing = resolve::backing_path(&self.cfg, dentry, logical);
        let file = OpenOptions::new()
            .read(!write)
            .write(write)
            .open(&backing)?;
        Ok(FileSource::Opened(file))
    }

    // ── Migration ───────────────────────────────────────────────────────

    /// Consult the policy after a size-changing operation and relocate the
    /// backing file if it crossed a threshold. Advisory: failures are logged
    /// and the tier stays as it was.
    fn run_migration(&mut self, logical: &Path) {
        let Some(id) = self.dentries.find(logical) else {
            return;
        };
        let Some(dentry) = self.dentries.get(id) else {
            return;
        };
        if dentry.kind != FileKind::Regular {
            return;
        }
        let tier = dentry.tier;

        let current = resolve::data_path(&self.cfg, tier, logical);
        let size = match fs::metadata(&current) {
            Ok(meta) => meta.len(),
            Err(e) => {
                warn!(path = %logical.display(), error = %e, "cannot stat file for migration");
                return;
            }
        };

        let Some(relocation) = migrate::plan(tier, size, &self.cfg) else {
            return;
        };
        let target_tier = relocation.target_tier();
        let target = resolve::data_path(&self.cfg, target_tier, logical);

        match migrate::relocate(&current, &target) {
            Ok(()) => {
                self.dentries.set_tier(id, target_tier);
                debug!(
                    path = %logical.display(),
                    size,
                    from = ?tier,
                    to = ?target_tier,
                    "file migrated"
                );
            }
            Err(e) => {
                warn!(
                    path = %logical.display(),
                    size,
                    error = %e,
                    "migration failed, file stays on its current tier"
                );
            }
        }
    }

    // ── Metadata operations ─────────────────────────────────────────────

    pub fn getattr(&self, logical: &Path) -> FsResult<FileAttr> {
        debug!(path = %logical.display(), "getattr");
        let id = self.require(logical)?;
        self.attr_of(id, logical)
    }

    pub fn readlink(&self, logical: &Path) -> FsResult<PathBuf> {
        debug!(path = %logical.display(), "readlink");
        let id = self.require(logical)?;
        let dentry = self.dentries.get(id).ok_or(FsError::NotFound)?;
        if dentry.kind != FileKind::Symlink {
            return Err(FsError::InvalidKind);
        }
        Ok(fs::read_link(self.cfg.fast_path(logical))?)
    }

    pub fn access(&self, logical: &Path, mask: i32) -> FsResult<()> {
        debug!(path = %logical.display(), mask, "access");
        let id = self.require(logical)?;
        let dentry = self.dentries.get(id).ok_or(FsError::NotFound)?;
        let backing = resolve::backing_path(&self.cfg, dentry, logical);
        nix::unistd::access(&backing, AccessFlags::from_bits_truncate(mask))?;
        Ok(())
    }

    pub fn statfs(&self) -> FsResult<FilesystemStats> {
        let stat = nix::sys::statvfs::statvfs(self.cfg.fast_root())?;
        Ok(FilesystemStats {
            block_size: stat.block_size() as u32,
            fragment_size: stat.fragment_size() as u32,
            total_blocks: stat.blocks() as u64,
            free_blocks: stat.blocks_free() as u64,
            available_blocks: stat.blocks_available() as u64,
            total_inodes: self.dentries.len() as u64,
            free_inodes: stat.files_free() as u64,
            max_filename_length: stat.name_max() as u32,
        })
    }

    // ── Directory operations ────────────────────────────────────────────

    pub fn mkdir(&mut self, logical: &Path, mode: u32) -> FsResult<FileAttr> {
        debug!(path = %logical.display(), mode, "mkdir");
        let (parent, name) = self.require_parent(logical)?;
        if self.dentries.child_of(parent, &name).is_some() {
            return Err(FsError::Exists);
        }

        let (fast, slow) = resolve::mirror_paths(&self.cfg, logical);
        mkdir_with_mode(&fast, mode)?;
        if let Err(e) = mkdir_with_mode(&slow, mode) {
            // Keep the mirrors in lockstep: undo the half that succeeded.
            if let Err(rollback) = fs::remove_dir(&fast) {
                warn!(path = %fast.display(), error = %rollback, "mkdir rollback failed");
            }
            return Err(e.into());
        }

        let ino = self
            .dentries
            .insert_child(parent, &name, FileKind::Directory, Tier::NotFile);
        self.attr_of(ino, logical)
    }

    pub fn rmdir(&mut self, logical: &Path) -> FsResult<()> {
        debug!(path = %logical.display(), "rmdir");
        let id = self.require(logical)?;
        let dentry = self.dentries.get(id).ok_or(FsError::NotFound)?;
        if !dentry.is_directory() {
            return Err(FsError::NotDirectory);
        }
        if id == ROOT_INO {
            return Err(FsError::NotPermitted);
        }
        if dentry.children.as_ref().is_some_and(|c| !c.is_empty()) {
            return Err(FsError::NotEmpty);
        }
        let parent = dentry
            .parent
            .unwrap_or_else(|| unreachable!("non-root dentry without parent"));
        let name = dentry.name.clone();

        let (fast, slow) = resolve::mirror_paths(&self.cfg, logical);
        // Stat first so the fast mirror can be recreated if the slow removal
        // fails halfway.
        let saved_mode = fs::symlink_metadata(&fast)?.mode() & 0o7777;
        fs::remove_dir(&fast)?;
        if let Err(e) = fs::remove_dir(&slow) {
            if let Err(rollback) = mkdir_with_mode(&fast, saved_mode) {
                warn!(path = %fast.display(), error = %rollback, "rmdir rollback failed");
            }
            return Err(e.into());
        }

        self.dentries.remove_child(parent, &name);
        Ok(())
    }

    pub fn readdir(&self, logical: &Path) -> FsResult<Vec<DirEntry>> {
        debug!(path = %logical.display(), "readdir");
        let id = self.require(logical)?;
        let dentry = self.dentries.get(id).ok_or(FsError::NotFound)?;
        let children = dentry.children.as_ref().ok_or(FsError::NotDirectory)?;

        let mut entries: Vec<DirEntry> = children
            .iter()
            .filter_map(|(name, &child_id)| {
                let child = self.dentries.get(child_id)?;
                Some(DirEntry {
                    ino: child.ino,
                    name: name.clone(),
                    kind: child.kind,
                })
            })
            .collect();
        // Hash order is arbitrary; keep listings stable for the host.
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    // ── Namespace operations ────────────────────────────────────────────

    pub fn symlink(&mut self, target: &Path, linkpath: &Path) -> FsResult<FileAttr> {
        debug!(target = %target.display(), link = %linkpath.display(), "symlink");
        let (parent, name) = self.require_parent(linkpath)?;
        if self.dentries.child_of(parent, &name).is_some() {
            return Err(FsError::Exists);
        }

        // Symlinks live on the fast tree only.
        std::os::unix::fs::symlink(target, self.cfg.fast_path(linkpath))?;
        let ino = self
            .dentries
            .insert_child(parent, &name, FileKind::Symlink, Tier::Fast);
        self.attr_of(ino, linkpath)
    }

    pub fn unlink(&mut self, logical: &Path) -> FsResult<()> {
        debug!(path = %logical.display(), "unlink");
        let id = self.require(logical)?;
        let dentry = self.dentries.get(id).ok_or(FsError::NotFound)?;
        if dentry.is_directory() {
            return Err(FsError::IsDirectory);
        }
        let parent = dentry
            .parent
            .unwrap_or_else(|| unreachable!("non-directory dentry without parent"));
        let name = dentry.name.clone();
        let backing = resolve::backing_path(&self.cfg, dentry, logical);

        // On failure the dentry stays untouched.
        fs::remove_file(&backing)?;
        self.dentries.remove_child(parent, &name);
        Ok(())
    }

    pub fn rename(&mut self, old: &Path, new: &Path, flags: u32) -> FsResult<()> {
        debug!(old = %old.display(), new = %new.display(), flags, "rename");
        if flags & (libc::RENAME_EXCHANGE | libc::RENAME_WHITEOUT) != 0 {
            return Err(FsError::NotPermitted);
        }
        let no_replace = flags & libc::RENAME_NOREPLACE != 0;

        let old_id = self.require(old)?;
        let old_dentry = self.dentries.get(old_id).ok_or(FsError::NotFound)?;
        if old_dentry.is_directory() {
            // Only regular files and symlinks move; directories would need
            // both mirrors rebound.
            return Err(FsError::InvalidKind);
        }
        let tier = old_dentry.tier;
        let old_parent = old_dentry
            .parent
            .unwrap_or_else(|| unreachable!("non-directory dentry without parent"));
        let old_name = old_dentry.name.clone();

        let (new_parent, new_name) = self.require_parent(new)?;
        if old_parent == new_parent && old_name == new_name {
            return Ok(());
        }

        let existing = self.dentries.child_of(new_parent, &new_name);
        if no_replace && existing.is_some() {
            return Err(FsError::Exists);
        }
        let mut replaced_backing = None;
        if let Some(existing_id) = existing {
            let existing_dentry = self.dentries.get(existing_id).ok_or(FsError::NotFound)?;
            if existing_dentry.is_directory() {
                return Err(FsError::IsDirectory);
            }
            replaced_backing = Some(resolve::backing_path(&self.cfg, existing_dentry, new));
        }

        // Source and destination use the old file's tier; the move never
        // crosses tiers.
        let real_old = resolve::data_path(&self.cfg, tier, old);
        let real_new = resolve::data_path(&self.cfg, tier, new);
        fs::rename(&real_old, &real_new)?;

        if existing.is_some() {
            // If the overwritten entry lived on the other tier the backing
            // rename did not replace it; drop the orphan explicitly.
            if let Some(orphan) = replaced_backing
                && orphan != real_new
                && let Err(e) = fs::remove_file(&orphan)
            {
                warn!(path = %orphan.display(), error = %e, "could not remove replaced file");
            }
            self.dentries.remove_child(new_parent, &new_name);
        }
        self.dentries
            .rename_child(old_parent, &old_name, new_parent, &new_name);
        Ok(())
    }

    pub fn link(&mut self, old: &Path, new: &Path) -> FsResult<FileAttr> {
        debug!(old = %old.display(), new = %new.display(), "link");
        let old_id = self.require(old)?;
        let old_dentry = self.dentries.get(old_id).ok_or(FsError::NotFound)?;
        if old_dentry.is_directory() {
            return Err(FsError::NotPermitted);
        }
        let kind = old_dentry.kind;
        let tier = old_dentry.tier;

        let (new_parent, new_name) = self.require_parent(new)?;
        if self.dentries.child_of(new_parent, &new_name).is_some() {
            return Err(FsError::Exists);
        }

        // The new name shares the old file's tier; a hard link cannot span
        // the two trees.
        let real_old = resolve::data_path(&self.cfg, tier, old);
        let real_new = resolve::data_path(&self.cfg, tier, new);
        fs::hard_link(&real_old, &real_new)?;

        let ino = self.dentries.insert_child(new_parent, &new_name, kind, tier);
        self.attr_of(ino, new)
    }

    // ── Attribute mutation ──────────────────────────────────────────────

    pub fn chmod(&mut self, logical: &Path, mode: u32) -> FsResult<()> {
        debug!(path = %logical.display(), mode, "chmod");
        let id = self.require(logical)?;
        let dentry = self.dentries.get(id).ok_or(FsError::NotFound)?;

        if dentry.is_directory() {
            let (fast, slow) = resolve::mirror_paths(&self.cfg, logical);
            let saved = fs::symlink_metadata(&fast)?.mode() & 0o7777;
            fs::set_permissions(&fast, fs::Permissions::from_mode(mode))?;
            if let Err(e) = fs::set_permissions(&slow, fs::Permissions::from_mode(mode)) {
                // Mirrors must keep identical mode bits.
                if let Err(rollback) =
                    fs::set_permissions(&fast, fs::Permissions::from_mode(saved))
                {
                    warn!(path = %fast.display(), error = %rollback, "chmod rollback failed");
                }
                return Err(e.into());
            }
            return Ok(());
        }

        let backing = resolve::backing_path(&self.cfg, dentry, logical);
        fs::set_permissions(&backing, fs::Permissions::from_mode(mode))?;
        Ok(())
    }

    pub fn chown(&mut self, logical: &Path, uid: Option<u32>, gid: Option<u32>) -> FsResult<()> {
        debug!(path = %logical.display(), ?uid, ?gid, "chown");
        let id = self.require(logical)?;
        let dentry = self.dentries.get(id).ok_or(FsError::NotFound)?;

        match dentry.kind {
            FileKind::Directory => {
                let (fast, slow) = resolve::mirror_paths(&self.cfg, logical);
                let saved = fs::symlink_metadata(&fast)?;
                nix::unistd::chown(&fast, uid.map(Uid::from_raw), gid.map(Gid::from_raw))?;
                if let Err(e) =
                    nix::unistd::chown(&slow, uid.map(Uid::from_raw), gid.map(Gid::from_raw))
                {
                    if let Err(rollback) = nix::unistd::chown(
                        &fast,
                        Some(Uid::from_raw(saved.uid())),
                        Some(Gid::from_raw(saved.gid())),
                    ) {
                        warn!(path = %fast.display(), error = %rollback, "chown rollback failed");
                    }
                    return Err(e.into());
                }
                Ok(())
            }
            FileKind::Symlink => {
                // Operate on the link itself, its target may not even exist.
                let backing = resolve::backing_path(&self.cfg, dentry, logical);
                sys::lchown(&backing, uid, gid)?;
                Ok(())
            }
            FileKind::Regular => {
                let backing = resolve::backing_path(&self.cfg, dentry, logical);
                nix::unistd::chown(&backing, uid.map(Uid::from_raw), gid.map(Gid::from_raw))?;
                Ok(())
            }
        }
    }

    pub fn utimens(&mut self, logical: &Path, atime: Timestamp, mtime: Timestamp) -> FsResult<()> {
        debug!(path = %logical.display(), "utimens");
        let id = self.require(logical)?;
        let dentry = self.dentries.get(id).ok_or(FsError::NotFound)?;
        let backing = resolve::backing_path(&self.cfg, dentry, logical);
        sys::utimens(&backing, atime, mtime)?;
        Ok(())
    }

    pub fn truncate(&mut self, logical: &Path, size: u64) -> FsResult<()> {
        debug!(path = %logical.display(), size, "truncate");
        let id = self.require(logical)?;
        let dentry = self.dentries.get(id).ok_or(FsError::NotFound)?;
        match dentry.kind {
            FileKind::Regular => {}
            FileKind::Directory => return Err(FsError::IsDirectory),
            FileKind::Symlink => return Err(FsError::InvalidKind),
        }
        let backing = resolve::backing_path(&self.cfg, dentry, logical);

        OpenOptions::new().write(true).open(&backing)?.set_len(size)?;
        self.run_migration(logical);
        Ok(())
    }

    // ── Open files and data I/O ─────────────────────────────────────────

    pub fn open(&mut self, logical: &Path, flags: OpenFlags) -> FsResult<FileHandle> {
        debug!(path = %logical.display(), ?flags, "open");
        match self.dentries.find(logical) {
            Some(id) => {
                if flags.contains(OpenFlags::CREAT | OpenFlags::EXCL) {
                    return Err(FsError::Exists);
                }
                let dentry = self.dentries.get(id).ok_or(FsError::NotFound)?;
                if dentry.is_directory() {
                    return Err(FsError::IsDirectory);
                }
                let backing = resolve::backing_path(&self.cfg, dentry, logical);
                let file = open_with_flags(&backing, flags)?;
                let truncated = flags.contains(OpenFlags::TRUNC) && flags.wants_write();
                let fh = self.register(file);
                if truncated {
                    // O_TRUNC changed the size, so the thresholds apply.
                    self.run_migration(logical);
                }
                Ok(fh)
            }
            None => {
                if !flags.contains(OpenFlags::CREAT) {
                    return Err(FsError::NotFound);
                }
                let (parent, name) = self.require_parent(logical)?;
                let file = OpenOptions::new()
                    .read(true)
                    .write(true)
                    .create_new(true)
                    .mode(DEFAULT_FILE_MODE)
                    .open(self.cfg.fast_path(logical))?;
                self.dentries
                    .insert_child(parent, &name, FileKind::Regular, Tier::Fast);
                Ok(self.register(file))
            }
        }
    }

    /// Create a regular file. New files always start on the fast tier.
    pub fn create(
        &mut self,
        logical: &Path,
        mode: u32,
        flags: OpenFlags,
    ) -> FsResult<(FileAttr, FileHandle)> {
        debug!(path = %logical.display(), mode, "create");
        match self.dentries.find(logical) {
            Some(id) => {
                if flags.contains(OpenFlags::EXCL) {
                    return Err(FsError::Exists);
                }
                let dentry = self.dentries.get(id).ok_or(FsError::NotFound)?;
                if dentry.is_directory() {
                    return Err(FsError::IsDirectory);
                }
                let backing = resolve::backing_path(&self.cfg, dentry, logical);
                let file = open_with_flags(&backing, flags)?;
                let truncated = flags.contains(OpenFlags::TRUNC) && flags.wants_write();
                let fh = self.register(file);
                if truncated {
                    self.run_migration(logical);
                }
                Ok((self.attr_of(id, logical)?, fh))
            }
            None => {
                let (parent, name) = self.require_parent(logical)?;
                let file = OpenOptions::new()
                    .read(true)
                    .write(true)
                    .create_new(true)
                    .mode(mode & 0o7777)
                    .open(self.cfg.fast_path(logical))?;
                let ino = self
                    .dentries
                    .insert_child(parent, &name, FileKind::Regular, Tier::Fast);
                let fh = self.register(file);
                Ok((self.attr_of(ino, logical)?, fh))
            }
        }
    }

    pub fn read(
        &mut self,
        logical: &Path,
        fh: Option<FileHandle>,
        offset: u64,
        size: u32,
    ) -> FsResult<Bytes> {
        debug!(path = %logical.display(), ?fh, offset, size, "read");
        let file = self.data_file(logical, fh, false)?;
        let mut buf = vec![0u8; size as usize];
        let nbytes = file.as_file().read_at(&mut buf, offset)?;
        buf.truncate(nbytes);
        Ok(Bytes::from(buf))
    }

    pub fn write(
        &mut self,
        logical: &Path,
        fh: Option<FileHandle>,
        offset: u64,
        data: &[u8],
    ) -> FsResult<u32> {
        debug!(path = %logical.display(), ?fh, offset, len = data.len(), "write");
        {
            let file = self.data_file(logical, fh, true)?;
            file.as_file().write_all_at(data, offset)?;
        }
        self.run_migration(logical);
        Ok(data.len() as u32)
    }

    pub fn copy_file_range(
        &mut self,
        src: &Path,
        src_fh: Option<FileHandle>,
        src_offset: u64,
        dst: &Path,
        dst_fh: Option<FileHandle>,
        dst_offset: u64,
        len: u64,
    ) -> FsResult<u64> {
        debug!(
            src = %src.display(),
            dst = %dst.display(),
            src_offset,
            dst_offset,
            len,
            "copy_file_range"
        );
        let copied = {
            let src_file = self.data_file(src, src_fh, false)?;
            let dst_file = self.data_file(dst, dst_fh, true)?;
            let src_fd = src_file.as_file().as_raw_fd();
            let dst_fd = dst_file.as_file().as_raw_fd();

            match sys::copy_file_range(src_fd, src_offset, dst_fd, dst_offset, len as usize) {
                Ok(n) => n as u64,
                // The tiers usually live on different filesystems; older
                // kernels refuse cross-filesystem range copies.
                Err(e) if e.raw_os_error() == Some(libc::EXDEV) => copy_range_by_hand(
                    src_file.as_file(),
                    src_offset,
                    dst_file.as_file(),
                    dst_offset,
                    len,
                )?,
                Err(e) => return Err(e.into()),
            }
        };
        self.run_migration(dst);
        Ok(copied)
    }

    pub fn lseek(&mut self, fh: Option<FileHandle>, offset: i64, whence: i32) -> FsResult<i64> {
        let fh = fh.ok_or(FsError::InvalidHandle)?;
        let file = self.handle(fh)?;
        Ok(sys::lseek(file.as_raw_fd(), offset, whence)?)
    }

    pub fn flush(&mut self, fh: FileHandle) -> FsResult<()> {
        self.handle(fh)?;
        Ok(())
    }

    pub fn fsync(&mut self, fh: FileHandle, datasync: bool) -> FsResult<()> {
        let file = self.handle(fh)?;
        if datasync {
            file.sync_data()?;
        } else {
            file.sync_all()?;
        }
        Ok(())
    }

    pub fn release(&mut self, fh: FileHandle) -> FsResult<()> {
        self.open_files
            .remove(&fh)
            .map(|_| ())
            .ok_or(FsError::InvalidHandle)
    }

    // ── Extended attributes ─────────────────────────────────────────────

    pub fn setxattr(&mut self, logical: &Path, name: &OsStr, value: &[u8]) -> FsResult<()> {
        debug!(path = %logical.display(), xattr = ?name, "setxattr");
        let backing = self.xattr_path(logical)?;
        xattr::set(&backing, name, value)?;
        Ok(())
    }

    pub fn getxattr(&self, logical: &Path, name: &OsStr) -> FsResult<Vec<u8>> {
        debug!(path = %logical.display(), xattr = ?name, "getxattr");
        let backing = self.xattr_path(logical)?;
        xattr::get(&backing, name)?
            .ok_or_else(|| FsError::Io(io::Error::from_raw_os_error(libc::ENODATA)))
    }

    pub fn listxattr(&self, logical: &Path) -> FsResult<Vec<std::ffi::OsString>> {
        debug!(path = %logical.display(), "listxattr");
        let backing = self.xattr_path(logical)?;
        Ok(xattr::list(&backing)?.collect())
    }

    pub fn removexattr(&mut self, logical: &Path, name: &OsStr) -> FsResult<()> {
        debug!(path = %logical.display(), xattr = ?name, "removexattr");
        let backing = self.xattr_path(logical)?;
        xattr::remove(&backing, name)?;
        Ok(())
    }

    fn xattr_path(&self, logical: &Path) -> FsResult<PathBuf> {
        let id = self.require(logical)?;
        let dentry = self.dentries.get(id).ok_or(FsError::NotFound)?;
        Ok(resolve::backing_path(&self.cfg, dentry, logical))
    }
}

fn mkdir_with_mode(path: &Path, mode: u32) -> io::Result<()> {
    fs::DirBuilder::new().mode(mode).create(path)
}

fn open_with_flags(path: &Path, flags: OpenFlags) -> io::Result<File> {
    OpenOptions::new()
        .read(flags.wants_read())
        .write(flags.wants_write())
        .append(flags.contains(OpenFlags::APPEND))
        .truncate(flags.contains(OpenFlags::TRUNC) && flags.wants_write())
        .open(path)
}

/// Byte-copy fallback for range copies the kernel will not do itself.
fn copy_range_by_hand(
    src: &File,
    src_offset: u64,
    dst: &File,
    dst_offset: u64,
    len: u64,
) -> io::Result<u64> {
    let mut buf = vec![0u8; 128 * 1024];
    let mut copied = 0u64;
    while copied < len {
        let want = usize::try_from(len - copied)
            .unwrap_or(buf.len())
            .min(buf.len());
        let n = src.read_at(&mut buf[..want], src_offset + copied)?;
        if n == 0 {
            break;
        }
        dst.write_all_at(&buf[..n], dst_offset + copied)?;
        copied += n as u64;
    }
    Ok(copied)
}
