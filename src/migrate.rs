//! The size-threshold migration policy and the cross-tier file move.
//!
//! Migration runs after any operation that changed a regular file's size. It
//! is advisory: a failed move leaves the file on its current tier and only
//! emits a diagnostic, it never fails the operation that triggered it.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::os::unix::fs::{MetadataExt as _, OpenOptionsExt as _, PermissionsExt as _};
use std::path::Path;

use nix::unistd::{Gid, Uid};
use tracing::warn;

use crate::config::MountConfig;
use crate::dentry::Tier;
use crate::sys::{self, Timestamp};

/// A move the policy decided on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relocation {
    ToSlow,
    ToFast,
}

impl Relocation {
    pub fn target_tier(self) -> Tier {
        match self {
            Self::ToSlow => Tier::Slow,
            Self::ToFast => Tier::Fast,
        }
    }
}

/// Decide whether a regular file of the given size belongs on the other tier.
///
/// Both comparisons are inclusive: a fast file that reaches the upper limit
/// exactly moves down, a slow file shrunk exactly to the lower limit moves
/// up. The config guarantees the limits cannot both match at once.
pub fn plan(tier: Tier, size: u64, cfg: &MountConfig) -> Option<Relocation> {
    match tier {
        Tier::Fast if size >= cfg.fast_upper_limit() => Some(Relocation::ToSlow),
        Tier::Slow if size <= cfg.slow_lower_limit() => Some(Relocation::ToFast),
        Tier::Fast | Tier::Slow | Tier::NotFile => None,
    }
}

/// Move a backing file between the tier trees.
///
/// The trees usually sit on different filesystems, in which case the rename
/// fails with `EXDEV` and the move falls back to copy-and-unlink, carrying
/// over mode bits, ownership, timestamps and xattrs.
pub fn relocate(src: &Path, dst: &Path) -> io::Result<()> {
    match fs::rename(src, dst) {
        Ok(()) => Ok(()),
        Err(e) if e.raw_os_error() == Some(libc::EXDEV) => copy_across(src, dst),
        Err(e) => Err(e),
    }
}

fn copy_across(src: &Path, dst: &Path) -> io::Result<()> {
    if let Err(e) = copy_preserving(src, dst) {
        // Do not leave a half-written destination behind; the source copy is
        // still the authoritative one.
        if let Err(cleanup) = fs::remove_file(dst)
            && cleanup.kind() != io::ErrorKind::NotFound
        {
            warn!(dst = %dst.display(), error = %cleanup, "failed to clean up partial copy");
        }
        return Err(e);
    }
    fs::remove_file(src)
}

fn copy_preserving(src: &Path, dst: &Path) -> io::Result<()> {
    let meta = fs::metadata(src)?;
    let mode = meta.mode() & 0o7777;

    let mut input = File::open(src)?;
    let mut output = OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(mode)
        .open(dst)?;
    io::copy(&mut input, &mut output)?;
    output.sync_all()?;

    // The process umask may have masked bits at create time.
    fs::set_permissions(dst, fs::Permissions::from_mode(mode))?;
    nix::unistd::chown(
        dst,
        Some(Uid::from_raw(meta.uid())),
        Some(Gid::from_raw(meta.gid())),
    )
    .map_err(io::Error::from)?;

    copy_xattrs(src, dst);

    sys::utimens(
        dst,
        Timestamp::At(meta.accessed()?),
        Timestamp::At(meta.modified()?),
    )?;
    Ok(())
}

/// Best effort: a file without xattr support on either end still migrates.
fn copy_xattrs(src: &Path, dst: &Path) {
    let names = match xattr::list(src) {
        Ok(names) => names,
        Err(e) => {
            warn!(src = %src.display(), error = %e, "could not list xattrs");
            return;
        }
    };
    for name in names {
        match xattr::get(src, &name) {
            Ok(Some(value)) => {
                if let Err(e) = xattr::set(dst, &name, &value) {
                    warn!(dst = %dst.display(), xattr = ?name, error = %e, "could not copy xattr");
                }
            }
            Ok(None) => {}
            Err(e) => {
                warn!(src = %src.display(), xattr = ?name, error = %e, "could not read xattr");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> MountConfig {
        MountConfig::new("/mnt/fast", "/mnt/slow", 1024, 256).unwrap()
    }

    #[test]
    fn fast_files_move_down_at_the_limit() {
        let cfg = cfg();
        assert_eq!(plan(Tier::Fast, 1023, &cfg), None);
        assert_eq!(plan(Tier::Fast, 1024, &cfg), Some(Relocation::ToSlow));
        assert_eq!(plan(Tier::Fast, 4096, &cfg), Some(Relocation::ToSlow));
    }

    #[test]
    fn slow_files_move_up_at_the_limit() {
        let cfg = cfg();
        assert_eq!(plan(Tier::Slow, 257, &cfg), None);
        assert_eq!(plan(Tier::Slow, 256, &cfg), Some(Relocation::ToFast));
        assert_eq!(plan(Tier::Slow, 0, &cfg), Some(Relocation::ToFast));
    }

    #[test]
    fn files_between_the_limits_stay_put() {
        let cfg = cfg();
        assert_eq!(plan(Tier::Fast, 512, &cfg), None);
        assert_eq!(plan(Tier::Slow, 512, &cfg), None);
    }

    #[test]
    fn relocate_moves_content_and_mode() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        let dst = dir.path().join("dst");
        fs::write(&src, b"payload").unwrap();
        fs::set_permissions(&src, fs::Permissions::from_mode(0o640)).unwrap();

        relocate(&src, &dst).unwrap();

        assert!(!src.exists());
        assert_eq!(fs::read(&dst).unwrap(), b"payload");
        assert_eq!(fs::metadata(&dst).unwrap().mode() & 0o7777, 0o640);
    }

    #[test]
    fn copy_fallback_preserves_content_and_mode() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        let dst = dir.path().join("dst");
        fs::write(&src, b"copied bytes").unwrap();
        fs::set_permissions(&src, fs::Permissions::from_mode(0o600)).unwrap();

        // Exercise the EXDEV path directly.
        copy_across(&src, &dst).unwrap();

        assert!(!src.exists());
        assert_eq!(fs::read(&dst).unwrap(), b"copied bytes");
        assert_eq!(fs::metadata(&dst).unwrap().mode() & 0o7777, 0o600);
    }
}
