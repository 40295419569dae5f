//! Mapping dentries to concrete backing paths.
//!
//! Directories are mirrored on both trees, so metadata reads go to the fast
//! copy. Symlinks only ever exist on the fast tree. Regular files live on
//! whichever tree their tier says.

use std::path::{Path, PathBuf};

use crate::config::MountConfig;
use crate::dentry::{Dentry, FileKind, Tier};

/// The single backing path an operation on this dentry should touch.
pub fn backing_path(cfg: &MountConfig, dentry: &Dentry, logical: &Path) -> PathBuf {
    match dentry.kind {
        FileKind::Directory | FileKind::Symlink => cfg.fast_path(logical),
        FileKind::Regular => data_path(cfg, dentry.tier, logical),
    }
}

/// The backing path of a regular file on the given tier.
pub fn data_path(cfg: &MountConfig, tier: Tier, logical: &Path) -> PathBuf {
    debug_assert!(tier != Tier::NotFile, "regular file without a tier");
    match tier {
        Tier::Slow => cfg.slow_path(logical),
        Tier::Fast | Tier::NotFile => cfg.fast_path(logical),
    }
}

/// Both mirror paths of a directory, fast first.
pub fn mirror_paths(cfg: &MountConfig, logical: &Path) -> (PathBuf, PathBuf) {
    (cfg.fast_path(logical), cfg.slow_path(logical))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::OsString;

    fn cfg() -> MountConfig {
        MountConfig::new("/mnt/fast", "/mnt/slow", 1024, 256).unwrap()
    }

    fn dentry(kind: FileKind, tier: Tier) -> Dentry {
        Dentry {
            ino: 7,
            name: OsString::from("f"),
            kind,
            tier,
            parent: Some(1),
            children: None,
        }
    }

    #[test]
    fn regular_files_follow_their_tier() {
        let cfg = cfg();
        let fast = dentry(FileKind::Regular, Tier::Fast);
        let slow = dentry(FileKind::Regular, Tier::Slow);
        assert_eq!(
            backing_path(&cfg, &fast, Path::new("/d/f")),
            Path::new("/mnt/fast/d/f")
        );
        assert_eq!(
            backing_path(&cfg, &slow, Path::new("/d/f")),
            Path::new("/mnt/slow/d/f")
        );
    }

    #[test]
    fn directories_and_symlinks_read_from_fast() {
        let cfg = cfg();
        let link = dentry(FileKind::Symlink, Tier::Fast);
        assert_eq!(
            backing_path(&cfg, &link, Path::new("/l")),
            Path::new("/mnt/fast/l")
        );
    }

    #[test]
    fn mirrors_are_fast_then_slow() {
        let (fast, slow) = mirror_paths(&cfg(), Path::new("/d"));
        assert_eq!(fast, Path::new("/mnt/fast/d"));
        assert_eq!(slow, Path::new("/mnt/slow/d"));
    }
}
