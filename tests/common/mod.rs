#![allow(dead_code, clippy::unwrap_used, missing_docs)]

use std::fs;
use std::os::unix::fs::MetadataExt as _;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

use tierfs::config::MountConfig;
use tierfs::dentry::{FileKind, Tier};
use tierfs::fs::TierFs;

/// A mounted [`TierFs`] over two fresh backing trees in a tempdir.
pub struct Mount {
    _base: TempDir,
    pub fs: TierFs,
}

impl Mount {
    pub fn new(fast_upper_limit: u64, slow_lower_limit: u64) -> Self {
        let base = TempDir::new().unwrap();
        let cfg = MountConfig::new(
            base.path().join("fast"),
            base.path().join("slow"),
            fast_upper_limit,
            slow_lower_limit,
        )
        .unwrap();
        let fs = TierFs::mount(cfg).unwrap();
        Self { _base: base, fs }
    }

    /// The backing path of a logical path on the fast tree.
    pub fn fast(&self, logical: &str) -> PathBuf {
        self.fs.config().fast_path(Path::new(logical))
    }

    /// The backing path of a logical path on the slow tree.
    pub fn slow(&self, logical: &str) -> PathBuf {
        self.fs.config().slow_path(Path::new(logical))
    }
}

fn entry_exists(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok()
}

/// Assert the placement, mirroring, hysteresis and tree-wellformedness
/// invariants over the whole dentry table.
pub fn assert_invariants(fs: &TierFs) {
    let cfg = fs.config();
    for dentry in fs.dentries().iter() {
        let logical = fs.dentries().logical_path(dentry.ino).unwrap();
        let fast = cfg.fast_path(&logical);
        let slow = cfg.slow_path(&logical);

        match dentry.kind {
            FileKind::Directory => {
                let fast_meta = fs::symlink_metadata(&fast).unwrap();
                let slow_meta = fs::symlink_metadata(&slow).unwrap();
                assert!(fast_meta.is_dir() && slow_meta.is_dir());
                assert_eq!(
                    fast_meta.mode(),
                    slow_meta.mode(),
                    "mirror modes diverge for {logical:?}"
                );
            }
            FileKind::Regular => {
                let (held, empty) = match dentry.tier {
                    Tier::Fast => (&fast, &slow),
                    Tier::Slow => (&slow, &fast),
                    Tier::NotFile => panic!("regular file {logical:?} without a tier"),
                };
                let meta = fs::symlink_metadata(held)
                    .unwrap_or_else(|e| panic!("missing backing for {logical:?}: {e}"));
                assert!(meta.is_file());
                assert!(
                    !entry_exists(empty),
                    "{logical:?} present on both tiers at once"
                );
                match dentry.tier {
                    Tier::Fast => assert!(
                        meta.len() < cfg.fast_upper_limit(),
                        "{logical:?} too large for the fast tier"
                    ),
                    Tier::Slow => assert!(
                        meta.len() > cfg.slow_lower_limit(),
                        "{logical:?} too small for the slow tier"
                    ),
                    Tier::NotFile => unreachable!(),
                }
            }
            FileKind::Symlink => {
                assert_eq!(dentry.tier, Tier::Fast);
                assert!(fs::symlink_metadata(&fast).unwrap().is_symlink());
                assert!(!entry_exists(&slow), "{logical:?} mirrored onto slow tier");
            }
        }

        match dentry.parent {
            Some(parent) => assert_eq!(
                fs.dentries().child_of(parent, &dentry.name),
                Some(dentry.ino),
                "parent link broken for {logical:?}"
            ),
            None => assert_eq!(dentry.ino, tierfs::dentry::ROOT_INO),
        }
    }
}

/// Recursive listing of a backing tree as sorted (relative path, mode) pairs.
pub fn tree_snapshot(root: &Path) -> Vec<(PathBuf, u32)> {
    fn walk(root: &Path, dir: &Path, out: &mut Vec<(PathBuf, u32)>) {
        for entry in fs::read_dir(dir).unwrap() {
            let entry = entry.unwrap();
            let path = entry.path();
            let meta = fs::symlink_metadata(&path).unwrap();
            out.push((path.strip_prefix(root).unwrap().to_path_buf(), meta.mode()));
            if meta.is_dir() {
                walk(root, &path, out);
            }
        }
    }

    let mut out = Vec::new();
    walk(root, root, &mut out);
    out.sort();
    out
}
