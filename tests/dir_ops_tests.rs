#![allow(clippy::unwrap_used, missing_docs)]

mod common;

use std::fs;
use std::os::unix::fs::MetadataExt as _;
use std::path::Path;
use std::time::{Duration, SystemTime};

use common::{Mount, assert_invariants, tree_snapshot};
use tierfs::attr::OpenFlags;
use tierfs::dentry::{FileKind, Tier};
use tierfs::error::FsError;
use tierfs::sys::Timestamp;

#[test]
fn mkdir_creates_mirrors_on_both_tiers() {
    let mut m = Mount::new(1024, 256);

    m.fs.mkdir(Path::new("/a"), 0o755).unwrap();
    m.fs.mkdir(Path::new("/a/b"), 0o755).unwrap();

    assert!(m.fast("/a/b").is_dir());
    assert!(m.slow("/a/b").is_dir());

    let names: Vec<_> = m
        .fs
        .readdir(Path::new("/a"))
        .unwrap()
        .into_iter()
        .map(|e| e.name)
        .collect();
    assert_eq!(names, ["b"]);

    assert_invariants(&m.fs);
}

#[test]
fn mkdir_requires_an_existing_directory_parent() {
    let mut m = Mount::new(1024, 256);
    assert!(matches!(
        m.fs.mkdir(Path::new("/missing/child"), 0o755),
        Err(FsError::NotFound)
    ));

    m.fs.create(Path::new("/f"), 0o644, OpenFlags::empty())
        .unwrap();
    assert!(matches!(
        m.fs.mkdir(Path::new("/f/child"), 0o755),
        Err(FsError::NotFound)
    ));
}

#[test]
fn mkdir_rejects_existing_names() {
    let mut m = Mount::new(1024, 256);
    m.fs.mkdir(Path::new("/a"), 0o755).unwrap();
    assert!(matches!(
        m.fs.mkdir(Path::new("/a"), 0o755),
        Err(FsError::Exists)
    ));
}

#[test]
fn mkdir_rmdir_round_trips_to_the_pre_state() {
    let mut m = Mount::new(1024, 256);
    let fast_before = tree_snapshot(m.fs.config().fast_root());
    let slow_before = tree_snapshot(m.fs.config().slow_root());
    let dentries_before = m.fs.dentries().len();

    m.fs.mkdir(Path::new("/d"), 0o750).unwrap();
    m.fs.rmdir(Path::new("/d")).unwrap();

    assert_eq!(tree_snapshot(m.fs.config().fast_root()), fast_before);
    assert_eq!(tree_snapshot(m.fs.config().slow_root()), slow_before);
    assert_eq!(m.fs.dentries().len(), dentries_before);
    assert_invariants(&m.fs);
}

#[test]
fn rmdir_refuses_non_empty_directories() {
    let mut m = Mount::new(1024, 256);
    m.fs.mkdir(Path::new("/d"), 0o755).unwrap();
    m.fs.mkdir(Path::new("/d/sub"), 0o755).unwrap();
    assert!(matches!(
        m.fs.rmdir(Path::new("/d")),
        Err(FsError::NotEmpty)
    ));
}

#[test]
fn rmdir_refuses_non_directories() {
    let mut m = Mount::new(1024, 256);
    m.fs.create(Path::new("/f"), 0o644, OpenFlags::empty())
        .unwrap();
    assert!(matches!(
        m.fs.rmdir(Path::new("/f")),
        Err(FsError::NotDirectory)
    ));
}

#[test]
fn readdir_lists_children_sorted_with_kinds() {
    let mut m = Mount::new(1024, 256);
    m.fs.mkdir(Path::new("/dir"), 0o755).unwrap();
    m.fs.create(Path::new("/bbb"), 0o644, OpenFlags::empty())
        .unwrap();
    m.fs.symlink(Path::new("/dir"), Path::new("/aaa")).unwrap();

    let entries = m.fs.readdir(Path::new("/")).unwrap();
    let summary: Vec<_> = entries
        .iter()
        .map(|e| (e.name.to_string_lossy().into_owned(), e.kind))
        .collect();
    assert_eq!(
        summary,
        [
            ("aaa".to_owned(), FileKind::Symlink),
            ("bbb".to_owned(), FileKind::Regular),
            ("dir".to_owned(), FileKind::Directory),
        ]
    );
}

#[test]
fn readdir_refuses_non_directories() {
    let mut m = Mount::new(1024, 256);
    m.fs.create(Path::new("/f"), 0o644, OpenFlags::empty())
        .unwrap();
    assert!(matches!(
        m.fs.readdir(Path::new("/f")),
        Err(FsError::NotDirectory)
    ));
}

#[test]
fn chmod_applies_to_both_mirrors() {
    let mut m = Mount::new(1024, 256);
    m.fs.mkdir(Path::new("/d"), 0o755).unwrap();

    m.fs.chmod(Path::new("/d"), 0o700).unwrap();

    assert_eq!(fs::metadata(m.fast("/d")).unwrap().mode() & 0o7777, 0o700);
    assert_eq!(fs::metadata(m.slow("/d")).unwrap().mode() & 0o7777, 0o700);
    assert_invariants(&m.fs);
}

#[test]
fn chmod_on_a_file_touches_only_its_tier() {
    let mut m = Mount::new(1024, 256);
    m.fs.create(Path::new("/f"), 0o644, OpenFlags::empty())
        .unwrap();

    m.fs.chmod(Path::new("/f"), 0o600).unwrap();

    assert_eq!(fs::metadata(m.fast("/f")).unwrap().mode() & 0o7777, 0o600);
    assert!(fs::symlink_metadata(m.slow("/f")).is_err());
    assert_invariants(&m.fs);
}

#[test]
fn chown_to_the_current_owner_succeeds_on_both_mirrors() {
    let mut m = Mount::new(1024, 256);
    m.fs.mkdir(Path::new("/d"), 0o755).unwrap();

    let uid = nix::unistd::Uid::current().as_raw();
    let gid = nix::unistd::Gid::current().as_raw();
    m.fs.chown(Path::new("/d"), Some(uid), Some(gid)).unwrap();

    assert_eq!(fs::metadata(m.fast("/d")).unwrap().uid(), uid);
    assert_eq!(fs::metadata(m.slow("/d")).unwrap().uid(), uid);
    assert_invariants(&m.fs);
}

#[test]
fn access_checks_the_resolved_backing_path() {
    let mut m = Mount::new(1024, 256);
    m.fs.mkdir(Path::new("/d"), 0o755).unwrap();

    m.fs.access(Path::new("/d"), 0).unwrap();
    assert!(matches!(
        m.fs.access(Path::new("/missing"), 0),
        Err(FsError::NotFound)
    ));
}

#[test]
fn utimens_sets_explicit_times() {
    let mut m = Mount::new(1024, 256);
    m.fs.create(Path::new("/f"), 0o644, OpenFlags::empty())
        .unwrap();

    let when = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000_000);
    m.fs.utimens(Path::new("/f"), Timestamp::At(when), Timestamp::At(when))
        .unwrap();

    let attr = m.fs.getattr(Path::new("/f")).unwrap();
    assert_eq!(attr.mtime, when);
    assert_eq!(attr.atime, when);
}

#[test]
fn getattr_reports_dentry_inode_numbers() {
    let mut m = Mount::new(1024, 256);
    m.fs.mkdir(Path::new("/d"), 0o755).unwrap();

    let root = m.fs.getattr(Path::new("/")).unwrap();
    assert_eq!(root.ino, tierfs::dentry::ROOT_INO);
    assert_eq!(root.kind, FileKind::Directory);

    let dir = m.fs.getattr(Path::new("/d")).unwrap();
    assert_ne!(dir.ino, root.ino);
    assert!(matches!(
        m.fs.getattr(Path::new("/missing")),
        Err(FsError::NotFound)
    ));
}

#[test]
fn statfs_counts_the_dentry_table() {
    let mut m = Mount::new(1024, 256);
    m.fs.mkdir(Path::new("/d"), 0o755).unwrap();
    let stats = m.fs.statfs().unwrap();
    assert_eq!(stats.total_inodes, 2);
    assert!(stats.block_size > 0);
}

#[test]
fn directories_are_never_tier_bound() {
    let mut m = Mount::new(1024, 256);
    m.fs.mkdir(Path::new("/d"), 0o755).unwrap();
    assert_eq!(m.fs.tier_of(Path::new("/d")), Some(Tier::NotFile));
    assert_eq!(m.fs.tier_of(Path::new("/")), Some(Tier::NotFile));
}
