//! The in-memory directory entry index.
//!
//! One [`Dentry`] exists per name visible in the namespace. Dentries live in
//! a single id-keyed table; directories hold a name-to-id map of their
//! children and every non-root dentry holds its parent's id, so neither
//! direction owns the other and the table owns every node. The filesystem is
//! single-threaded, so the table needs no interior locking.

use std::collections::HashMap;
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};

use rustc_hash::FxHashMap;
use tracing::trace;

use crate::path;

/// Identifies a dentry in the table. Doubles as the inode number reported to
/// the host.
pub type DentryId = u64;

/// The root dentry's id, matching the host's fixed root inode number.
pub const ROOT_INO: DentryId = 1;

/// The kind of entry a dentry names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Regular,
    Directory,
    Symlink,
}

impl FileKind {
    /// Classify a backing file type, `None` for kinds the namespace does not
    /// carry (devices, fifos, sockets).
    pub fn from_file_type(ft: &std::fs::FileType) -> Option<Self> {
        if ft.is_file() {
            Some(Self::Regular)
        } else if ft.is_dir() {
            Some(Self::Directory)
        } else if ft.is_symlink() {
            Some(Self::Symlink)
        } else {
            None
        }
    }
}

/// Which backing tree holds a dentry's data.
///
/// Only regular files are tier-bound. Directories are mirrored on both trees
/// and carry [`Tier::NotFile`]; symlinks always live on the fast tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Fast,
    Slow,
    NotFile,
}

/// One in-memory directory entry.
#[derive(Debug)]
pub struct Dentry {
    pub ino: DentryId,
    /// The single path component within the parent, not a full path.
    pub name: OsString,
    pub kind: FileKind,
    pub tier: Tier,
    /// `None` only for the root.
    pub parent: Option<DentryId>,
    /// `Some` iff `kind == Directory`.
    pub children: Option<FxHashMap<OsString, DentryId>>,
}

impl Dentry {
    pub fn is_directory(&self) -> bool {
        self.kind == FileKind::Directory
    }
}

/// The dentry table: an id-keyed arena plus a monotonic inode allocator.
#[derive(Debug)]
pub struct DentryTable {
    nodes: HashMap<DentryId, Dentry>,
    next_ino: DentryId,
}

impl DentryTable {
    /// Create a table holding only the root directory dentry.
    pub fn new() -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(
            ROOT_INO,
            Dentry {
                ino: ROOT_INO,
                name: OsString::new(),
                kind: FileKind::Directory,
                tier: Tier::NotFile,
                parent: None,
                children: Some(FxHashMap::default()),
            },
        );
        Self {
            nodes,
            next_ino: ROOT_INO + 1,
        }
    }

    pub fn get(&self, ino: DentryId) -> Option<&Dentry> {
        self.nodes.get(&ino)
    }

    fn get_mut(&mut self, ino: DentryId) -> Option<&mut Dentry> {
        self.nodes.get_mut(&ino)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Dentry> {
        self.nodes.values()
    }

    /// Look up the child of a directory by component name.
    pub fn child_of(&self, dir: DentryId, name: &OsStr) -> Option<DentryId> {
        self.get(dir)?.children.as_ref()?.get(name).copied()
    }

    /// Walk a logical path from the root.
    ///
    /// Fails if any component is absent or an intermediate component names a
    /// non-directory.
    pub fn find(&self, logical: &Path) -> Option<DentryId> {
        let mut current = ROOT_INO;
        for component in path::split(logical) {
            let dentry = self.get(current)?;
            current = *dentry.children.as_ref()?.get(component)?;
        }
        Some(current)
    }

    /// Walk a logical path stopping one component short, yielding the parent
    /// directory's id and the final component name.
    ///
    /// Returns `None` for the root (which has no parent), when the parent
    /// chain is incomplete, or when it runs through a non-directory.
    pub fn find_parent(&self, logical: &Path) -> Option<(DentryId, OsString)> {
        let components = path::split(logical);
        let (last, ancestors) = components.split_last()?;

        let mut current = ROOT_INO;
        for component in ancestors {
            let dentry = self.get(current)?;
            current = *dentry.children.as_ref()?.get(*component)?;
        }
        // The parent itself must be a directory too.
        self.get(current)?.children.as_ref()?;
        Some((current, (*last).to_os_string()))
    }

    /// Allocate a dentry and bind it under `parent`.
    ///
    /// The caller guarantees `parent` is a directory and `name` is free.
    pub fn insert_child(
        &mut self,
        parent: DentryId,
        name: &OsStr,
        kind: FileKind,
        tier: Tier,
    ) -> DentryId {
        let ino = self.next_ino;
        self.next_ino += 1;

        let children = match kind {
            FileKind::Directory => Some(FxHashMap::default()),
            FileKind::Regular | FileKind::Symlink => None,
        };
        self.nodes.insert(
            ino,
            Dentry {
                ino,
                name: name.to_os_string(),
                kind,
                tier,
                parent: Some(parent),
                children,
            },
        );

        let parent_dentry = self
            .get_mut(parent)
            .unwrap_or_else(|| unreachable!("insert_child: parent {parent} not in table"));
        debug_assert!(parent_dentry.is_directory(), "insert under non-directory");
        let replaced = parent_dentry
            .children
            .as_mut()
            .and_then(|c| c.insert(name.to_os_string(), ino));
        debug_assert!(replaced.is_none(), "insert_child: name already bound");

        trace!(ino, parent, name = ?name, ?kind, "dentry inserted");
        ino
    }

    /// Detach a child from its parent and drop it from the table.
    ///
    /// The caller is responsible for ensuring directories are empty first.
    pub fn remove_child(&mut self, parent: DentryId, name: &OsStr) -> Option<Dentry> {
        let ino = self.get_mut(parent)?.children.as_mut()?.remove(name)?;
        let removed = self.nodes.remove(&ino);
        trace!(ino, parent, name = ?name, "dentry removed");
        removed
    }

    /// Atomically rebind a child to a new parent and name.
    ///
    /// The caller guarantees `new_name` is not bound in `new_parent` at call
    /// time (an overwritten destination is removed beforehand).
    pub fn rename_child(
        &mut self,
        old_parent: DentryId,
        old_name: &OsStr,
        new_parent: DentryId,
        new_name: &OsStr,
    ) -> Option<DentryId> {
        let ino = self
            .get_mut(old_parent)?
            .children
            .as_mut()?
            .remove(old_name)?;

        let dentry = self
            .get_mut(ino)
            .unwrap_or_else(|| unreachable!("rename_child: dentry {ino} not in table"));
        dentry.name = new_name.to_os_string();
        dentry.parent = Some(new_parent);

        let replaced = self
            .get_mut(new_parent)?
            .children
            .as_mut()?
            .insert(new_name.to_os_string(), ino);
        debug_assert!(replaced.is_none(), "rename_child: destination still bound");

        trace!(ino, old_parent, new_parent, new_name = ?new_name, "dentry rebound");
        Some(ino)
    }

    pub fn set_tier(&mut self, ino: DentryId, tier: Tier) {
        if let Some(dentry) = self.get_mut(ino) {
            debug_assert!(
                dentry.kind == FileKind::Regular,
                "tier change on non-regular dentry"
            );
            dentry.tier = tier;
        }
    }

    /// Reconstruct a dentry's logical path by walking the parent chain.
    ///
    /// The result is relative to the mount root; the root itself yields the
    /// empty path.
    pub fn logical_path(&self, ino: DentryId) -> Option<PathBuf> {
        let mut components: Vec<&OsStr> = Vec::new();
        let mut current = ino;
        while current != ROOT_INO {
            let dentry = self.get(current)?;
            components.push(&dentry.name);
            current = dentry.parent?;
        }
        components.reverse();
        Some(components.iter().collect())
    }

    /// Drop every dentry. Children go with their parents since the arena
    /// owns all nodes; a fresh root is reinstalled so the table stays usable.
    pub fn clear(&mut self) {
        *self = Self::new();
    }
}

impl Default for DentryTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_with_dir_a_file_b() -> DentryTable {
        let mut t = DentryTable::new();
        let a = t.insert_child(ROOT_INO, OsStr::new("a"), FileKind::Directory, Tier::NotFile);
        t.insert_child(a, OsStr::new("b"), FileKind::Regular, Tier::Fast);
        t
    }

    #[test]
    fn find_walks_the_tree() {
        let t = table_with_dir_a_file_b();
        assert_eq!(t.find(Path::new("/")), Some(ROOT_INO));
        let a = t.find(Path::new("/a")).unwrap();
        let b = t.find(Path::new("/a/b")).unwrap();
        assert_eq!(t.get(a).unwrap().kind, FileKind::Directory);
        assert_eq!(t.get(b).unwrap().tier, Tier::Fast);
        assert_eq!(t.find(Path::new("/a/missing")), None);
    }

    #[test]
    fn find_rejects_file_as_intermediate() {
        let t = table_with_dir_a_file_b();
        assert_eq!(t.find(Path::new("/a/b/c")), None);
        assert_eq!(t.find_parent(Path::new("/a/b/c")), None);
    }

    #[test]
    fn find_parent_stops_one_short() {
        let t = table_with_dir_a_file_b();
        let (parent, name) = t.find_parent(Path::new("/a/new")).unwrap();
        assert_eq!(parent, t.find(Path::new("/a")).unwrap());
        assert_eq!(name, "new");
        assert_eq!(t.find_parent(Path::new("/")), None);
    }

    #[test]
    fn remove_child_detaches_and_drops() {
        let mut t = table_with_dir_a_file_b();
        let a = t.find(Path::new("/a")).unwrap();
        let b = t.find(Path::new("/a/b")).unwrap();
        let removed = t.remove_child(a, OsStr::new("b")).unwrap();
        assert_eq!(removed.ino, b);
        assert_eq!(t.find(Path::new("/a/b")), None);
        assert!(t.get(b).is_none());
    }

    #[test]
    fn rename_rebinds_name_and_parent() {
        let mut t = table_with_dir_a_file_b();
        let a = t.find(Path::new("/a")).unwrap();
        let b = t.find(Path::new("/a/b")).unwrap();

        t.rename_child(a, OsStr::new("b"), ROOT_INO, OsStr::new("c"))
            .unwrap();

        assert_eq!(t.find(Path::new("/a/b")), None);
        assert_eq!(t.find(Path::new("/c")), Some(b));
        let d = t.get(b).unwrap();
        assert_eq!(d.name, "c");
        assert_eq!(d.parent, Some(ROOT_INO));
    }

    #[test]
    fn logical_path_round_trips() {
        let t = table_with_dir_a_file_b();
        let b = t.find(Path::new("/a/b")).unwrap();
        assert_eq!(t.logical_path(b).unwrap(), PathBuf::from("a/b"));
        assert_eq!(t.logical_path(ROOT_INO).unwrap(), PathBuf::new());
    }

    #[test]
    fn parent_links_stay_consistent() {
        let t = table_with_dir_a_file_b();
        for dentry in t.iter() {
            let Some(parent) = dentry.parent else {
                assert_eq!(dentry.ino, ROOT_INO);
                continue;
            };
            assert_eq!(t.child_of(parent, &dentry.name), Some(dentry.ino));
        }
    }
}
