//! Splitting logical paths into their name components.

use std::ffi::OsStr;
use std::path::{Component, Path, PathBuf};

/// Decompose a logical path into its non-empty name components.
///
/// Leading separators are stripped and runs of separators collapse, so
/// `/`, `//` and the empty path all yield an empty sequence, and `/a//b/`
/// yields `["a", "b"]`.
pub fn split(path: &Path) -> Vec<&OsStr> {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(name) => Some(name),
            _ => None,
        })
        .collect()
}

/// Rebuild a logical path as a root-relative [`PathBuf`].
///
/// The root itself maps to the empty path.
pub fn to_relative(path: &Path) -> PathBuf {
    split(path).iter().collect()
}
