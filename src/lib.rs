//! A userspace filesystem that spreads one namespace over two backing
//! directory trees: a fast tier (meant for solid-state media) and a slow tier
//! (meant for rotational media).
//!
//! Regular files live on exactly one tier and migrate between them when
//! their size crosses the configured thresholds. Directories are mirrored on
//! both trees so path-level operations behave identically no matter where a
//! file lives; symlinks stay on the fast tree.

pub mod attr;
pub mod config;
pub mod dentry;
pub mod error;
pub mod fs;
pub mod fuse;
pub mod migrate;
pub mod path;
pub mod resolve;
pub mod sys;
