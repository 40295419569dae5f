//! Mount configuration: backing roots and migration thresholds.

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::path;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(
        "slow lower limit ({slow_lower_limit} bytes) must be below the fast upper limit \
         ({fast_upper_limit} bytes)"
    )]
    ThresholdOrder {
        fast_upper_limit: u64,
        slow_lower_limit: u64,
    },

    #[error("fast and slow roots must differ ({0:?})")]
    IdenticalRoots(PathBuf),
}

/// Process-wide mount parameters, immutable after init.
#[derive(Debug, Clone)]
pub struct MountConfig {
    fast_root: PathBuf,
    slow_root: PathBuf,
    fast_upper_limit: u64,
    slow_lower_limit: u64,
}

impl MountConfig {
    /// Default threshold above which a fast-tier file moves to the slow tier.
    pub const DEFAULT_FAST_UPPER_LIMIT: u64 = 512 * 1024 * 1024;
    /// Default threshold below which a slow-tier file moves back.
    pub const DEFAULT_SLOW_LOWER_LIMIT: u64 = 256 * 1024 * 1024;

    /// Normalize the roots and validate the thresholds.
    ///
    /// The lower limit must sit strictly below the upper limit, otherwise a
    /// file could satisfy both migration conditions at once and bounce
    /// between tiers.
    pub fn new(
        fast_root: impl Into<PathBuf>,
        slow_root: impl Into<PathBuf>,
        fast_upper_limit: u64,
        slow_lower_limit: u64,
    ) -> Result<Self, ConfigError> {
        // Re-collecting components strips trailing separators.
        let fast_root: PathBuf = fast_root.into().components().collect();
        let slow_root: PathBuf = slow_root.into().components().collect();

        if fast_root == slow_root {
            return Err(ConfigError::IdenticalRoots(fast_root));
        }
        if slow_lower_limit >= fast_upper_limit {
            return Err(ConfigError::ThresholdOrder {
                fast_upper_limit,
                slow_lower_limit,
            });
        }

        Ok(Self {
            fast_root,
            slow_root,
            fast_upper_limit,
            slow_lower_limit,
        })
    }

    pub fn fast_root(&self) -> &Path {
        &self.fast_root
    }

    pub fn slow_root(&self) -> &Path {
        &self.slow_root
    }

    pub fn fast_upper_limit(&self) -> u64 {
        self.fast_upper_limit
    }

    pub fn slow_lower_limit(&self) -> u64 {
        self.slow_lower_limit
    }

    /// The backing path of a logical path on the fast tree.
    pub fn fast_path(&self, logical: &Path) -> PathBuf {
        Self::under(&self.fast_root, logical)
    }

    /// The backing path of a logical path on the slow tree.
    pub fn slow_path(&self, logical: &Path) -> PathBuf {
        Self::under(&self.slow_root, logical)
    }

    fn under(root: &Path, logical: &Path) -> PathBuf {
        let rel = path::to_relative(logical);
        if rel.as_os_str().is_empty() {
            root.to_path_buf()
        } else {
            root.join(rel)
        }
    }
}
