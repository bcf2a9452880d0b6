use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};

use cinderlite_shared::errors::{CinderliteError, CinderliteResult};

use crate::runtime::constants::{paths, volume_defaults};

// ============================================================================
// MOUNT LAYOUT (mount root)
// ============================================================================

/// Deterministic paths under the mount root.
///
/// ```text
/// <mount_root>/
///   <volume id>/      mountpoint, the ext4 root of the volume
///     data/           handed to callers
/// ```
#[derive(Clone, Debug)]
pub struct MountLayout {
    mount_root: PathBuf,
}

impl MountLayout {
    pub fn new(mount_root: PathBuf) -> Self {
        Self { mount_root }
    }

    pub fn mount_root(&self) -> &Path {
        &self.mount_root
    }

    /// Mountpoint of a volume: <mount_root>/<volume id>
    pub fn mountpoint(&self, volume_id: &str) -> PathBuf {
        self.mount_root.join(volume_id)
    }

    /// Caller-visible directory: <mount_root>/<volume id>/data
    pub fn data_dir(&self, volume_id: &str) -> PathBuf {
        self.mountpoint(volume_id).join(paths::DATA_DIR)
    }

    /// Create the mount root if missing.
    pub fn prepare(&self) -> CinderliteResult<()> {
        std::fs::create_dir_all(&self.mount_root).map_err(|e| {
            CinderliteError::Os(format!(
                "failed to create mount root {}: {}",
                self.mount_root.display(),
                e
            ))
        })
    }

    /// Create the mountpoint directory of a volume (and the root above it).
    pub fn create_mountpoint(&self, volume_id: &str) -> CinderliteResult<PathBuf> {
        let mountpoint = self.mountpoint(volume_id);
        std::fs::DirBuilder::new()
            .recursive(true)
            .mode(volume_defaults::MOUNTPOINT_MODE)
            .create(&mountpoint)
            .map_err(|e| {
                CinderliteError::Os(format!(
                    "failed to create mountpoint directory {}: {}",
                    mountpoint.display(),
                    e
                ))
            })?;
        Ok(mountpoint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_paths() {
        let layout = MountLayout::new(PathBuf::from("/var/lib/cinder"));
        assert_eq!(
            layout.mountpoint("0b5c2c6e"),
            PathBuf::from("/var/lib/cinder/0b5c2c6e")
        );
        assert_eq!(
            layout.data_dir("0b5c2c6e"),
            PathBuf::from("/var/lib/cinder/0b5c2c6e/data")
        );
    }

    #[test]
    fn test_create_mountpoint_is_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let layout = MountLayout::new(temp_dir.path().join("root"));

        let first = layout.create_mountpoint("vol").unwrap();
        let second = layout.create_mountpoint("vol").unwrap();

        assert_eq!(first, second);
        assert!(first.is_dir());
    }
}
