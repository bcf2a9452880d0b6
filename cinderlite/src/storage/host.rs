//! Host-side effects: formatting, mounting, ownership.
//!
//! Everything the lifecycle manager does to the host that needs privileges
//! goes through [`HostOps`], so the manager can run against a fake host.

use std::path::Path;

use async_trait::async_trait;
use cinderlite_shared::errors::{CinderliteError, CinderliteResult};
use nix::mount::{MsFlags, mount, umount};
use tokio::process::Command;

use crate::runtime::constants::ext4::{FS_TYPE, MKFS};

#[async_trait]
pub trait HostOps: Send + Sync {
    /// Create an ext4 filesystem on `device`, destroying its content.
    async fn format(&self, device: &Path) -> CinderliteResult<()>;

    /// Mount the ext4 filesystem on `device` at `target` (relatime).
    async fn mount(&self, device: &Path, target: &Path) -> CinderliteResult<()>;

    /// Unmount whatever is mounted at `target`.
    async fn unmount(&self, target: &Path) -> CinderliteResult<()>;

    /// Change owner of `path`.
    async fn chown(&self, path: &Path, uid: u32, gid: u32) -> CinderliteResult<()>;
}

/// Run a blocking filesystem call on the blocking pool.
///
/// Mount syscalls and device reads can stall on slow storage.
pub(crate) async fn blocking<T, F>(what: &str, f: F) -> CinderliteResult<T>
where
    F: FnOnce() -> CinderliteResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| CinderliteError::Internal(format!("{} task failed: {}", what, e)))?
}

/// [`HostOps`] backed by mkfs.ext4 and the mount syscalls.
#[derive(Clone, Debug, Default)]
pub struct LinuxHost;

impl LinuxHost {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl HostOps for LinuxHost {
    async fn format(&self, device: &Path) -> CinderliteResult<()> {
        tracing::info!(device = %device.display(), "Formatting with {}", FS_TYPE);

        let output = Command::new(MKFS)
            .arg("-F") // Force, don't prompt
            .arg(device)
            .output()
            .await
            .map_err(|e| CinderliteError::Os(format!("Failed to run {}: {}", MKFS, e)))?;

        if !output.status.success() {
            return Err(CinderliteError::Os(format!(
                "{} on {} failed with exit code {:?}: {}",
                MKFS,
                device.display(),
                output.status.code(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        tracing::info!(device = %device.display(), "Formatted successfully");
        Ok(())
    }

    async fn mount(&self, device: &Path, target: &Path) -> CinderliteResult<()> {
        let (source, dest) = (device.to_path_buf(), target.to_path_buf());
        blocking("mount", move || {
            mount(
                Some(source.as_path()),
                dest.as_path(),
                Some(FS_TYPE),
                MsFlags::MS_RELATIME,
                None::<&str>,
            )
            .map_err(|e| {
                CinderliteError::Os(format!(
                    "mount syscall failed for {} on {}: {}",
                    source.display(),
                    dest.display(),
                    e
                ))
            })
        })
        .await?;

        tracing::info!(
            device = %device.display(),
            mountpoint = %target.display(),
            "Mounted block device"
        );
        Ok(())
    }

    async fn unmount(&self, target: &Path) -> CinderliteResult<()> {
        let target = target.to_path_buf();
        blocking("umount", move || {
            umount(target.as_path()).map_err(|e| {
                CinderliteError::Os(format!(
                    "umount syscall failed for {}: {}",
                    target.display(),
                    e
                ))
            })
        })
        .await
    }

    async fn chown(&self, path: &Path, uid: u32, gid: u32) -> CinderliteResult<()> {
        std::os::unix::fs::chown(path, Some(uid), Some(gid)).map_err(|e| {
            CinderliteError::Os(format!(
                "chown {}:{} {} failed: {}",
                uid,
                gid,
                path.display(),
                e
            ))
        })
    }
}
