//! Configuration for the volume driver.

use std::path::PathBuf;
use std::time::Duration;

use cinderlite_shared::errors::{CinderliteError, CinderliteResult};
use serde::{Deserialize, Serialize};

use crate::runtime::constants::{paths, timing, volume_defaults};

/// Options for a [`VolumeManager`](crate::VolumeManager).
///
/// The host paths exist so the driver can run against a fake sysfs/udev/mount
/// tree in tests. Production deployments only set `volume_prefix`,
/// `default_size_gb` and occasionally `mount_root`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DriverOptions {
    /// Root directory for mountpoints.
    ///
    /// Also the filter applied to the kernel mount table.
    /// Default: /var/lib/cinder
    #[serde(default = "default_mount_root")]
    pub mount_root: PathBuf,

    /// Namespace prefix every managed volume name must carry.
    ///
    /// Volumes without it are invisible to List and lookups.
    /// Default: "" (manage every volume of the project)
    #[serde(default)]
    pub volume_prefix: String,

    /// Size in GiB for Create requests without a size.
    ///
    /// Default: 20
    #[serde(default = "default_size_gb")]
    pub default_size_gb: u32,

    /// Kernel block device directory.
    #[serde(default = "default_sys_block_dir")]
    pub sys_block_dir: PathBuf,

    /// udev database directory.
    #[serde(default = "default_udev_data_dir")]
    pub udev_data_dir: PathBuf,

    /// Device node directory.
    #[serde(default = "default_dev_dir")]
    pub dev_dir: PathBuf,

    /// Mount table file.
    #[serde(default = "default_mounts_file")]
    pub mounts_file: PathBuf,

    /// Delay between two polls of remote state.
    #[serde(default = "default_poll_interval")]
    pub poll_interval: Duration,

    /// Bound on every wait for remote convergence.
    ///
    /// Default: 60s
    #[serde(default = "default_convergence_timeout")]
    pub convergence_timeout: Duration,

    /// Delay between attach confirmation and device lookup.
    #[serde(default = "default_device_settle")]
    pub device_settle: Duration,
}

fn default_mount_root() -> PathBuf {
    PathBuf::from(paths::MOUNT_ROOT)
}

fn default_size_gb() -> u32 {
    volume_defaults::DEFAULT_SIZE_GB
}

fn default_sys_block_dir() -> PathBuf {
    PathBuf::from(paths::SYS_BLOCK_DIR)
}

fn default_udev_data_dir() -> PathBuf {
    PathBuf::from(paths::UDEV_DATA_DIR)
}

fn default_dev_dir() -> PathBuf {
    PathBuf::from(paths::DEV_DIR)
}

fn default_mounts_file() -> PathBuf {
    PathBuf::from(paths::MOUNTS_FILE)
}

fn default_poll_interval() -> Duration {
    timing::POLL_INTERVAL
}

fn default_convergence_timeout() -> Duration {
    timing::CONVERGENCE_TIMEOUT
}

fn default_device_settle() -> Duration {
    timing::DEVICE_SETTLE
}

impl Default for DriverOptions {
    fn default() -> Self {
        Self {
            mount_root: default_mount_root(),
            volume_prefix: String::new(),
            default_size_gb: default_size_gb(),
            sys_block_dir: default_sys_block_dir(),
            udev_data_dir: default_udev_data_dir(),
            dev_dir: default_dev_dir(),
            mounts_file: default_mounts_file(),
            poll_interval: default_poll_interval(),
            convergence_timeout: default_convergence_timeout(),
            device_settle: default_device_settle(),
        }
    }
}

impl DriverOptions {
    /// Check preconditions before the driver touches the host.
    pub fn validate(&self) -> CinderliteResult<()> {
        if !self.mount_root.is_absolute() {
            return Err(CinderliteError::Config(format!(
                "mount_root must be absolute path, got: {}",
                self.mount_root.display()
            )));
        }

        if self.default_size_gb == 0 {
            return Err(CinderliteError::Config(
                "default_size_gb must be greater than zero".to_string(),
            ));
        }

        if self.poll_interval.is_zero() {
            return Err(CinderliteError::Config(
                "poll_interval must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let opts = DriverOptions::default();
        assert_eq!(opts.mount_root, PathBuf::from("/var/lib/cinder"));
        assert_eq!(opts.default_size_gb, 20);
        assert_eq!(opts.convergence_timeout, Duration::from_secs(60));
        assert_eq!(opts.device_settle, Duration::from_millis(200));
        assert!(opts.volume_prefix.is_empty());
        assert!(opts.validate().is_ok());
    }

    #[test]
    fn test_deserialize_partial_uses_defaults() {
        let opts: DriverOptions =
            serde_json::from_str(r#"{"volume_prefix":"ns-","default_size_gb":5}"#).unwrap();
        assert_eq!(opts.volume_prefix, "ns-");
        assert_eq!(opts.default_size_gb, 5);
        assert_eq!(opts.mounts_file, PathBuf::from("/proc/mounts"));
    }

    #[test]
    fn test_relative_mount_root_rejected() {
        let opts = DriverOptions {
            mount_root: PathBuf::from("cinder"),
            ..Default::default()
        };
        let err = opts.validate().unwrap_err();
        assert!(matches!(err, CinderliteError::Config(_)));
    }

    #[test]
    fn test_zero_default_size_rejected() {
        let opts = DriverOptions {
            default_size_gb: 0,
            ..Default::default()
        };
        assert!(opts.validate().is_err());
    }
}
