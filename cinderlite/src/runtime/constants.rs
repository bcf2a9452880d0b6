//! Constants for the cinderlite driver
//!
//! Centralized location for hardcoded paths, timings and defaults.

pub use cinderlite_shared::constants::{metadata, status};

/// Host paths consulted or created by the driver.
pub mod paths {
    /// Root under which every volume is mounted, one directory per volume ID
    pub const MOUNT_ROOT: &str = "/var/lib/cinder";

    /// Name of the directory inside each mount that is handed to callers
    pub const DATA_DIR: &str = "data";

    /// Kernel block device class directory
    pub const SYS_BLOCK_DIR: &str = "/sys/class/block";

    /// udev database, one record per device named `b<major>:<minor>`
    pub const UDEV_DATA_DIR: &str = "/run/udev/data";

    /// Device node directory
    pub const DEV_DIR: &str = "/dev";

    /// Live kernel mount table
    pub const MOUNTS_FILE: &str = "/proc/mounts";
}

/// Waiting on the control plane.
pub mod timing {
    use std::time::Duration;

    /// Delay between two polls of remote state
    pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

    /// Upper bound for any wait on remote convergence
    pub const CONVERGENCE_TIMEOUT: Duration = Duration::from_secs(60);

    /// Delay between attach confirmation and device lookup.
    /// The API reports the attachment before udev has written its record.
    pub const DEVICE_SETTLE: Duration = Duration::from_millis(200);
}

/// Volume defaults
pub mod volume_defaults {
    /// Size in GiB when the caller gives none
    pub const DEFAULT_SIZE_GB: u32 = 20;

    /// Owner uid of a fresh data directory
    pub const DEFAULT_UID: u32 = 0;

    /// Owner gid of a fresh data directory
    pub const DEFAULT_GID: u32 = 0;

    /// Mode of a fresh data directory
    pub const DEFAULT_DIR_MODE: u32 = 0o750;

    /// Mode of the per-volume mountpoint directory
    pub const MOUNTPOINT_MODE: u32 = 0o750;
}

/// ext4 filesystem detection and creation
pub mod ext4 {
    /// Filesystem type passed to mount(2)
    pub const FS_TYPE: &str = "ext4";

    /// Formatting tool
    pub const MKFS: &str = "mkfs.ext4";

    /// Byte offset of `s_magic`: superblock starts at 1024, magic at +0x38
    pub const SUPER_MAGIC_OFFSET: u64 = 1024 + 0x38;

    /// `s_magic` value, 0xEF53 little-endian
    pub const SUPER_MAGIC: [u8; 2] = [0x53, 0xEF];
}

/// Instance metadata service
pub mod metadata_service {
    use std::time::Duration;

    pub const URL: &str = "http://169.254.169.254/openstack/latest/meta_data.json";

    pub const TIMEOUT: Duration = Duration::from_secs(5);

    /// Field holding the server ID
    pub const ID_FIELD: &str = "uuid";
}
