//! Temporary host tree: sysfs block class, udev database, /dev, mount table
//! and mount root.

use std::path::{Path, PathBuf};
use std::time::Duration;

use cinderlite::DriverOptions;
use parking_lot::Mutex;
use tempfile::TempDir;

/// Size of the fake device files; enough to hold the ext4 magic.
pub const DEVICE_SIZE: u64 = 4096;

const FIRST_MINOR: u32 = 16;
const MAJOR: u32 = 253;

/// Isolated host layout under a temporary directory.
///
/// Devices are regular files under `dev/`, each with a `uevent` under
/// `sys/class/block/<name>/` and a udev record carrying its serial.
pub struct HostTree {
    _temp_dir: TempDir,
    root: PathBuf,
    next_minor: Mutex<u32>,
}

impl HostTree {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let root = temp_dir.path().to_path_buf();
        let tree = Self {
            _temp_dir: temp_dir,
            root,
            next_minor: Mutex::new(FIRST_MINOR),
        };

        for dir in [
            tree.sys_block_dir(),
            tree.udev_data_dir(),
            tree.dev_dir(),
            tree.mount_root(),
            tree.root.join("proc"),
            tree.filesystems_dir(),
        ] {
            std::fs::create_dir_all(dir).expect("Failed to create host tree");
        }
        std::fs::write(
            tree.mounts_file(),
            "proc /proc proc rw,nosuid,nodev,noexec,relatime 0 0\n",
        )
        .expect("Failed to create mount table");

        tree
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn sys_block_dir(&self) -> PathBuf {
        self.root.join("sys/class/block")
    }

    pub fn udev_data_dir(&self) -> PathBuf {
        self.root.join("run/udev/data")
    }

    pub fn dev_dir(&self) -> PathBuf {
        self.root.join("dev")
    }

    pub fn mounts_file(&self) -> PathBuf {
        self.root.join("proc/mounts")
    }

    pub fn mount_root(&self) -> PathBuf {
        self.root.join("var/lib/cinder")
    }

    /// Where [`FakeHost`](crate::FakeHost) keeps each device's files while
    /// it is not mounted.
    pub fn filesystems_dir(&self) -> PathBuf {
        self.root.join("filesystems")
    }

    /// Driver options pointing at this tree, with production timings.
    pub fn options(&self) -> DriverOptions {
        DriverOptions {
            mount_root: self.mount_root(),
            sys_block_dir: self.sys_block_dir(),
            udev_data_dir: self.udev_data_dir(),
            dev_dir: self.dev_dir(),
            mounts_file: self.mounts_file(),
            poll_interval: Duration::from_secs(1),
            convergence_timeout: Duration::from_secs(60),
            device_settle: Duration::from_millis(200),
            ..Default::default()
        }
    }

    /// Add a blank block device whose serial is `serial`. Returns its path.
    pub fn plug_device(&self, serial: &str) -> PathBuf {
        let minor = {
            let mut next = self.next_minor.lock();
            let minor = *next;
            *next += 1;
            minor
        };
        let name = format!("vd{}", minor);

        let sys = self.sys_block_dir().join(&name);
        std::fs::create_dir_all(&sys).expect("Failed to create sysfs entry");
        std::fs::write(
            sys.join("uevent"),
            format!("MAJOR={}\nMINOR={}\nDEVNAME={}\nDEVTYPE=disk\n", MAJOR, minor, name),
        )
        .expect("Failed to write uevent");

        std::fs::write(
            self.udev_data_dir().join(format!("b{}:{}", MAJOR, minor)),
            format!(
                "S:disk/by-id/virtio-{}\nE:ID_SERIAL={}\nE:ID_SERIAL_SHORT={}\nG:systemd\n",
                serial, serial, serial
            ),
        )
        .expect("Failed to write udev record");

        let device = self.dev_dir().join(&name);
        let file = std::fs::File::create(&device).expect("Failed to create device file");
        file.set_len(DEVICE_SIZE).expect("Failed to size device file");
        device
    }

    /// Remove every device carrying `serial`.
    pub fn unplug_device(&self, serial: &str) {
        for (name, major, minor) in self.devices_with_serial(serial) {
            let _ = std::fs::remove_dir_all(self.sys_block_dir().join(&name));
            let _ = std::fs::remove_file(self.udev_data_dir().join(format!("b{}:{}", major, minor)));
            let _ = std::fs::remove_file(self.dev_dir().join(&name));
        }
    }

    /// Number of devices carrying `serial`.
    pub fn device_count(&self, serial: &str) -> usize {
        self.devices_with_serial(serial).len()
    }

    /// Targets currently listed in the mount table.
    pub fn mounted_targets(&self) -> Vec<PathBuf> {
        std::fs::read_to_string(self.mounts_file())
            .unwrap_or_default()
            .lines()
            .filter_map(|line| line.split_whitespace().nth(1))
            .map(|target| PathBuf::from(target.replace("\\040", " ")))
            .collect()
    }

    fn devices_with_serial(&self, serial: &str) -> Vec<(String, String, String)> {
        let mut found = Vec::new();
        let Ok(entries) = std::fs::read_dir(self.sys_block_dir()) else {
            return found;
        };
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            let uevent = std::fs::read_to_string(entry.path().join("uevent")).unwrap_or_default();
            let field = |key: &str| {
                uevent
                    .lines()
                    .find_map(|l| l.strip_prefix(key).map(str::to_string))
                    .unwrap_or_default()
            };
            let (major, minor) = (field("MAJOR="), field("MINOR="));
            let record = std::fs::read_to_string(
                self.udev_data_dir().join(format!("b{}:{}", major, minor)),
            )
            .unwrap_or_default();
            if record
                .lines()
                .any(|l| l == format!("E:ID_SERIAL_SHORT={}", serial))
            {
                found.push((name, major, minor));
            }
        }
        found
    }
}

impl Default for HostTree {
    fn default() -> Self {
        Self::new()
    }
}
