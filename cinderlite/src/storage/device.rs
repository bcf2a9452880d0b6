//! Serial-number based block device lookup.
//!
//! The attach response names a device (`/dev/vdb`), but that name is a guess:
//! concurrent attaches can swap letters and udev rules can rename devices.
//! The serial udev records for each disk is the volume ID, so it is the only
//! reliable way to tell which local device backs which volume.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use cinderlite_shared::errors::{CinderliteError, CinderliteResult};

use crate::runtime::options::DriverOptions;

/// udev property holding the disk serial.
const SERIAL_PROPERTY: &str = "E:ID_SERIAL_SHORT";

/// Maps volume IDs to local device paths.
#[derive(Clone, Debug)]
pub struct DeviceResolver {
    sys_block_dir: PathBuf,
    udev_data_dir: PathBuf,
    dev_dir: PathBuf,
}

impl DeviceResolver {
    pub fn new(sys_block_dir: PathBuf, udev_data_dir: PathBuf, dev_dir: PathBuf) -> Self {
        Self {
            sys_block_dir,
            udev_data_dir,
            dev_dir,
        }
    }

    pub fn from_options(options: &DriverOptions) -> Self {
        Self::new(
            options.sys_block_dir.clone(),
            options.udev_data_dir.clone(),
            options.dev_dir.clone(),
        )
    }

    /// Find the device whose serial equals `volume_id`.
    ///
    /// # Errors
    /// - `NotFound`: no device carries that serial (volume not attached here yet)
    /// - `Ambiguous`: several devices carry it; never picks one
    /// - `Os`: sysfs or udev records could not be read
    pub fn resolve(&self, volume_id: &str) -> CinderliteResult<PathBuf> {
        let entries = std::fs::read_dir(&self.sys_block_dir).map_err(|e| {
            CinderliteError::Os(format!(
                "could not read dir {}: {}",
                self.sys_block_dir.display(),
                e
            ))
        })?;

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| {
                CinderliteError::Os(format!(
                    "could not read dir {}: {}",
                    self.sys_block_dir.display(),
                    e
                ))
            })?;
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();

        let mut matches = Vec::new();
        for sysname in names {
            let (major, minor) = self.read_uevent(&sysname)?;
            let serial = self.read_serial(&major, &minor)?;
            if serial.as_deref() == Some(volume_id) {
                matches.push(sysname);
            }
        }

        match matches.as_slice() {
            [] => Err(CinderliteError::NotFound(format!(
                "no device with serial {}",
                volume_id
            ))),
            [only] => {
                let device = self.dev_dir.join(only);
                tracing::debug!(volume_id, device = %device.display(), "Resolved device by serial");
                Ok(device)
            }
            many => Err(CinderliteError::Ambiguous(format!(
                "more than one device with serial {} found: {}",
                volume_id,
                many.join(", ")
            ))),
        }
    }

    /// Read MAJOR and MINOR from `<sys_block_dir>/<sysname>/uevent`.
    fn read_uevent(&self, sysname: &str) -> CinderliteResult<(String, String)> {
        let uevent = self.sys_block_dir.join(sysname).join("uevent");
        let content = std::fs::read_to_string(&uevent).map_err(|e| {
            CinderliteError::Os(format!("could not open {}: {}", uevent.display(), e))
        })?;

        let major = property(&content, "MAJOR");
        let minor = property(&content, "MINOR");

        match (major, minor) {
            (Some(major), Some(minor)) => Ok((major.to_string(), minor.to_string())),
            _ => Err(CinderliteError::Os(format!(
                "either or both MAJOR and/or MINOR fields were not found in {}",
                uevent.display()
            ))),
        }
    }

    /// Read the serial from `<udev_data_dir>/b<major>:<minor>`.
    ///
    /// Devices udev never recorded (ram disks, some loop devices) have no
    /// serial and cannot back a volume.
    fn read_serial(&self, major: &str, minor: &str) -> CinderliteResult<Option<String>> {
        let record = self.udev_record_path(major, minor);
        match std::fs::read_to_string(&record) {
            Ok(content) => Ok(property(&content, SERIAL_PROPERTY).map(str::to_string)),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::trace!(record = %record.display(), "No udev record, skipping device");
                Ok(None)
            }
            Err(e) => Err(CinderliteError::Os(format!(
                "could not open {}: {}",
                record.display(),
                e
            ))),
        }
    }

    fn udev_record_path(&self, major: &str, minor: &str) -> PathBuf {
        self.udev_data_dir.join(format!("b{}:{}", major, minor))
    }

    pub fn dev_dir(&self) -> &Path {
        &self.dev_dir
    }
}

/// Value of the first `KEY=value` line whose key is `key`.
fn property<'a>(content: &'a str, key: &str) -> Option<&'a str> {
    content.lines().find_map(|line| {
        let (k, v) = line.split_once('=')?;
        (k == key).then_some(v.trim())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    struct FakeTree {
        _temp_dir: TempDir,
        resolver: DeviceResolver,
        sys: PathBuf,
        udev: PathBuf,
    }

    impl FakeTree {
        fn new() -> Self {
            let temp_dir = TempDir::new().unwrap();
            let sys = temp_dir.path().join("sys/class/block");
            let udev = temp_dir.path().join("run/udev/data");
            let dev = temp_dir.path().join("dev");
            for dir in [&sys, &udev, &dev] {
                std::fs::create_dir_all(dir).unwrap();
            }
            Self {
                resolver: DeviceResolver::new(sys.clone(), udev.clone(), dev),
                _temp_dir: temp_dir,
                sys,
                udev,
            }
        }

        fn add_device(&self, name: &str, major: u32, minor: u32, serial: Option<&str>) {
            let dir = self.sys.join(name);
            std::fs::create_dir_all(&dir).unwrap();
            std::fs::write(
                dir.join("uevent"),
                format!("MAJOR={}\nMINOR={}\nDEVNAME={}\nDEVTYPE=disk\n", major, minor, name),
            )
            .unwrap();
            if let Some(serial) = serial {
                let record = format!(
                    "S:disk/by-id/virtio-{}\nE:ID_SERIAL=x_{}\n{}={}\nG:systemd\n",
                    serial, serial, SERIAL_PROPERTY, serial
                );
                std::fs::write(self.udev.join(format!("b{}:{}", major, minor)), record).unwrap();
            }
        }
    }

    #[test]
    fn test_no_match_is_not_found() {
        let tree = FakeTree::new();
        tree.add_device("vda", 252, 0, Some("root-disk"));

        let err = tree.resolver.resolve("vol-1").unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_single_match_returns_dev_path() {
        let tree = FakeTree::new();
        tree.add_device("vda", 252, 0, Some("root-disk"));
        tree.add_device("vdb", 252, 16, Some("vol-1"));
        tree.add_device("vdc", 252, 32, Some("vol-2"));

        let device = tree.resolver.resolve("vol-1").unwrap();
        assert_eq!(device, tree.resolver.dev_dir().join("vdb"));
    }

    #[test]
    fn test_serial_prefix_does_not_match() {
        let tree = FakeTree::new();
        tree.add_device("vdb", 252, 16, Some("vol-10"));

        assert!(tree.resolver.resolve("vol-1").unwrap_err().is_not_found());
    }

    #[test]
    fn test_multiple_matches_are_ambiguous() {
        let tree = FakeTree::new();
        tree.add_device("sdb", 8, 16, Some("vol-1"));
        tree.add_device("sdc", 8, 32, Some("vol-1"));

        let err = tree.resolver.resolve("vol-1").unwrap_err();
        assert!(matches!(err, CinderliteError::Ambiguous(_)));
        assert!(err.to_string().contains("sdb"));
        assert!(err.to_string().contains("sdc"));
    }

    #[test]
    fn test_device_without_udev_record_is_skipped() {
        let tree = FakeTree::new();
        tree.add_device("ram0", 1, 0, None);
        tree.add_device("vdb", 252, 16, Some("vol-1"));

        assert!(tree.resolver.resolve("vol-1").unwrap().ends_with("vdb"));
    }

    #[test]
    fn test_uevent_without_numbers_is_an_error() {
        let tree = FakeTree::new();
        let dir = tree.sys.join("weird");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("uevent"), "DEVNAME=weird\n").unwrap();

        let err = tree.resolver.resolve("vol-1").unwrap_err();
        assert!(matches!(err, CinderliteError::Os(_)));
    }

    #[test]
    fn test_missing_sys_dir_is_an_error() {
        let resolver = DeviceResolver::new(
            PathBuf::from("/nonexistent/sys/class/block"),
            PathBuf::from("/nonexistent/udev"),
            PathBuf::from("/dev"),
        );
        assert!(matches!(
            resolver.resolve("vol-1").unwrap_err(),
            CinderliteError::Os(_)
        ));
    }

    #[test]
    fn test_property_parsing() {
        let content = "MAJOR=8\nMINOR=16\nDEVNAME=sdb\n";
        assert_eq!(property(content, "MAJOR"), Some("8"));
        assert_eq!(property(content, "MINOR"), Some("16"));
        assert_eq!(property(content, "DEVTYPE"), None);
        assert_eq!(property("E:ID_SERIAL_SHORT=abc\n", SERIAL_PROPERTY), Some("abc"));
    }
}
