//! Mount state from the live kernel mount table.
//!
//! The driver keeps no ledger of what it mounted. The kernel mount table is
//! the only record of local state, re-read before every decision.

use std::path::{Path, PathBuf};

use cinderlite_shared::errors::{CinderliteError, CinderliteResult};

/// One line of the mount table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MountEntry {
    pub source: String,
    pub target: PathBuf,
    pub fs_type: String,
}

/// Mount table view restricted to the mount root.
#[derive(Clone, Debug)]
pub struct MountTable {
    mounts_file: PathBuf,
    mount_root: PathBuf,
}

impl MountTable {
    pub fn new(mounts_file: PathBuf, mount_root: PathBuf) -> Self {
        Self {
            mounts_file,
            mount_root,
        }
    }

    /// Entries whose target lies under the mount root.
    pub fn entries(&self) -> CinderliteResult<Vec<MountEntry>> {
        let content = std::fs::read_to_string(&self.mounts_file).map_err(|e| {
            CinderliteError::Os(format!(
                "opening {}: {}",
                self.mounts_file.display(),
                e
            ))
        })?;

        Ok(parse_mounts(&content)
            .filter(|entry| entry.target.starts_with(&self.mount_root))
            .collect())
    }

    /// Whether something is mounted exactly on `path`.
    pub fn is_mounted(&self, path: &Path) -> CinderliteResult<bool> {
        let entries = self.entries().map_err(|e| {
            CinderliteError::Os(format!(
                "checking if a device is mounted on {}: {}",
                path.display(),
                e
            ))
        })?;
        Ok(entries.iter().any(|entry| entry.target == path))
    }
}

fn parse_mounts(content: &str) -> impl Iterator<Item = MountEntry> + '_ {
    content.lines().filter_map(|line| {
        let mut fields = line.split_whitespace();
        let source = fields.next()?;
        let target = fields.next()?;
        let fs_type = fields.next().unwrap_or_default();
        Some(MountEntry {
            source: unescape(source),
            target: PathBuf::from(unescape(target)),
            fs_type: fs_type.to_string(),
        })
    })
}

/// Decode the kernel's octal escapes (`\040` for space, `\011` tab, `\012`
/// newline, `\134` backslash).
fn unescape(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 3 < bytes.len() && is_octal(&bytes[i + 1..i + 4]) {
            let value = (bytes[i + 1] - b'0') as u32 * 64
                + (bytes[i + 2] - b'0') as u32 * 8
                + (bytes[i + 3] - b'0') as u32;
            if let Ok(byte) = u8::try_from(value) {
                out.push(byte);
                i += 4;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn is_octal(digits: &[u8]) -> bool {
    digits.iter().all(|d| (b'0'..=b'7').contains(d))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SAMPLE: &str = "\
sysfs /sys sysfs rw,nosuid,nodev,noexec,relatime 0 0
/dev/vda1 / ext4 rw,relatime 0 0
/dev/sdb /var/lib/cinder/6edbc2f4 ext4 rw,relatime 0 0
/dev/sdc /var/lib/cinder-other/aaaa ext4 rw,relatime 0 0
/dev/sdd /var/lib/cinder/with\\040space ext4 rw,relatime 0 0
";

    fn table(content: &str) -> (TempDir, MountTable) {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("mounts");
        std::fs::write(&file, content).unwrap();
        let table = MountTable::new(file, PathBuf::from("/var/lib/cinder"));
        (temp_dir, table)
    }

    #[test]
    fn test_entries_filtered_to_mount_root() {
        let (_dir, table) = table(SAMPLE);
        let entries = table.entries().unwrap();

        let targets: Vec<_> = entries.iter().map(|e| e.target.clone()).collect();
        assert_eq!(
            targets,
            vec![
                PathBuf::from("/var/lib/cinder/6edbc2f4"),
                PathBuf::from("/var/lib/cinder/with space"),
            ]
        );
        assert_eq!(entries[0].source, "/dev/sdb");
        assert_eq!(entries[0].fs_type, "ext4");
    }

    #[test]
    fn test_is_mounted() {
        let (_dir, table) = table(SAMPLE);
        assert!(table.is_mounted(Path::new("/var/lib/cinder/6edbc2f4")).unwrap());
        assert!(table.is_mounted(Path::new("/var/lib/cinder/with space")).unwrap());
        assert!(!table.is_mounted(Path::new("/var/lib/cinder/other")).unwrap());
        // Outside the mount root, even though it is in the table.
        assert!(!table.is_mounted(Path::new("/")).unwrap());
        // A sibling root sharing the string prefix is not under the mount root.
        assert!(!table
            .is_mounted(Path::new("/var/lib/cinder-other/aaaa"))
            .unwrap());
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let table = MountTable::new(
            PathBuf::from("/nonexistent/mounts"),
            PathBuf::from("/var/lib/cinder"),
        );
        assert!(matches!(
            table.is_mounted(Path::new("/var/lib/cinder/x")),
            Err(CinderliteError::Os(_))
        ));
    }

    #[test]
    fn test_unescape() {
        assert_eq!(unescape("/mnt/a\\040b"), "/mnt/a b");
        assert_eq!(unescape("/mnt/a\\134b"), "/mnt/a\\b");
        assert_eq!(unescape("/mnt/plain"), "/mnt/plain");
        assert_eq!(unescape("/mnt/trailing\\04"), "/mnt/trailing\\04");
    }
}
