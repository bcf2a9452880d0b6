//! ext4 signature detection.
//!
//! A device is formatted only when no ext4 superblock is found, so probing
//! must never report "blank" for a device that holds data.
//!
//! See:
//!   - https://ext4.wiki.kernel.org/index.php/Ext4_Disk_Layout#Layout
//!   - https://ext4.wiki.kernel.org/index.php/Ext4_Disk_Layout#The_Super_Block

use std::fs::File;
use std::io::ErrorKind;
use std::os::unix::fs::FileExt;
use std::path::Path;

use cinderlite_shared::errors::{CinderliteError, CinderliteResult};

use crate::runtime::constants::ext4::{SUPER_MAGIC, SUPER_MAGIC_OFFSET};

/// Whether `device` carries the ext4 superblock magic.
///
/// A device too short to hold a superblock is an error, not "blank".
pub fn has_ext4_signature(device: &Path) -> CinderliteResult<bool> {
    let file = File::open(device).map_err(|e| {
        CinderliteError::Os(format!(
            "opening device {} to read ext4 magic number: {}",
            device.display(),
            e
        ))
    })?;

    let mut buf = [0u8; SUPER_MAGIC.len()];
    file.read_exact_at(&mut buf, SUPER_MAGIC_OFFSET)
        .map_err(|e| match e.kind() {
            ErrorKind::UnexpectedEof => CinderliteError::Os(format!(
                "reading ext4 magic number on {}: could not read enough bytes",
                device.display()
            )),
            _ => CinderliteError::Os(format!(
                "reading ext4 magic number on {}: {}",
                device.display(),
                e
            )),
        })?;

    Ok(buf == SUPER_MAGIC)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn device_with(bytes_at_magic: Option<[u8; 2]>, len: usize) -> (TempDir, std::path::PathBuf) {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("vdb");
        let mut content = vec![0u8; len];
        if let Some(magic) = bytes_at_magic {
            let offset = SUPER_MAGIC_OFFSET as usize;
            content[offset..offset + 2].copy_from_slice(&magic);
        }
        std::fs::write(&path, content).unwrap();
        (temp_dir, path)
    }

    #[test]
    fn test_magic_offset_is_1080() {
        assert_eq!(SUPER_MAGIC_OFFSET, 1080);
    }

    #[test]
    fn test_detects_ext4() {
        let (_dir, dev) = device_with(Some([0x53, 0xEF]), 4096);
        assert!(has_ext4_signature(&dev).unwrap());
    }

    #[test]
    fn test_blank_device() {
        let (_dir, dev) = device_with(None, 4096);
        assert!(!has_ext4_signature(&dev).unwrap());
    }

    #[test]
    fn test_byte_swapped_magic_is_not_ext4() {
        let (_dir, dev) = device_with(Some([0xEF, 0x53]), 4096);
        assert!(!has_ext4_signature(&dev).unwrap());
    }

    #[test]
    fn test_short_device_is_an_error() {
        let (_dir, dev) = device_with(None, 1081);
        let err = has_ext4_signature(&dev).unwrap_err();
        assert!(err.to_string().contains("could not read enough bytes"));
    }

    #[test]
    fn test_missing_device_is_an_error() {
        assert!(has_ext4_signature(Path::new("/nonexistent/dev/vdz")).is_err());
    }
}
