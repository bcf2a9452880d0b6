//! [`HostOps`] fake that edits the tree's mount table instead of the kernel's.

use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use cinderlite::runtime::constants::ext4::{SUPER_MAGIC, SUPER_MAGIC_OFFSET};
use cinderlite::{CinderliteError, CinderliteResult, HostOps};
use parking_lot::Mutex;

/// One recorded host operation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HostCall {
    Format(PathBuf),
    Mount { device: PathBuf, target: PathBuf },
    Unmount(PathBuf),
    Chown { path: PathBuf, uid: u32, gid: u32 },
}

/// Records every call; `format` stamps the ext4 magic into the device file,
/// `mount`/`unmount` add and remove mount table lines.
///
/// Files written under a mountpoint belong to the mounted device: unmount
/// moves them to `filesystems_dir/<device name>` and mount moves them back.
pub struct FakeHost {
    mounts_file: PathBuf,
    filesystems_dir: PathBuf,
    calls: Mutex<Vec<HostCall>>,
    fail_mount: Mutex<bool>,
}

impl FakeHost {
    pub fn new(mounts_file: PathBuf, filesystems_dir: PathBuf) -> Self {
        Self {
            mounts_file,
            filesystems_dir,
            calls: Mutex::new(Vec::new()),
            fail_mount: Mutex::new(false),
        }
    }

    pub fn calls(&self) -> Vec<HostCall> {
        self.calls.lock().clone()
    }

    pub fn format_count(&self) -> usize {
        self.count(|c| matches!(c, HostCall::Format(_)))
    }

    pub fn mount_count(&self) -> usize {
        self.count(|c| matches!(c, HostCall::Mount { .. }))
    }

    pub fn unmount_count(&self) -> usize {
        self.count(|c| matches!(c, HostCall::Unmount(_)))
    }

    /// Make the next mounts fail like a rejected mount(2).
    pub fn set_fail_mount(&self, fail: bool) {
        *self.fail_mount.lock() = fail;
    }

    fn count(&self, pred: impl Fn(&HostCall) -> bool) -> usize {
        self.calls.lock().iter().filter(|c| pred(c)).count()
    }

    fn record(&self, call: HostCall) {
        self.calls.lock().push(call);
    }

    fn filesystem_of(&self, device: &Path) -> PathBuf {
        let name = device.file_name().unwrap_or(device.as_os_str());
        self.filesystems_dir.join(name)
    }
}

fn escape(path: &Path) -> String {
    path.display().to_string().replace(' ', "\\040")
}

fn move_entries(from: &Path, to: &Path) -> std::io::Result<()> {
    if !from.is_dir() {
        return Ok(());
    }
    std::fs::create_dir_all(to)?;
    for entry in std::fs::read_dir(from)? {
        let entry = entry?;
        std::fs::rename(entry.path(), to.join(entry.file_name()))?;
    }
    Ok(())
}

#[async_trait]
impl HostOps for FakeHost {
    async fn format(&self, device: &Path) -> CinderliteResult<()> {
        self.record(HostCall::Format(device.to_path_buf()));

        let mut file = std::fs::OpenOptions::new().write(true).open(device)?;
        file.seek(SeekFrom::Start(SUPER_MAGIC_OFFSET))?;
        file.write_all(&SUPER_MAGIC)?;
        Ok(())
    }

    async fn mount(&self, device: &Path, target: &Path) -> CinderliteResult<()> {
        self.record(HostCall::Mount {
            device: device.to_path_buf(),
            target: target.to_path_buf(),
        });

        if *self.fail_mount.lock() {
            return Err(CinderliteError::Os(format!(
                "mount syscall failed for {} on {}: EINVAL",
                device.display(),
                target.display()
            )));
        }
        if !target.is_dir() {
            return Err(CinderliteError::Os(format!(
                "mount target {} does not exist",
                target.display()
            )));
        }

        let mut table = std::fs::OpenOptions::new()
            .append(true)
            .open(&self.mounts_file)?;
        writeln!(
            table,
            "{} {} ext4 rw,relatime 0 0",
            escape(device),
            escape(target)
        )?;
        move_entries(&self.filesystem_of(device), target)?;
        Ok(())
    }

    async fn unmount(&self, target: &Path) -> CinderliteResult<()> {
        self.record(HostCall::Unmount(target.to_path_buf()));

        let content = std::fs::read_to_string(&self.mounts_file)?;
        let needle = escape(target);
        let mut source = None;
        let mut kept = Vec::new();
        for line in content.lines() {
            let mut fields = line.split_whitespace();
            let (src, dst) = (fields.next(), fields.next());
            if dst == Some(needle.as_str()) {
                source = src.map(|s| PathBuf::from(s.replace("\\040", " ")));
            } else {
                kept.push(line);
            }
        }
        let Some(device) = source else {
            return Err(CinderliteError::Os(format!(
                "umount syscall failed for {}: EINVAL",
                target.display()
            )));
        };

        move_entries(target, &self.filesystem_of(&device))?;

        let mut rewritten = kept.join("\n");
        rewritten.push('\n');
        std::fs::write(&self.mounts_file, rewritten)?;
        Ok(())
    }

    async fn chown(&self, path: &Path, uid: u32, gid: u32) -> CinderliteResult<()> {
        self.record(HostCall::Chown {
            path: path.to_path_buf(),
            uid,
            gid,
        });
        Ok(())
    }
}
