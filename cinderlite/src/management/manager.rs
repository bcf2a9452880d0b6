//! Volume lifecycle: Create, Mount, Unmount, Remove, Path, Get, List.

use std::collections::HashSet;
use std::io::ErrorKind;
use std::os::unix::fs::{DirBuilderExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use cinderlite_shared::errors::{CinderliteError, CinderliteResult};

use crate::control::{
    AttachOrchestrator, ControlPlane, CreateVolumeRequest, DetachFilter, ListFilter, Poller,
};
use crate::runtime::constants::status;
use crate::runtime::layout::MountLayout;
use crate::runtime::lock::{VolumeLockGuard, VolumeLocks};
use crate::runtime::options::DriverOptions;
use crate::storage::{DeviceResolver, HostOps, MountTable, blocking, has_ext4_signature};
use crate::volumes::{
    Capabilities, CreateOptions, DirPermissions, Scope, ServerId, Volume, VolumeInfo,
    VolumeSummary,
};

/// Top-level volume state machine.
///
/// Holds no record of what it mounted or attached. Each operation reads the
/// kernel mount table, the udev database and the control plane, then acts.
/// Mount, Unmount and Remove hold a per-volume lock so two requests for the
/// same volume cannot interleave between observing and acting.
///
/// Shared across request handlers via `Arc`.
pub struct VolumeManager {
    options: DriverOptions,
    layout: MountLayout,
    mounts: MountTable,
    resolver: DeviceResolver,
    control: Arc<dyn ControlPlane>,
    host: Arc<dyn HostOps>,
    orchestrator: AttachOrchestrator,
    poller: Poller,
    locks: VolumeLocks,
}

impl VolumeManager {
    /// Create a manager for the host identified by `server_id`.
    ///
    /// # Errors
    ///
    /// Returns error if the options are invalid or the mount root cannot be
    /// created.
    pub fn new(
        options: DriverOptions,
        server_id: ServerId,
        control: Arc<dyn ControlPlane>,
        host: Arc<dyn HostOps>,
    ) -> CinderliteResult<Self> {
        options.validate()?;

        let layout = MountLayout::new(options.mount_root.clone());
        layout.prepare()?;

        let mounts = MountTable::new(options.mounts_file.clone(), options.mount_root.clone());
        let resolver = DeviceResolver::from_options(&options);
        let poller = Poller::from_options(&options);
        let orchestrator = AttachOrchestrator::new(
            Arc::clone(&control),
            server_id,
            resolver.clone(),
            poller,
            options.device_settle,
        );

        tracing::debug!(
            server_id = %orchestrator.server_id(),
            mount_root = %layout.mount_root().display(),
            prefix = %options.volume_prefix,
            "initialized volume manager"
        );

        Ok(Self {
            options,
            layout,
            mounts,
            resolver,
            control,
            host,
            orchestrator,
            poller,
            locks: VolumeLocks::new(),
        })
    }

    pub fn server_id(&self) -> &ServerId {
        self.orchestrator.server_id()
    }

    pub fn options(&self) -> &DriverOptions {
        &self.options
    }

    pub fn capabilities(&self) -> Capabilities {
        Capabilities {
            scope: Scope::Global,
        }
    }

    // ========================================================================
    // CREATE / REMOVE
    // ========================================================================

    /// Create a volume and wait until it is available.
    ///
    /// Everything the caller sent is validated before the first remote call.
    /// If the wait times out the volume is left as it is.
    pub async fn create(&self, name: &str, opts: CreateOptions) -> CinderliteResult<Volume> {
        if name.is_empty() {
            return Err(CinderliteError::Validation(
                "volume name must not be empty".to_string(),
            ));
        }
        if !name.starts_with(&self.options.volume_prefix) {
            return Err(CinderliteError::Validation(format!(
                "volume name should be prefixed with {}",
                self.options.volume_prefix
            )));
        }

        let size = match non_empty(opts.size) {
            None => self.options.default_size_gb,
            Some(raw) => match raw.parse::<u32>() {
                Ok(size) if size > 0 => size,
                Ok(_) => {
                    return Err(CinderliteError::Validation(format!(
                        "volume size must be positive, got {}",
                        raw
                    )));
                }
                Err(e) => {
                    return Err(CinderliteError::Validation(format!(
                        "could not convert volume size ({}) to an integer: {}",
                        raw, e
                    )));
                }
            },
        };

        let metadata = DirPermissions::metadata_from_options(
            opts.uid.as_deref(),
            opts.gid.as_deref(),
            opts.mode.as_deref(),
        )?;

        let request = CreateVolumeRequest {
            name: name.to_string(),
            size,
            availability_zone: non_empty(opts.availability_zone),
            consistency_group_id: non_empty(opts.consistency_group_id),
            description: non_empty(opts.description),
            snapshot_id: non_empty(opts.snapshot_id),
            backup_id: non_empty(opts.backup_id),
            volume_type: non_empty(opts.volume_type),
            metadata,
        };

        let volume = self.control.create_volume(&request).await.map_err(|e| {
            CinderliteError::RemoteApi(format!("could not create volume {}: {}", name, e))
        })?;

        tracing::info!(volume = name, volume_id = %volume.id, size, "Volume created, waiting for it to become available");

        self.control
            .wait_for_status(&volume.id, status::AVAILABLE, &self.poller)
            .await
            .map_err(|e| {
                tracing::error!(volume = name, volume_id = %volume.id, "Volume did not become available: {}", e);
                e
            })
    }

    /// Delete a volume that is not mounted on this host.
    ///
    /// Attachments left behind by Unmount (here or on other hosts) are removed
    /// first. A timeout while waiting for the deletion to show is reported,
    /// but the delete request has already been accepted.
    pub async fn remove(&self, name: &str) -> CinderliteResult<()> {
        let (_guard, volume) = self.lock_volume(name).await?;
        let mountpoint = self.layout.mountpoint(&volume.id);

        if self.mounts.is_mounted(&mountpoint)? {
            return Err(CinderliteError::Conflict(format!(
                "volume {} is still mounted",
                name
            )));
        }

        if !volume.attachments.is_empty() {
            self.orchestrator.detach(&volume, DetachFilter::All).await?;
        }

        self.control.delete_volume(&volume.id).await.map_err(|e| {
            CinderliteError::RemoteApi(format!("failed to delete volume {}: {}", name, e))
        })?;

        let what = format!("deletion of volume {}", volume.id);
        let control = &self.control;
        let volume_id = volume.id.as_str();
        self.poller
            .until(&what, || async move {
                Ok(control.get_volume(volume_id).await?.is_none().then_some(()))
            })
            .await?;

        tracing::info!(volume = name, volume_id = %volume.id, "Volume removed");
        Ok(())
    }

    // ========================================================================
    // MOUNT / UNMOUNT
    // ========================================================================

    /// Make the volume available on this host and return its data directory.
    ///
    /// Steps already done are detected and skipped: a volume whose device is
    /// already visible is not re-attached, a formatted device is not
    /// re-formatted, a mounted mountpoint is not re-mounted, and an existing
    /// data directory keeps its ownership.
    pub async fn mount(&self, name: &str) -> CinderliteResult<PathBuf> {
        let (_guard, volume) = self.lock_volume(name).await?;

        let resolver = self.resolver.clone();
        let volume_id = volume.id.clone();
        let probe = blocking("device probe", move || match resolver.resolve(&volume_id) {
            Err(CinderliteError::NotFound(_)) => Ok(None),
            other => other.map(Some),
        })
        .await;
        let local_device = match probe {
            Ok(device) => device,
            Err(e) => {
                tracing::error!(volume_id = %volume.id, "Failed to probe if volume is already attached: {}", e);
                return Err(e);
            }
        };

        if !volume.multiattach && volume.foreign_attachments(self.server_id()).next().is_some() {
            tracing::info!(volume_id = %volume.id, "Detaching volume from other servers");
            self.orchestrator
                .detach(&volume, DetachFilter::ForeignOnly)
                .await?;
        }

        let device = match local_device {
            Some(device) => {
                tracing::debug!(volume_id = %volume.id, device = %device.display(), "Volume already attached");
                device
            }
            None => self.orchestrator.attach(&volume).await?,
        };

        let probed = device.clone();
        if !blocking("filesystem probe", move || has_ext4_signature(&probed)).await? {
            tracing::info!(volume_id = %volume.id, device = %device.display(), "No filesystem detected. Formatting...");
            self.host.format(&device).await?;
        }

        let mountpoint = self.layout.mountpoint(&volume.id);
        if !self.mounts.is_mounted(&mountpoint)? {
            tracing::debug!(volume_id = %volume.id, mountpoint = %mountpoint.display(), "Mounting the filesystem...");
            self.layout.create_mountpoint(&volume.id)?;
            self.host.mount(&device, &mountpoint).await.map_err(|e| {
                CinderliteError::Os(format!("failed to mount volume {}: {}", name, e))
            })?;
        }

        let data_dir = self.layout.data_dir(&volume.id);
        self.ensure_data_dir(&volume, &data_dir).await?;

        tracing::info!(volume = name, volume_id = %volume.id, mountpoint = %data_dir.display(), "Volume mounted");
        Ok(data_dir)
    }

    /// Unmount the volume. The attachment is kept so the next Mount on this
    /// host skips the attach round-trip.
    pub async fn unmount(&self, name: &str) -> CinderliteResult<()> {
        let (_guard, volume) = self.lock_volume(name).await?;
        let mountpoint = self.layout.mountpoint(&volume.id);

        if !self.mounts.is_mounted(&mountpoint)? {
            return Err(CinderliteError::Conflict(format!(
                "volume {} is not mounted",
                name
            )));
        }

        self.host.unmount(&mountpoint).await.map_err(|e| {
            CinderliteError::Os(format!("unmounting volume {}: {}", name, e))
        })?;

        if let Err(e) = std::fs::remove_dir(&mountpoint) {
            tracing::warn!(
                mountpoint = %mountpoint.display(),
                "failed to remove mountpoint directory after unmount: {}",
                e
            );
        }

        tracing::info!(volume = name, volume_id = %volume.id, "Volume unmounted");
        Ok(())
    }

    // ========================================================================
    // READ-ONLY
    // ========================================================================

    /// Data directory if the volume is mounted here, `None` otherwise.
    pub async fn path(&self, name: &str) -> CinderliteResult<Option<PathBuf>> {
        let volume = self.find_volume(name).await?;
        self.mounted_data_dir(&volume.id)
    }

    pub async fn get(&self, name: &str) -> CinderliteResult<VolumeInfo> {
        let volume = self.find_volume(name).await?;
        let mountpoint = self.mounted_data_dir(&volume.id)?;
        Ok(VolumeInfo {
            name: volume.name.clone(),
            mountpoint,
            volume,
        })
    }

    /// Every volume carrying the prefix, with its data directory if mounted here.
    pub async fn list(&self) -> CinderliteResult<Vec<VolumeSummary>> {
        let volumes = self.list_volumes().await?;
        let mounted: HashSet<PathBuf> = self
            .mounts
            .entries()?
            .into_iter()
            .map(|entry| entry.target)
            .collect();

        Ok(volumes
            .into_iter()
            .map(|volume| {
                let mountpoint = mounted
                    .contains(&self.layout.mountpoint(&volume.id))
                    .then(|| self.layout.data_dir(&volume.id));
                VolumeSummary {
                    name: volume.name,
                    mountpoint,
                }
            })
            .collect())
    }

    // ========================================================================
    // HELPERS
    // ========================================================================

    async fn list_volumes(&self) -> CinderliteResult<Vec<Volume>> {
        let filter = ListFilter::with_prefix(self.options.volume_prefix.clone());
        let mut volumes = self.control.list_volumes(&filter).await.map_err(|e| {
            CinderliteError::RemoteApi(format!("listing volumes: {}", e))
        })?;
        volumes.retain(|volume| filter.matches(volume));
        Ok(volumes)
    }

    /// Linear scan of the prefixed volumes; names are not indexed remotely.
    async fn find_volume(&self, name: &str) -> CinderliteResult<Volume> {
        self.list_volumes()
            .await
            .map_err(|e| CinderliteError::RemoteApi(format!("failed to find volume {}: {}", name, e)))?
            .into_iter()
            .find(|volume| volume.name == name)
            .ok_or_else(|| CinderliteError::NotFound(format!("volume {} not found", name)))
    }

    /// Find the volume, take its lock, and re-read it so every decision uses
    /// state observed under the lock.
    async fn lock_volume(&self, name: &str) -> CinderliteResult<(VolumeLockGuard, Volume)> {
        let found = self.find_volume(name).await?;
        let guard = self.locks.acquire(&found.id).await;

        let volume = self
            .control
            .get_volume(&found.id)
            .await?
            .ok_or_else(|| CinderliteError::NotFound(format!("volume {} not found", name)))?;

        Ok((guard, volume))
    }

    fn mounted_data_dir(&self, volume_id: &str) -> CinderliteResult<Option<PathBuf>> {
        let mountpoint = self.layout.mountpoint(volume_id);
        Ok(self
            .mounts
            .is_mounted(&mountpoint)?
            .then(|| self.layout.data_dir(volume_id)))
    }

    /// Create the data directory with the ownership and mode requested at
    /// Create. Runs once per volume: an existing directory is left alone.
    async fn ensure_data_dir(&self, volume: &Volume, data_dir: &Path) -> CinderliteResult<()> {
        match std::fs::symlink_metadata(data_dir) {
            Ok(_) => return Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                return Err(CinderliteError::Os(format!(
                    "stat {} failed: {}",
                    data_dir.display(),
                    e
                )));
            }
        }

        let perms = DirPermissions::from_metadata(&volume.metadata)?;
        tracing::debug!(
            volume_id = %volume.id,
            "Create the datadir with filemode and perms: {:#o} {}:{}",
            perms.mode,
            perms.uid,
            perms.gid
        );

        std::fs::DirBuilder::new()
            .mode(perms.mode)
            .create(data_dir)
            .map_err(|e| {
                CinderliteError::Os(format!("mkdir {} failed: {}", data_dir.display(), e))
            })?;

        self.host.chown(data_dir, perms.uid, perms.gid).await?;

        // DirBuilder's mode is filtered by the umask.
        std::fs::set_permissions(data_dir, std::fs::Permissions::from_mode(perms.mode)).map_err(
            |e| CinderliteError::Os(format!("chmod {} failed: {}", data_dir.display(), e)),
        )?;

        Ok(())
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}
