//! Fakes and fixtures for driver tests.
//!
//! - [`HostTree`]: temporary sysfs/udev/dev/mount-table layout
//! - [`FakeControlPlane`]: in-memory control plane with lagging reads
//! - [`FakeHost`]: host operations recorded instead of performed
//! - [`TestContext`]: a `VolumeManager` wired to all three

pub mod control;
pub mod host;
pub mod tree;

use std::sync::Arc;

use cinderlite::{DriverOptions, ServerId, VolumeManager};

pub use control::{FakeControlPlane, Lags, Op};
pub use host::{FakeHost, HostCall};
pub use tree::HostTree;

/// Server ID of the host under test.
pub const LOCAL_SERVER: &str = "0d4b9d7e-5f4c-4a8e-9c38-2f7e0a6b1c11";

/// Server ID of another host sharing the control plane.
pub const OTHER_SERVER: &str = "a3e1c2f0-7b6d-4e5f-8a9b-0c1d2e3f4a5b";

/// Isolated manager with fakes and automatic cleanup.
pub struct TestContext {
    pub manager: Arc<VolumeManager>,
    pub control: Arc<FakeControlPlane>,
    pub host: Arc<FakeHost>,
    pub tree: Arc<HostTree>,
    pub server_id: ServerId,
}

impl TestContext {
    pub fn new() -> Self {
        Self::with_options(|_| {})
    }

    /// Build a context after letting `configure` adjust the driver options.
    pub fn with_options(configure: impl FnOnce(&mut DriverOptions)) -> Self {
        let tree = Arc::new(HostTree::new());
        let server_id = ServerId::new(LOCAL_SERVER);
        let control = Arc::new(FakeControlPlane::new(server_id.clone(), Arc::clone(&tree)));
        let host = Arc::new(FakeHost::new(tree.mounts_file(), tree.filesystems_dir()));

        let mut options = tree.options();
        configure(&mut options);

        let manager = VolumeManager::new(
            options,
            server_id.clone(),
            Arc::clone(&control) as Arc<dyn cinderlite::ControlPlane>,
            Arc::clone(&host) as Arc<dyn cinderlite::HostOps>,
        )
        .expect("Failed to create volume manager");

        Self {
            manager: Arc::new(manager),
            control,
            host,
            tree,
            server_id,
        }
    }

    pub fn other_server(&self) -> ServerId {
        ServerId::new(OTHER_SERVER)
    }
}

impl Default for TestContext {
    fn default() -> Self {
        Self::new()
    }
}
