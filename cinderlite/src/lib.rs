//! cinderlite - remote block storage volumes as local mountpoints.
//!
//! The driver attaches OpenStack block storage volumes to the host it runs
//! on, formats them with ext4 when they are blank, mounts them under a fixed
//! mount root, and hands back a `data` directory inside the mount.
//!
//! Local state is never persisted. Every operation re-derives it from the
//! kernel mount table, the udev database, and the control plane's view of
//! the volume's attachments.

#[cfg(not(target_os = "linux"))]
compile_error!("cinderlite is Linux-only; build with a Linux target");

pub mod control;
pub mod identity;
pub mod management;
#[cfg(feature = "rest")]
pub mod openstack;
pub mod runtime;
pub mod storage;
pub mod util;
pub mod volumes;

pub use cinderlite_shared::errors::{CinderliteError, CinderliteResult};
pub use control::{ControlPlane, CreateVolumeRequest, ListFilter, Poller};
pub use management::VolumeManager;
pub use runtime::options::DriverOptions;
pub use storage::{HostOps, LinuxHost};
pub use util::init_logging;
pub use volumes::{
    Attachment, Capabilities, CreateOptions, Scope, ServerId, Volume, VolumeInfo, VolumeSummary,
};
