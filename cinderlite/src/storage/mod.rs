//! Local storage operations.
//!
//! - `DeviceResolver`: volume ID → local block device, by udev serial
//! - `MountTable`: live mount state under the mount root
//! - `has_ext4_signature`: superblock probe gating the formatter
//! - `HostOps` / `LinuxHost`: format, mount, unmount and chown

mod device;
mod ext4;
mod host;
mod mounts;

pub use device::DeviceResolver;
pub use ext4::has_ext4_signature;
pub(crate) use host::blocking;
pub use host::{HostOps, LinuxHost};
pub use mounts::{MountEntry, MountTable};
