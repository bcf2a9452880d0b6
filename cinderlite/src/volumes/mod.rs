//! Volume domain types.
//!
//! - `Volume` / `Attachment`: the control plane's view of a volume
//! - `ServerId`: identity of a host in the control plane
//! - `CreateOptions`: caller input for Create, validated by the manager
//! - `DirPermissions`: ownership and mode of the data directory, carried in
//!   volume metadata

mod permissions;
mod types;

pub use permissions::DirPermissions;
pub use types::{
    Attachment, Capabilities, CreateOptions, Scope, ServerId, Volume, VolumeInfo, VolumeSummary,
};
