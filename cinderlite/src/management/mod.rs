//! Volume lifecycle management.
//!
//! # Overview
//!
//! - **VolumeManager**: Create, Mount, Unmount, Remove, Path, Get and List
//!   for named volumes, re-deriving local state on every call
//! - **VolumeInfo** / **VolumeSummary**: What Get and List report
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use cinderlite::{DriverOptions, LinuxHost, ServerId, VolumeManager};
//! # use cinderlite::ControlPlane;
//!
//! # async fn run(control: Arc<dyn ControlPlane>) -> cinderlite::CinderliteResult<()> {
//! let manager = VolumeManager::new(
//!     DriverOptions::default(),
//!     ServerId::new("2f1c5e4a-0000-4000-8000-000000000001"),
//!     control,
//!     Arc::new(LinuxHost::new()),
//! )?;
//!
//! manager.create("web-data", Default::default()).await?;
//! let data_dir = manager.mount("web-data").await?;
//! println!("mounted at {}", data_dir.display());
//! # Ok(())
//! # }
//! ```

mod manager;

pub use crate::volumes::{VolumeInfo, VolumeSummary};
pub use manager::VolumeManager;
