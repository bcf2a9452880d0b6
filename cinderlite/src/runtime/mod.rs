//! Driver configuration, on-disk layout and per-volume locking.

pub mod constants;
pub mod layout;
pub mod lock;
pub mod options;
