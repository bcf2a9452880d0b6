//! cinderlite shared code.
//!
//! Error type, constants, and the plugin wire protocol used by both the
//! core driver (`cinderlite`) and the plugin daemon.

pub mod constants;
pub mod errors;
pub mod protocol;

pub use errors::{CinderliteError, CinderliteResult};
