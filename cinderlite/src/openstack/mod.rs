//! OpenStack REST backend for [`ControlPlane`](crate::ControlPlane).
//!
//! Keystone v3 password authentication, Cinder v3 for volumes and Nova
//! volume attachments for attach/detach. Only the calls the driver needs.

mod auth;
mod client;

pub use auth::{Credentials, Session};
pub use client::OpenStackClient;
