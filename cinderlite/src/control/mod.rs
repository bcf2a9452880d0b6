//! Control-plane seam.
//!
//! The lifecycle manager talks to the remote block storage / compute services
//! only through [`ControlPlane`]. The REST implementation lives in
//! `crate::openstack`; tests use an in-memory fake that simulates eventual
//! consistency.

mod attach;
mod poll;

use std::collections::HashMap;

use async_trait::async_trait;
use cinderlite_shared::errors::{CinderliteError, CinderliteResult};
use serde::Serialize;

use crate::volumes::{Attachment, ServerId, Volume};

pub use attach::{AttachOrchestrator, DetachFilter};
pub use poll::Poller;

/// Parameters of a volume creation.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct CreateVolumeRequest {
    pub name: String,
    /// Size in GiB
    pub size: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub availability_zone: Option<String>,
    #[serde(rename = "consistencygroup_id", skip_serializing_if = "Option::is_none")]
    pub consistency_group_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume_type: Option<String>,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
}

/// Restricts `list_volumes` results.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ListFilter {
    /// Keep only volumes whose name starts with this prefix
    pub name_prefix: Option<String>,
}

impl ListFilter {
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            name_prefix: Some(prefix.into()),
        }
    }

    pub fn matches(&self, volume: &Volume) -> bool {
        match &self.name_prefix {
            Some(prefix) => volume.name.starts_with(prefix.as_str()),
            None => true,
        }
    }
}

/// Operations the driver needs from the remote block storage and compute
/// services.
///
/// Mutating calls return once the request is accepted; the effect shows up
/// in reads later.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    async fn create_volume(&self, request: &CreateVolumeRequest) -> CinderliteResult<Volume>;

    /// `Ok(None)` when no volume has that ID.
    async fn get_volume(&self, volume_id: &str) -> CinderliteResult<Option<Volume>>;

    /// All volumes matching `filter`, across pages.
    async fn list_volumes(&self, filter: &ListFilter) -> CinderliteResult<Vec<Volume>>;

    async fn delete_volume(&self, volume_id: &str) -> CinderliteResult<()>;

    /// Ask the compute service to attach `volume_id` to `server`.
    async fn attach_volume(
        &self,
        server: &ServerId,
        volume_id: &str,
    ) -> CinderliteResult<Attachment>;

    /// Ask the compute service to detach `volume_id` from `server`.
    async fn detach_volume(&self, server: &ServerId, volume_id: &str) -> CinderliteResult<()>;

    /// Poll until the volume reaches `status`.
    ///
    /// Fails fast if the volume enters `error` or disappears.
    async fn wait_for_status(
        &self,
        volume_id: &str,
        status: &str,
        poller: &Poller,
    ) -> CinderliteResult<Volume> {
        let what = format!("volume {} reaching status {}", volume_id, status);
        poller
            .until(&what, || async move {
                match self.get_volume(volume_id).await? {
                    Some(volume) if volume.status == status => Ok(Some(volume)),
                    Some(volume) if volume.status == "error" => Err(CinderliteError::RemoteApi(
                        format!("volume {} is in error status", volume_id),
                    )),
                    Some(_) => Ok(None),
                    None => Err(CinderliteError::NotFound(format!(
                        "volume {} disappeared while waiting for status {}",
                        volume_id, status
                    ))),
                }
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_filter() {
        let vol = Volume {
            id: "1".to_string(),
            name: "ns-data".to_string(),
            ..Default::default()
        };
        assert!(ListFilter::default().matches(&vol));
        assert!(ListFilter::with_prefix("ns-").matches(&vol));
        assert!(!ListFilter::with_prefix("other-").matches(&vol));
    }

    #[test]
    fn test_create_request_serialization_skips_unset() {
        let req = CreateVolumeRequest {
            name: "ns-a".to_string(),
            size: 20,
            consistency_group_id: Some("cg".to_string()),
            ..Default::default()
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"name": "ns-a", "size": 20, "consistencygroup_id": "cg"})
        );
    }
}
