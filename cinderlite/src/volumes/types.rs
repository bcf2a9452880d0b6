use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Deserializer, Serialize};

// ============================================================================
// IDENTITY
// ============================================================================

/// Server ID of a host in the control plane.
///
/// The driver's own ID is resolved once at startup and handed to the manager.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServerId(String);

impl ServerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ServerId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

// ============================================================================
// REMOTE VOLUME
// ============================================================================

/// A volume as reported by the control plane.
///
/// Field names match the block storage API so the REST client can decode
/// responses straight into this type.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Volume {
    pub id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    /// Size in GiB
    #[serde(default, deserialize_with = "null_as_default")]
    pub size: u32,
    #[serde(default, deserialize_with = "null_as_default")]
    pub availability_zone: String,
    #[serde(default)]
    pub volume_type: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, rename = "consistencygroup_id")]
    pub consistency_group_id: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub status: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub multiattach: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub attachments: Vec<Attachment>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub metadata: HashMap<String, String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

impl Volume {
    /// Whether `server` holds an attachment of this volume.
    pub fn is_attached_to(&self, server: &ServerId) -> bool {
        self.attachments.iter().any(|a| a.server_id == *server)
    }

    /// Attachments held by hosts other than `server`.
    pub fn foreign_attachments<'a>(
        &'a self,
        server: &'a ServerId,
    ) -> impl Iterator<Item = &'a Attachment> + 'a {
        self.attachments.iter().filter(move |a| a.server_id != *server)
    }
}

/// Association of a volume with a host.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub server_id: ServerId,
    #[serde(default, deserialize_with = "null_as_default")]
    pub volume_id: String,
    #[serde(default)]
    pub attachment_id: Option<String>,
    /// Device name guessed by the control plane. Not trusted; devices are
    /// resolved by serial number.
    #[serde(default)]
    pub device: Option<String>,
}

impl Attachment {
    pub fn new(volume_id: impl Into<String>, server_id: ServerId) -> Self {
        Self {
            server_id,
            volume_id: volume_id.into(),
            attachment_id: None,
            device: None,
        }
    }
}

/// The block storage API sends `null` for unset names, zones and the like.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

// ============================================================================
// OPERATION INPUT / OUTPUT
// ============================================================================

/// Create options as received from the caller.
///
/// Numeric values stay strings until the manager validates them, so a bad
/// value is reported as a validation error before any remote call.
/// Empty strings count as absent.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CreateOptions {
    pub size: Option<String>,
    pub availability_zone: Option<String>,
    pub volume_type: Option<String>,
    pub snapshot_id: Option<String>,
    pub backup_id: Option<String>,
    pub description: Option<String>,
    pub consistency_group_id: Option<String>,
    pub uid: Option<String>,
    pub gid: Option<String>,
    pub mode: Option<String>,
}

/// Result of Get.
#[derive(Clone, Debug, PartialEq)]
pub struct VolumeInfo {
    pub name: String,
    /// Data directory when mounted on this host
    pub mountpoint: Option<PathBuf>,
    pub volume: Volume,
}

/// One entry of List.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VolumeSummary {
    pub name: String,
    pub mountpoint: Option<PathBuf>,
}

/// Visibility of the volumes a driver manages.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    /// Volumes exist once for the whole cluster
    Global,
    /// Volumes exist per host
    Local,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Global => "global",
            Scope::Local => "local",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Capabilities {
    pub scope: Scope,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_volume_decodes_block_storage_json() {
        let body = r#"{
            "id": "6edbc2f4-1507-44f8-ac0d-eed1d2608d38",
            "name": "ns-data",
            "size": 20,
            "availability_zone": "nova",
            "volume_type": "ssd",
            "status": "in-use",
            "multiattach": false,
            "consistencygroup_id": null,
            "attachments": [{
                "server_id": "d6c1b4fb-f0a4-4e57-a7b5-2c8cb7d1f8f6",
                "attachment_id": "3b8b6631",
                "volume_id": "6edbc2f4-1507-44f8-ac0d-eed1d2608d38",
                "device": "/dev/sdb",
                "host_name": null
            }],
            "metadata": {"docker-volume-driver:uid": "1000"},
            "created_at": "2024-05-02T10:11:12.000000",
            "updated_at": null
        }"#;

        let vol: Volume = serde_json::from_str(body).unwrap();
        assert_eq!(vol.name, "ns-data");
        assert_eq!(vol.size, 20);
        assert_eq!(vol.volume_type.as_deref(), Some("ssd"));
        assert_eq!(vol.attachments.len(), 1);
        assert_eq!(vol.metadata["docker-volume-driver:uid"], "1000");

        let host = ServerId::new("d6c1b4fb-f0a4-4e57-a7b5-2c8cb7d1f8f6");
        assert!(vol.is_attached_to(&host));
        assert_eq!(vol.foreign_attachments(&host).count(), 0);
        assert_eq!(vol.foreign_attachments(&ServerId::new("other")).count(), 1);
    }

    #[test]
    fn test_scope_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Scope::Global).unwrap(), "\"global\"");
        assert_eq!(Scope::Local.as_str(), "local");
    }
}
