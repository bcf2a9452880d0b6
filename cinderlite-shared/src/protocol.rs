//! Volume plugin wire protocol.
//!
//! Requests and responses exchanged with the container engine over the
//! plugin socket. Field names follow the engine's PascalCase convention.
//! Errors travel in-band through the `Err` field; an empty string means success.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};

/// `/Plugin.Activate` response.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ActivateResponse {
    pub implements: Vec<String>,
}

/// Options accepted by `/VolumeDriver.Create` (`-o key=value` on the CLI).
///
/// Everything arrives as a string. Numeric values are validated by the driver.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CreateOpts {
    #[serde(default, deserialize_with = "string_or_number")]
    pub size: Option<String>,
    #[serde(default)]
    pub availability_zone: Option<String>,
    #[serde(default, rename = "consistency_group")]
    pub consistency_group_id: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, rename = "source_snapshot")]
    pub snapshot_id: Option<String>,
    #[serde(default, rename = "source_backup")]
    pub backup_id: Option<String>,
    #[serde(default)]
    pub volume_type: Option<String>,
    #[serde(default, deserialize_with = "string_or_number")]
    pub uid: Option<String>,
    #[serde(default, deserialize_with = "string_or_number")]
    pub gid: Option<String>,
    #[serde(default, deserialize_with = "string_or_number")]
    pub mode: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CreateRequest {
    pub name: String,
    #[serde(default)]
    pub opts: Option<CreateOpts>,
}

/// Request carrying only a volume name (Remove, Path, Get).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NameRequest {
    pub name: String,
}

/// Mount and Unmount requests also carry the caller's mount ID.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MountRequest {
    pub name: String,
    #[serde(default, rename = "ID")]
    pub id: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ErrResponse {
    pub err: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MountpointResponse {
    pub mountpoint: String,
    pub err: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct WireVolume {
    pub name: String,
    pub mountpoint: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub status: BTreeMap<String, serde_json::Value>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GetResponse {
    pub volume: WireVolume,
    pub err: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ListResponse {
    pub volumes: Vec<WireVolume>,
    pub err: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Capability {
    pub scope: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CapabilitiesResponse {
    pub capabilities: Capability,
}

/// Accept `"1000"`, `1000` or `null` for options the engine may send either way.
fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    match value {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::String(s)) => Ok(Some(s)),
        Some(serde_json::Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(serde::de::Error::custom(format!(
            "expected string or number, got {}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_request_with_string_opts() {
        let body = r#"{"Name":"ns-vol1","Opts":{"size":"30","uid":"1000","mode":"750","source_snapshot":"snap-1"}}"#;
        let req: CreateRequest = serde_json::from_str(body).unwrap();
        let opts = req.opts.unwrap();

        assert_eq!(req.name, "ns-vol1");
        assert_eq!(opts.size.as_deref(), Some("30"));
        assert_eq!(opts.uid.as_deref(), Some("1000"));
        assert_eq!(opts.gid, None);
        assert_eq!(opts.mode.as_deref(), Some("750"));
        assert_eq!(opts.snapshot_id.as_deref(), Some("snap-1"));
    }

    #[test]
    fn test_create_request_numeric_uid_and_null_opts() {
        let req: CreateRequest =
            serde_json::from_str(r#"{"Name":"a","Opts":{"uid":1000,"gid":null}}"#).unwrap();
        let opts = req.opts.unwrap();
        assert_eq!(opts.uid.as_deref(), Some("1000"));
        assert_eq!(opts.gid, None);

        let req: CreateRequest = serde_json::from_str(r#"{"Name":"a","Opts":null}"#).unwrap();
        assert!(req.opts.is_none());
    }

    #[test]
    fn test_create_opts_reject_bool_uid() {
        let res: Result<CreateRequest, _> =
            serde_json::from_str(r#"{"Name":"a","Opts":{"uid":true}}"#);
        assert!(res.is_err());
    }

    #[test]
    fn test_mount_request_id_field() {
        let req: MountRequest = serde_json::from_str(r#"{"Name":"v","ID":"abc"}"#).unwrap();
        assert_eq!(req.id, "abc");
    }

    #[test]
    fn test_list_response_omits_empty_status() {
        let resp = ListResponse {
            volumes: vec![WireVolume {
                name: "ns-a".to_string(),
                mountpoint: String::new(),
                status: BTreeMap::new(),
            }],
            err: String::new(),
        };
        let json = serde_json::to_string(&resp).unwrap();
        assert_eq!(json, r#"{"Volumes":[{"Name":"ns-a","Mountpoint":""}],"Err":""}"#);
    }

    #[test]
    fn test_capabilities_shape() {
        let resp = CapabilitiesResponse {
            capabilities: Capability {
                scope: "global".to_string(),
            },
        };
        assert_eq!(
            serde_json::to_string(&resp).unwrap(),
            r#"{"Capabilities":{"Scope":"global"}}"#
        );
    }
}
