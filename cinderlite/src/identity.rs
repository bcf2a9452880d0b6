//! Resolving the server ID of the host the driver runs on.
//!
//! Attachments are keyed by server ID, so the ID is needed before any Mount.
//! It comes from the instance metadata service unless the operator passes one.

use cinderlite_shared::errors::{CinderliteError, CinderliteResult};

use crate::runtime::constants::metadata_service;
use crate::volumes::ServerId;

/// Extract the server ID from a metadata service document.
pub fn parse_instance_id(body: &[u8]) -> CinderliteResult<ServerId> {
    let doc: serde_json::Value = serde_json::from_slice(body).map_err(|e| {
        CinderliteError::Config(format!("invalid instance metadata document: {}", e))
    })?;

    match doc.get(metadata_service::ID_FIELD) {
        Some(serde_json::Value::String(id)) if !id.trim().is_empty() => {
            Ok(ServerId::new(id.trim()))
        }
        _ => Err(CinderliteError::Config(format!(
            "instance metadata has no usable {:?} field",
            metadata_service::ID_FIELD
        ))),
    }
}

/// Query the metadata service at `url` for this host's server ID.
#[cfg(feature = "rest")]
pub async fn fetch_instance_id(url: &str) -> CinderliteResult<ServerId> {
    let client = reqwest::Client::builder()
        .timeout(metadata_service::TIMEOUT)
        .build()
        .map_err(|e| CinderliteError::Config(format!("building metadata client: {}", e)))?;

    let response = client.get(url).send().await.map_err(|e| {
        CinderliteError::Config(format!("metadata service {} unreachable: {}", url, e))
    })?;

    let status = response.status();
    if !status.is_success() {
        return Err(CinderliteError::Config(format!(
            "metadata service {} answered {}",
            url, status
        )));
    }

    let body = response.bytes().await.map_err(|e| {
        CinderliteError::Config(format!("reading metadata from {}: {}", url, e))
    })?;

    let id = parse_instance_id(&body)?;
    tracing::debug!(server_id = %id, "Resolved server ID from metadata service");
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_instance_id() {
        let body = br#"{"uuid": "d8e02d56-2648-49a3-bf97-6be8f1204f38", "name": "node-1"}"#;
        assert_eq!(
            parse_instance_id(body).unwrap().as_str(),
            "d8e02d56-2648-49a3-bf97-6be8f1204f38"
        );
    }

    #[test]
    fn test_parse_instance_id_rejects_missing_field() {
        let bodies: [&[u8]; 3] = [br#"{"name": "node-1"}"#, br#"{"uuid": ""}"#, br#"{"uuid": 7}"#];
        for body in bodies {
            let err = parse_instance_id(body).unwrap_err();
            assert!(matches!(err, CinderliteError::Config(_)), "{:?}", err);
        }
    }

    #[test]
    fn test_parse_instance_id_rejects_garbage() {
        assert!(parse_instance_id(b"<html>").is_err());
    }
}
