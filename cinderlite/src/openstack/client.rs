//! Cinder and Nova calls behind [`ControlPlane`].

use std::sync::Arc;

use async_trait::async_trait;
use cinderlite_shared::errors::{CinderliteError, CinderliteResult};
use parking_lot::RwLock;
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::control::{ControlPlane, CreateVolumeRequest, ListFilter};
use crate::openstack::auth::{self, Credentials, Session};
use crate::volumes::{Attachment, ServerId, Volume};

#[derive(Clone, Copy, Debug)]
enum Service {
    BlockStorage,
    Compute,
}

/// REST client for the block storage and compute services.
///
/// Authenticates lazily on first use and once more when a token is rejected.
pub struct OpenStackClient {
    http: reqwest::Client,
    credentials: Credentials,
    session: RwLock<Option<Arc<Session>>>,
}

impl OpenStackClient {
    /// # Errors
    ///
    /// Returns error if the credentials are incomplete.
    pub fn new(credentials: Credentials) -> CinderliteResult<Self> {
        credentials.validate()?;
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| CinderliteError::Config(format!("building HTTP client: {}", e)))?;

        Ok(Self {
            http,
            credentials,
            session: RwLock::new(None),
        })
    }

    /// Authenticate now instead of on the first request.
    pub async fn connect(&self) -> CinderliteResult<Arc<Session>> {
        self.session(true).await
    }

    async fn session(&self, refresh: bool) -> CinderliteResult<Arc<Session>> {
        if !refresh {
            let cached = self.session.read().clone();
            if let Some(session) = cached {
                return Ok(session);
            }
        }

        let session = Arc::new(auth::authenticate(&self.http, &self.credentials).await?);
        *self.session.write() = Some(Arc::clone(&session));
        Ok(session)
    }

    fn endpoint(session: &Session, service: Service, path: &str) -> String {
        let base = match service {
            Service::BlockStorage => &session.block_storage_url,
            Service::Compute => &session.compute_url,
        };
        format!("{}{}", base, path)
    }

    /// Send a request, re-authenticating once on 401.
    ///
    /// `target` is either a path relative to the service endpoint or an
    /// absolute URL (pagination links).
    async fn send(
        &self,
        method: Method,
        service: Service,
        target: &str,
        body: Option<&Value>,
    ) -> CinderliteResult<(StatusCode, Vec<u8>)> {
        let mut refresh = false;
        loop {
            let session = self.session(refresh).await?;
            let url = if target.starts_with("http://") || target.starts_with("https://") {
                target.to_string()
            } else {
                Self::endpoint(&session, service, target)
            };

            let mut request = self
                .http
                .request(method.clone(), &url)
                .header("X-Auth-Token", &session.token)
                .header("Accept", "application/json");
            if let Some(body) = body {
                request = request.json(body);
            }

            let response = request.send().await.map_err(|e| {
                CinderliteError::RemoteApi(format!("{} {} failed: {}", method, url, e))
            })?;
            let status = response.status();

            if status == StatusCode::UNAUTHORIZED && !refresh {
                tracing::debug!(url = %url, "Token rejected, re-authenticating");
                refresh = true;
                continue;
            }

            let bytes = response.bytes().await.map_err(|e| {
                CinderliteError::RemoteApi(format!("reading response of {} {}: {}", method, url, e))
            })?;
            tracing::trace!(method = %method, url = %url, status = %status, "Request done");
            return Ok((status, bytes.to_vec()));
        }
    }

    /// Like `send`, but any non-success status is an error.
    async fn call(
        &self,
        method: Method,
        service: Service,
        target: &str,
        body: Option<&Value>,
    ) -> CinderliteResult<Vec<u8>> {
        let (status, bytes) = self.send(method.clone(), service, target, body).await?;
        if !status.is_success() {
            return Err(status_error(&method, target, status, &bytes));
        }
        Ok(bytes)
    }
}

fn status_error(method: &Method, target: &str, status: StatusCode, body: &[u8]) -> CinderliteError {
    CinderliteError::RemoteApi(format!(
        "{} {} returned {}: {}",
        method,
        target,
        status,
        String::from_utf8_lossy(body).trim()
    ))
}

fn decode<'a, T: Deserialize<'a>>(bytes: &'a [u8], what: &str) -> CinderliteResult<T> {
    serde_json::from_slice(bytes)
        .map_err(|e| CinderliteError::RemoteApi(format!("invalid {} response: {}", what, e)))
}

#[derive(Deserialize)]
struct VolumeEnvelope {
    volume: Volume,
}

#[derive(Deserialize)]
struct VolumePage {
    #[serde(default)]
    volumes: Vec<Volume>,
    #[serde(default)]
    volumes_links: Vec<Link>,
}

impl VolumePage {
    fn next(&self) -> Option<&str> {
        self.volumes_links
            .iter()
            .find(|link| link.rel == "next")
            .map(|link| link.href.as_str())
    }
}

#[derive(Deserialize)]
struct Link {
    href: String,
    rel: String,
}

#[derive(Deserialize)]
struct AttachmentEnvelope {
    #[serde(rename = "volumeAttachment")]
    attachment: NovaAttachment,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct NovaAttachment {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    device: Option<String>,
}

#[async_trait]
impl ControlPlane for OpenStackClient {
    async fn create_volume(&self, request: &CreateVolumeRequest) -> CinderliteResult<Volume> {
        let body = json!({ "volume": request });
        let bytes = self
            .call(Method::POST, Service::BlockStorage, "/volumes", Some(&body))
            .await?;
        Ok(decode::<VolumeEnvelope>(&bytes, "create volume")?.volume)
    }

    async fn get_volume(&self, volume_id: &str) -> CinderliteResult<Option<Volume>> {
        let path = format!("/volumes/{}", volume_id);
        let (status, bytes) = self
            .send(Method::GET, Service::BlockStorage, &path, None)
            .await?;

        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(status_error(&Method::GET, &path, status, &bytes));
        }
        Ok(Some(decode::<VolumeEnvelope>(&bytes, "get volume")?.volume))
    }

    async fn list_volumes(&self, filter: &ListFilter) -> CinderliteResult<Vec<Volume>> {
        let mut volumes = Vec::new();
        let mut target = "/volumes/detail".to_string();

        loop {
            let bytes = self
                .call(Method::GET, Service::BlockStorage, &target, None)
                .await?;
            let page: VolumePage = decode(&bytes, "list volumes")?;
            let next = page.next().map(str::to_string);

            volumes.extend(page.volumes.into_iter().filter(|v| filter.matches(v)));

            match next {
                Some(href) if href != target => target = href,
                _ => break,
            }
        }

        Ok(volumes)
    }

    async fn delete_volume(&self, volume_id: &str) -> CinderliteResult<()> {
        let path = format!("/volumes/{}", volume_id);
        self.call(Method::DELETE, Service::BlockStorage, &path, None)
            .await?;
        Ok(())
    }

    async fn attach_volume(
        &self,
        server: &ServerId,
        volume_id: &str,
    ) -> CinderliteResult<Attachment> {
        let path = format!("/servers/{}/os-volume_attachments", server);
        let body = json!({ "volumeAttachment": { "volumeId": volume_id } });
        let bytes = self
            .call(Method::POST, Service::Compute, &path, Some(&body))
            .await?;
        let nova = decode::<AttachmentEnvelope>(&bytes, "attach volume")?.attachment;

        let mut attachment = Attachment::new(volume_id, server.clone());
        attachment.attachment_id = nova.id;
        attachment.device = nova.device;
        Ok(attachment)
    }

    async fn detach_volume(&self, server: &ServerId, volume_id: &str) -> CinderliteResult<()> {
        let path = format!("/servers/{}/os-volume_attachments/{}", server, volume_id);
        self.call(Method::DELETE, Service::Compute, &path, None)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_volume_page_next_link() {
        let page: VolumePage = serde_json::from_str(
            r#"{"volumes": [{"id": "a", "name": "ns-a", "status": "available"}],
                "volumes_links": [{"href": "https://one.example:8776/v3/p/volumes/detail?marker=a", "rel": "next"}]}"#,
        )
        .unwrap();
        assert_eq!(page.volumes.len(), 1);
        assert_eq!(
            page.next(),
            Some("https://one.example:8776/v3/p/volumes/detail?marker=a")
        );

        let last: VolumePage = serde_json::from_str(r#"{"volumes": []}"#).unwrap();
        assert_eq!(last.next(), None);
    }

    #[test]
    fn test_nova_attachment_decoding() {
        let envelope: AttachmentEnvelope = serde_json::from_str(
            r#"{"volumeAttachment": {"device": "/dev/vdb", "id": "vol-1",
                "serverId": "srv-1", "volumeId": "vol-1"}}"#,
        )
        .unwrap();
        assert_eq!(envelope.attachment.device.as_deref(), Some("/dev/vdb"));
        assert_eq!(envelope.attachment.id.as_deref(), Some("vol-1"));
    }

    #[test]
    fn test_volume_envelope_with_nulls() {
        let envelope: VolumeEnvelope = serde_json::from_str(
            r#"{"volume": {"id": "v", "name": null, "size": 20, "status": "creating",
                "availability_zone": "nova", "multiattach": false, "attachments": [],
                "metadata": {"docker-volume-driver:uid": "1000"}, "description": null,
                "volume_type": "ssd", "consistencygroup_id": null,
                "created_at": "2024-01-01T00:00:00.000000", "updated_at": null}}"#,
        )
        .unwrap();
        assert_eq!(envelope.volume.name, "");
        assert_eq!(envelope.volume.size, 20);
        assert_eq!(envelope.volume.volume_type.as_deref(), Some("ssd"));
        assert_eq!(envelope.volume.metadata["docker-volume-driver:uid"], "1000");
    }

    #[test]
    fn test_new_rejects_incomplete_credentials() {
        let err = OpenStackClient::new(Credentials::default()).err().unwrap();
        assert!(matches!(err, CinderliteError::Config(_)));
    }
}
