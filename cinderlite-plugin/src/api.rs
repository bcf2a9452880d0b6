//! Plugin protocol routing.
//!
//! Every route is a POST with a JSON body. Operation failures are reported
//! in-band through `Err` with HTTP 200; only undecodable requests (400) and
//! unknown routes (404) use HTTP errors.
//!
//! Each routed request runs in its own task, so an operation that has
//! started finishes even when the caller hangs up.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use cinderlite::{CinderliteError, CinderliteResult, CreateOptions, Volume, VolumeManager};
use cinderlite_shared::constants::plugin;
use cinderlite_shared::protocol::{
    ActivateResponse, CapabilitiesResponse, Capability, CreateOpts, CreateRequest, ErrResponse,
    GetResponse, ListResponse, MountRequest, MountpointResponse, NameRequest, WireVolume,
};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::header::CONTENT_TYPE;
use hyper::{Method, Request, Response, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::Instrument;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Route {
    Activate,
    Create,
    Remove,
    Mount,
    Path,
    Unmount,
    Get,
    List,
    Capabilities,
}

impl Route {
    fn from_path(path: &str) -> Option<Self> {
        Some(match path {
            "/Plugin.Activate" => Route::Activate,
            "/VolumeDriver.Create" => Route::Create,
            "/VolumeDriver.Remove" => Route::Remove,
            "/VolumeDriver.Mount" => Route::Mount,
            "/VolumeDriver.Path" => Route::Path,
            "/VolumeDriver.Unmount" => Route::Unmount,
            "/VolumeDriver.Get" => Route::Get,
            "/VolumeDriver.List" => Route::List,
            "/VolumeDriver.Capabilities" => Route::Capabilities,
            _ => return None,
        })
    }

    fn as_str(&self) -> &'static str {
        match self {
            Route::Activate => "activate",
            Route::Create => "create",
            Route::Remove => "remove",
            Route::Mount => "mount",
            Route::Path => "path",
            Route::Unmount => "unmount",
            Route::Get => "get",
            Route::List => "list",
            Route::Capabilities => "capabilities",
        }
    }
}

/// HTTP status and JSON (or plain text) body of a reply.
pub(crate) type Reply = (StatusCode, Vec<u8>);

/// Maps plugin requests onto the volume manager.
#[derive(Clone)]
pub(crate) struct Api {
    manager: Arc<VolumeManager>,
}

impl Api {
    pub(crate) fn new(manager: Arc<VolumeManager>) -> Self {
        Self { manager }
    }

    /// Serve one HTTP request.
    pub(crate) async fn serve(&self, request: Request<Incoming>) -> Response<Full<Bytes>> {
        let (status, body) = if *request.method() != Method::POST {
            (
                StatusCode::METHOD_NOT_ALLOWED,
                format!("method {} not allowed", request.method()).into_bytes(),
            )
        } else {
            let path = request.uri().path().to_string();
            match request.into_body().collect().await {
                Ok(collected) => self.dispatch(&path, &collected.to_bytes()).await,
                Err(e) => (
                    StatusCode::BAD_REQUEST,
                    format!("reading request body: {}", e).into_bytes(),
                ),
            }
        };

        Response::builder()
            .status(status)
            .header(CONTENT_TYPE, plugin::CONTENT_TYPE)
            .body(Full::new(Bytes::from(body)))
            .unwrap_or_else(|e| {
                tracing::error!("Failed to build response: {}", e);
                let mut response = Response::new(Full::new(Bytes::new()));
                *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
                response
            })
    }

    /// Route a request body to its handler.
    pub(crate) async fn dispatch(&self, path: &str, body: &[u8]) -> Reply {
        let Some(route) = Route::from_path(path) else {
            tracing::debug!(path, "Unknown route");
            return (
                StatusCode::NOT_FOUND,
                encode(&ErrResponse {
                    err: format!("unknown route {}", path),
                }),
            );
        };

        let span = tracing::info_span!("request", route = route.as_str());
        let api = self.clone();
        let body = body.to_vec();
        let task = tokio::spawn(async move { api.handle(route, &body).await }.instrument(span));

        match task.await {
            Ok(reply) => reply,
            Err(e) => {
                tracing::error!(route = route.as_str(), "Request task failed: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    encode(&ErrResponse {
                        err: format!("request task failed: {}", e),
                    }),
                )
            }
        }
    }

    async fn handle(&self, route: Route, body: &[u8]) -> Reply {
        tracing::debug!("Received request");

        match route {
            Route::Activate => ok(&ActivateResponse {
                implements: vec![plugin::IMPLEMENTS.to_string()],
            }),

            Route::Create => {
                let request: CreateRequest = match decode(body) {
                    Ok(r) => r,
                    Err(reply) => return reply,
                };
                let opts = create_options(request.opts.unwrap_or_default());
                let result = self.manager.create(&request.name, opts).await.map(|_| ());
                ok(&ErrResponse {
                    err: error_text(&request.name, result),
                })
            }

            Route::Remove => {
                let request: NameRequest = match decode(body) {
                    Ok(r) => r,
                    Err(reply) => return reply,
                };
                let result = self.manager.remove(&request.name).await;
                ok(&ErrResponse {
                    err: error_text(&request.name, result),
                })
            }

            Route::Mount => {
                let request: MountRequest = match decode(body) {
                    Ok(r) => r,
                    Err(reply) => return reply,
                };
                tracing::debug!(volume = %request.name, mount_id = %request.id, "Mount");
                ok(&match self.manager.mount(&request.name).await {
                    Ok(path) => MountpointResponse {
                        mountpoint: display(Some(path.as_path())),
                        err: String::new(),
                    },
                    Err(e) => MountpointResponse {
                        mountpoint: String::new(),
                        err: error_text(&request.name, Err(e)),
                    },
                })
            }

            Route::Path => {
                let request: NameRequest = match decode(body) {
                    Ok(r) => r,
                    Err(reply) => return reply,
                };
                ok(&match self.manager.path(&request.name).await {
                    Ok(path) => MountpointResponse {
                        mountpoint: display(path.as_deref()),
                        err: String::new(),
                    },
                    Err(e) => MountpointResponse {
                        mountpoint: String::new(),
                        err: error_text(&request.name, Err(e)),
                    },
                })
            }

            Route::Unmount => {
                let request: MountRequest = match decode(body) {
                    Ok(r) => r,
                    Err(reply) => return reply,
                };
                tracing::debug!(volume = %request.name, mount_id = %request.id, "Unmount");
                let result = self.manager.unmount(&request.name).await;
                ok(&ErrResponse {
                    err: error_text(&request.name, result),
                })
            }

            Route::Get => {
                let request: NameRequest = match decode(body) {
                    Ok(r) => r,
                    Err(reply) => return reply,
                };
                ok(&match self.manager.get(&request.name).await {
                    Ok(info) => GetResponse {
                        volume: WireVolume {
                            name: info.name,
                            mountpoint: display(info.mountpoint.as_deref()),
                            status: status_fields(&info.volume),
                        },
                        err: String::new(),
                    },
                    Err(e) => GetResponse {
                        err: error_text(&request.name, Err(e)),
                        ..Default::default()
                    },
                })
            }

            Route::List => ok(&match self.manager.list().await {
                Ok(volumes) => ListResponse {
                    volumes: volumes
                        .into_iter()
                        .map(|v| WireVolume {
                            name: v.name,
                            mountpoint: display(v.mountpoint.as_deref()),
                            status: BTreeMap::new(),
                        })
                        .collect(),
                    err: String::new(),
                },
                Err(e) => {
                    tracing::error!("Failed to list volumes: {}", e);
                    ListResponse {
                        volumes: Vec::new(),
                        err: e.to_string(),
                    }
                }
            }),

            Route::Capabilities => ok(&CapabilitiesResponse {
                capabilities: Capability {
                    scope: self.manager.capabilities().scope.as_str().to_string(),
                },
            }),
        }
    }
}

fn create_options(opts: CreateOpts) -> CreateOptions {
    CreateOptions {
        size: opts.size,
        availability_zone: opts.availability_zone,
        volume_type: opts.volume_type,
        snapshot_id: opts.snapshot_id,
        backup_id: opts.backup_id,
        description: opts.description,
        consistency_group_id: opts.consistency_group_id,
        uid: opts.uid,
        gid: opts.gid,
        mode: opts.mode,
    }
}

/// Volume details reported by Get.
fn status_fields(volume: &Volume) -> BTreeMap<String, Value> {
    BTreeMap::from([
        ("ID".to_string(), json!(volume.id)),
        ("AvailabilityZone".to_string(), json!(volume.availability_zone)),
        ("ConsistencyGroupID".to_string(), json!(volume.consistency_group_id)),
        ("Description".to_string(), json!(volume.description)),
        ("Size".to_string(), json!(volume.size)),
        ("Type".to_string(), json!(volume.volume_type)),
        ("Status".to_string(), json!(volume.status)),
        ("Multiattach".to_string(), json!(volume.multiattach)),
        ("CreatedAt".to_string(), json!(volume.created_at)),
        ("UpdatedAt".to_string(), json!(volume.updated_at)),
        ("Metadata".to_string(), json!(volume.metadata)),
    ])
}

fn display(path: Option<&Path>) -> String {
    path.map(|p| p.display().to_string()).unwrap_or_default()
}

/// Empty on success; the error is logged with the volume it concerns.
fn error_text(volume: &str, result: CinderliteResult<()>) -> String {
    match result {
        Ok(()) => String::new(),
        Err(e) => {
            match &e {
                CinderliteError::Validation(_) | CinderliteError::Conflict(_) => {
                    tracing::warn!(volume, "{}", e)
                }
                _ => tracing::error!(volume, "{}", e),
            }
            e.to_string()
        }
    }
}

fn decode<T: DeserializeOwned>(body: &[u8]) -> Result<T, Reply> {
    serde_json::from_slice(body).map_err(|e| {
        tracing::warn!("Failed to decode request: {}", e);
        (StatusCode::BAD_REQUEST, e.to_string().into_bytes())
    })
}

fn encode<T: Serialize>(value: &T) -> Vec<u8> {
    serde_json::to_vec(value).unwrap_or_else(|e| {
        format!(r#"{{"Err":"encoding response: {}"}}"#, e).into_bytes()
    })
}

fn ok<T: Serialize>(value: &T) -> Reply {
    (StatusCode::OK, encode(value))
}
