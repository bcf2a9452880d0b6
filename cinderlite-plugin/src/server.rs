//! Plugin socket server.

use std::convert::Infallible;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use cinderlite::{CinderliteError, CinderliteResult, VolumeManager};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use tokio::net::UnixListener;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::api::Api;

/// How long in-flight requests may run after a shutdown signal.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(90);

/// Serves the plugin protocol on a Unix socket.
pub(crate) struct PluginServer {
    api: Arc<Api>,
}

impl PluginServer {
    pub(crate) fn new(manager: Arc<VolumeManager>) -> Self {
        Self {
            api: Arc::new(Api::new(manager)),
        }
    }

    /// Accept connections on `socket_path` until `shutdown` resolves.
    ///
    /// A stale socket file from a previous run is replaced. Requests already
    /// being handled get [`SHUTDOWN_GRACE`] to finish.
    pub(crate) async fn run(
        self,
        socket_path: &Path,
        shutdown: impl Future<Output = ()>,
    ) -> CinderliteResult<()> {
        // Remove socket if it exists
        if socket_path.exists() {
            std::fs::remove_file(socket_path)?;
        }

        // Ensure parent directory exists
        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let listener = UnixListener::bind(socket_path).map_err(|e| {
            CinderliteError::Os(format!(
                "Failed to bind {}: {}",
                socket_path.display(),
                e
            ))
        })?;
        info!("Listening on unix://{}", socket_path.display());

        let mut connections = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let stream = match accepted {
                        Ok((stream, _)) => stream,
                        Err(e) => {
                            warn!("Failed to accept connection: {}", e);
                            continue;
                        }
                    };

                    let api = Arc::clone(&self.api);
                    connections.spawn(async move {
                        let service = service_fn(move |request| {
                            let api = Arc::clone(&api);
                            async move { Ok::<_, Infallible>(api.serve(request).await) }
                        });

                        if let Err(e) = http1::Builder::new()
                            .keep_alive(false)
                            .serve_connection(TokioIo::new(stream), service)
                            .await
                        {
                            debug!("Connection closed with error: {}", e);
                        }
                    });
                }
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
                _ = &mut shutdown => {
                    info!("Shutdown requested, no longer accepting connections");
                    break;
                }
            }
        }

        drop(listener);
        if let Err(e) = std::fs::remove_file(socket_path) {
            warn!("Failed to remove socket {}: {}", socket_path.display(), e);
        }

        if !connections.is_empty() {
            info!(in_flight = connections.len(), "Waiting for in-flight requests");
            let drain = async { while connections.join_next().await.is_some() {} };
            if tokio::time::timeout(SHUTDOWN_GRACE, drain).await.is_err() {
                warn!("In-flight requests did not finish in {:?}, aborting", SHUTDOWN_GRACE);
                connections.abort_all();
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    use cinderlite_test_utils::{Lags, Op, TestContext};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::UnixStream;

    async fn post(socket: &Path, route: &str, body: &str) -> String {
        let mut stream = UnixStream::connect(socket).await.unwrap();
        let request = format!(
            "POST {} HTTP/1.1\r\nHost: plugin\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            route,
            body.len(),
            body
        );
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
    }

    type Running = (
        PathBuf,
        tokio::sync::oneshot::Sender<()>,
        tokio::task::JoinHandle<CinderliteResult<()>>,
    );

    /// Start a server for `ctx` and wait until it accepts connections.
    async fn start(ctx: &TestContext) -> Running {
        let socket = ctx.tree.root().join("run/docker/plugins/cinder.sock");
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let server = PluginServer::new(Arc::clone(&ctx.manager));
        let socket_path = socket.clone();
        let handle = tokio::spawn(async move {
            server
                .run(&socket_path, async {
                    let _ = stop_rx.await;
                })
                .await
        });

        for _ in 0..100 {
            if UnixStream::connect(&socket).await.is_ok() {
                return (socket, stop_tx, handle);
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("server did not start listening on {}", socket.display());
    }

    #[tokio::test]
    async fn test_serves_over_unix_socket_and_cleans_up() {
        let ctx = TestContext::new();
        // Stale socket file from a previous run
        let stale = ctx.tree.root().join("run/docker/plugins/cinder.sock");
        std::fs::create_dir_all(stale.parent().unwrap()).unwrap();
        std::fs::write(&stale, b"").unwrap();

        let (socket, stop_tx, handle) = start(&ctx).await;

        let response = post(&socket, "/Plugin.Activate", "{}").await;
        assert!(response.starts_with("HTTP/1.1 200"), "{}", response);
        assert!(response.contains("application/vnd.docker.plugins.v1.2+json"));
        assert!(response.ends_with(r#"{"Implements":["VolumeDriver"]}"#));

        let response = post(&socket, "/VolumeDriver.Nope", "{}").await;
        assert!(response.starts_with("HTTP/1.1 404"), "{}", response);

        stop_tx.send(()).unwrap();
        handle.await.unwrap().unwrap();
        assert!(!socket.exists());
    }

    #[tokio::test]
    async fn test_mount_completes_after_client_hangs_up() {
        let ctx = TestContext::with_options(|o| o.poll_interval = Duration::from_millis(50));
        ctx.control.set_lags(Lags {
            attach: Some(Duration::from_millis(400)),
            ..Lags::default()
        });
        let volume = ctx.control.seed_volume("data", false);
        let (socket, stop_tx, handle) = start(&ctx).await;

        let body = r#"{"Name":"data","ID":"c1"}"#;
        let mut stream = UnixStream::connect(&socket).await.unwrap();
        let request = format!(
            "POST /VolumeDriver.Mount HTTP/1.1\r\nHost: plugin\r\nContent-Length: {}\r\n\r\n{}",
            body.len(),
            body
        );
        stream.write_all(request.as_bytes()).await.unwrap();

        // Give up while the attachment is still pending.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(ctx.control.calls(Op::Attach), 1);
        assert_eq!(ctx.host.mount_count(), 0);
        drop(stream);

        for _ in 0..100 {
            if ctx.host.mount_count() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert_eq!(ctx.host.mount_count(), 1);
        assert_eq!(ctx.host.format_count(), 1);
        assert_eq!(
            ctx.tree.mounted_targets(),
            vec![ctx.tree.mount_root().join(&volume.id)]
        );

        // The volume lock was released: a second mount goes straight through.
        let response = post(&socket, "/VolumeDriver.Mount", body).await;
        assert!(response.starts_with("HTTP/1.1 200"), "{}", response);
        assert!(response.contains(r#""Err":"""#), "{}", response);
        assert_eq!(ctx.control.calls(Op::Attach), 1);
        assert_eq!(ctx.host.mount_count(), 1);

        stop_tx.send(()).unwrap();
        handle.await.unwrap().unwrap();
    }
}
