//! Entry point for the Cinder volume plugin daemon.

#[cfg(not(target_os = "linux"))]
compile_error!("cinderlite-plugin is Linux-only; build with a Linux target");

mod api;
mod args;
mod server;

use std::sync::Arc;

use args::PluginArgs;
use cinderlite::openstack::OpenStackClient;
use cinderlite::{LinuxHost, ServerId, VolumeManager};
use clap::Parser;
use server::PluginServer;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = PluginArgs::parse();
    cinderlite::init_logging(args.log_level.as_deref())?;

    info!(
        socket = %args.socket.display(),
        mount_root = %args.mount_root.display(),
        prefix = %args.volume_prefix,
        "Starting cinder volume plugin"
    );

    let server_id = match &args.server_id {
        Some(id) => ServerId::new(id.as_str()),
        None => cinderlite::identity::fetch_instance_id(&args.metadata_url).await?,
    };
    info!(server_id = %server_id, "Resolved host identity");

    let client = OpenStackClient::new(args.openstack.credentials())?;
    client.connect().await?;

    let manager = VolumeManager::new(
        args.driver_options(),
        server_id,
        Arc::new(client),
        Arc::new(LinuxHost::new()),
    )?;

    PluginServer::new(Arc::new(manager))
        .run(&args.socket, shutdown_signal())
        .await?;

    info!("Plugin stopped");
    Ok(())
}

/// Resolves on SIGTERM or Ctrl-C.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl-C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
