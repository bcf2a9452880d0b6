//! Attaching and detaching volumes to hosts.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use cinderlite_shared::errors::{CinderliteError, CinderliteResult};

use crate::control::{ControlPlane, Poller};
use crate::storage::{DeviceResolver, blocking};
use crate::volumes::{ServerId, Volume};

/// Which attachments `detach` removes, relative to the current host.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DetachFilter {
    /// Every host except the current one
    ForeignOnly,
    /// Only the current host
    CurrentOnly,
    /// Every host
    All,
}

impl DetachFilter {
    fn matches(&self, server: &ServerId, current: &ServerId) -> bool {
        match self {
            DetachFilter::ForeignOnly => server != current,
            DetachFilter::CurrentOnly => server == current,
            DetachFilter::All => true,
        }
    }
}

/// Drives attach/detach requests and waits for the control plane to agree.
///
/// Neither operation retries. A timeout leaves remote and local state as it is.
pub struct AttachOrchestrator {
    control: Arc<dyn ControlPlane>,
    server_id: ServerId,
    resolver: DeviceResolver,
    poller: Poller,
    device_settle: Duration,
}

impl AttachOrchestrator {
    pub fn new(
        control: Arc<dyn ControlPlane>,
        server_id: ServerId,
        resolver: DeviceResolver,
        poller: Poller,
        device_settle: Duration,
    ) -> Self {
        Self {
            control,
            server_id,
            resolver,
            poller,
            device_settle,
        }
    }

    pub fn server_id(&self) -> &ServerId {
        &self.server_id
    }

    /// Attach `volume` to the current host and return its local device.
    pub async fn attach(&self, volume: &Volume) -> CinderliteResult<PathBuf> {
        let attachment = self
            .control
            .attach_volume(&self.server_id, &volume.id)
            .await
            .map_err(|e| {
                CinderliteError::RemoteApi(format!(
                    "failed to attach volume {}: {}",
                    volume.name, e
                ))
            })?;

        tracing::debug!(
            volume_id = %volume.id,
            hint = ?attachment.device,
            "Attach requested, waiting for the attachment to show up"
        );

        self.wait_for_attachment(&volume.id, &self.server_id, true)
            .await
            .map_err(|e| {
                let context = format!("waiting for volume {} to be attached", volume.name);
                wrap_wait_error(e, context)
            })?;

        tracing::debug!(
            volume_id = %volume.id,
            server_id = %self.server_id,
            "Volume has been attached"
        );

        // The device name in the attach response is the control plane's guess.
        // Look the device up by serial once udev has caught up.
        tokio::time::sleep(self.device_settle).await;

        let resolver = self.resolver.clone();
        let volume_id = volume.id.clone();
        blocking("device probe", move || resolver.resolve(&volume_id))
            .await
            .map_err(|e| match e {
                CinderliteError::NotFound(msg) => CinderliteError::NotFound(format!(
                    "volume {} is attached but no local device matches: {}",
                    volume.name, msg
                )),
                other => other,
            })
    }

    /// Detach `volume` from every host selected by `filter`, one at a time.
    pub async fn detach(&self, volume: &Volume, filter: DetachFilter) -> CinderliteResult<()> {
        for attachment in &volume.attachments {
            let server = &attachment.server_id;
            if !filter.matches(server, &self.server_id) {
                continue;
            }

            self.control
                .detach_volume(server, &volume.id)
                .await
                .map_err(|e| {
                    CinderliteError::RemoteApi(format!(
                        "could not detach volume {} from server {}: {}",
                        volume.name, server, e
                    ))
                })?;

            self.wait_for_attachment(&volume.id, server, false)
                .await
                .map_err(|e| {
                    let context = format!(
                        "waiting for volume {} to be detached from server {}",
                        volume.name, server
                    );
                    wrap_wait_error(e, context)
                })?;

            tracing::debug!(
                volume_id = %volume.id,
                server_id = %server,
                "Volume has been detached"
            );
        }

        Ok(())
    }

    /// Poll until `server`'s attachment of the volume is present (`attached`)
    /// or gone (`!attached`).
    async fn wait_for_attachment(
        &self,
        volume_id: &str,
        server: &ServerId,
        attached: bool,
    ) -> CinderliteResult<()> {
        let what = format!(
            "volume {} {} server {}",
            volume_id,
            if attached { "attached to" } else { "detached from" },
            server
        );
        let control = &self.control;

        self.poller
            .until(&what, || async move {
                let volume = control.get_volume(volume_id).await?.ok_or_else(|| {
                    CinderliteError::NotFound(format!("volume {} not found", volume_id))
                })?;
                Ok((volume.is_attached_to(server) == attached).then_some(()))
            })
            .await
    }
}

/// Keep the error kind, prefix the message with what was being waited for.
fn wrap_wait_error(err: CinderliteError, context: String) -> CinderliteError {
    match err {
        CinderliteError::Timeout(msg) => {
            CinderliteError::Timeout(format!("{}: {}", context, msg))
        }
        CinderliteError::NotFound(msg) => {
            CinderliteError::NotFound(format!("{}: {}", context, msg))
        }
        CinderliteError::RemoteApi(msg) => {
            CinderliteError::RemoteApi(format!("{}: {}", context, msg))
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detach_filter() {
        let me = ServerId::new("me");
        let other = ServerId::new("other");

        assert!(DetachFilter::ForeignOnly.matches(&other, &me));
        assert!(!DetachFilter::ForeignOnly.matches(&me, &me));
        assert!(DetachFilter::CurrentOnly.matches(&me, &me));
        assert!(!DetachFilter::CurrentOnly.matches(&other, &me));
        assert!(DetachFilter::All.matches(&me, &me));
        assert!(DetachFilter::All.matches(&other, &me));
    }
}
