//! In-memory [`ControlPlane`] with eventual consistency.
//!
//! Mutations are accepted immediately and become visible to reads after a
//! configurable lag, or never when the lag is `None`. Attaching to the local
//! server plugs a device carrying the volume ID as serial into the
//! [`HostTree`]; detaching unplugs it.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cinderlite::{
    Attachment, CinderliteError, CinderliteResult, ControlPlane, CreateVolumeRequest, ListFilter,
    ServerId, Volume,
};
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::tree::HostTree;

/// Remote operations counted by the fake.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Op {
    Create,
    Get,
    List,
    Delete,
    Attach,
    Detach,
}

/// Delay before each kind of mutation shows up in reads. `None` never converges.
#[derive(Clone, Copy, Debug)]
pub struct Lags {
    pub create: Option<Duration>,
    pub attach: Option<Duration>,
    pub detach: Option<Duration>,
    pub delete: Option<Duration>,
}

impl Default for Lags {
    fn default() -> Self {
        Self {
            create: Some(Duration::ZERO),
            attach: Some(Duration::ZERO),
            detach: Some(Duration::ZERO),
            delete: Some(Duration::ZERO),
        }
    }
}

#[derive(Debug)]
enum Change {
    Available(String),
    Attached(String, ServerId),
    Detached(String, ServerId),
    Deleted(String),
}

struct Pending {
    at: Option<Instant>,
    change: Change,
}

#[derive(Default)]
struct State {
    volumes: BTreeMap<String, Volume>,
    pending: Vec<Pending>,
    next_id: u32,
    calls: HashMap<Op, usize>,
    failures: HashMap<Op, String>,
    lags: Lags,
}

pub struct FakeControlPlane {
    local: ServerId,
    tree: Arc<HostTree>,
    state: Mutex<State>,
}

impl FakeControlPlane {
    pub fn new(local: ServerId, tree: Arc<HostTree>) -> Self {
        Self {
            local,
            tree,
            state: Mutex::new(State::default()),
        }
    }

    pub fn set_lags(&self, lags: Lags) {
        self.state.lock().lags = lags;
    }

    /// Make every call of `op` fail with `message` until cleared.
    pub fn fail(&self, op: Op, message: &str) {
        self.state.lock().failures.insert(op, message.to_string());
    }

    pub fn clear_failures(&self) {
        self.state.lock().failures.clear();
    }

    pub fn calls(&self, op: Op) -> usize {
        self.state.lock().calls.get(&op).copied().unwrap_or(0)
    }

    /// Calls that change remote state.
    pub fn mutating_calls(&self) -> usize {
        [Op::Create, Op::Delete, Op::Attach, Op::Detach]
            .into_iter()
            .map(|op| self.calls(op))
            .sum()
    }

    pub fn total_calls(&self) -> usize {
        self.state.lock().calls.values().sum()
    }

    /// Insert an available volume directly, bypassing the create lag.
    pub fn seed_volume(&self, name: &str, multiattach: bool) -> Volume {
        let mut state = self.state.lock();
        let id = next_id(&mut state);
        let volume = Volume {
            id: id.clone(),
            name: name.to_string(),
            size: 1,
            availability_zone: "nova".to_string(),
            status: "available".to_string(),
            multiattach,
            ..Default::default()
        };
        state.volumes.insert(id, volume.clone());
        volume
    }

    /// Record an attachment to `server` immediately. A local attachment also
    /// plugs the device.
    pub fn seed_attachment(&self, volume_id: &str, server: &ServerId) {
        let mut state = self.state.lock();
        self.apply(&mut state, Change::Attached(volume_id.to_string(), server.clone()));
    }

    /// Remote view of a volume, without applying pending changes or counting.
    pub fn peek(&self, volume_id: &str) -> Option<Volume> {
        self.state.lock().volumes.get(volume_id).cloned()
    }

    fn enter(&self, op: Op) -> CinderliteResult<parking_lot::MutexGuard<'_, State>> {
        let mut state = self.state.lock();
        *state.calls.entry(op).or_default() += 1;
        if let Some(message) = state.failures.get(&op) {
            return Err(CinderliteError::RemoteApi(message.clone()));
        }
        self.settle(&mut state);
        Ok(state)
    }

    fn schedule(state: &mut State, lag: Option<Duration>, change: Change) {
        state.pending.push(Pending {
            at: lag.map(|lag| Instant::now() + lag),
            change,
        });
    }

    /// Apply every pending change whose time has come.
    fn settle(&self, state: &mut State) {
        let now = Instant::now();
        let (due, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut state.pending)
            .into_iter()
            .partition(|p| p.at.is_some_and(|at| at <= now));
        state.pending = waiting;
        for pending in due {
            self.apply(state, pending.change);
        }
    }

    fn apply(&self, state: &mut State, change: Change) {
        match change {
            Change::Available(id) => {
                if let Some(volume) = state.volumes.get_mut(&id) {
                    volume.status = "available".to_string();
                }
            }
            Change::Attached(id, server) => {
                if let Some(volume) = state.volumes.get_mut(&id) {
                    if !volume.is_attached_to(&server) {
                        volume.attachments.push(Attachment::new(id.clone(), server.clone()));
                    }
                    volume.status = "in-use".to_string();
                    if server == self.local {
                        self.tree.plug_device(&id);
                    }
                }
            }
            Change::Detached(id, server) => {
                if let Some(volume) = state.volumes.get_mut(&id) {
                    volume.attachments.retain(|a| a.server_id != server);
                    if volume.attachments.is_empty() {
                        volume.status = "available".to_string();
                    }
                    if server == self.local {
                        self.tree.unplug_device(&id);
                    }
                }
            }
            Change::Deleted(id) => {
                state.volumes.remove(&id);
            }
        }
    }
}

fn next_id(state: &mut State) -> String {
    state.next_id += 1;
    format!("6f0b3c9e-1d2a-4c5b-9e8f-{:012x}", state.next_id)
}

#[async_trait]
impl ControlPlane for FakeControlPlane {
    async fn create_volume(&self, request: &CreateVolumeRequest) -> CinderliteResult<Volume> {
        let mut state = self.enter(Op::Create)?;
        let id = next_id(&mut state);
        let volume = Volume {
            id: id.clone(),
            name: request.name.clone(),
            size: request.size,
            availability_zone: request
                .availability_zone
                .clone()
                .unwrap_or_else(|| "nova".to_string()),
            volume_type: request.volume_type.clone(),
            description: request.description.clone(),
            consistency_group_id: request.consistency_group_id.clone(),
            status: "creating".to_string(),
            metadata: request.metadata.clone(),
            created_at: Some("2024-01-01T00:00:00.000000".to_string()),
            ..Default::default()
        };
        state.volumes.insert(id.clone(), volume.clone());
        let lag = state.lags.create;
        Self::schedule(&mut state, lag, Change::Available(id));
        Ok(volume)
    }

    async fn get_volume(&self, volume_id: &str) -> CinderliteResult<Option<Volume>> {
        let state = self.enter(Op::Get)?;
        Ok(state.volumes.get(volume_id).cloned())
    }

    async fn list_volumes(&self, filter: &ListFilter) -> CinderliteResult<Vec<Volume>> {
        let state = self.enter(Op::List)?;
        Ok(state
            .volumes
            .values()
            .filter(|v| filter.matches(v))
            .cloned()
            .collect())
    }

    async fn delete_volume(&self, volume_id: &str) -> CinderliteResult<()> {
        let mut state = self.enter(Op::Delete)?;
        let volume = state
            .volumes
            .get_mut(volume_id)
            .ok_or_else(|| CinderliteError::RemoteApi(format!("volume {} not found", volume_id)))?;
        if !volume.attachments.is_empty() {
            return Err(CinderliteError::RemoteApi(format!(
                "volume {} is still attached",
                volume_id
            )));
        }
        volume.status = "deleting".to_string();
        let lag = state.lags.delete;
        Self::schedule(&mut state, lag, Change::Deleted(volume_id.to_string()));
        Ok(())
    }

    async fn attach_volume(
        &self,
        server: &ServerId,
        volume_id: &str,
    ) -> CinderliteResult<Attachment> {
        let mut state = self.enter(Op::Attach)?;
        let volume = state
            .volumes
            .get(volume_id)
            .ok_or_else(|| CinderliteError::RemoteApi(format!("volume {} not found", volume_id)))?;
        if !volume.multiattach && volume.attachments.iter().any(|a| &a.server_id != server) {
            return Err(CinderliteError::RemoteApi(format!(
                "volume {} is attached elsewhere",
                volume_id
            )));
        }
        let lag = state.lags.attach;
        Self::schedule(
            &mut state,
            lag,
            Change::Attached(volume_id.to_string(), server.clone()),
        );

        let mut attachment = Attachment::new(volume_id, server.clone());
        attachment.device = Some("/dev/vdz".to_string());
        Ok(attachment)
    }

    async fn detach_volume(&self, server: &ServerId, volume_id: &str) -> CinderliteResult<()> {
        let mut state = self.enter(Op::Detach)?;
        if !state.volumes.contains_key(volume_id) {
            return Err(CinderliteError::RemoteApi(format!(
                "volume {} not found",
                volume_id
            )));
        }
        let lag = state.lags.detach;
        Self::schedule(
            &mut state,
            lag,
            Change::Detached(volume_id.to_string(), server.clone()),
        );
        Ok(())
    }
}
