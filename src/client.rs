use std::sync::Arc;
use tokio::sync::watch;

use crate::internal::background_thread::{self, CallHandle, SpawnArgs};
use crate::internal::config::CallConfig;
use crate::internal::data_types::*;
use crate::internal::directory::Directory;
use crate::internal::error::CallError;
use crate::internal::session::{CallSnapshot, IncomingCall};
use crate::media::{MediaStream, MediaTransport, RemoteStream};
use crate::signaling::SignalingBus;

/// what a UI renders for one device
#[derive(Debug, Clone, Default)]
pub struct ClientView {
    pub role: Option<Role>,
    pub user_id: Option<ParticipantId>,
    pub call_state: CallState,
    /// registered students, in registration order
    pub devices: Vec<Participant>,
    pub incoming_call: Option<IncomingCall>,
    pub current_peer: Option<Participant>,
    pub local_stream: Option<MediaStream>,
    pub remote_stream: Option<RemoteStream>,
}

pub struct CallClientInit {
    pub directory: Directory,
    pub bus: Arc<dyn SignalingBus>,
    pub transport: Arc<dyn MediaTransport>,
    pub config: CallConfig,
}

/// the calls a UI makes for one device: pick a role, register, call, answer, hang up.
/// the call itself runs on the device's event loop; this only forwards intents to it
pub struct CallClient {
    directory: Directory,
    bus: Arc<dyn SignalingBus>,
    transport: Arc<dyn MediaTransport>,
    config: CallConfig,
    role: Option<Role>,
    handle: Option<CallHandle>,
}

impl CallClient {
    pub fn new(args: CallClientInit) -> Self {
        Self {
            directory: args.directory,
            bus: args.bus,
            transport: args.transport,
            config: args.config,
            role: None,
            handle: None,
        }
    }

    /// choosing Teacher registers this device under the configured teacher name.
    /// students register with `register_device`
    pub async fn set_role(&mut self, role: Role) -> Option<Participant> {
        self.role = Some(role);
        match role {
            Role::Teacher => {
                let name = self.config.teacher_name.clone();
                Some(self.join(&name, Role::Teacher).await)
            }
            Role::Student => None,
        }
    }

    pub async fn register_device(&mut self, name: &str) -> Participant {
        self.role = Some(Role::Student);
        self.join(name, Role::Student).await
    }

    pub async fn start_call(&self, peer: &str) -> Result<(), CallError> {
        self.handle()?.start_call(peer).await
    }

    pub async fn answer_call(&self) -> Result<(), CallError> {
        self.handle()?.answer_call().await
    }

    pub async fn hang_up(&self) -> Result<(), CallError> {
        self.handle()?.hang_up().await
    }

    pub fn view(&self) -> ClientView {
        let snapshot = self
            .handle
            .as_ref()
            .map(|h| h.snapshot())
            .unwrap_or_default();
        ClientView {
            role: self.role,
            user_id: self.handle.as_ref().map(|h| h.participant().id.clone()),
            call_state: snapshot.call_state,
            devices: self
                .directory
                .list()
                .into_iter()
                .filter(|p| p.role == Role::Student)
                .collect(),
            incoming_call: snapshot.incoming_call,
            current_peer: snapshot.current_peer,
            local_stream: snapshot.local_stream,
            remote_stream: snapshot.remote_stream,
        }
    }

    /// notified on every call state change once the device is registered
    pub fn watch(&self) -> Option<watch::Receiver<CallSnapshot>> {
        self.handle.as_ref().map(|h| h.watch())
    }

    pub async fn shutdown(&mut self) {
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.shutdown().await {
                log::warn!("failed to stop {}: {}", &handle.participant().id, e);
            }
        }
    }

    /// registers a new participant for this device, replacing any previous one
    async fn join(&mut self, name: &str, role: Role) -> Participant {
        self.shutdown().await;
        let local = self.directory.register(name, role);
        let (handle, _) = background_thread::spawn(SpawnArgs {
            local: local.clone(),
            directory: self.directory.clone(),
            bus: self.bus.clone(),
            transport: self.transport.clone(),
            config: self.config.clone(),
        });
        self.handle = Some(handle);
        local
    }

    fn handle(&self) -> Result<&CallHandle, CallError> {
        self.handle.as_ref().ok_or(CallError::NotRegistered)
    }
}
