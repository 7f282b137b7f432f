use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::internal::config::CallConfig;
use crate::internal::data_types::*;
use crate::internal::directory::Directory;
use crate::internal::error::CallError;
use crate::internal::events::*;
use crate::internal::session::{CallSnapshot, SessionManager, SessionManagerInit};
use crate::media::MediaTransport;
use crate::signaling::SignalingBus;

pub type GenericResponse = Result<(), CallError>;

pub enum InternalCmd {
    StartCall {
        peer: ParticipantId,
        response: oneshot::Sender<GenericResponse>,
    },
    AnswerCall {
        response: oneshot::Sender<GenericResponse>,
    },
    HangUp {
        response: oneshot::Sender<()>,
    },
    Shutdown {
        response: oneshot::Sender<()>,
    },
    /// sent when the last CallHandle is dropped
    Release,
}

// owned by every clone of a CallHandle. dropping the last one stops the event loop
struct HandleGuard {
    queue: mpsc::UnboundedSender<SessionEvent>,
}

impl Drop for HandleGuard {
    fn drop(&mut self) {
        // the loop may already be gone after an explicit shutdown
        let _ = self.queue.send(SessionEvent::Command(InternalCmd::Release));
    }
}

/// the UI's handle on a participant's event loop. cheap to clone
#[derive(Clone)]
pub struct CallHandle {
    participant: Participant,
    queue: mpsc::UnboundedSender<SessionEvent>,
    snapshot: watch::Receiver<CallSnapshot>,
    _guard: Arc<HandleGuard>,
}

impl CallHandle {
    pub fn participant(&self) -> &Participant {
        &self.participant
    }

    pub fn snapshot(&self) -> CallSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn state(&self) -> CallState {
        self.snapshot.borrow().call_state
    }

    pub fn watch(&self) -> watch::Receiver<CallSnapshot> {
        self.snapshot.clone()
    }

    pub async fn start_call(&self, peer: &str) -> Result<(), CallError> {
        let (response, rx) = oneshot::channel();
        self.send(InternalCmd::StartCall {
            peer: peer.into(),
            response,
        })?;
        rx.await.map_err(|_| CallError::SessionClosed)?
    }

    pub async fn answer_call(&self) -> Result<(), CallError> {
        let (response, rx) = oneshot::channel();
        self.send(InternalCmd::AnswerCall { response })?;
        rx.await.map_err(|_| CallError::SessionClosed)?
    }

    pub async fn hang_up(&self) -> Result<(), CallError> {
        let (response, rx) = oneshot::channel();
        self.send(InternalCmd::HangUp { response })?;
        rx.await.map_err(|_| CallError::SessionClosed)
    }

    /// stops the event loop after releasing the transport and the capture devices
    pub async fn shutdown(&self) -> Result<(), CallError> {
        let (response, rx) = oneshot::channel();
        self.send(InternalCmd::Shutdown { response })?;
        rx.await.map_err(|_| CallError::SessionClosed)
    }

    fn send(&self, cmd: InternalCmd) -> Result<(), CallError> {
        self.queue
            .send(SessionEvent::Command(cmd))
            .map_err(|_| CallError::SessionClosed)
    }
}

/// everything needed to start a participant's event loop, minus the event queue
pub struct SpawnArgs {
    pub local: Participant,
    pub directory: Directory,
    pub bus: Arc<dyn SignalingBus>,
    pub transport: Arc<dyn MediaTransport>,
    pub config: CallConfig,
}

/// subscribes the participant to the bus and spawns its event loop.
/// must be called from within a tokio runtime
pub fn spawn(args: SpawnArgs) -> (CallHandle, JoinHandle<()>) {
    let (queue_tx, queue_rx) = mpsc::unbounded_channel::<SessionEvent>();
    let participant = args.local.clone();

    // signals are moved onto the shared queue so they interleave with commands and
    // transport events in arrival order
    let mut subscription = args.bus.subscribe(&participant.id);
    let subscription_id = subscription.id();
    let forward = queue_tx.clone();
    tokio::spawn(async move {
        while let Some(message) = subscription.recv().await {
            if forward.send(SessionEvent::Signal(message)).is_err() {
                break;
            }
        }
        log::debug!("signal forwarding for {} stopped", subscription.participant());
    });

    let bus = args.bus.clone();
    let manager = SessionManager::new(SessionManagerInit {
        local: args.local,
        directory: args.directory,
        bus: args.bus,
        transport: args.transport,
        config: args.config,
        events: TransportEventSender::new(queue_tx.clone()),
    });
    let handle = CallHandle {
        participant,
        _guard: Arc::new(HandleGuard {
            queue: queue_tx.clone(),
        }),
        queue: queue_tx,
        snapshot: manager.watch(),
    };

    let join = tokio::spawn(async move {
        run(manager, queue_rx).await;
        bus.unsubscribe(subscription_id);
    });
    (handle, join)
}

/// handles one event at a time until a Shutdown command arrives or every CallHandle is gone
pub async fn run(mut manager: SessionManager, mut queue: mpsc::UnboundedReceiver<SessionEvent>) {
    // keep the camera preview warm from the start
    if let Err(e) = manager.ensure_local_media().await {
        log::warn!("no preview for {}: {}", &manager.local().id, e);
    }

    while let Some(event) = queue.recv().await {
        match event {
            SessionEvent::Command(cmd) => match cmd {
                InternalCmd::StartCall { peer, response } => {
                    let result = manager.start_call(&peer).await;
                    if let Err(e) = &result {
                        log::warn!("start_call to {} failed: {}", &peer, e);
                    }
                    let _ = response.send(result);
                }
                InternalCmd::AnswerCall { response } => {
                    let result = manager.answer_call().await;
                    if let Err(e) = &result {
                        log::warn!("answer_call failed: {}", e);
                    }
                    let _ = response.send(result);
                }
                InternalCmd::HangUp { response } => {
                    manager.hang_up().await;
                    let _ = response.send(());
                }
                InternalCmd::Shutdown { response } => {
                    manager.shutdown().await;
                    log::info!("event loop for {} stopped", &manager.local().id);
                    let _ = response.send(());
                    return;
                }
                InternalCmd::Release => {
                    manager.shutdown().await;
                    log::info!(
                        "every handle for {} was dropped. event loop stopped",
                        &manager.local().id
                    );
                    return;
                }
            },
            SessionEvent::Signal(message) => manager.handle_message(message).await,
            SessionEvent::Transport(event) => manager.handle_transport_event(event).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::fake::FakeTransport;
    use crate::signaling::InProcessBus;
    use std::time::Duration;

    async fn wait_for(handle: &CallHandle, state: CallState) -> CallSnapshot {
        let mut rx = handle.watch();
        let waited = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if rx.borrow().call_state == state {
                    return rx.borrow().clone();
                }
                if rx.changed().await.is_err() {
                    panic!("event loop exited while waiting for {}", state);
                }
            }
        })
        .await;
        match waited {
            Ok(snapshot) => snapshot,
            Err(_) => panic!(
                "{} never reached {} (is {})",
                &handle.participant().id,
                state,
                handle.state()
            ),
        }
    }

    fn start(
        directory: &Directory,
        bus: &InProcessBus,
        name: &str,
        role: Role,
    ) -> (CallHandle, FakeTransport) {
        let transport = FakeTransport::new();
        let (handle, _) = spawn(SpawnArgs {
            local: directory.register(name, role),
            directory: directory.clone(),
            bus: Arc::new(bus.clone()),
            transport: Arc::new(transport.clone()),
            config: CallConfig::default(),
        });
        (handle, transport)
    }

    #[tokio::test]
    async fn teacher_calls_student_through_the_bus() {
        let _ = env_logger::builder().is_test(true).try_init();
        let directory = Directory::new();
        let bus = InProcessBus::new();
        let (teacher, teacher_media) = start(&directory, &bus, "Ms. Lee", Role::Teacher);
        let (student, student_media) = start(&directory, &bus, "Amir", Role::Student);

        teacher.start_call(&student.participant().id).await.unwrap();
        assert_eq!(teacher.state(), CallState::Calling);

        let ringing = wait_for(&student, CallState::Receiving).await;
        assert_eq!(ringing.incoming_call.unwrap().from.name, "Ms. Lee");

        student.answer_call().await.unwrap();

        // the answer and the student's candidates reach the teacher's context
        let teacher_ctx = teacher_media.last_context();
        tokio::time::timeout(Duration::from_secs(5), async {
            while teacher_ctx.remote_description().is_none()
                || teacher_ctx.remote_candidates().len() < 2
            {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        teacher_ctx.report(ConnectionState::Connected);
        student_media.last_context().report(ConnectionState::Connected);

        let teacher_view = wait_for(&teacher, CallState::Connected).await;
        let student_view = wait_for(&student, CallState::Connected).await;
        assert_eq!(teacher_view.current_peer.unwrap().name, "Amir");
        assert_eq!(student_view.current_peer.unwrap().name, "Ms. Lee");

        teacher.hang_up().await.unwrap();
        assert_eq!(teacher.state(), CallState::Idle);
        assert!(teacher_ctx.is_closed());

        // the platform notices the far end went away
        student_media.last_context().report(ConnectionState::Disconnected);
        wait_for(&student, CallState::Idle).await;
    }

    #[tokio::test]
    async fn preview_is_acquired_when_the_loop_starts() {
        let directory = Directory::new();
        let bus = InProcessBus::new();
        let (teacher, media) = start(&directory, &bus, "Ms. Lee", Role::Teacher);

        let mut rx = teacher.watch();
        tokio::time::timeout(Duration::from_secs(5), async {
            while rx.borrow().local_stream.is_none() {
                rx.changed().await.unwrap();
            }
        })
        .await
        .unwrap();
        assert_eq!(media.live_streams(), 1);
    }

    #[tokio::test]
    async fn errors_come_back_through_the_handle() {
        let directory = Directory::new();
        let bus = InProcessBus::new();
        let (teacher, _) = start(&directory, &bus, "Ms. Lee", Role::Teacher);

        assert_eq!(
            teacher.start_call("student-404").await,
            Err(CallError::PeerNotFound("student-404".into()))
        );
        assert_eq!(teacher.answer_call().await, Err(CallError::NoIncomingCall));
    }

    #[tokio::test]
    async fn dropping_every_handle_stops_the_loop() {
        let directory = Directory::new();
        let bus = InProcessBus::new();
        let transport = FakeTransport::new();
        let (handle, join) = spawn(SpawnArgs {
            local: directory.register("Amir", Role::Student),
            directory: directory.clone(),
            bus: Arc::new(bus.clone()),
            transport: Arc::new(transport.clone()),
            config: CallConfig::default(),
        });
        let id = handle.participant().id.clone();
        let copy = handle.clone();

        drop(handle);
        // a clone keeps the loop alive
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!join.is_finished());
        assert!(bus.has_subscriber(&id));

        drop(copy);
        tokio::time::timeout(Duration::from_secs(5), join)
            .await
            .expect("event loop still running after every handle was dropped")
            .unwrap();
        assert!(!bus.has_subscriber(&id));
        assert_eq!(transport.live_streams(), 0);
    }

    #[tokio::test]
    async fn shutdown_releases_everything() {
        let directory = Directory::new();
        let bus = InProcessBus::new();
        let (teacher, teacher_media) = start(&directory, &bus, "Ms. Lee", Role::Teacher);
        let (student, _) = start(&directory, &bus, "Amir", Role::Student);

        teacher.start_call(&student.participant().id).await.unwrap();
        teacher.shutdown().await.unwrap();

        assert!(teacher_media.last_context().is_closed());
        assert_eq!(teacher_media.live_streams(), 0);
        assert_eq!(teacher.hang_up().await, Err(CallError::SessionClosed));

        tokio::time::timeout(Duration::from_secs(5), async {
            while bus.has_subscriber(&teacher.participant().id) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }
}
