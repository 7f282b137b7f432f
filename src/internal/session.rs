use std::sync::Arc;
use tokio::sync::watch;

use crate::internal::config::CallConfig;
use crate::internal::data_types::*;
use crate::internal::directory::Directory;
use crate::internal::error::CallError;
use crate::internal::events::*;
use crate::media::{MediaStream, MediaTransport, NegotiationContext, NegotiationState, RemoteStream};
use crate::signaling::SignalingBus;

/// how far offer/answer has progressed for the active call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationPhase {
    /// caller: offer sent, waiting for the answer
    OfferSent,
    /// callee: offer stored, waiting for the user to answer
    OfferReceived,
    /// callee: answer sent, waiting for connectivity
    AnswerSent,
}

#[derive(Debug, Clone)]
pub struct CallSession {
    pub peer: Participant,
    pub local_role: LocalRole,
    pub phase: NegotiationPhase,
    pub pending_offer: Option<SessionDescription>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingCall {
    pub from: Participant,
}

/// read-only view of a participant's call, published after every change
#[derive(Debug, Clone, Default)]
pub struct CallSnapshot {
    pub call_state: CallState,
    pub incoming_call: Option<IncomingCall>,
    pub current_peer: Option<Participant>,
    pub local_stream: Option<MediaStream>,
    pub remote_stream: Option<RemoteStream>,
}

pub struct SessionManagerInit {
    pub local: Participant,
    pub directory: Directory,
    pub bus: Arc<dyn SignalingBus>,
    pub transport: Arc<dyn MediaTransport>,
    pub config: CallConfig,
    pub events: TransportEventSender,
}

/// owns the call lifecycle of one local participant
///
/// Idle -> Calling -> Connected -> Idle for the caller, Idle -> Receiving -> Connected -> Idle
/// for the callee. any state returns to Idle on hang up or when the transport reports the
/// connection as lost.
///
/// The following functions are driven by the UI:
/// start_call
/// answer_call
/// hang_up
///
/// The following functions are driven by signaling and the media transport:
/// handle_message
/// handle_transport_event
pub struct SessionManager {
    local: Participant,
    directory: Directory,
    bus: Arc<dyn SignalingBus>,
    transport: Arc<dyn MediaTransport>,
    config: CallConfig,
    events: TransportEventSender,
    state: CallState,
    session: Option<CallSession>,
    context: Option<Box<dyn NegotiationContext>>,
    next_context: u64,
    local_media: Option<MediaStream>,
    remote_stream: Option<RemoteStream>,
    snapshot_tx: watch::Sender<CallSnapshot>,
}

impl SessionManager {
    pub fn new(args: SessionManagerInit) -> Self {
        let (snapshot_tx, _) = watch::channel(CallSnapshot::default());
        Self {
            local: args.local,
            directory: args.directory,
            bus: args.bus,
            transport: args.transport,
            config: args.config,
            events: args.events,
            state: CallState::Idle,
            session: None,
            context: None,
            next_context: 0,
            local_media: None,
            remote_stream: None,
            snapshot_tx,
        }
    }

    pub fn local(&self) -> &Participant {
        &self.local
    }

    pub fn state(&self) -> CallState {
        self.state
    }

    pub fn session(&self) -> Option<&CallSession> {
        self.session.as_ref()
    }

    pub fn active_context(&self) -> Option<ContextId> {
        self.context.as_ref().map(|c| c.id())
    }

    pub fn local_media(&self) -> Option<&MediaStream> {
        self.local_media.as_ref()
    }

    pub fn watch(&self) -> watch::Receiver<CallSnapshot> {
        self.snapshot_tx.subscribe()
    }

    pub fn snapshot(&self) -> CallSnapshot {
        let incoming_call = self
            .session
            .as_ref()
            .filter(|s| s.phase == NegotiationPhase::OfferReceived)
            .map(|s| IncomingCall {
                from: s.peer.clone(),
            });
        let current_peer = self
            .session
            .as_ref()
            .filter(|s| s.phase != NegotiationPhase::OfferReceived)
            .map(|s| s.peer.clone());
        CallSnapshot {
            call_state: self.state,
            incoming_call,
            current_peer,
            local_stream: self.local_media.clone(),
            remote_stream: self.remote_stream.clone(),
        }
    }

    /// returns the live local stream, opening the capture devices if needed
    pub async fn ensure_local_media(&mut self) -> Result<MediaStream, CallError> {
        if let Some(media) = self.local_media.as_ref().filter(|m| m.is_live()) {
            return Ok(media.clone());
        }
        match self.transport.acquire_local_media().await {
            Ok(media) => {
                log::debug!("{} acquired local media {}", &self.local.id, media.id());
                self.local_media = Some(media.clone());
                self.publish();
                Ok(media)
            }
            Err(e) => {
                log::error!("{} failed to acquire local media: {}", &self.local.id, e);
                Err(CallError::MediaAcquisitionFailed(e.to_string()))
            }
        }
    }

    /// opens a transport context to `peer_id`, sends it an offer and moves to Calling.
    /// local candidates are forwarded one by one as the transport gathers them
    pub async fn start_call(&mut self, peer_id: &str) -> Result<(), CallError> {
        if self.state != CallState::Idle {
            return Err(CallError::Busy(self.state));
        }
        let peer = self
            .directory
            .find(peer_id)
            .ok_or_else(|| CallError::PeerNotFound(peer_id.into()))?;

        let local_media = self.ensure_local_media().await?;
        let context = self.open_context(&peer.id, &local_media).await?;

        let offer = match create_offer(context.as_ref()).await {
            Ok(offer) => offer,
            Err(e) => {
                log::error!("failed to create offer for {}: {}", &peer.id, e);
                close_context(context).await;
                return Err(CallError::NegotiationFailure(e.to_string()));
            }
        };

        self.context = Some(context);
        self.session = Some(CallSession {
            peer: peer.clone(),
            local_role: LocalRole::Caller,
            phase: NegotiationPhase::OfferSent,
            pending_offer: None,
        });
        self.set_state(CallState::Calling);
        self.bus
            .send(SignalingMessage::offer(&self.local.id, &peer.id, offer));
        Ok(())
    }

    /// answers the stored incoming offer. the state stays Receiving until the transport
    /// reports the connection
    pub async fn answer_call(&mut self) -> Result<(), CallError> {
        let (peer, offer) = match self.session.as_ref() {
            Some(CallSession {
                peer,
                pending_offer: Some(offer),
                ..
            }) if self.state == CallState::Receiving => (peer.clone(), offer.clone()),
            _ => return Err(CallError::NoIncomingCall),
        };

        let local_media = match self.ensure_local_media().await {
            Ok(media) => media,
            Err(e) => {
                self.abandon().await;
                return Err(e);
            }
        };
        let context = match self.open_context(&peer.id, &local_media).await {
            Ok(context) => context,
            Err(e) => {
                self.abandon().await;
                return Err(e);
            }
        };

        let answer = match create_answer(context.as_ref(), offer).await {
            Ok(answer) => answer,
            Err(e) => {
                log::error!("failed to answer {}: {}", &peer.id, e);
                close_context(context).await;
                self.abandon().await;
                return Err(CallError::NegotiationFailure(e.to_string()));
            }
        };

        self.context = Some(context);
        if let Some(session) = self.session.as_mut() {
            session.phase = NegotiationPhase::AnswerSent;
            session.pending_offer = None;
        }
        self.publish();
        self.bus
            .send(SignalingMessage::answer(&self.local.id, &peer.id, answer));
        Ok(())
    }

    /// closes the call from any state, then re-acquires local media for the preview
    pub async fn hang_up(&mut self) {
        if let Some(session) = &self.session {
            log::info!("{} hanging up on {}", &self.local.id, &session.peer.id);
        }
        self.abandon().await;
    }

    /// releases everything without re-acquiring media. used when the participant leaves
    pub async fn shutdown(&mut self) {
        self.teardown().await;
    }

    pub async fn handle_message(&mut self, message: SignalingMessage) {
        if message.to_id != self.local.id {
            log::warn!(
                "{} got a signal addressed to {}",
                &self.local.id,
                &message.to_id
            );
            return;
        }
        log::debug!(
            "{} <- {:?} from {}",
            &self.local.id,
            message.kind,
            &message.from_id
        );
        match message.kind {
            SignalKind::Offer => self.on_offer(message),
            SignalKind::Answer => self.on_answer(message).await,
            SignalKind::Candidate => self.on_candidate(message).await,
        }
    }

    pub async fn handle_transport_event(&mut self, event: TransportEvent) {
        let (peer, active) = match &self.context {
            Some(context) if context.id() == event.context() => {
                (context.peer().to_string(), context.id())
            }
            _ => {
                log::debug!("dropping event from stale context {}", event.context());
                return;
            }
        };

        match event {
            TransportEvent::LocalCandidate { candidate, .. } => {
                self.bus
                    .send(SignalingMessage::candidate(&self.local.id, &peer, candidate));
            }
            TransportEvent::ConnectionStateChanged { state, .. } => {
                log::info!(
                    "connection state for peer {} ({}) has changed {}",
                    &peer,
                    active,
                    state
                );
                if state == ConnectionState::Connected {
                    if matches!(self.state, CallState::Calling | CallState::Receiving) {
                        self.set_state(CallState::Connected);
                    }
                } else if state.is_terminal() {
                    self.hang_up().await;
                }
            }
            TransportEvent::TrackAdded { track, .. } => {
                log::debug!("peer {} added {} track {}", &peer, track.kind, &track.id);
                self.remote_stream
                    .get_or_insert_with(|| RemoteStream {
                        peer: peer.clone(),
                        tracks: Vec::new(),
                    })
                    .tracks
                    .push(track);
                self.publish();
            }
        }
    }

    fn on_offer(&mut self, message: SignalingMessage) {
        let Some(offer) = message.sdp else {
            log::warn!("offer from {} has no sdp", &message.from_id);
            return;
        };
        if self.state != CallState::Idle {
            log::info!(
                "{} is {}, dropping offer from {}",
                &self.local.id,
                self.state,
                &message.from_id
            );
            return;
        }
        let Some(caller) = self.directory.find(&message.from_id) else {
            log::warn!("dropping offer from unknown participant {}", &message.from_id);
            return;
        };

        self.session = Some(CallSession {
            peer: caller,
            local_role: LocalRole::Callee,
            phase: NegotiationPhase::OfferReceived,
            pending_offer: Some(offer),
        });
        self.set_state(CallState::Receiving);
    }

    async fn on_answer(&mut self, message: SignalingMessage) {
        let Some(answer) = message.sdp else {
            log::warn!("answer from {} has no sdp", &message.from_id);
            return;
        };
        let is_current_peer = self
            .session
            .as_ref()
            .map(|s| s.peer.id == message.from_id)
            .unwrap_or(false);
        let context = match &self.context {
            Some(context) if self.state == CallState::Calling && is_current_peer => context,
            _ => {
                log::debug!(
                    "ignoring answer from {} while {}",
                    &message.from_id,
                    self.state
                );
                return;
            }
        };
        if context.negotiation_state() == NegotiationState::Stable {
            log::debug!("ignoring answer from {}: already negotiated", &message.from_id);
            return;
        }
        if let Err(e) = context.set_remote_description(answer).await {
            log::error!("failed to apply answer from {}: {}", &message.from_id, e);
        }
    }

    async fn on_candidate(&mut self, message: SignalingMessage) {
        let Some(candidate) = message.candidate else {
            log::warn!("candidate message from {} is empty", &message.from_id);
            return;
        };
        match &self.context {
            Some(context) if context.peer() == message.from_id => {
                if let Err(e) = context.add_ice_candidate(candidate).await {
                    log::warn!("failed to add ice candidate from {}: {}", &message.from_id, e);
                }
            }
            _ => log::debug!("no transport context for candidate from {}", &message.from_id),
        }
    }

    async fn open_context(
        &mut self,
        peer: &str,
        local_media: &MediaStream,
    ) -> Result<Box<dyn NegotiationContext>, CallError> {
        self.next_context += 1;
        let id = ContextId(self.next_context);
        self.transport
            .open_context(id, peer, local_media, self.events.clone())
            .await
            .map_err(|e| {
                log::error!("failed to open transport context to {}: {}", peer, e);
                CallError::NegotiationFailure(e.to_string())
            })
    }

    /// tears the call down, then keeps the camera preview warm
    async fn abandon(&mut self) {
        self.teardown().await;
        if self.config.warm_preview {
            if let Err(e) = self.ensure_local_media().await {
                log::warn!("preview not restored after teardown: {}", e);
            }
        }
    }

    async fn teardown(&mut self) {
        if let Some(context) = self.context.take() {
            close_context(context).await;
        }
        if let Some(media) = self.local_media.take() {
            media.stop();
        }
        self.remote_stream = None;
        self.session = None;
        self.set_state(CallState::Idle);
    }

    fn set_state(&mut self, state: CallState) {
        if self.state != state {
            log::info!("{}: {} -> {}", &self.local.id, self.state, state);
        }
        self.state = state;
        self.publish();
    }

    fn publish(&self) {
        self.snapshot_tx.send_replace(self.snapshot());
    }
}

/// sets the local description, which starts candidate gathering
async fn create_offer(context: &dyn NegotiationContext) -> anyhow::Result<SessionDescription> {
    let offer = context.create_offer().await?;
    context.set_local_description(offer.clone()).await?;
    Ok(offer)
}

async fn create_answer(
    context: &dyn NegotiationContext,
    offer: SessionDescription,
) -> anyhow::Result<SessionDescription> {
    context.set_remote_description(offer).await?;
    let answer = context.create_answer().await?;
    context.set_local_description(answer.clone()).await?;
    Ok(answer)
}

async fn close_context(context: Box<dyn NegotiationContext>) {
    if let Err(e) = context.close().await {
        log::warn!("failed to close transport context {}: {}", context.id(), e);
    }
}
