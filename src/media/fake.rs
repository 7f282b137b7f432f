//! in-memory media transport for tests. records every call made by the session manager
//! and lets tests play the role of the platform (connection state changes, remote tracks)

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use super::*;
use crate::internal::events::{TransportEvent, TransportEventSender};

pub struct FakeTrack {
    id: String,
    kind: TrackKind,
    live: AtomicBool,
}

impl CaptureTrack for FakeTrack {
    fn id(&self) -> &str {
        &self.id
    }
    fn kind(&self) -> TrackKind {
        self.kind
    }
    fn stop(&self) {
        self.live.store(false, Ordering::SeqCst);
    }
    fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
struct FakeState {
    fail_acquire: bool,
    fail_offer: bool,
    fail_answer: bool,
    candidates_per_context: usize,
    streams: Vec<MediaStream>,
    contexts: Vec<Arc<FakeContext>>,
}

#[derive(Clone)]
pub struct FakeTransport {
    state: Arc<Mutex<FakeState>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(FakeState {
                candidates_per_context: 2,
                ..Default::default()
            })),
        }
    }

    /// makes every following acquisition fail, as if the camera permission was denied
    pub fn deny_capture(&self, deny: bool) {
        self.state.lock().unwrap().fail_acquire = deny;
    }

    pub fn fail_offers(&self, fail: bool) {
        self.state.lock().unwrap().fail_offer = fail;
    }

    pub fn fail_answers(&self, fail: bool) {
        self.state.lock().unwrap().fail_answer = fail;
    }

    pub fn streams(&self) -> Vec<MediaStream> {
        self.state.lock().unwrap().streams.clone()
    }

    pub fn live_streams(&self) -> usize {
        self.streams().iter().filter(|s| s.is_live()).count()
    }

    pub fn contexts(&self) -> Vec<Arc<FakeContext>> {
        self.state.lock().unwrap().contexts.clone()
    }

    pub fn last_context(&self) -> Arc<FakeContext> {
        self.contexts().pop().expect("no context was opened")
    }
}

#[async_trait]
impl MediaTransport for FakeTransport {
    async fn acquire_local_media(&self) -> Result<MediaStream> {
        let mut state = self.state.lock().unwrap();
        if state.fail_acquire {
            bail!("permission denied");
        }
        let n = state.streams.len() + 1;
        let tracks: Vec<Arc<dyn CaptureTrack>> = vec![
            Arc::new(FakeTrack {
                id: format!("camera-{}", n),
                kind: TrackKind::Video,
                live: AtomicBool::new(true),
            }),
            Arc::new(FakeTrack {
                id: format!("microphone-{}", n),
                kind: TrackKind::Audio,
                live: AtomicBool::new(true),
            }),
        ];
        let stream = MediaStream::new(format!("stream-{}", n), tracks);
        state.streams.push(stream.clone());
        Ok(stream)
    }

    async fn open_context(
        &self,
        id: ContextId,
        peer: &str,
        local: &MediaStream,
        events: TransportEventSender,
    ) -> Result<Box<dyn NegotiationContext>> {
        let mut state = self.state.lock().unwrap();
        let context = Arc::new(FakeContext {
            id,
            peer: peer.to_string(),
            local_stream: local.id().to_string(),
            events,
            fail_offer: state.fail_offer,
            fail_answer: state.fail_answer,
            candidates: state.candidates_per_context,
            inner: Mutex::new(FakeContextState {
                negotiation: NegotiationState::Stable,
                local: None,
                remote: None,
                remote_candidates: Vec::new(),
                closed: false,
            }),
        });
        state.contexts.push(context.clone());
        Ok(Box::new(FakeContextHandle(context)))
    }
}

pub struct FakeContextState {
    pub negotiation: NegotiationState,
    pub local: Option<SessionDescription>,
    pub remote: Option<SessionDescription>,
    pub remote_candidates: Vec<IceCandidate>,
    pub closed: bool,
}

pub struct FakeContext {
    pub id: ContextId,
    pub peer: String,
    pub local_stream: String,
    events: TransportEventSender,
    fail_offer: bool,
    fail_answer: bool,
    candidates: usize,
    inner: Mutex<FakeContextState>,
}

impl FakeContext {
    pub fn is_closed(&self) -> bool {
        self.inner.lock().unwrap().closed
    }

    pub fn remote_description(&self) -> Option<SessionDescription> {
        self.inner.lock().unwrap().remote.clone()
    }

    pub fn remote_candidates(&self) -> Vec<IceCandidate> {
        self.inner.lock().unwrap().remote_candidates.clone()
    }

    /// plays the platform reporting a connection state change
    pub fn report(&self, state: ConnectionState) {
        self.events.emit(TransportEvent::ConnectionStateChanged {
            context: self.id,
            state,
        });
    }

    pub fn add_remote_track(&self, kind: TrackKind) {
        self.events.emit(TransportEvent::TrackAdded {
            context: self.id,
            track: RemoteTrack {
                id: format!("{}-{}", self.peer, kind),
                stream_id: format!("{}-stream", self.peer),
                kind,
            },
        });
    }
}

struct FakeContextHandle(Arc<FakeContext>);

#[async_trait]
impl NegotiationContext for FakeContextHandle {
    fn id(&self) -> ContextId {
        self.0.id
    }

    fn peer(&self) -> &str {
        &self.0.peer
    }

    async fn create_offer(&self) -> Result<SessionDescription> {
        if self.0.fail_offer {
            bail!("offer generation failed");
        }
        Ok(SessionDescription::offer(format!("offer {} {}", self.0.id, self.0.peer)))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        if self.0.fail_answer {
            bail!("answer generation failed");
        }
        let inner = self.0.inner.lock().unwrap();
        if inner.negotiation != NegotiationState::HaveRemoteOffer {
            bail!("no remote offer");
        }
        Ok(SessionDescription::answer(format!("answer {} {}", self.0.id, self.0.peer)))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()> {
        {
            let mut inner = self.0.inner.lock().unwrap();
            if inner.closed {
                bail!("context closed");
            }
            inner.negotiation = match desc.kind {
                SdpKind::Offer => NegotiationState::HaveLocalOffer,
                _ => NegotiationState::Stable,
            };
            inner.local = Some(desc);
        }
        for n in 0..self.0.candidates {
            self.0.events.emit(TransportEvent::LocalCandidate {
                context: self.0.id,
                candidate: IceCandidate {
                    candidate: format!("candidate:{} {}", self.0.id, n),
                    sdp_mid: Some("0".into()),
                    sdp_mline_index: Some(0),
                    username_fragment: None,
                },
            });
        }
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()> {
        let mut inner = self.0.inner.lock().unwrap();
        if inner.closed {
            bail!("context closed");
        }
        inner.negotiation = match (desc.kind, inner.negotiation) {
            (SdpKind::Offer, NegotiationState::Stable) => NegotiationState::HaveRemoteOffer,
            (SdpKind::Answer, NegotiationState::HaveLocalOffer) => NegotiationState::Stable,
            (kind, state) => bail!("cannot apply remote {} in {:?}", kind, state),
        };
        inner.remote = Some(desc);
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        let mut inner = self.0.inner.lock().unwrap();
        if inner.closed {
            bail!("context closed");
        }
        inner.remote_candidates.push(candidate);
        Ok(())
    }

    fn negotiation_state(&self) -> NegotiationState {
        self.0.inner.lock().unwrap().negotiation
    }

    async fn close(&self) -> Result<()> {
        let mut inner = self.0.inner.lock().unwrap();
        inner.closed = true;
        inner.negotiation = NegotiationState::Closed;
        Ok(())
    }
}
