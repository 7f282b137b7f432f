//! The media transport boundary
//!
//! The session manager drives the platform's peer-to-peer media stack through these traits:
//! acquire local capture, open a negotiation context per call, produce and apply session
//! descriptions, trade ICE candidates. Asynchronous notifications (gathered candidates,
//! connection state, remote tracks) are not callbacks into the session. They are
//! `TransportEvent`s pushed onto the owning participant's event queue, tagged with the
//! `ContextId` of the context which produced them.

use anyhow::Result;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

use crate::internal::data_types::*;
use crate::internal::events::TransportEventSender;

pub mod rtp_worker;
pub mod webrtc_transport;

#[cfg(test)]
pub(crate) mod fake;

/// a locally captured track (camera or microphone)
pub trait CaptureTrack: Send + Sync {
    fn id(&self) -> &str;
    fn kind(&self) -> TrackKind;
    /// stops capturing. idempotent
    fn stop(&self);
    fn is_live(&self) -> bool;
}

/// the local capture stream. cloning shares the underlying tracks
#[derive(Clone)]
pub struct MediaStream {
    id: String,
    tracks: Vec<Arc<dyn CaptureTrack>>,
}

impl MediaStream {
    pub fn new(id: String, tracks: Vec<Arc<dyn CaptureTrack>>) -> Self {
        Self { id, tracks }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn tracks(&self) -> &[Arc<dyn CaptureTrack>] {
        &self.tracks
    }

    pub fn stop(&self) {
        for track in &self.tracks {
            track.stop();
        }
    }

    /// true while any track is still capturing
    pub fn is_live(&self) -> bool {
        self.tracks.iter().any(|t| t.is_live())
    }
}

impl fmt::Debug for MediaStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tracks: Vec<String> = self
            .tracks
            .iter()
            .map(|t| format!("{}:{}", t.kind(), t.id()))
            .collect();
        f.debug_struct("MediaStream")
            .field("id", &self.id)
            .field("tracks", &tracks)
            .field("live", &self.is_live())
            .finish()
    }
}

/// a track sent by the peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTrack {
    pub id: String,
    pub stream_id: String,
    pub kind: TrackKind,
}

/// everything the peer is currently sending
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteStream {
    pub peer: ParticipantId,
    pub tracks: Vec<RemoteTrack>,
}

/// offer/answer progress of a negotiation context. mirrors RTCSignalingState
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationState {
    Stable,
    HaveLocalOffer,
    HaveRemoteOffer,
    HaveLocalPranswer,
    HaveRemotePranswer,
    Closed,
}

#[async_trait]
pub trait MediaTransport: Send + Sync {
    /// opens the capture devices. each call returns a new stream
    async fn acquire_local_media(&self) -> Result<MediaStream>;

    /// creates a negotiation context bound to `peer` with the tracks of `local` attached.
    /// events produced by the context go to `events`, tagged with `id`
    async fn open_context(
        &self,
        id: ContextId,
        peer: &str,
        local: &MediaStream,
        events: TransportEventSender,
    ) -> Result<Box<dyn NegotiationContext>>;
}

#[async_trait]
pub trait NegotiationContext: Send + Sync {
    fn id(&self) -> ContextId;
    fn peer(&self) -> &str;
    async fn create_offer(&self) -> Result<SessionDescription>;
    async fn create_answer(&self) -> Result<SessionDescription>;
    /// applying the local description starts candidate gathering
    async fn set_local_description(&self, desc: SessionDescription) -> Result<()>;
    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()>;
    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()>;
    fn negotiation_state(&self) -> NegotiationState;
    async fn close(&self) -> Result<()>;
}
