use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::internal::background_thread::InternalCmd;
use crate::internal::data_types::*;
use crate::media::RemoteTrack;

/// peer-to-peer signals. the only wire-level contract between participants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalKind {
    Offer,
    Answer,
    Candidate,
}

/// `{type, fromId, toId, sdp?, candidate?}`
/// offers and answers carry `sdp`, candidates carry `candidate`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalingMessage {
    #[serde(rename = "type")]
    pub kind: SignalKind,
    pub from_id: ParticipantId,
    pub to_id: ParticipantId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp: Option<SessionDescription>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidate: Option<IceCandidate>,
}

impl SignalingMessage {
    pub fn offer(from: &str, to: &str, sdp: SessionDescription) -> Self {
        Self::with_sdp(SignalKind::Offer, from, to, sdp)
    }

    pub fn answer(from: &str, to: &str, sdp: SessionDescription) -> Self {
        Self::with_sdp(SignalKind::Answer, from, to, sdp)
    }

    pub fn candidate(from: &str, to: &str, candidate: IceCandidate) -> Self {
        Self {
            kind: SignalKind::Candidate,
            from_id: from.into(),
            to_id: to.into(),
            sdp: None,
            candidate: Some(candidate),
        }
    }

    fn with_sdp(kind: SignalKind, from: &str, to: &str, sdp: SessionDescription) -> Self {
        Self {
            kind,
            from_id: from.into(),
            to_id: to.into(),
            sdp: Some(sdp),
            candidate: None,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }
}

/// emitted by the media transport, consumed by the session event loop.
/// every event names the context which produced it
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// a local ICE candidate was gathered. it needs to be sent to the peer
    LocalCandidate {
        context: ContextId,
        candidate: IceCandidate,
    },
    ConnectionStateChanged {
        context: ContextId,
        state: ConnectionState,
    },
    /// the peer added a track
    TrackAdded {
        context: ContextId,
        track: RemoteTrack,
    },
}

impl TransportEvent {
    pub fn context(&self) -> ContextId {
        match self {
            TransportEvent::LocalCandidate { context, .. }
            | TransportEvent::ConnectionStateChanged { context, .. }
            | TransportEvent::TrackAdded { context, .. } => *context,
        }
    }
}

/// everything a participant's event loop reacts to. all sources share one queue,
/// so events are handled one at a time in arrival order
pub enum SessionEvent {
    /// driven by the UI
    Command(InternalCmd),
    /// driven by signaling
    Signal(SignalingMessage),
    /// driven by the media transport
    Transport(TransportEvent),
}

/// handed to the media transport so its notifications land on the participant's queue
#[derive(Clone)]
pub struct TransportEventSender {
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl TransportEventSender {
    pub fn new(tx: mpsc::UnboundedSender<SessionEvent>) -> Self {
        Self { tx }
    }

    /// returns false if the event loop is gone
    pub fn emit(&self, event: TransportEvent) -> bool {
        self.tx.send(SessionEvent::Transport(event)).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offer_wire_format() {
        let msg = SignalingMessage::offer(
            "teacher-1",
            "student-7",
            SessionDescription::offer("v=0"),
        );
        let json: serde_json::Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(json["type"], "offer");
        assert_eq!(json["fromId"], "teacher-1");
        assert_eq!(json["toId"], "student-7");
        assert_eq!(json["sdp"]["type"], "offer");
        assert!(json.get("candidate").is_none());
    }

    #[test]
    fn parses_candidate_from_browser_peer() {
        let raw = r#"{
            "type": "candidate",
            "fromId": "student-2",
            "toId": "teacher-1",
            "candidate": {"candidate": "candidate:0 1 UDP 1 10.0.0.2 9 typ host", "sdpMid": "0", "sdpMLineIndex": 0}
        }"#;
        let msg = SignalingMessage::from_json(raw).unwrap();
        assert_eq!(msg.kind, SignalKind::Candidate);
        assert!(msg.sdp.is_none());
        assert_eq!(msg.candidate.unwrap().sdp_mid.as_deref(), Some("0"));
    }
}
