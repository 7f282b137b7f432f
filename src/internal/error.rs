use derive_more::Display;

use crate::internal::data_types::{CallState, ParticipantId};

/// errors surfaced to whoever drives a participant's call.
/// stale or out-of-order signaling is never an error; it is dropped and logged
#[derive(Debug, Display, Clone, PartialEq, Eq)]
pub enum CallError {
    #[display(fmt = "peer not found: {}", _0)]
    PeerNotFound(ParticipantId),
    #[display(fmt = "no incoming call to answer")]
    NoIncomingCall,
    /// only one call at a time
    #[display(fmt = "a call is already in progress ({})", _0)]
    Busy(CallState),
    #[display(fmt = "the local device is not registered")]
    NotRegistered,
    /// capture device unavailable or denied. the call attempt is aborted
    #[display(fmt = "could not access camera and microphone: {}", _0)]
    MediaAcquisitionFailed(String),
    #[display(fmt = "negotiation failed: {}", _0)]
    NegotiationFailure(String),
    /// the participant's event loop has exited
    #[display(fmt = "call session closed")]
    SessionClosed,
}

impl std::error::Error for CallError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_are_user_facing() {
        assert_eq!(
            CallError::PeerNotFound("student-9".into()).to_string(),
            "peer not found: student-9"
        );
        assert_eq!(
            CallError::Busy(CallState::Connected).to_string(),
            "a call is already in progress (CONNECTED)"
        );
    }

    #[test]
    fn converts_into_anyhow() {
        let err: anyhow::Error = CallError::NoIncomingCall.into();
        assert_eq!(
            err.downcast_ref::<CallError>(),
            Some(&CallError::NoIncomingCall)
        );
    }
}
