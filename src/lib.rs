//! classroom-call
//! One-to-one video calls between a teacher and the students' devices, built on
//! [webrtc-rs](https://github.com/webrtc-rs/webrtc).
//!
//! Every participant owns an event loop which processes UI commands, inbound signals and
//! transport notifications one at a time, in arrival order. The UI talks to it through a
//! `CallClient` (or a bare `CallHandle`) and renders the `CallSnapshot`s it publishes.
//!
//! WebRTC requires out of band signalling. Signals travel over a `SignalingBus`: the
//! `InProcessBus` when every participant lives in one process, or the `HttpRelay`
//! (feature `http-relay`) across a LAN.
//!
//! This library is not responsible for media capture. The `WebRtcTransport` hands back a set
//! of channels which shall be used to feed RTP packets to whatever call is active.

mod client;
mod internal;
pub mod media;
pub mod signaling;

// public exports
pub use client::*;
pub use internal::background_thread::{spawn, CallHandle, SpawnArgs};
pub use internal::config::*;
pub use internal::data_types::*;
pub use internal::directory::Directory;
pub use internal::error::CallError;
pub use internal::events::{SignalKind, SignalingMessage, TransportEvent, TransportEventSender};
pub use internal::session::{CallSession, CallSnapshot, IncomingCall, NegotiationPhase};
pub use media::webrtc_transport::{InitArgs, RemoteTrackAdded, WebRtcTransport};
pub use media::{MediaStream, MediaTransport, RemoteStream, RemoteTrack};
pub use signaling::{InProcessBus, SignalingBus, Subscription};

#[cfg(feature = "http-relay")]
pub use signaling::HttpRelay;

// re-exported so applications can build the packets they feed to the media workers
pub use webrtc::rtp;
