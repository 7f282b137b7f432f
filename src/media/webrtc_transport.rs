use anyhow::{bail, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::signaling_state::RTCSignalingState;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

use super::rtp_worker::*;
use super::*;
use crate::internal::events::{TransportEvent, TransportEventSender};

/// a remote track, for applications which decode the peer's media themselves
pub struct RemoteTrackAdded {
    pub peer: ParticipantId,
    pub track: Arc<TrackRemote>,
}

// a lazy version of the builder pattern
pub struct InitArgs {
    /// STUN urls. may be empty on a LAN where host candidates suffice
    pub ice_servers: Vec<String>,
    /// receives every remote track as it arrives
    pub remote_track_chan: Option<mpsc::UnboundedSender<RemoteTrackAdded>>,
}

/// webrtc-rs backed media transport.
///
/// This library is not responsible for media capture. Initializing a `WebRtcTransport` results in
/// the transport and a set of channels which shall be used to feed captured RTP packets
/// (VP8 camera, Opus microphone) to whatever call is active.
pub struct WebRtcTransport {
    api: webrtc::api::API,
    ice_servers: Vec<String>,
    remote_track_chan: Option<mpsc::UnboundedSender<RemoteTrackAdded>>,
    /// used to control the tasks which receive RTP packets from the application
    media_worker_channels: MediaWorkerChannels,
    /// local streams handed out by acquire_local_media, by stream id
    local_streams: Mutex<HashMap<String, Vec<Arc<RtpCaptureTrack>>>>,
}

impl WebRtcTransport {
    /// must be called from within a tokio runtime
    pub fn init(args: InitArgs) -> Result<(Self, MediaWorkerInputs)> {
        // create channels used to exchange RTP packets
        let (camera_tx, camera_rx) = mpsc::unbounded_channel();
        let (microphone_tx, microphone_rx) = mpsc::unbounded_channel();

        // this will be returned to the user
        let media_worker_inputs = MediaWorkerInputs {
            camera_tx,
            microphone_tx,
        };

        // create channels to control the media workers
        let (camera_worker_tx, camera_worker_rx) = mpsc::unbounded_channel();
        let (microphone_worker_tx, microphone_worker_rx) = mpsc::unbounded_channel();

        let media_worker_channels = MediaWorkerChannels {
            camera: camera_worker_tx,
            microphone: microphone_worker_tx,
        };

        // spawn media workers
        tokio::spawn(async move {
            let mut worker = MediaWorker::new(camera_worker_rx, camera_rx);
            worker.run().await;
        });

        tokio::spawn(async move {
            let mut worker = MediaWorker::new(microphone_worker_rx, microphone_rx);
            worker.run().await;
        });

        Ok((
            Self {
                api: create_api()?,
                ice_servers: args.ice_servers,
                remote_track_chan: args.remote_track_chan,
                media_worker_channels,
                local_streams: Mutex::new(HashMap::new()),
            },
            media_worker_inputs,
        ))
    }

    /// stops the media workers. streams acquired earlier stop receiving packets
    pub fn deinit(&self) {
        let _ = self
            .media_worker_channels
            .camera
            .send(MediaWorkerCommands::Terminate);
        let _ = self
            .media_worker_channels
            .microphone
            .send(MediaWorkerCommands::Terminate);
    }

    fn local_tracks(&self, stream: &str) -> Option<Vec<Arc<RtpCaptureTrack>>> {
        let streams = self.local_streams.lock().unwrap_or_else(|e| e.into_inner());
        streams.get(stream).cloned()
    }
}

#[async_trait]
impl MediaTransport for WebRtcTransport {
    async fn acquire_local_media(&self) -> Result<MediaStream> {
        let stream_id = uuid::Uuid::new_v4().to_string();
        let camera = Arc::new(RtpCaptureTrack::start(
            &stream_id,
            MimeType::VP8,
            &self.media_worker_channels.camera,
        )?);
        let microphone = match RtpCaptureTrack::start(
            &stream_id,
            MimeType::OPUS,
            &self.media_worker_channels.microphone,
        ) {
            Ok(track) => Arc::new(track),
            Err(e) => {
                camera.stop();
                return Err(e);
            }
        };

        let tracks = vec![camera, microphone];
        {
            let mut streams = self.local_streams.lock().unwrap_or_else(|e| e.into_inner());
            // forget streams which have been stopped since
            streams.retain(|_, tracks| tracks.iter().any(|t| t.is_live()));
            streams.insert(stream_id.clone(), tracks.clone());
        }

        let tracks: Vec<Arc<dyn CaptureTrack>> = tracks
            .into_iter()
            .map(|t| t as Arc<dyn CaptureTrack>)
            .collect();
        Ok(MediaStream::new(stream_id, tracks))
    }

    /// creates a RTCPeerConnection with the local tracks attached and its callbacks wired
    /// to `events`
    async fn open_context(
        &self,
        id: ContextId,
        peer: &str,
        local: &MediaStream,
        events: TransportEventSender,
    ) -> Result<Box<dyn NegotiationContext>> {
        let Some(local_tracks) = self.local_tracks(local.id()) else {
            bail!("stream {} was not acquired by this transport", local.id());
        };

        let ice_servers = if self.ice_servers.is_empty() {
            vec![]
        } else {
            vec![RTCIceServer {
                urls: self.ice_servers.clone(),
                ..Default::default()
            }]
        };
        let config = RTCConfiguration {
            ice_servers,
            ..Default::default()
        };

        // Create a new RTCPeerConnection
        let connection = Arc::new(self.api.new_peer_connection(config).await?);

        attach_local_tracks(&connection, &local_tracks).await?;

        // configure callbacks

        // send discovered ice candidates (for self) to remote peer
        let tx = events.clone();
        let dest = peer.to_string();
        connection.on_ice_candidate(Box::new(move |c: Option<RTCIceCandidate>| {
            let tx = tx.clone();
            let dest = dest.clone();
            Box::pin(async move {
                let Some(candidate) = c else {
                    log::debug!("{} finished gathering candidates for {}", id, &dest);
                    return;
                };
                match candidate.to_json() {
                    Ok(init) => {
                        tx.emit(TransportEvent::LocalCandidate {
                            context: id,
                            candidate: IceCandidate {
                                candidate: init.candidate,
                                sdp_mid: init.sdp_mid,
                                sdp_mline_index: init.sdp_mline_index,
                                username_fragment: init.username_fragment,
                            },
                        });
                    }
                    Err(e) => {
                        log::error!("failed to serialize ice candidate for peer {}: {}", &dest, e)
                    }
                }
            })
        }));

        // Set the handler for peer connection state
        // This will notify you when the peer has connected/disconnected
        let tx = events.clone();
        let dest = peer.to_string();
        connection.on_peer_connection_state_change(Box::new(
            move |connection_state: RTCPeerConnectionState| {
                log::info!(
                    "Connection State for peer {} has changed {}",
                    &dest,
                    connection_state
                );
                let state = match connection_state {
                    RTCPeerConnectionState::New | RTCPeerConnectionState::Unspecified => {
                        ConnectionState::New
                    }
                    RTCPeerConnectionState::Connecting => ConnectionState::Connecting,
                    RTCPeerConnectionState::Connected => ConnectionState::Connected,
                    RTCPeerConnectionState::Disconnected => ConnectionState::Disconnected,
                    RTCPeerConnectionState::Failed => ConnectionState::Failed,
                    RTCPeerConnectionState::Closed => ConnectionState::Closed,
                };
                tx.emit(TransportEvent::ConnectionStateChanged { context: id, state });
                Box::pin(async {})
            },
        ));

        // report remote tracks when created
        let tx = events;
        let dest = peer.to_string();
        let raw_tracks = self.remote_track_chan.clone();
        connection.on_track(Box::new(
            move |track: Option<Arc<TrackRemote>>, _receiver: Option<Arc<RTCRtpReceiver>>| {
                let tx = tx.clone();
                let dest = dest.clone();
                let raw_tracks = raw_tracks.clone();
                Box::pin(async move {
                    let Some(track) = track else {
                        return;
                    };
                    let mime_type = track.codec().await.capability.mime_type;
                    tx.emit(TransportEvent::TrackAdded {
                        context: id,
                        track: RemoteTrack {
                            id: uuid::Uuid::new_v4().to_string(),
                            stream_id: format!("{}-remote", &dest),
                            kind: kind_of_mime(&mime_type),
                        },
                    });
                    if let Some(chan) = raw_tracks {
                        if let Err(e) = chan.send(RemoteTrackAdded {
                            peer: dest.clone(),
                            track,
                        }) {
                            log::error!("failed to send track added event for peer {}: {}", &dest, e);
                        }
                    }
                })
            },
        ));

        Ok(Box::new(WebRtcContext {
            id,
            peer: peer.to_string(),
            connection,
        }))
    }
}

/// adds the live tracks to `connection`. the connection is closed if any of them is refused
async fn attach_local_tracks(
    connection: &RTCPeerConnection,
    local_tracks: &[Arc<RtpCaptureTrack>],
) -> Result<()> {
    for local_track in local_tracks.iter().filter(|t| t.is_live()) {
        let track = local_track.track() as Arc<dyn TrackLocal + Send + Sync>;
        let sender = match connection.add_track(track).await {
            Ok(sender) => sender,
            Err(e) => {
                log::error!("failed to add track {}: {}", local_track.id(), e);
                if let Err(close_err) = connection.close().await {
                    log::warn!("failed to close peer connection: {}", close_err);
                }
                return Err(e.into());
            }
        };
        // Read incoming RTCP packets
        // Before these packets are returned they are processed by interceptors. For things
        // like NACK this needs to be called.
        tokio::spawn(async move {
            let mut rtcp_buf = vec![0u8; 1500];
            while sender.read(&mut rtcp_buf).await.is_ok() {}
        });
    }
    Ok(())
}

pub struct WebRtcContext {
    id: ContextId,
    peer: ParticipantId,
    connection: Arc<RTCPeerConnection>,
}

#[async_trait]
impl NegotiationContext for WebRtcContext {
    fn id(&self) -> ContextId {
        self.id
    }

    fn peer(&self) -> &str {
        &self.peer
    }

    async fn create_offer(&self) -> Result<SessionDescription> {
        from_rtc(self.connection.create_offer(None).await?)
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        from_rtc(self.connection.create_answer(None).await?)
    }

    /// Sets the LocalDescription, and starts our UDP listeners
    /// Note: this will start the gathering of ICE candidates
    async fn set_local_description(&self, desc: SessionDescription) -> Result<()> {
        self.connection.set_local_description(to_rtc(desc)?).await?;
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()> {
        if let Err(e) = self.connection.set_remote_description(to_rtc(desc)?).await {
            log::error!("failed to set remote description: {:?}", e);
            return Err(e.into());
        }
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        self.connection
            .add_ice_candidate(RTCIceCandidateInit {
                candidate: candidate.candidate,
                sdp_mid: candidate.sdp_mid,
                sdp_mline_index: candidate.sdp_mline_index,
                username_fragment: candidate.username_fragment,
            })
            .await?;
        Ok(())
    }

    fn negotiation_state(&self) -> NegotiationState {
        match self.connection.signaling_state() {
            RTCSignalingState::Stable | RTCSignalingState::Unspecified => NegotiationState::Stable,
            RTCSignalingState::HaveLocalOffer => NegotiationState::HaveLocalOffer,
            RTCSignalingState::HaveRemoteOffer => NegotiationState::HaveRemoteOffer,
            RTCSignalingState::HaveLocalPranswer => NegotiationState::HaveLocalPranswer,
            RTCSignalingState::HaveRemotePranswer => NegotiationState::HaveRemotePranswer,
            RTCSignalingState::Closed => NegotiationState::Closed,
        }
    }

    async fn close(&self) -> Result<()> {
        self.connection.close().await?;
        Ok(())
    }
}

// the browser JSON shape is shared with RTCSessionDescription, which only parses the sdp
// when it is applied
fn to_rtc(desc: SessionDescription) -> Result<RTCSessionDescription> {
    Ok(serde_json::from_value(serde_json::to_value(desc)?)?)
}

fn from_rtc(desc: RTCSessionDescription) -> Result<SessionDescription> {
    let kind = match desc.sdp_type {
        RTCSdpType::Offer => SdpKind::Offer,
        RTCSdpType::Answer => SdpKind::Answer,
        RTCSdpType::Pranswer => SdpKind::Pranswer,
        RTCSdpType::Rollback => SdpKind::Rollback,
        RTCSdpType::Unspecified => bail!("session description has no type"),
    };
    Ok(SessionDescription {
        kind,
        sdp: desc.sdp,
    })
}

// todo: add support for more codecs. perhaps make it configurable
fn create_api() -> Result<webrtc::api::API> {
    let mut media = MediaEngine::default();
    media.register_default_codecs()?;

    // Create a InterceptorRegistry. This is the user configurable RTP/RTCP Pipeline.
    // This provides NACKs, RTCP Reports and other features.
    let mut registry = Registry::new();

    // Use the default set of Interceptors
    registry = register_default_interceptors(registry, &mut media)?;

    // Create the API object with the MediaEngine
    Ok(APIBuilder::new()
        .with_media_engine(media)
        .with_interceptor_registry(registry)
        .build())
}
