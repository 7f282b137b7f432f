use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::rtp;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;
use webrtc::track::track_local::TrackLocalWriter;

use super::CaptureTrack;
use crate::internal::data_types::TrackKind;

/// the codecs local capture is sent with
#[allow(clippy::upper_case_acronyms)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MimeType {
    // https://en.wikipedia.org/wiki/VP8
    // royalty-free video compression format
    VP8,
    // https://en.wikipedia.org/wiki/Opus_(audio_format)
    // lossy audio coding format
    OPUS,
}

impl fmt::Display for MimeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MimeType::VP8 => MIME_TYPE_VP8,
            MimeType::OPUS => MIME_TYPE_OPUS,
        };
        f.write_str(s)
    }
}

impl MimeType {
    pub fn kind(&self) -> TrackKind {
        match self {
            MimeType::VP8 => TrackKind::Video,
            MimeType::OPUS => TrackKind::Audio,
        }
    }

    pub fn capability(&self) -> RTCRtpCodecCapability {
        match self {
            MimeType::VP8 => RTCRtpCodecCapability {
                mime_type: MIME_TYPE_VP8.to_owned(),
                clock_rate: 90000,
                ..Default::default()
            },
            MimeType::OPUS => RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_owned(),
                clock_rate: 48000,
                channels: 2,
                ..Default::default()
            },
        }
    }
}

/// mime types look like "video/VP8" or "audio/opus"
pub fn kind_of_mime(mime_type: &str) -> TrackKind {
    if mime_type.to_ascii_lowercase().starts_with("audio/") {
        TrackKind::Audio
    } else {
        TrackKind::Video
    }
}

pub enum MediaWorkerCommands {
    AddTrack {
        stream: String,
        track: Arc<TrackLocalStaticRTP>,
    },
    RemoveTrack {
        stream: String,
    },
    Terminate,
}

/// each MediaWorker only handles one type of media.
/// it should be sufficient to identify outgoing_media_tracks by the local stream id
pub struct MediaWorker {
    /// receives control signals from the transport
    pub control_rx: mpsc::UnboundedReceiver<MediaWorkerCommands>,
    /// receives RTP packets from the capture device. for sending to outgoing_media_tracks
    pub media_rx: mpsc::UnboundedReceiver<rtp::packet::Packet>,
    /// locally created tracks - for sending data to peers
    pub outgoing_media_tracks: HashMap<String, Arc<TrackLocalStaticRTP>>,
}

/// Used by the transport to control its MediaWorkers
pub struct MediaWorkerChannels {
    /// controls a worker thread which processes camera input
    pub camera: mpsc::UnboundedSender<MediaWorkerCommands>,
    /// controls a worker thread which processes microphone input
    pub microphone: mpsc::UnboundedSender<MediaWorkerCommands>,
}

/// allows the application to feed its captured media (as RTP packets) to the calls
pub struct MediaWorkerInputs {
    pub camera_tx: mpsc::UnboundedSender<rtp::packet::Packet>,
    pub microphone_tx: mpsc::UnboundedSender<rtp::packet::Packet>,
}

/// adds/removes tracks in response to control signals
/// receives RTP packets and forwards them to the tracks
impl MediaWorker {
    pub fn new(
        control_rx: mpsc::UnboundedReceiver<MediaWorkerCommands>,
        media_rx: mpsc::UnboundedReceiver<rtp::packet::Packet>,
    ) -> Self {
        Self {
            control_rx,
            media_rx,
            outgoing_media_tracks: HashMap::new(),
        }
    }

    pub async fn run(&mut self) {
        loop {
            tokio::select! {
                cmd = self.control_rx.recv() => match cmd {
                    Some(cmd) => match cmd {
                        MediaWorkerCommands::AddTrack { stream, track } => {
                            if self.outgoing_media_tracks.insert(stream.clone(), track).is_some() {
                                log::info!("overwriting media track for stream {}", stream);
                            }
                        }
                        MediaWorkerCommands::RemoveTrack { stream } => {
                            if self.outgoing_media_tracks.remove(&stream).is_none() {
                                log::info!("removed nonexistent media track for stream: {}", &stream);
                            }
                        }
                        MediaWorkerCommands::Terminate => return,
                    },
                    None => return,
                },
                opt = self.media_rx.recv() => match opt {
                    Some(packet) => {
                        for (stream, track) in &self.outgoing_media_tracks {
                            if let Err(e) = track.write_rtp(&packet).await {
                                log::warn!("failed to write RTP packet to stream {}: {}", stream, e);
                            }
                        }
                    }
                    None => {
                        // channel was closed
                        log::info!("MediaWorker channel closed. exiting");
                        return;
                    }
                }
            }
        }
    }
}

/// a local track fed by a MediaWorker. stopping it unregisters it from the worker
pub struct RtpCaptureTrack {
    id: String,
    stream: String,
    kind: TrackKind,
    track: Arc<TrackLocalStaticRTP>,
    worker: mpsc::UnboundedSender<MediaWorkerCommands>,
    live: AtomicBool,
}

impl RtpCaptureTrack {
    /// registers a fresh track for `stream` with `worker`
    pub fn start(
        stream: &str,
        mime_type: MimeType,
        worker: &mpsc::UnboundedSender<MediaWorkerCommands>,
    ) -> anyhow::Result<Self> {
        let id = format!("{}-{}", mime_type.kind(), uuid::Uuid::new_v4());
        let track = Arc::new(TrackLocalStaticRTP::new(
            mime_type.capability(),
            id.clone(),
            stream.to_string(),
        ));
        worker
            .send(MediaWorkerCommands::AddTrack {
                stream: stream.to_string(),
                track: track.clone(),
            })
            .map_err(|_| anyhow::anyhow!("{} worker is not running", mime_type))?;

        Ok(Self {
            id,
            stream: stream.to_string(),
            kind: mime_type.kind(),
            track,
            worker: worker.clone(),
            live: AtomicBool::new(true),
        })
    }

    pub fn track(&self) -> Arc<TrackLocalStaticRTP> {
        self.track.clone()
    }
}

impl CaptureTrack for RtpCaptureTrack {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> TrackKind {
        self.kind
    }

    fn stop(&self) {
        if self.live.swap(false, Ordering::SeqCst) {
            // the worker may already be gone during shutdown
            let _ = self.worker.send(MediaWorkerCommands::RemoveTrack {
                stream: self.stream.clone(),
            });
        }
    }

    fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn mime_kinds() {
        assert_eq!(kind_of_mime("audio/opus"), TrackKind::Audio);
        assert_eq!(kind_of_mime("AUDIO/PCMU"), TrackKind::Audio);
        assert_eq!(kind_of_mime("video/VP8"), TrackKind::Video);
        assert_eq!(MimeType::OPUS.to_string(), MIME_TYPE_OPUS);
        assert_eq!(MimeType::VP8.capability().clock_rate, 90000);
    }

    #[tokio::test]
    async fn stopping_a_track_unregisters_it_once() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let track = RtpCaptureTrack::start("stream-1", MimeType::VP8, &tx).unwrap();
        assert!(matches!(
            rx.try_recv(),
            Ok(MediaWorkerCommands::AddTrack { ref stream, .. }) if stream == "stream-1"
        ));

        track.stop();
        track.stop();
        assert!(!track.is_live());
        assert!(matches!(
            rx.try_recv(),
            Ok(MediaWorkerCommands::RemoveTrack { ref stream }) if stream == "stream-1"
        ));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn starting_without_a_worker_fails() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        assert!(RtpCaptureTrack::start("stream-1", MimeType::OPUS, &tx).is_err());
    }

    #[tokio::test]
    async fn worker_forwards_until_told_to_stop() {
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (media_tx, media_rx) = mpsc::unbounded_channel();
        let track = RtpCaptureTrack::start("stream-1", MimeType::OPUS, &control_tx).unwrap();

        let worker = tokio::spawn(async move {
            let mut worker = MediaWorker::new(control_rx, media_rx);
            worker.run().await;
            worker.outgoing_media_tracks.len()
        });

        // an unbound track swallows packets without error
        media_tx
            .send(rtp::packet::Packet {
                payload: Bytes::from_static(&[0xde, 0xad]),
                ..Default::default()
            })
            .unwrap();
        track.stop();
        control_tx.send(MediaWorkerCommands::Terminate).unwrap();

        assert_eq!(worker.await.unwrap(), 0);
    }
}
