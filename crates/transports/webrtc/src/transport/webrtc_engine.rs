//! Transport engine backed by the `webrtc` crate

use super::{
    IceCandidate, PeerConnectionState, PeerTransport, SdpType, SessionDescription, TransportEvent,
    TransportEventSender, TransportFactory,
};
use crate::config::StreamingConfig;
use crate::media::audio::{OpusEncoder, OpusSettings};
use crate::media::paced_sender::PacedSender;
use crate::media::{AudioPacket, LocalTrack, RemoteTrack, TrackKind, VideoFrame};
use crate::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, trace, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::api::{APIBuilder, API};
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

/// Queue depth for video frames waiting to be paced out
const VIDEO_QUEUE_DEPTH: usize = 4;

/// Factory producing `webrtc` peer connections
#[derive(Debug, Clone)]
pub struct WebRtcEngine {
    config: Arc<StreamingConfig>,
}

impl WebRtcEngine {
    /// Create a factory using the ICE servers and audio settings in `config`
    pub fn new(config: StreamingConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    fn build_api(&self) -> Result<API> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| Error::WebRtc(format!("Failed to register codecs: {}", e)))?;

        let registry = register_default_interceptors(Default::default(), &mut media_engine)
            .map_err(|e| Error::WebRtc(format!("Failed to register interceptors: {}", e)))?;

        Ok(APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build())
    }

    fn rtc_configuration(&self) -> RTCConfiguration {
        let ice_servers = self
            .config
            .stun_servers
            .iter()
            .map(|url| RTCIceServer {
                urls: vec![url.clone()],
                ..Default::default()
            })
            .chain(self.config.turn_servers.iter().map(|turn| RTCIceServer {
                urls: vec![turn.url.clone()],
                username: turn.username.clone(),
                credential: turn.credential.clone(),
                ..Default::default()
            }))
            .collect();

        RTCConfiguration {
            ice_servers,
            ..Default::default()
        }
    }
}

#[async_trait]
impl TransportFactory for WebRtcEngine {
    async fn create(&self, events: TransportEventSender) -> Result<Arc<dyn PeerTransport>> {
        let api = self.build_api()?;
        let peer_connection = Arc::new(
            api.new_peer_connection(self.rtc_configuration())
                .await
                .map_err(|e| Error::WebRtc(format!("Failed to create peer connection: {}", e)))?,
        );

        install_callbacks(&peer_connection, events);

        let audio_queue_depth = (self.config.audio.max_buffered_duration_ms
            / self.config.audio.packet_duration_ms.max(1))
        .max(2) as usize;

        debug!("Created WebRTC peer connection");

        Ok(Arc::new(WebRtcTransport {
            peer_connection,
            opus_bitrate: self.config.audio.opus_bitrate,
            audio_queue_depth,
            tracks: Mutex::new(HashMap::new()),
            encoder: Mutex::new(None),
        }))
    }
}

fn install_callbacks(peer_connection: &Arc<RTCPeerConnection>, events: TransportEventSender) {
    let ice_events = events.clone();
    peer_connection.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
        let events = ice_events.clone();
        Box::pin(async move {
            // None marks the end of gathering
            let Some(candidate) = candidate else {
                return;
            };
            match candidate.to_json() {
                Ok(init) => {
                    events.emit(TransportEvent::IceCandidate(IceCandidate {
                        candidate: init.candidate,
                        sdp_mid: init.sdp_mid,
                        sdp_mline_index: init.sdp_mline_index,
                        username_fragment: init.username_fragment,
                    }));
                }
                Err(e) => warn!("Failed to serialize local ICE candidate: {}", e),
            }
        })
    }));

    let track_events = events.clone();
    peer_connection.on_track(Box::new(
        move |track: Arc<TrackRemote>,
              _receiver: Arc<RTCRtpReceiver>,
              _transceiver: Arc<RTCRtpTransceiver>| {
            let events = track_events.clone();
            Box::pin(async move {
                let kind = match track.kind() {
                    RTPCodecType::Audio => TrackKind::Audio,
                    RTPCodecType::Video => TrackKind::Video,
                    _ => return,
                };
                let id = track.id();
                let stream_id = track.stream_id();
                info!("Remote {:?} track received: {}", kind, id);
                events.emit(TransportEvent::TrackReceived(RemoteTrack {
                    kind,
                    id,
                    stream_id,
                    handle: Some(track as Arc<dyn Any + Send + Sync>),
                }));
            })
        },
    ));

    peer_connection.on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
        let events = events.clone();
        Box::pin(async move {
            let state = match s {
                RTCPeerConnectionState::Connecting => PeerConnectionState::Connecting,
                RTCPeerConnectionState::Connected => PeerConnectionState::Connected,
                RTCPeerConnectionState::Disconnected => PeerConnectionState::Disconnected,
                RTCPeerConnectionState::Failed => PeerConnectionState::Failed,
                RTCPeerConnectionState::Closed => PeerConnectionState::Closed,
                _ => return,
            };
            debug!("Peer connection state: {:?}", state);
            events.emit(TransportEvent::StateChanged(state));
        })
    }));
}

struct AttachedTrack {
    kind: TrackKind,
    rtp_sender: Arc<RTCRtpSender>,
    paced: PacedSender,
}

/// One `RTCPeerConnection` with its outgoing sample tracks
pub struct WebRtcTransport {
    peer_connection: Arc<RTCPeerConnection>,
    opus_bitrate: u32,
    audio_queue_depth: usize,
    tracks: Mutex<HashMap<String, AttachedTrack>>,
    encoder: Mutex<Option<OpusEncoder>>,
}

impl WebRtcTransport {
    fn to_rtc(description: SessionDescription) -> Result<RTCSessionDescription> {
        let parsed = match description.sdp_type {
            SdpType::Offer => RTCSessionDescription::offer(description.sdp),
            SdpType::Answer => RTCSessionDescription::answer(description.sdp),
        };
        parsed.map_err(|e| Error::Negotiation(format!("Failed to parse SDP: {}", e)))
    }

    fn with_track_of_kind<T>(
        &self,
        kind: TrackKind,
        f: impl FnOnce(&AttachedTrack) -> Result<T>,
    ) -> Result<T> {
        let tracks = self.tracks.lock();
        let track = tracks
            .values()
            .find(|t| t.kind == kind)
            .ok_or_else(|| Error::Internal(format!("no {:?} track attached", kind)))?;
        f(track)
    }
}

#[async_trait]
impl PeerTransport for WebRtcTransport {
    async fn create_offer(&self) -> Result<SessionDescription> {
        let offer = self
            .peer_connection
            .create_offer(None)
            .await
            .map_err(|e| Error::Negotiation(format!("Failed to create offer: {}", e)))?;
        Ok(SessionDescription::offer(offer.sdp))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        let answer = self
            .peer_connection
            .create_answer(None)
            .await
            .map_err(|e| Error::Negotiation(format!("Failed to create answer: {}", e)))?;
        Ok(SessionDescription::answer(answer.sdp))
    }

    async fn set_local_description(&self, description: SessionDescription) -> Result<()> {
        self.peer_connection
            .set_local_description(Self::to_rtc(description)?)
            .await
            .map_err(|e| Error::Negotiation(format!("Failed to set local description: {}", e)))
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()> {
        self.peer_connection
            .set_remote_description(Self::to_rtc(description)?)
            .await
            .map_err(|e| Error::Negotiation(format!("Failed to set remote description: {}", e)))
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: candidate.username_fragment,
        };
        self.peer_connection
            .add_ice_candidate(init)
            .await
            .map_err(|e| Error::IceCandidate(format!("Failed to add ICE candidate: {}", e)))
    }

    async fn add_track(&self, track: &LocalTrack) -> Result<()> {
        let (capability, queue_depth) = match track.kind {
            TrackKind::Audio => (
                RTCRtpCodecCapability {
                    mime_type: MIME_TYPE_OPUS.to_owned(),
                    clock_rate: 48000,
                    channels: track.channels.max(1),
                    ..Default::default()
                },
                self.audio_queue_depth,
            ),
            TrackKind::Video => (
                RTCRtpCodecCapability {
                    mime_type: MIME_TYPE_VP8.to_owned(),
                    clock_rate: 90000,
                    ..Default::default()
                },
                VIDEO_QUEUE_DEPTH,
            ),
        };

        let sample_track = Arc::new(TrackLocalStaticSample::new(
            capability,
            track.id.clone(),
            track.stream_id.clone(),
        ));

        let rtp_sender = self
            .peer_connection
            .add_track(Arc::clone(&sample_track) as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(|e| {
                Error::Negotiation(format!("Failed to add {:?} track: {}", track.kind, e))
            })?;

        // Interceptors only run while RTCP is being read
        let rtcp_sender = Arc::clone(&rtp_sender);
        tokio::spawn(async move {
            let mut buf = vec![0u8; 1500];
            while rtcp_sender.read(&mut buf).await.is_ok() {}
        });

        let paced = PacedSender::spawn(
            format!("{:?}:{}", track.kind, track.id),
            sample_track,
            queue_depth,
        );
        self.tracks.lock().insert(
            track.id.clone(),
            AttachedTrack {
                kind: track.kind,
                rtp_sender,
                paced,
            },
        );

        debug!("Attached local {:?} track {}", track.kind, track.id);
        Ok(())
    }

    async fn remove_track(&self, track_id: &str) -> Result<()> {
        let attached = self.tracks.lock().remove(track_id);
        let Some(attached) = attached else {
            return Ok(());
        };
        attached.paced.shutdown();
        self.peer_connection
            .remove_track(&attached.rtp_sender)
            .await
            .map_err(|e| Error::WebRtc(format!("Failed to remove track {}: {}", track_id, e)))
    }

    fn send_audio(&self, packet: &AudioPacket) -> Result<()> {
        let encoded = {
            let mut encoder = self.encoder.lock();
            let stale = encoder.as_ref().map_or(true, |enc| {
                enc.settings().channels != packet.channels
                    || enc.settings().sample_rate != packet.sample_rate
            });
            if stale {
                *encoder = Some(OpusEncoder::new(OpusSettings {
                    sample_rate: packet.sample_rate,
                    channels: packet.channels,
                    bitrate: self.opus_bitrate,
                })?);
            }
            match encoder.as_mut() {
                Some(enc) => enc.encode(&packet.samples)?,
                None => return Err(Error::Internal("Opus encoder missing".to_string())),
            }
        };

        trace!("Queueing {} byte Opus packet", encoded.len());
        let duration = packet.duration();
        self.with_track_of_kind(TrackKind::Audio, |track| {
            track.paced.enqueue(encoded.into(), duration)
        })
    }

    fn send_video(&self, frame: &VideoFrame) -> Result<()> {
        self.with_track_of_kind(TrackKind::Video, |track| {
            track.paced.enqueue(frame.data.clone(), frame.duration)
        })
    }

    async fn close(&self) -> Result<()> {
        let drained: Vec<AttachedTrack> = self.tracks.lock().drain().map(|(_, t)| t).collect();
        for track in &drained {
            track.paced.shutdown();
        }

        self.peer_connection
            .close()
            .await
            .map_err(|e| Error::TransportConnection(format!("Failed to close connection: {}", e)))
    }
}
