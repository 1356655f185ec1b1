use crate::error::NegotiationError;
use crate::logger::dump_selected_pair;
use crate::peer::engine::{
    CloseHandler, DataChannelHandle, IceConnectionState, MessageHandler, PeerEventKind,
    PeerEventSink, PeerHandle, RtcEngine,
};
use crate::peer::ice::local_candidate;
use crate::peer::types::{IceCandidate, IceServerConfig, MediaTrack, TrackKind};
use crate::utils::add_ice_url_scheme;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_H264, MIME_TYPE_OPUS};
use webrtc::api::{APIBuilder, API};
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::RTCIceCandidate;
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::policy::bundle_policy::RTCBundlePolicy;
use webrtc::peer_connection::policy::rtcp_mux_policy::RTCRtcpMuxPolicy;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

type LocalTracks = HashMap<String, Arc<TrackLocalStaticSample>>;

pub struct WebRtcEngine {
    api: API,
    ice_servers: Vec<RTCIceServer>,
    tracks: Arc<LocalTracks>,
    closed: AtomicBool,
}

impl WebRtcEngine {
    /// Build the engine and the shared outbound tracks. Every connection
    /// gets the same track objects, so one written sample reaches all peers.
    pub fn new(ice_servers: &[IceServerConfig], tracks: &[MediaTrack]) -> Result<Self, NegotiationError> {
        let mut media = MediaEngine::default();
        media
            .register_default_codecs()
            .map_err(|e| NegotiationError::CreateConnection(format!("codec registration: {e}")))?;
        let registry = register_default_interceptors(Registry::new(), &mut media)
            .map_err(|e| NegotiationError::CreateConnection(format!("interceptors: {e}")))?;
        let api = APIBuilder::new()
            .with_media_engine(media)
            .with_interceptor_registry(registry)
            .build();

        let tracks = tracks
            .iter()
            .map(|track| (track.id.clone(), Arc::new(local_track_for(track))))
            .collect();

        Ok(Self {
            api,
            ice_servers: get_user_ice_servers(ice_servers),
            tracks: Arc::new(tracks),
            closed: AtomicBool::new(false),
        })
    }

    /// Track a frame producer writes samples into
    pub fn local_track(&self, id: &str) -> Option<Arc<TrackLocalStaticSample>> {
        self.tracks.get(id).cloned()
    }

    fn rtc_config(&self) -> RTCConfiguration {
        RTCConfiguration {
            ice_servers: self.ice_servers.clone(),
            ice_candidate_pool_size: 10,
            bundle_policy: RTCBundlePolicy::MaxBundle,
            rtcp_mux_policy: RTCRtcpMuxPolicy::Require,
            ..Default::default()
        }
    }
}

fn local_track_for(track: &MediaTrack) -> TrackLocalStaticSample {
    let codec = match track.kind {
        TrackKind::Video => RTCRtpCodecCapability {
            mime_type: MIME_TYPE_H264.to_owned(),
            clock_rate: 90000,
            sdp_fmtp_line: "level-asymmetry-allowed=1;packetization-mode=1;profile-level-id=42e01f"
                .to_owned(),
            ..Default::default()
        },
        TrackKind::Audio => RTCRtpCodecCapability {
            mime_type: MIME_TYPE_OPUS.to_owned(),
            clock_rate: 48000,
            channels: 2,
            ..Default::default()
        },
    };
    TrackLocalStaticSample::new(codec, track.id.clone(), track.stream_id.clone())
}

/// Map configured servers to engine entries, adding URL schemes as needed
pub fn get_user_ice_servers(servers: &[IceServerConfig]) -> Vec<RTCIceServer> {
    servers
        .iter()
        .map(|config| RTCIceServer {
            urls: vec![add_ice_url_scheme(config)],
            username: config.username.clone().unwrap_or_default(),
            credential: config.credential.clone().unwrap_or_default(),
        })
        .collect()
}

impl From<RTCIceConnectionState> for IceConnectionState {
    fn from(state: RTCIceConnectionState) -> Self {
        match state {
            RTCIceConnectionState::Checking => IceConnectionState::Checking,
            RTCIceConnectionState::Connected => IceConnectionState::Connected,
            RTCIceConnectionState::Completed => IceConnectionState::Completed,
            RTCIceConnectionState::Disconnected => IceConnectionState::Disconnected,
            RTCIceConnectionState::Failed => IceConnectionState::Failed,
            RTCIceConnectionState::Closed => IceConnectionState::Closed,
            _ => IceConnectionState::New,
        }
    }
}

#[async_trait]
impl RtcEngine for WebRtcEngine {
    async fn create_connection(
        &self,
        events: PeerEventSink,
    ) -> Result<Arc<dyn PeerHandle>, NegotiationError> {
        let connection_id = events.connection_id().to_string();
        if self.closed.load(Ordering::SeqCst) {
            return Err(NegotiationError::CreateConnection("engine is closed".into()));
        }
        let pc = Arc::new(
            self.api
                .new_peer_connection(self.rtc_config())
                .await
                .map_err(|e| NegotiationError::CreateConnection(e.to_string()))?,
        );

        {
            let events = events.clone();
            pc.on_ice_candidate(Box::new(move |cand: Option<RTCIceCandidate>| {
                match cand.as_ref().and_then(local_candidate) {
                    Some(candidate) => {
                        events.send(PeerEventKind::IceCandidate(candidate));
                    }
                    None => debug!(connection_id = events.connection_id(), "ice gathering complete"),
                }
                Box::pin(async {})
            }));
        }

        {
            let events = events.clone();
            let id = connection_id.clone();
            // weak: the peer connection owns this handler
            let pc_weak: Weak<RTCPeerConnection> = Arc::downgrade(&pc);
            pc.on_ice_connection_state_change(Box::new(move |state: RTCIceConnectionState| {
                info!(connection_id = %id, ?state, "ice connection state changed");
                if state == RTCIceConnectionState::Connected {
                    if let Some(pc) = pc_weak.upgrade() {
                        let id = id.clone();
                        tokio::spawn(async move {
                            dump_selected_pair(&pc, &id, "connected").await;
                        });
                    }
                }
                events.send(PeerEventKind::IceConnectionState(state.into()));
                Box::pin(async {})
            }));
        }

        {
            pc.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
                events.send(PeerEventKind::DataChannel(Arc::new(WebRtcDataChannel { inner: dc })));
                Box::pin(async {})
            }));
        }

        Ok(Arc::new(WebRtcPeer {
            connection_id,
            pc,
            tracks: self.tracks.clone(),
        }))
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            info!(tracks = self.tracks.len(), "rtc engine closed");
        }
    }
}

struct WebRtcPeer {
    connection_id: String,
    pc: Arc<RTCPeerConnection>,
    tracks: Arc<LocalTracks>,
}

#[async_trait]
impl PeerHandle for WebRtcPeer {
    fn connection_id(&self) -> &str {
        &self.connection_id
    }

    async fn add_track(&self, track: &MediaTrack) -> Result<(), NegotiationError> {
        let local = self
            .tracks
            .get(&track.id)
            .cloned()
            .ok_or_else(|| NegotiationError::AddTrack {
                track: track.id.clone(),
                reason: "no such local track".into(),
            })?;
        let sender = self
            .pc
            .add_track(local as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(|e| NegotiationError::AddTrack {
                track: track.id.clone(),
                reason: e.to_string(),
            })?;

        // RTCP has to be read for interceptors (NACK, reports) to work
        tokio::spawn(async move {
            let mut rtcp_buf = vec![0u8; 1500];
            while let Ok((_, _)) = sender.read(&mut rtcp_buf).await {}
        });
        Ok(())
    }

    async fn set_remote_description(&self, offer_sdp: String) -> Result<(), NegotiationError> {
        let offer = RTCSessionDescription::offer(offer_sdp)
            .map_err(|e| NegotiationError::SetRemoteDescription(e.to_string()))?;
        self.pc
            .set_remote_description(offer)
            .await
            .map_err(|e| NegotiationError::SetRemoteDescription(e.to_string()))
    }

    async fn create_answer(&self) -> Result<String, NegotiationError> {
        self.pc
            .create_answer(None)
            .await
            .map(|answer| answer.sdp)
            .map_err(|e| NegotiationError::CreateAnswer(e.to_string()))
    }

    async fn create_offer(&self) -> Result<String, NegotiationError> {
        self.pc
            .create_offer(None)
            .await
            .map(|offer| offer.sdp)
            .map_err(|e| NegotiationError::CreateOffer(e.to_string()))
    }

    async fn set_local_description(&self, answer_sdp: String) -> Result<(), NegotiationError> {
        let answer = RTCSessionDescription::answer(answer_sdp)
            .map_err(|e| NegotiationError::SetLocalDescription(e.to_string()))?;
        self.pc
            .set_local_description(answer)
            .await
            .map_err(|e| NegotiationError::SetLocalDescription(e.to_string()))
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), NegotiationError> {
        self.pc
            .add_ice_candidate(candidate.into())
            .await
            .map_err(|e| NegotiationError::AddIceCandidate(e.to_string()))
    }

    async fn close(&self) -> Result<(), NegotiationError> {
        self.pc
            .close()
            .await
            .map_err(|e| NegotiationError::Close(e.to_string()))
    }
}

struct WebRtcDataChannel {
    inner: Arc<RTCDataChannel>,
}

#[async_trait]
impl DataChannelHandle for WebRtcDataChannel {
    fn id(&self) -> u16 {
        self.inner.id()
    }

    fn label(&self) -> String {
        self.inner.label().to_string()
    }

    fn is_open(&self) -> bool {
        self.inner.ready_state() == RTCDataChannelState::Open
    }

    fn on_message(&self, handler: MessageHandler) {
        self.inner.on_message(Box::new(move |msg: DataChannelMessage| {
            handler(msg.data);
            Box::pin(async {})
        }));
    }

    fn on_close(&self, handler: CloseHandler) {
        self.inner.on_close(Box::new(move || {
            handler();
            Box::pin(async {})
        }));
    }

    async fn close(&self) {
        if let Err(err) = self.inner.close().await {
            warn!(channel_id = self.inner.id(), error = %err, "data channel close failed");
        }
    }
}
