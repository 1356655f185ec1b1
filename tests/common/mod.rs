#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use render_stream::error::{NegotiationError, SignalingError};
use render_stream::input::RemoteInput;
use render_stream::peer::engine::{
    CloseHandler, DataChannelHandle, MessageHandler, PeerEventKind, PeerEventReceiver,
    PeerEventSink, PeerHandle, RtcEngine,
};
use render_stream::peer::types::{CandidateBatch, IceCandidate, MediaTrack, Offer};
use render_stream::peer::{DataChannelRouter, Negotiator, PeerRegistry};
use render_stream::signaling::{CandidatePoll, OfferPoll, Signaling};
use render_stream::Session;
use reqwest::StatusCode;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

pub const OFFER_SDP: &str = "v=0\r\n\
o=- 1 2 IN IP4 127.0.0.1\r\n\
s=-\r\n\
t=0 0\r\n\
m=video 9 UDP/TLS/RTP/SAVPF 102\r\n\
a=rtpmap:102 H264/90000\r\n\
a=fmtp:102 level-asymmetry-allowed=1;packetization-mode=1;profile-level-id=42e01f\r\n";

pub fn offer(connection_id: &str) -> Offer {
    Offer {
        connection_id: connection_id.into(),
        sdp: OFFER_SDP.into(),
    }
}

pub fn candidate(line: &str) -> IceCandidate {
    IceCandidate {
        candidate: line.into(),
        sdp_mid: Some("0".into()),
        sdp_mline_index: Some(0),
    }
}

pub fn batch(connection_id: &str, candidates: Vec<IceCandidate>) -> CandidateBatch {
    CandidateBatch {
        connection_id: connection_id.into(),
        candidates,
    }
}

/// Scripted poll result; an exhausted script yields empty windows
pub enum Scripted<T> {
    Ok(T),
    Unavailable,
}

/// Relay stand-in that records every call
#[derive(Default)]
pub struct FakeSignaling {
    pub session_id: String,
    pub fail_create: AtomicBool,
    pub fail_answers: AtomicBool,
    offers: Mutex<VecDeque<Scripted<OfferPoll>>>,
    candidates: Mutex<VecDeque<Scripted<CandidatePoll>>>,
    pub offer_polls: Mutex<Vec<i64>>,
    pub candidate_polls: Mutex<Vec<i64>>,
    pub answers: Mutex<Vec<(String, String, String)>>,
    pub posted_candidates: Mutex<Vec<(String, String, IceCandidate)>>,
}

impl FakeSignaling {
    pub fn new(session_id: &str) -> Arc<Self> {
        Arc::new(Self {
            session_id: session_id.into(),
            ..Default::default()
        })
    }

    pub fn push_offers(&self, offers: Vec<Offer>, server_time: Option<i64>) {
        self.offers
            .lock()
            .push_back(Scripted::Ok(OfferPoll { offers, server_time }));
    }

    pub fn push_offer_failure(&self) {
        self.offers.lock().push_back(Scripted::Unavailable);
    }

    pub fn push_candidates(&self, batches: Vec<CandidateBatch>, server_time: Option<i64>) {
        self.candidates.lock().push_back(Scripted::Ok(CandidatePoll {
            batches,
            server_time,
        }));
    }

    pub fn answers(&self) -> Vec<(String, String, String)> {
        self.answers.lock().clone()
    }
}

#[async_trait]
impl Signaling for FakeSignaling {
    async fn create_session(&self) -> Result<String, SignalingError> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(SignalingError::HttpStatus(StatusCode::SERVICE_UNAVAILABLE));
        }
        Ok(self.session_id.clone())
    }

    async fn poll_offers(&self, _session_id: &str, since: i64) -> Result<OfferPoll, SignalingError> {
        self.offer_polls.lock().push(since);
        match self.offers.lock().pop_front() {
            Some(Scripted::Ok(poll)) => Ok(poll),
            Some(Scripted::Unavailable) => {
                Err(SignalingError::HttpStatus(StatusCode::SERVICE_UNAVAILABLE))
            }
            None => Ok(OfferPoll::default()),
        }
    }

    async fn poll_candidates(
        &self,
        _session_id: &str,
        since: i64,
    ) -> Result<CandidatePoll, SignalingError> {
        self.candidate_polls.lock().push(since);
        match self.candidates.lock().pop_front() {
            Some(Scripted::Ok(poll)) => Ok(poll),
            Some(Scripted::Unavailable) => {
                Err(SignalingError::HttpStatus(StatusCode::SERVICE_UNAVAILABLE))
            }
            None => Ok(CandidatePoll::default()),
        }
    }

    async fn post_answer(
        &self,
        session_id: &str,
        connection_id: &str,
        sdp: &str,
    ) -> Result<(), SignalingError> {
        if self.fail_answers.load(Ordering::SeqCst) {
            return Err(SignalingError::HttpStatus(StatusCode::BAD_GATEWAY));
        }
        self.answers
            .lock()
            .push((session_id.into(), connection_id.into(), sdp.into()));
        Ok(())
    }

    async fn post_candidate(
        &self,
        session_id: &str,
        connection_id: &str,
        candidate: &IceCandidate,
    ) -> Result<(), SignalingError> {
        self.posted_candidates
            .lock()
            .push((session_id.into(), connection_id.into(), candidate.clone()));
        Ok(())
    }
}

pub fn answer_for(connection_id: &str) -> String {
    format!("v=0\r\ns=answer-{connection_id}\r\nm=video 9 UDP/TLS/RTP/SAVPF 102\r\n")
}

pub struct FakePeer {
    pub id: String,
    sink: PeerEventSink,
    fail_local_description: bool,
    pub tracks: Mutex<Vec<String>>,
    pub remote_sdp: Mutex<Option<String>>,
    pub local_sdp: Mutex<Option<String>>,
    pub candidates: Mutex<Vec<IceCandidate>>,
    pub closed: AtomicUsize,
}

impl FakePeer {
    /// Fire a callback from this instance, even after it was closed
    pub fn emit(&self, kind: PeerEventKind) {
        assert!(self.sink.send(kind), "event queue closed");
    }
}

#[async_trait]
impl PeerHandle for FakePeer {
    fn connection_id(&self) -> &str {
        &self.id
    }

    async fn add_track(&self, track: &MediaTrack) -> Result<(), NegotiationError> {
        self.tracks.lock().push(track.id.clone());
        Ok(())
    }

    async fn set_remote_description(&self, offer_sdp: String) -> Result<(), NegotiationError> {
        *self.remote_sdp.lock() = Some(offer_sdp);
        Ok(())
    }

    async fn create_answer(&self) -> Result<String, NegotiationError> {
        Ok(answer_for(&self.id))
    }

    async fn create_offer(&self) -> Result<String, NegotiationError> {
        Err(NegotiationError::CreateOffer("answerer only".into()))
    }

    async fn set_local_description(&self, answer_sdp: String) -> Result<(), NegotiationError> {
        if self.fail_local_description {
            return Err(NegotiationError::SetLocalDescription("rejected".into()));
        }
        *self.local_sdp.lock() = Some(answer_sdp);
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), NegotiationError> {
        self.candidates.lock().push(candidate);
        Ok(())
    }

    async fn close(&self) -> Result<(), NegotiationError> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Engine stand-in. Keeps every created peer so tests can fire callbacks.
#[derive(Default)]
pub struct FakeEngine {
    peers: Mutex<HashMap<String, Vec<Arc<FakePeer>>>>,
    fail_local_description: Mutex<HashSet<String>>,
    pub closed: AtomicBool,
}

impl FakeEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_local_description_for(&self, connection_id: &str) {
        self.fail_local_description
            .lock()
            .insert(connection_id.to_string());
    }

    /// Most recently created peer for the id
    pub fn peer(&self, connection_id: &str) -> Option<Arc<FakePeer>> {
        self.peers
            .lock()
            .get(connection_id)
            .and_then(|peers| peers.last().cloned())
    }

    pub fn created(&self, connection_id: &str) -> usize {
        self.peers.lock().get(connection_id).map_or(0, Vec::len)
    }

    pub fn total_created(&self) -> usize {
        self.peers.lock().values().map(Vec::len).sum()
    }

    /// Fire a callback from the newest instance of `connection_id`
    pub fn emit(&self, connection_id: &str, kind: PeerEventKind) {
        self.peer(connection_id)
            .expect("event for a connection the engine never created")
            .emit(kind);
    }
}

#[async_trait]
impl RtcEngine for FakeEngine {
    async fn create_connection(
        &self,
        events: PeerEventSink,
    ) -> Result<Arc<dyn PeerHandle>, NegotiationError> {
        let connection_id = events.connection_id().to_string();
        let peer = Arc::new(FakePeer {
            id: connection_id.clone(),
            fail_local_description: self.fail_local_description.lock().contains(&connection_id),
            sink: events,
            tracks: Mutex::default(),
            remote_sdp: Mutex::default(),
            local_sdp: Mutex::default(),
            candidates: Mutex::default(),
            closed: AtomicUsize::new(0),
        });
        self.peers
            .lock()
            .entry(connection_id)
            .or_default()
            .push(peer.clone());
        Ok(peer)
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct FakeChannel {
    pub id: u16,
    pub label: String,
    pub closed: AtomicBool,
    message: Mutex<Option<MessageHandler>>,
    close: Mutex<Option<CloseHandler>>,
}

impl FakeChannel {
    pub fn new(id: u16, label: &str) -> Arc<Self> {
        Arc::new(Self {
            id,
            label: label.into(),
            ..Default::default()
        })
    }

    pub fn deliver(&self, data: &[u8]) {
        if let Some(handler) = self.message.lock().as_ref() {
            handler(Bytes::copy_from_slice(data));
        }
    }

    pub fn remote_close(&self) {
        if let Some(handler) = self.close.lock().as_ref() {
            handler();
        }
    }
}

#[async_trait]
impl DataChannelHandle for FakeChannel {
    fn id(&self) -> u16 {
        self.id
    }
    fn label(&self) -> String {
        self.label.clone()
    }
    fn is_open(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }
    fn on_message(&self, handler: MessageHandler) {
        *self.message.lock() = Some(handler);
    }
    fn on_close(&self, handler: CloseHandler) {
        *self.close.lock() = Some(handler);
    }
    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

pub struct Harness {
    pub signaling: Arc<FakeSignaling>,
    pub engine: Arc<FakeEngine>,
    pub input: Arc<RemoteInput>,
    pub negotiator: Arc<Negotiator>,
    pub events: PeerEventReceiver,
}

impl Harness {
    pub fn new() -> Self {
        let signaling = FakeSignaling::new("abc");
        let engine = FakeEngine::new();
        let input = Arc::new(RemoteInput::new());
        let router = DataChannelRouter::new(Arc::new(PeerRegistry::new()), input.clone(), "data");
        let (tx, events) = mpsc::unbounded_channel();
        let negotiator = Arc::new(
            Negotiator::new(
                Session::new("abc", Vec::new()),
                signaling.clone(),
                engine.clone(),
                router,
                tx,
            )
            .with_tracks(vec![MediaTrack::video("video-camera"), MediaTrack::audio("audio")]),
        );
        Self {
            signaling,
            engine,
            input,
            negotiator,
            events,
        }
    }

    pub fn registry(&self) -> &Arc<PeerRegistry> {
        self.negotiator.registry()
    }
}
