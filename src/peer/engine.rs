use crate::error::NegotiationError;
use crate::peer::types::{IceCandidate, MediaTrack};
use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

pub type PeerEventSender = mpsc::UnboundedSender<PeerEvent>;
pub type PeerEventReceiver = mpsc::UnboundedReceiver<PeerEvent>;

pub type MessageHandler = Box<dyn Fn(Bytes) + Send + Sync>;
pub type CloseHandler = Box<dyn Fn() + Send + Sync>;

/// ICE connection state as reported by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IceConnectionState {
    New,
    Checking,
    Connected,
    Completed,
    Disconnected,
    Failed,
    Closed,
}

/// Something the engine observed on one connection instance.
///
/// `generation` tells apart two connections that reused the same relay id,
/// so late callbacks from a closed handle never reach its successor.
pub struct PeerEvent {
    pub connection_id: String,
    pub generation: u64,
    pub kind: PeerEventKind,
}

pub enum PeerEventKind {
    /// A local candidate was gathered and must be posted to the relay
    IceCandidate(IceCandidate),
    /// The remote side opened a data channel
    DataChannel(Arc<dyn DataChannelHandle>),
    IceConnectionState(IceConnectionState),
}

impl fmt::Debug for PeerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = f.debug_struct("PeerEvent");
        out.field("connection_id", &self.connection_id)
            .field("generation", &self.generation);
        match &self.kind {
            PeerEventKind::IceCandidate(candidate) => out.field("candidate", &candidate.candidate),
            PeerEventKind::DataChannel(channel) => out
                .field("channel_id", &channel.id())
                .field("label", &channel.label()),
            PeerEventKind::IceConnectionState(state) => out.field("state", state),
        };
        out.finish()
    }
}

/// Where one connection instance reports its callbacks
#[derive(Clone)]
pub struct PeerEventSink {
    connection_id: String,
    generation: u64,
    tx: PeerEventSender,
}

impl PeerEventSink {
    pub fn new(connection_id: impl Into<String>, generation: u64, tx: PeerEventSender) -> Self {
        Self {
            connection_id: connection_id.into(),
            generation,
            tx,
        }
    }

    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Returns false once the session stopped listening
    pub fn send(&self, kind: PeerEventKind) -> bool {
        self.tx
            .send(PeerEvent {
                connection_id: self.connection_id.clone(),
                generation: self.generation,
                kind,
            })
            .is_ok()
    }
}

/// A remote-initiated data channel
#[async_trait]
pub trait DataChannelHandle: Send + Sync {
    /// Numeric id, unique within the owning connection
    fn id(&self) -> u16;
    fn label(&self) -> String;
    fn is_open(&self) -> bool;
    fn on_message(&self, handler: MessageHandler);
    fn on_close(&self, handler: CloseHandler);
    async fn close(&self);
}

/// One transport connection to a remote peer
#[async_trait]
pub trait PeerHandle: Send + Sync {
    fn connection_id(&self) -> &str;
    async fn add_track(&self, track: &MediaTrack) -> Result<(), NegotiationError>;
    async fn set_remote_description(&self, offer_sdp: String) -> Result<(), NegotiationError>;
    async fn create_answer(&self) -> Result<String, NegotiationError>;
    async fn create_offer(&self) -> Result<String, NegotiationError>;
    async fn set_local_description(&self, answer_sdp: String) -> Result<(), NegotiationError>;
    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), NegotiationError>;
    async fn close(&self) -> Result<(), NegotiationError>;
}

/// Factory for transport connections
#[async_trait]
pub trait RtcEngine: Send + Sync {
    /// Create a connection for `events.connection_id()` whose callbacks are
    /// reported through `events`
    async fn create_connection(
        &self,
        events: PeerEventSink,
    ) -> Result<Arc<dyn PeerHandle>, NegotiationError>;

    /// Release engine-wide resources at session teardown
    async fn close(&self);
}
