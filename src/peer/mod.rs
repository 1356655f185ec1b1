pub mod connection;
pub mod data_channel;
pub mod engine;
pub mod ice;
pub mod negotiation;
pub mod registry;
pub mod sdp;
pub mod state;
pub mod types;

pub use connection::WebRtcEngine;
pub use data_channel::DataChannelRouter;
pub use engine::{
    DataChannelHandle, IceConnectionState, PeerEvent, PeerEventKind, PeerEventSink, PeerHandle,
    RtcEngine,
};
pub use negotiation::Negotiator;
pub use registry::PeerRegistry;
pub use sdp::BitratePolicy;
pub use state::ConnectionState;
