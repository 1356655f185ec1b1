use reqwest::StatusCode;
use thiserror::Error;

/// Crate-level result type
pub type Result<T> = std::result::Result<T, Error>;

/// Failures talking to the signaling relay.
///
/// None of these are fatal to the polling loop: the failing request is
/// logged and the next cycle tries again.
#[derive(Error, Debug)]
pub enum SignalingError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("unexpected http status {0}")]
    HttpStatus(StatusCode),
    #[error("invalid response: {0}")]
    Protocol(String),
    #[error("invalid signaling url: {0}")]
    InvalidUrl(String),
}

/// Failures reported by the transport engine while setting up one peer.
///
/// Each one aborts the setup of a single connection only.
#[derive(Error, Debug)]
pub enum NegotiationError {
    #[error("failed to create peer connection: {0}")]
    CreateConnection(String),
    #[error("failed to add track {track}: {reason}")]
    AddTrack { track: String, reason: String },
    #[error("failed to set remote description: {0}")]
    SetRemoteDescription(String),
    #[error("failed to create answer: {0}")]
    CreateAnswer(String),
    #[error("failed to create offer: {0}")]
    CreateOffer(String),
    #[error("failed to set local description: {0}")]
    SetLocalDescription(String),
    #[error("failed to add ice candidate: {0}")]
    AddIceCandidate(String),
    #[error("failed to close peer connection: {0}")]
    Close(String),
    #[error("connection {0} is already registered")]
    AlreadyRegistered(String),
    #[error("failed to post answer: {0}")]
    PostAnswer(#[source] SignalingError),
}

/// Malformed remote input events.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InputError {
    #[error("empty input event")]
    Empty,
    #[error("unknown input event type {0}")]
    UnknownEventType(u8),
    #[error("truncated {kind} event: need {need} bytes, got {got}")]
    Truncated {
        kind: &'static str,
        need: usize,
        got: usize,
    },
}

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Signaling(#[from] SignalingError),
    #[error(transparent)]
    Negotiation(#[from] NegotiationError),
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
