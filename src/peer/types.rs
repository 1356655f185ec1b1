use serde::{Deserialize, Serialize};

/// ICE candidate as it travels through the signaling relay
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(rename = "sdpMid", default)]
    pub sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex", default)]
    pub sdp_mline_index: Option<u16>,
}

/// Remote offer discovered by polling
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Offer {
    pub connection_id: String,
    pub sdp: String,
}

/// Trickled candidates for one connection
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CandidateBatch {
    pub connection_id: String,
    #[serde(default)]
    pub candidates: Vec<IceCandidate>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum IceServerKind {
    Stun,
    Turn,
}

/// STUN/TURN server entry
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct IceServerConfig {
    #[serde(rename = "type", alias = "kind")]
    pub kind: IceServerKind,
    pub url: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub credential: Option<String>,
}

impl IceServerConfig {
    pub fn stun(url: impl Into<String>) -> Self {
        Self {
            kind: IceServerKind::Stun,
            url: url.into(),
            username: None,
            credential: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackKind {
    Video,
    Audio,
}

/// Outbound track shared by every connection.
///
/// Created once when the session starts; the engine attaches the same
/// underlying track object to each new peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaTrack {
    pub id: String,
    pub stream_id: String,
    pub kind: TrackKind,
}

impl MediaTrack {
    pub fn video(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            stream_id: "video-stream".into(),
            kind: TrackKind::Video,
        }
    }

    pub fn audio(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            stream_id: "audio-stream".into(),
            kind: TrackKind::Audio,
        }
    }
}
