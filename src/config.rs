//! Defaults, then an optional TOML file, then `RENDER_STREAM__*` env vars.

use crate::error::{Error, Result};
use crate::peer::sdp::BitratePolicy;
use crate::peer::types::{IceServerConfig, IceServerKind, MediaTrack};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

pub const ENV_PREFIX: &str = "RENDER_STREAM";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub signaling: SignalingConfig,
    pub ice_servers: Vec<IceServerConfig>,
    pub streaming: StreamingConfig,
    pub bitrate_policy: BitratePolicy,
    pub input: InputConfig,
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            signaling: SignalingConfig::default(),
            ice_servers: vec![IceServerConfig::stun("stun:stun.l.google.com:19302")],
            streaming: StreamingConfig::default(),
            bitrate_policy: BitratePolicy::default(),
            input: InputConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalingConfig {
    pub url: String,
    /// Pause between polling cycles
    pub interval_ms: u64,
    /// How far before startup the first poll window reaches back
    pub initial_lookback_ms: i64,
    pub connect_timeout_ms: u64,
    pub request_timeout_ms: u64,
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost".into(),
            interval_ms: 5000,
            initial_lookback_ms: 30_000,
            connect_timeout_ms: 3000,
            request_timeout_ms: 8000,
        }
    }
}

impl SignalingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    pub width: u32,
    pub height: u32,
    /// Target encoder bitrate in bit/s, passed through to the frame producer
    pub bitrate: u32,
    /// One outbound video track per capture source
    pub video_sources: Vec<String>,
    pub audio: bool,
    pub hardware_encoder: bool,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            bitrate: 1_000_000,
            video_sources: vec!["camera".into()],
            audio: true,
            hardware_encoder: true,
        }
    }
}

impl StreamingConfig {
    /// The shared outbound track set, attached to every connection
    pub fn tracks(&self) -> Vec<MediaTrack> {
        let mut tracks: Vec<MediaTrack> = self
            .video_sources
            .iter()
            .map(|source| MediaTrack::video(format!("video-{source}")))
            .collect();
        if self.audio {
            tracks.push(MediaTrack::audio("audio"));
        }
        tracks
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    /// Data channels with this label feed the remote input decoder
    pub channel_label: String,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            channel_label: "data".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub enabled: bool,
    /// `EnvFilter` directive used when `RUST_LOG` is unset
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            filter: "info".into(),
        }
    }
}

impl Config {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder =
            config::Config::builder().add_source(config::Config::try_from(&Config::default())?);
        if let Some(path) = path {
            debug!(path = %path.display(), "loading configuration file");
            builder = builder.add_source(config::File::from(path).required(true));
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("streaming.video_sources"),
        );

        let config: Config = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        for server in &self.ice_servers {
            if server.url.trim().is_empty() {
                return Err(Error::InvalidConfig("ice server url cannot be empty".into()));
            }
            if server.kind == IceServerKind::Turn
                && (server.username.is_none() || server.credential.is_none())
            {
                return Err(Error::InvalidConfig(format!(
                    "turn server {} requires username and credential",
                    server.url
                )));
            }
        }
        if self.signaling.interval_ms == 0 {
            return Err(Error::InvalidConfig("signaling.interval_ms must be positive".into()));
        }
        if self.input.channel_label.is_empty() {
            return Err(Error::InvalidConfig("input.channel_label cannot be empty".into()));
        }
        if self.streaming.video_sources.is_empty() && !self.streaming.audio {
            return Err(Error::InvalidConfig("no outbound tracks configured".into()));
        }
        Ok(())
    }
}
