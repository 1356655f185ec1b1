pub mod config;
pub mod error;
pub mod input;
pub mod logger;
pub mod peer;
pub mod session;
pub mod signaling;
pub mod streaming;
pub mod utils;

pub use crate::config::Config;
pub use crate::error::{Error, Result};
pub use crate::input::{ClickTable, InputEvent, RemoteInput};
pub use crate::session::Session;
pub use crate::signaling::{HttpSignaling, PollingCursor, Signaling};
pub use crate::streaming::{PollingLoop, RenderStreaming, StopHandle};
