use crate::peer::types::IceServerConfig;
use chrono::{DateTime, Utc};

/// One signaling session, created once at startup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub session_id: String,
    pub ice_servers: Vec<IceServerConfig>,
    pub created_at: DateTime<Utc>,
}

impl Session {
    pub fn new(session_id: impl Into<String>, ice_servers: Vec<IceServerConfig>) -> Self {
        Self {
            session_id: session_id.into(),
            ice_servers,
            created_at: Utc::now(),
        }
    }

    pub fn id(&self) -> &str {
        &self.session_id
    }
}
