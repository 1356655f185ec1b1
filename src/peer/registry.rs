use crate::error::NegotiationError;
use crate::peer::engine::{DataChannelHandle, PeerHandle};
use crate::peer::state::ConnectionState;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Per-peer state owned by the registry
pub struct Connection {
    pub id: String,
    pub generation: u64,
    pub handle: Arc<dyn PeerHandle>,
    pub state: ConnectionState,
    pub created_at: DateTime<Utc>,
    // created on the first channel
    channels: Option<HashMap<u16, Arc<dyn DataChannelHandle>>>,
}

impl Connection {
    fn new(id: String, generation: u64, handle: Arc<dyn PeerHandle>) -> Self {
        Self {
            id,
            generation,
            handle,
            state: ConnectionState::New,
            created_at: Utc::now(),
            channels: None,
        }
    }

    pub fn channel_ids(&self) -> Vec<u16> {
        let mut ids: Vec<u16> = self
            .channels
            .as_ref()
            .map(|channels| channels.keys().copied().collect())
            .unwrap_or_default();
        ids.sort_unstable();
        ids
    }

    /// Close every channel, then the transport connection.
    pub async fn close(self) {
        if let Some(channels) = self.channels {
            for (channel_id, channel) in channels {
                debug!(connection_id = %self.id, channel_id, "closing data channel");
                channel.close().await;
            }
        }
        if let Err(err) = self.handle.close().await {
            warn!(connection_id = %self.id, error = %err, "peer connection close failed");
        }
    }
}

/// Live connections keyed by relay id. Engine callbacks reach it from
/// other tasks; the lock is never held across an `.await`.
#[derive(Default)]
pub struct PeerRegistry {
    connections: Mutex<HashMap<String, Connection>>,
    generations: AtomicU64,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fresh generation for a connection about to be created
    pub fn next_generation(&self) -> u64 {
        self.generations.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Register a freshly created connection in state `New`.
    pub fn insert(
        &self,
        id: &str,
        generation: u64,
        handle: Arc<dyn PeerHandle>,
    ) -> Result<(), NegotiationError> {
        let mut guard = self.connections.lock();
        if guard.contains_key(id) {
            return Err(NegotiationError::AlreadyRegistered(id.to_string()));
        }
        guard.insert(id.to_string(), Connection::new(id.to_string(), generation, handle));
        Ok(())
    }

    /// Whether `id` is registered and still the instance of `generation`
    pub fn is_current(&self, id: &str, generation: u64) -> bool {
        self.connections
            .lock()
            .get(id)
            .is_some_and(|c| c.generation == generation)
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn PeerHandle>> {
        self.connections.lock().get(id).map(|c| c.handle.clone())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.connections.lock().contains_key(id)
    }

    pub fn state(&self, id: &str) -> Option<ConnectionState> {
        self.connections.lock().get(id).map(|c| c.state)
    }

    /// Move a connection to `next`. Returns false if the id is unknown or
    /// the transition is not a legal step.
    pub fn advance(&self, id: &str, next: ConnectionState) -> bool {
        let mut guard = self.connections.lock();
        match guard.get_mut(id) {
            Some(conn) if conn.state.can_transition_to(next) => {
                conn.state = next;
                true
            }
            Some(conn) => {
                warn!(connection_id = id, from = %conn.state, to = %next, "rejected state transition");
                false
            }
            None => false,
        }
    }

    /// Take a connection out of the registry. The caller closes it.
    pub fn remove(&self, id: &str) -> Option<Connection> {
        let mut conn = self.connections.lock().remove(id)?;
        conn.state = ConnectionState::Closed;
        Some(conn)
    }

    /// Like [`remove`](Self::remove), but leaves a newer instance of the id alone.
    pub fn remove_generation(&self, id: &str, generation: u64) -> Option<Connection> {
        let mut guard = self.connections.lock();
        if guard.get(id)?.generation != generation {
            return None;
        }
        let mut conn = guard.remove(id)?;
        conn.state = ConnectionState::Closed;
        Some(conn)
    }

    /// Attach a channel to its connection. Returns false when that instance
    /// of the connection is gone, in which case the caller owns the channel.
    pub fn register_channel(
        &self,
        connection_id: &str,
        generation: u64,
        channel: Arc<dyn DataChannelHandle>,
    ) -> bool {
        let mut guard = self.connections.lock();
        let Some(conn) = guard
            .get_mut(connection_id)
            .filter(|c| c.generation == generation)
        else {
            return false;
        };
        let channels = conn.channels.get_or_insert_with(HashMap::new);
        let channel_id = channel.id();
        if channels.insert(channel_id, channel).is_some() {
            warn!(connection_id, channel_id, "replaced data channel with duplicate id");
        }
        true
    }

    pub fn remove_channel(
        &self,
        connection_id: &str,
        generation: u64,
        channel_id: u16,
    ) -> Option<Arc<dyn DataChannelHandle>> {
        self.connections
            .lock()
            .get_mut(connection_id)
            .filter(|c| c.generation == generation)?
            .channels
            .as_mut()?
            .remove(&channel_id)
    }

    pub fn channel(&self, connection_id: &str, channel_id: u16) -> Option<Arc<dyn DataChannelHandle>> {
        self.connections
            .lock()
            .get(connection_id)?
            .channels
            .as_ref()?
            .get(&channel_id)
            .cloned()
    }

    pub fn channel_ids(&self, connection_id: &str) -> Vec<u16> {
        self.connections
            .lock()
            .get(connection_id)
            .map(Connection::channel_ids)
            .unwrap_or_default()
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.connections.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.connections.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.lock().is_empty()
    }

    /// Remove every connection, for session teardown.
    pub fn drain(&self) -> Vec<Connection> {
        self.connections
            .lock()
            .drain()
            .map(|(_, mut conn)| {
                conn.state = ConnectionState::Closed;
                conn
            })
            .collect()
    }
}
