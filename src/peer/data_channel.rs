use crate::input::RemoteInput;
use crate::peer::engine::DataChannelHandle;
use crate::peer::registry::PeerRegistry;
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

/// Registers remote-opened channels under their connection and wires the
/// reserved input channel to the decoder.
#[derive(Clone)]
pub struct DataChannelRouter {
    registry: Arc<PeerRegistry>,
    input: Arc<RemoteInput>,
    input_label: String,
}

impl DataChannelRouter {
    pub fn new(registry: Arc<PeerRegistry>, input: Arc<RemoteInput>, input_label: impl Into<String>) -> Self {
        Self {
            registry,
            input,
            input_label: input_label.into(),
        }
    }

    pub fn registry(&self) -> &Arc<PeerRegistry> {
        &self.registry
    }

    pub fn input_label(&self) -> &str {
        &self.input_label
    }

    pub async fn on_data_channel(
        &self,
        connection_id: &str,
        generation: u64,
        channel: Arc<dyn DataChannelHandle>,
    ) {
        let channel_id = channel.id();
        let label = channel.label();

        if !self.registry.register_channel(connection_id, generation, channel.clone()) {
            // connection already torn down or replaced
            warn!(connection_id, channel_id, %label, "data channel for unknown connection, closing");
            channel.close().await;
            return;
        }
        info!(connection_id, channel_id, %label, "data channel registered");

        let is_input = label == self.input_label;
        if is_input {
            let input = self.input.clone();
            let conn = connection_id.to_string();
            channel.on_message(Box::new(move |data| {
                if let Err(err) = input.process(&data) {
                    warn!(connection_id = %conn, error = %err, "dropping malformed input event");
                }
            }));
        }

        let input = self.input.clone();
        // the registry holds the channel, so the handler only holds it weakly
        let registry: Weak<PeerRegistry> = Arc::downgrade(&self.registry);
        let conn = connection_id.to_string();
        channel.on_close(Box::new(move || {
            debug!(connection_id = %conn, channel_id, %label, "data channel closed");
            if let Some(registry) = registry.upgrade() {
                registry.remove_channel(&conn, generation, channel_id);
            }
            if is_input {
                input.reset();
            }
        }));
    }
}
