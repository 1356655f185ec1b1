use crate::error::NegotiationError;
use crate::logger::dump_candidate;
use crate::peer::data_channel::DataChannelRouter;
use crate::peer::engine::{
    IceConnectionState, PeerEvent, PeerEventKind, PeerEventSender, PeerEventSink, PeerHandle,
    RtcEngine,
};
use crate::peer::ice::analyze_candidates;
use crate::peer::registry::PeerRegistry;
use crate::peer::sdp::{count_video_sections, BitratePolicy};
use crate::peer::state::ConnectionState;
use crate::peer::types::{CandidateBatch, IceCandidate, MediaTrack, Offer};
use crate::session::Session;
use crate::signaling::{PollingCursor, Signaling};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Drives each connection through `New → RemoteOfferSet → LocalAnswerCreated
/// → LocalDescriptionSet → AnswerPosted → Active`.
pub struct Negotiator {
    session: Session,
    signaling: Arc<dyn Signaling>,
    engine: Arc<dyn RtcEngine>,
    registry: Arc<PeerRegistry>,
    router: DataChannelRouter,
    events: PeerEventSender,
    policy: BitratePolicy,
    tracks: Arc<[MediaTrack]>,
}

impl Negotiator {
    pub fn new(
        session: Session,
        signaling: Arc<dyn Signaling>,
        engine: Arc<dyn RtcEngine>,
        router: DataChannelRouter,
        events: PeerEventSender,
    ) -> Self {
        Self {
            session,
            signaling,
            engine,
            registry: router.registry().clone(),
            router,
            events,
            policy: BitratePolicy::default(),
            tracks: Arc::from(Vec::new()),
        }
    }

    pub fn with_policy(mut self, policy: BitratePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Outbound tracks attached to every new connection
    pub fn with_tracks(mut self, tracks: Vec<MediaTrack>) -> Self {
        self.tracks = Arc::from(tracks);
        self
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn registry(&self) -> &Arc<PeerRegistry> {
        &self.registry
    }

    pub fn engine(&self) -> &Arc<dyn RtcEngine> {
        &self.engine
    }

    /// Fetch new offers and negotiate each unseen connection id.
    /// Returns how many connections reached `Active`.
    pub async fn poll_offers(&self, cursor: &mut PollingCursor) -> usize {
        let poll = match self
            .signaling
            .poll_offers(self.session.id(), cursor.offers())
            .await
        {
            Ok(poll) => poll,
            Err(err) => {
                warn!(error = %err, "offer poll failed");
                return 0;
            }
        };
        cursor.advance_offers(poll.server_time);

        let mut accepted = 0;
        for offer in poll.offers {
            if self.registry.contains(&offer.connection_id) {
                debug!(connection_id = %offer.connection_id, "offer for known connection ignored");
                continue;
            }
            let connection_id = offer.connection_id.clone();
            match self.accept_offer(offer).await {
                Ok(()) => accepted += 1,
                Err(err) => {
                    warn!(connection_id = %connection_id, error = %err, "connection setup aborted")
                }
            }
        }
        accepted
    }

    /// Run the full answer sequence for one offer. On failure the connection
    /// is closed and gone from the registry when this returns.
    pub async fn accept_offer(&self, offer: Offer) -> Result<(), NegotiationError> {
        let id = offer.connection_id.as_str();
        let generation = self.registry.next_generation();
        let sink = PeerEventSink::new(id, generation, self.events.clone());
        let handle = self.engine.create_connection(sink).await?;
        if let Err(err) = self.registry.insert(id, generation, handle.clone()) {
            if let Err(close_err) = handle.close().await {
                warn!(connection_id = id, error = %close_err, "closing duplicate connection failed");
            }
            return Err(err);
        }
        info!(connection_id = id, generation, "new connection");

        match self.negotiate(id, &handle, &offer.sdp).await {
            Ok(()) => {
                info!(connection_id = id, "connection active");
                Ok(())
            }
            Err(err) => {
                self.reap(id, generation).await;
                Err(err)
            }
        }
    }

    async fn negotiate(
        &self,
        id: &str,
        handle: &Arc<dyn PeerHandle>,
        offer_sdp: &str,
    ) -> Result<(), NegotiationError> {
        for track in self.tracks.iter() {
            handle.add_track(track).await?;
        }

        handle.set_remote_description(self.policy.apply(offer_sdp)).await?;
        self.registry.advance(id, ConnectionState::RemoteOfferSet);

        let answer = handle.create_answer().await?;
        debug!(
            connection_id = id,
            video_sections = count_video_sections(&answer),
            "answer created"
        );
        self.registry.advance(id, ConnectionState::LocalAnswerCreated);

        handle.set_local_description(answer.clone()).await?;
        self.registry.advance(id, ConnectionState::LocalDescriptionSet);

        self.signaling
            .post_answer(self.session.id(), id, &answer)
            .await
            .map_err(NegotiationError::PostAnswer)?;
        self.registry.advance(id, ConnectionState::AnswerPosted);
        self.registry.advance(id, ConnectionState::Active);
        Ok(())
    }

    /// Fetch trickled candidates and apply them to known connections.
    /// Returns how many candidates the engine accepted.
    pub async fn poll_candidates(&self, cursor: &mut PollingCursor) -> usize {
        let poll = match self
            .signaling
            .poll_candidates(self.session.id(), cursor.candidates())
            .await
        {
            Ok(poll) => poll,
            Err(err) => {
                warn!(error = %err, "candidate poll failed");
                return 0;
            }
        };
        cursor.advance_candidates(poll.server_time);

        let mut applied = 0;
        for batch in poll.batches {
            applied += self.apply_candidates(batch).await;
        }
        applied
    }

    pub async fn apply_candidates(&self, batch: CandidateBatch) -> usize {
        let id = batch.connection_id.as_str();
        let Some(handle) = self.registry.get(id) else {
            debug!(
                connection_id = id,
                count = batch.candidates.len(),
                "candidates for unknown connection dropped"
            );
            return 0;
        };
        analyze_candidates(id, &batch.candidates);

        let mut applied = 0;
        for candidate in batch.candidates {
            dump_candidate("remote", id, &candidate);
            match handle.add_ice_candidate(candidate).await {
                Ok(()) => applied += 1,
                Err(err) => warn!(connection_id = id, error = %err, "failed to add ice candidate"),
            }
        }
        applied
    }

    /// React to one engine callback. Events from a connection instance that
    /// is no longer registered are dropped.
    pub async fn handle_event(&self, event: PeerEvent) {
        let PeerEvent {
            connection_id,
            generation,
            kind,
        } = event;
        match kind {
            PeerEventKind::DataChannel(channel) => {
                self.router
                    .on_data_channel(&connection_id, generation, channel)
                    .await
            }
            _ if !self.registry.is_current(&connection_id, generation) => {
                debug!(connection_id = %connection_id, generation, "event from closed connection dropped");
            }
            PeerEventKind::IceCandidate(candidate) => {
                self.post_local_candidate(&connection_id, &candidate).await
            }
            PeerEventKind::IceConnectionState(state) => match state {
                IceConnectionState::Disconnected | IceConnectionState::Failed => {
                    info!(connection_id = %connection_id, ?state, "peer lost");
                    self.reap(&connection_id, generation).await;
                }
                _ => debug!(connection_id = %connection_id, ?state, "ice state"),
            },
        }
    }

    async fn post_local_candidate(&self, connection_id: &str, candidate: &IceCandidate) {
        dump_candidate("local", connection_id, candidate);
        if let Err(err) = self
            .signaling
            .post_candidate(self.session.id(), connection_id, candidate)
            .await
        {
            warn!(connection_id, error = %err, "failed to post candidate");
        }
    }

    // only closes the instance that asked, never a successor under the same id
    async fn reap(&self, connection_id: &str, generation: u64) -> bool {
        match self.registry.remove_generation(connection_id, generation) {
            Some(conn) => {
                conn.close().await;
                info!(connection_id, generation, "connection closed");
                true
            }
            None => false,
        }
    }

    /// Remove and close one connection. A second call for the same id is a
    /// no-op and returns false.
    pub async fn close_connection(&self, connection_id: &str) -> bool {
        match self.registry.remove(connection_id) {
            Some(conn) => {
                conn.close().await;
                info!(connection_id, "connection closed");
                true
            }
            None => {
                debug!(connection_id, "close for unknown connection ignored");
                false
            }
        }
    }

    /// Close every channel and connection
    pub async fn close_all(&self) {
        let connections = self.registry.drain();
        let count = connections.len();
        for conn in connections {
            conn.close().await;
        }
        info!(count, "all connections closed");
    }
}
