use crate::config::{Config, StreamingConfig};
use crate::error::Result;
use crate::input::RemoteInput;
use crate::peer::connection::WebRtcEngine;
use crate::peer::data_channel::DataChannelRouter;
use crate::peer::engine::{PeerEventReceiver, RtcEngine};
use crate::peer::negotiation::Negotiator;
use crate::peer::registry::PeerRegistry;
use crate::session::Session;
use crate::signaling::{HttpSignaling, PollingCursor, Signaling};
use crate::utils::unix_millis;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

/// Stops a running [`PollingLoop`]
#[derive(Clone)]
pub struct StopHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl StopHandle {
    pub fn channel() -> (Self, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        (Self { tx: Arc::new(tx) }, rx)
    }

    pub fn stop(&self) {
        // receiver gone means the loop already ended
        let _ = self.tx.send(true);
    }
}

/// Repeats `poll offers → poll candidates → sleep`. Engine events queued
/// in between are handled as they arrive, including during the sleep.
///
/// The cursor lives here and nowhere else.
pub struct PollingLoop {
    negotiator: Arc<Negotiator>,
    events: PeerEventReceiver,
    cursor: PollingCursor,
    interval: Duration,
}

impl PollingLoop {
    pub fn new(
        negotiator: Arc<Negotiator>,
        events: PeerEventReceiver,
        cursor: PollingCursor,
        interval: Duration,
    ) -> Self {
        Self {
            negotiator,
            events,
            cursor,
            interval,
        }
    }

    pub fn cursor(&self) -> PollingCursor {
        self.cursor
    }

    /// One cycle without the sleep
    pub async fn tick(&mut self) {
        self.negotiator.poll_offers(&mut self.cursor).await;
        self.negotiator.poll_candidates(&mut self.cursor).await;
        self.drain_events().await;
    }

    /// Handle every engine event queued so far
    pub async fn drain_events(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(event) = self.events.try_recv() {
            self.negotiator.handle_event(event).await;
            handled += 1;
        }
        handled
    }

    pub async fn run(mut self, mut stop: watch::Receiver<bool>) {
        debug!(interval_ms = self.interval.as_millis() as u64, "polling loop started");
        loop {
            if *stop.borrow() {
                break;
            }
            self.tick().await;

            let deadline = Instant::now() + self.interval;
            let stopped = loop {
                tokio::select! {
                    changed = stop.changed() => {
                        if changed.is_err() || *stop.borrow() {
                            break true;
                        }
                    }
                    Some(event) = self.events.recv() => {
                        self.negotiator.handle_event(event).await;
                    }
                    _ = sleep_until(deadline) => break false,
                }
            };
            if stopped {
                break;
            }
        }
        debug!("polling loop stopped");
    }
}

/// A running streaming session
pub struct RenderStreaming {
    negotiator: Arc<Negotiator>,
    input: Arc<RemoteInput>,
    streaming: StreamingConfig,
    stop: StopHandle,
    task: JoinHandle<()>,
}

impl RenderStreaming {
    /// Create the relay session and start polling. Failing to create the
    /// session is the only fatal error.
    pub async fn start(
        config: &Config,
        engine: Arc<dyn RtcEngine>,
        signaling: Arc<dyn Signaling>,
        input: Arc<RemoteInput>,
    ) -> Result<Self> {
        config.validate()?;
        let session_id = signaling.create_session().await?;
        info!(session_id = %session_id, "signaling session created");
        let session = Session::new(session_id, config.ice_servers.clone());

        let registry = Arc::new(PeerRegistry::new());
        let router = DataChannelRouter::new(registry, input.clone(), config.input.channel_label.clone());
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let negotiator = Arc::new(
            Negotiator::new(session, signaling, engine, router, events_tx)
                .with_policy(config.bitrate_policy)
                .with_tracks(config.streaming.tracks()),
        );

        let cursor = PollingCursor::starting_at(
            unix_millis(Utc::now()),
            config.signaling.initial_lookback_ms,
        );
        let polling = PollingLoop::new(
            negotiator.clone(),
            events_rx,
            cursor,
            config.signaling.interval(),
        );
        let (stop, stop_rx) = StopHandle::channel();
        let task = tokio::spawn(polling.run(stop_rx));

        Ok(Self {
            negotiator,
            input,
            streaming: config.streaming.clone(),
            stop,
            task,
        })
    }

    /// Start against the configured HTTP relay with the `webrtc` engine.
    /// The engine is returned so frame producers can reach its tracks.
    pub async fn connect(config: &Config) -> Result<(Self, Arc<WebRtcEngine>)> {
        let engine = Arc::new(WebRtcEngine::new(&config.ice_servers, &config.streaming.tracks())?);
        let signaling = Arc::new(HttpSignaling::new(&config.signaling)?);
        let streaming = Self::start(
            config,
            engine.clone(),
            signaling,
            Arc::new(RemoteInput::new()),
        )
        .await?;
        Ok((streaming, engine))
    }

    pub fn session_id(&self) -> &str {
        self.negotiator.session().id()
    }

    pub fn session(&self) -> &Session {
        self.negotiator.session()
    }

    pub fn registry(&self) -> &Arc<PeerRegistry> {
        self.negotiator.registry()
    }

    pub fn input(&self) -> &Arc<RemoteInput> {
        &self.input
    }

    /// Configured capture size as (width, height)
    pub fn streaming_size(&self) -> (u32, u32) {
        (self.streaming.width, self.streaming.height)
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Stop polling, close every connection and release the engine
    pub async fn shutdown(self) {
        self.stop.stop();
        if let Err(err) = self.task.await {
            warn!(error = %err, "polling task ended abnormally");
        }
        self.negotiator.close_all().await;
        self.negotiator.engine().close().await;
        info!(session_id = %self.negotiator.session().id(), "session closed");
    }
}
