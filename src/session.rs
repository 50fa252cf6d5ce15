//! Playback session driver.
//!
//! A session runs one [`TimelineController`] on a tokio task. Everything that
//! happens to the session (application commands, clock events, fetched
//! chunks, sink completions, key notifications) arrives as a
//! [`SessionMessage`] on one unbounded mailbox, so the controller is only
//! ever touched from the session task. The loop also fires controller timers,
//! polls the controller's asynchronous tasks and drives the periodic tick.
//!
//! Applications talk to a running session through a cloneable
//! [`SessionHandle`], which additionally exposes the latest [`Snapshot`].

use std::sync::Arc;

use bytes::Bytes;
use dashline_buffer::{ChunkKey, SegmentChunk, SubChunk};
use dashline_common::{BufferState, Error, Generation, Result, SessionId, TrackKind};
use futures::stream::{FuturesUnordered, StreamExt};
use parking_lot::RwLock;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use crate::clock::{ClockAdapter, ClockEvent, PlaybackElement};
use crate::config::Config;
use crate::drm::DrmAgent;
use crate::events::{Event, EventBus};
use crate::fetch::SegmentScheduler;
use crate::manifest::ManifestModel;
use crate::timeline::{Collaborators, PeriodInfo, SinkFactory, Snapshot, TimelineController, TimelineTask};

/// Input to a running session.
pub enum SessionMessage {
    Load {
        manifest: Arc<dyn ManifestModel>,
        period: usize,
    },
    Seek {
        time: f64,
    },
    Play,
    Pause,
    SetCueingPeriod {
        index: usize,
    },
    Clock(ClockEvent),
    ChunkDelivered {
        generation: Generation,
        track: TrackKind,
        chunk: SegmentChunk,
        init: Option<Bytes>,
    },
    PieceDelivered {
        generation: Generation,
        track: TrackKind,
        key: ChunkKey,
        piece: SubChunk,
    },
    ChunkComplete {
        generation: Generation,
        track: TrackKind,
        key: ChunkKey,
    },
    FetchFailed {
        generation: Generation,
        track: TrackKind,
        at: f64,
        error: Error,
    },
    SinkUpdated {
        track: TrackKind,
    },
    SinkError {
        track: TrackKind,
        error: Error,
    },
    KeyAdded,
    Shutdown,
}

impl SessionMessage {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Load { .. } => "load",
            Self::Seek { .. } => "seek",
            Self::Play => "play",
            Self::Pause => "pause",
            Self::SetCueingPeriod { .. } => "set_cueing_period",
            Self::Clock(_) => "clock",
            Self::ChunkDelivered { .. } => "chunk_delivered",
            Self::PieceDelivered { .. } => "piece_delivered",
            Self::ChunkComplete { .. } => "chunk_complete",
            Self::FetchFailed { .. } => "fetch_failed",
            Self::SinkUpdated { .. } => "sink_updated",
            Self::SinkError { .. } => "sink_error",
            Self::KeyAdded => "key_added",
            Self::Shutdown => "shutdown",
        }
    }
}

/// Shared state a session is created with.
#[derive(Clone)]
pub struct SessionContext {
    pub id: SessionId,
    pub config: Arc<Config>,
    pub events: Arc<EventBus>,
}

impl SessionContext {
    pub fn new(config: Arc<Config>, events: Arc<EventBus>) -> Self {
        Self {
            id: SessionId::new(),
            config,
            events,
        }
    }
}

/// Receiving half of a session's mailbox.
pub struct Mailbox {
    rx: mpsc::UnboundedReceiver<SessionMessage>,
    snapshot: Arc<RwLock<Snapshot>>,
}

impl Mailbox {
    #[cfg(test)]
    pub(crate) fn try_recv(&mut self) -> Option<SessionMessage> {
        self.rx.try_recv().ok()
    }
}

/// Cloneable handle to a running session.
#[derive(Clone)]
pub struct SessionHandle {
    id: SessionId,
    tx: mpsc::UnboundedSender<SessionMessage>,
    snapshot: Arc<RwLock<Snapshot>>,
    events: Arc<EventBus>,
}

impl SessionHandle {
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Post a message. Returns false once the session has stopped.
    pub fn send(&self, message: SessionMessage) -> bool {
        self.tx.send(message).is_ok()
    }

    pub fn load(&self, manifest: Arc<dyn ManifestModel>, period: usize) -> bool {
        self.send(SessionMessage::Load { manifest, period })
    }

    pub fn seek(&self, time: f64) -> bool {
        self.send(SessionMessage::Seek { time })
    }

    pub fn play(&self) -> bool {
        self.send(SessionMessage::Play)
    }

    pub fn pause(&self) -> bool {
        self.send(SessionMessage::Pause)
    }

    pub fn set_cueing_period_index(&self, index: usize) -> bool {
        self.send(SessionMessage::SetCueingPeriod { index })
    }

    pub fn shutdown(&self) -> bool {
        self.send(SessionMessage::Shutdown)
    }

    pub fn buffer_state(&self) -> BufferState {
        self.snapshot.read().buffer_state
    }

    pub fn period_info(&self) -> Option<PeriodInfo> {
        self.snapshot.read().period
    }

    /// Latest published snapshot.
    pub fn snapshot(&self) -> Snapshot {
        self.snapshot.read().clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }
}

/// Platform collaborators of one session.
pub struct SessionParts {
    pub element: Box<dyn PlaybackElement>,
    pub scheduler: Arc<dyn SegmentScheduler>,
    pub drm: Arc<dyn DrmAgent>,
    pub sinks: Box<dyn SinkFactory>,
}

pub struct Session {
    id: SessionId,
    config: Arc<Config>,
    controller: TimelineController,
    rx: mpsc::UnboundedReceiver<SessionMessage>,
    snapshot: Arc<RwLock<Snapshot>>,
}

impl Session {
    /// Create the mailbox of a new session.
    ///
    /// The handle exists before the session so collaborators that post
    /// messages can be built first.
    pub fn channel(ctx: &SessionContext) -> (SessionHandle, Mailbox) {
        let (tx, rx) = mpsc::unbounded_channel();
        let snapshot = Arc::new(RwLock::new(Snapshot::default()));
        let handle = SessionHandle {
            id: ctx.id,
            tx,
            snapshot: Arc::clone(&snapshot),
            events: Arc::clone(&ctx.events),
        };
        (handle, Mailbox { rx, snapshot })
    }

    pub fn new(ctx: SessionContext, mailbox: Mailbox, parts: SessionParts) -> Self {
        let clock = ClockAdapter::new(
            parts.element,
            ctx.config.clock.clone(),
            ctx.config.buffer.tolerance,
        );
        let controller = TimelineController::new(
            ctx.id,
            Arc::clone(&ctx.config),
            ctx.events,
            Collaborators {
                clock,
                scheduler: parts.scheduler,
                drm: parts.drm,
                sinks: parts.sinks,
            },
        );
        Self {
            id: ctx.id,
            config: ctx.config,
            controller,
            rx: mailbox.rx,
            snapshot: mailbox.snapshot,
        }
    }

    /// Run until shut down or every handle is dropped.
    ///
    /// Returns the error that ended playback, if any.
    pub async fn run(mut self) -> Result<()> {
        let mut ticker = tokio::time::interval(self.config.timeline.tick_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut tasks: FuturesUnordered<TimelineTask> = FuturesUnordered::new();

        info!(session = %self.id, "Session started");

        loop {
            tasks.extend(self.controller.take_tasks());
            let deadline = self.controller.next_deadline();

            tokio::select! {
                biased;

                message = self.rx.recv() => match message {
                    Some(SessionMessage::Shutdown) => {
                        info!(session = %self.id, "Session shutting down");
                        break;
                    }
                    Some(message) => self.dispatch(message),
                    None => {
                        debug!(session = %self.id, "All session handles dropped");
                        break;
                    }
                },
                Some(output) = tasks.next(), if !tasks.is_empty() => {
                    self.controller.on_task(output, Instant::now());
                }
                _ = wait_until(deadline) => {
                    self.controller.on_timers(Instant::now());
                }
                _ = ticker.tick() => {
                    self.controller.on_timeupdate(Instant::now());
                }
            }

            self.publish();
        }

        self.publish();
        match self.controller.error() {
            Some(err) => {
                warn!(session = %self.id, error = %err, "Session stopped after failure");
                Err(err.clone())
            }
            None => Ok(()),
        }
    }

    fn dispatch(&mut self, message: SessionMessage) {
        let now = Instant::now();
        trace!(session = %self.id, message = message.name(), "Session message");
        let controller = &mut self.controller;
        match message {
            SessionMessage::Load { manifest, period } => controller.load(manifest, period, now),
            SessionMessage::Seek { time } => controller.seek(time, now),
            SessionMessage::Play => controller.play(now),
            SessionMessage::Pause => controller.pause(now),
            SessionMessage::SetCueingPeriod { index } => controller.set_cueing_period_index(index),
            SessionMessage::Clock(event) => controller.on_clock_event(event, now),
            SessionMessage::ChunkDelivered {
                generation,
                track,
                chunk,
                init,
            } => controller.on_chunk(generation, track, chunk, init, now),
            SessionMessage::PieceDelivered {
                generation,
                track,
                key,
                piece,
            } => controller.on_piece(generation, track, key, piece, now),
            SessionMessage::ChunkComplete {
                generation,
                track,
                key,
            } => controller.on_chunk_complete(generation, track, key, now),
            SessionMessage::FetchFailed {
                generation,
                track,
                at,
                error,
            } => controller.on_fetch_failed(generation, track, at, error),
            SessionMessage::SinkUpdated { track } => controller.on_sink_updated(track, now),
            SessionMessage::SinkError { track, error } => controller.on_sink_error(track, error),
            SessionMessage::KeyAdded => controller.on_key_added(),
            SessionMessage::Shutdown => {}
        }
    }

    fn publish(&self) {
        *self.snapshot.write() = self.controller.snapshot();
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_names() {
        assert_eq!(SessionMessage::KeyAdded.name(), "key_added");
        assert_eq!(SessionMessage::Seek { time: 1.0 }.name(), "seek");
        assert_eq!(
            SessionMessage::SinkUpdated {
                track: TrackKind::Audio
            }
            .name(),
            "sink_updated"
        );
    }

    #[test]
    fn test_send_fails_after_mailbox_dropped() {
        let ctx = SessionContext::new(Arc::new(Config::default()), Arc::new(EventBus::default()));
        let (handle, mailbox) = Session::channel(&ctx);
        assert!(handle.play());
        drop(mailbox);
        assert!(!handle.play());
        assert_eq!(handle.id(), ctx.id);
        assert_eq!(handle.buffer_state(), BufferState::Empty);
        assert!(handle.period_info().is_none());
    }
}
