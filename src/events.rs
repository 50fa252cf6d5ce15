//! Session event notifications.
//!
//! Every session publishes [`EventPayload`]s on an [`EventBus`]. Live
//! observers subscribe to the broadcast side; tests and the CLI report read
//! the retained history and the per-name tally.

use chrono::{DateTime, Utc};
use dashline_common::{BufferState, ErrorClass, Generation, SessionId, TrackKind};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Events kept for late observers.
const HISTORY_LEN: usize = 256;

const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

// ---------------------------------------------------------------------------
// EventPayload
// ---------------------------------------------------------------------------

/// Payload describing what happened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    // -- Lifecycle -----------------------------------------------------------
    PlaybackInitialized {
        duration: f64,
        periods: usize,
        tracks: Vec<TrackKind>,
    },
    BufferStateChange {
        state: BufferState,
    },
    SeekStarted {
        target: f64,
        generation: Generation,
    },
    Seeked {
        time: f64,
        generation: Generation,
    },
    EndOfStream {
        duration: f64,
    },
    Ended,

    // -- Timeline ------------------------------------------------------------
    CheckBufferGap {
        track: TrackKind,
        gap_start: f64,
        gap_end: f64,
        refetch_time: f64,
    },
    NeedToModifyOffset {
        shift: f64,
        min_diff: f64,
    },
    PeriodEnded {
        index: usize,
    },
    PeriodChanged {
        index: usize,
        start: f64,
    },

    // -- Tracks and protection -----------------------------------------------
    TrackDisabled {
        track: TrackKind,
        reason: String,
    },
    KeyStatus {
        ready: bool,
        forced: bool,
    },

    // -- Errors --------------------------------------------------------------
    Error {
        class: ErrorClass,
        message: String,
        fatal: bool,
    },
}

impl EventPayload {
    /// Short name matching the serialized `type` tag.
    pub fn name(&self) -> &'static str {
        match self {
            Self::PlaybackInitialized { .. } => "playback_initialized",
            Self::BufferStateChange { .. } => "buffer_state_change",
            Self::SeekStarted { .. } => "seek_started",
            Self::Seeked { .. } => "seeked",
            Self::EndOfStream { .. } => "end_of_stream",
            Self::Ended => "ended",
            Self::CheckBufferGap { .. } => "check_buffer_gap",
            Self::NeedToModifyOffset { .. } => "need_to_modify_offset",
            Self::PeriodEnded { .. } => "period_ended",
            Self::PeriodChanged { .. } => "period_changed",
            Self::TrackDisabled { .. } => "track_disabled",
            Self::KeyStatus { .. } => "key_status",
            Self::Error { .. } => "error",
        }
    }
}

// ---------------------------------------------------------------------------
// Event
// ---------------------------------------------------------------------------

/// A timestamped event raised by one session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Unique event identifier.
    pub id: Uuid,
    /// When the event occurred.
    pub timestamp: DateTime<Utc>,
    /// Session that raised the event.
    pub session: SessionId,
    /// What happened.
    pub payload: EventPayload,
}

impl Event {
    /// Create a new event with a fresh UUID and the current timestamp.
    pub fn new(session: SessionId, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            session,
            payload,
        }
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Fan-out of session events.
///
/// Keeps the last [`HISTORY_LEN`] events for observers that subscribe late,
/// and an exact per-name tally that survives history eviction.
pub struct EventBus {
    tx: broadcast::Sender<Event>,
    history: RwLock<VecDeque<Event>>,
    tally: RwLock<HashMap<&'static str, usize>>,
}

impl EventBus {
    /// `capacity` bounds the broadcast channel; lagging subscribers skip
    /// ahead. The history length is fixed.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            history: RwLock::new(VecDeque::with_capacity(HISTORY_LEN)),
            tally: RwLock::new(HashMap::new()),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// Publish `payload` on behalf of `session`.
    pub fn broadcast(&self, session: SessionId, payload: EventPayload) {
        let event = Event::new(session, payload);
        *self.tally.write().entry(event.payload.name()).or_default() += 1;

        {
            let mut history = self.history.write();
            while history.len() >= HISTORY_LEN {
                history.pop_back();
            }
            history.push_front(event.clone());
        }

        // Sending fails only when nobody listens.
        let _ = self.tx.send(event);
    }

    /// Up to `n` retained events, newest first.
    pub fn history(&self, n: usize) -> Vec<Event> {
        self.history.read().iter().take(n).cloned().collect()
    }

    /// How many events with this payload name were ever published.
    pub fn count(&self, name: &str) -> usize {
        self.tally.read().get(name).copied().unwrap_or(0)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broadcast_and_receive() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        let session = SessionId::new();

        bus.broadcast(
            session,
            EventPayload::BufferStateChange {
                state: BufferState::Low,
            },
        );

        let event = rx.try_recv().unwrap();
        assert_eq!(event.session, session);
        assert_eq!(
            event.payload,
            EventPayload::BufferStateChange {
                state: BufferState::Low
            }
        );
    }

    #[test]
    fn history_is_bounded_but_tally_is_exact() {
        let bus = EventBus::new(512);
        let session = SessionId::new();
        for index in 0..300 {
            bus.broadcast(session, EventPayload::PeriodEnded { index });
        }

        let history = bus.history(1000);
        assert_eq!(history.len(), HISTORY_LEN);
        assert_eq!(history[0].payload, EventPayload::PeriodEnded { index: 299 });
        assert_eq!(bus.count("period_ended"), 300);
        assert_eq!(bus.count("ended"), 0);
    }

    #[test]
    fn no_subscribers_is_fine() {
        let bus = EventBus::default();
        bus.broadcast(SessionId::new(), EventPayload::Ended);
        assert_eq!(bus.history(1).len(), 1);
        assert_eq!(bus.count("ended"), 1);
    }

    #[test]
    fn payload_serialization_tag() {
        let payload = EventPayload::NeedToModifyOffset {
            shift: -1.5,
            min_diff: 1.5,
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["type"], "need_to_modify_offset");
        assert_eq!(json["shift"], -1.5);

        let back: EventPayload = serde_json::from_value(json).unwrap();
        assert_eq!(back.name(), payload.name());
    }
}
