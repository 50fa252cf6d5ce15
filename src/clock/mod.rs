//! Playback clock adapter.
//!
//! Wraps the platform playback element. Besides plain reads it provides:
//!
//! - **Silent seeks**: repositioning used for drift correction. The element
//!   still fires seeking/seeked, and [`ClockAdapter::filter_event`] swallows
//!   them so the rest of the session never sees them.
//! - **Start position adjustment**: skipping a sub-second hole at the start
//!   of playback instead of stalling in front of it.
//! - **Stall detection**: see [`stall`].

pub mod stall;

pub use stall::{StallAction, StallDetector};

use std::collections::VecDeque;

use dashline_buffer::{range, BufferedRange};
use dashline_common::ReadyState;
use tracing::debug;

use crate::config::ClockConfig;

/// Silent seek targets remembered while their events are in flight.
const MAX_SILENT_TARGETS: usize = 8;

/// Event fired by the playback element.
#[derive(Debug, Clone, PartialEq)]
pub enum ClockEvent {
    Play,
    Pause,
    Seeking { time: f64 },
    Seeked { time: f64 },
    TimeUpdate,
    Stalled,
    Ended,
    Error { message: String },
}

/// The platform playback element.
pub trait PlaybackElement: Send {
    fn current_time(&self) -> f64;
    fn set_current_time(&mut self, time: f64);
    fn duration(&self) -> f64;
    fn set_duration(&mut self, duration: f64);
    /// Ranges playable across every attached track.
    fn buffered(&self) -> Vec<BufferedRange>;
    fn is_paused(&self) -> bool;
    fn play(&mut self);
    fn pause(&mut self);
    fn ready_state(&self) -> ReadyState;
}

/// Adapter between the timeline controller and the playback element.
pub struct ClockAdapter {
    element: Box<dyn PlaybackElement>,
    config: ClockConfig,
    tolerance: f64,
    silent_targets: VecDeque<f64>,
    stall: StallDetector,
}

impl ClockAdapter {
    pub fn new(element: Box<dyn PlaybackElement>, config: ClockConfig, tolerance: f64) -> Self {
        let stall = StallDetector::new(tolerance, config.max_stall_jump);
        Self {
            element,
            config,
            tolerance,
            silent_targets: VecDeque::new(),
            stall,
        }
    }

    pub fn current_time(&self) -> f64 {
        self.element.current_time()
    }

    pub fn duration(&self) -> f64 {
        self.element.duration()
    }

    pub fn set_duration(&mut self, duration: f64) {
        self.element.set_duration(duration);
    }

    pub fn buffered_ranges(&self) -> Vec<BufferedRange> {
        self.element.buffered()
    }

    pub fn ready_state(&self) -> ReadyState {
        self.element.ready_state()
    }

    pub fn is_paused(&self) -> bool {
        self.element.is_paused()
    }

    pub fn play(&mut self) {
        if self.element.is_paused() {
            self.element.play();
        }
    }

    pub fn pause(&mut self) {
        if !self.element.is_paused() {
            self.element.pause();
        }
    }

    /// Seek that the rest of the session is meant to observe.
    pub fn seek(&mut self, target: f64) {
        self.stall.reset();
        self.element.set_current_time(target);
    }

    /// Reposition the clock without surfacing a seek.
    ///
    /// When the target is not buffered once the element moved, one retry is
    /// made slightly further ahead. Returns where the clock ended up.
    pub fn silent_seek(&mut self, target: f64) -> f64 {
        self.set_silently(target);

        let landed = self
            .element
            .buffered()
            .iter()
            .any(|r| target >= r.start && target < r.end);
        if !landed {
            let retry = target + self.config.silent_seek_retry_offset;
            debug!(target, retry, "Silent seek missed the buffer, retrying");
            self.set_silently(retry);
        }

        let actual = self.element.current_time();
        debug!(target, actual, "Silent seek");
        actual
    }

    fn set_silently(&mut self, time: f64) {
        if self.silent_targets.len() >= MAX_SILENT_TARGETS {
            self.silent_targets.pop_front();
        }
        self.silent_targets.push_back(time);
        self.stall.reset();
        self.element.set_current_time(time);
    }

    /// Drop seeking/seeked events caused by silent seeks.
    pub fn filter_event(&mut self, event: ClockEvent) -> Option<ClockEvent> {
        let (time, done) = match &event {
            ClockEvent::Seeking { time } => (*time, false),
            ClockEvent::Seeked { time } => (*time, true),
            _ => return Some(event),
        };
        let position = self
            .silent_targets
            .iter()
            .position(|t| (t - time).abs() < 1e-3);
        match position {
            Some(index) => {
                if done {
                    self.silent_targets.remove(index);
                }
                None
            }
            None => Some(event),
        }
    }

    /// Move the playhead onto the first buffered point when it sits in a
    /// small hole in front of it. Returns the new position when it moved.
    pub fn adjust_start_position(&mut self) -> Option<f64> {
        let position = self.element.current_time();
        let buffered = range::merge(&self.element.buffered(), self.tolerance);
        if buffered
            .iter()
            .any(|r| position >= r.start && position < r.end)
        {
            return None;
        }

        let start = buffered
            .iter()
            .map(|r| r.start)
            .find(|start| *start > position && *start - position <= self.config.max_start_gap)?;
        debug!(from = position, to = start, "Adjusting start position");
        Some(self.silent_seek(start))
    }

    /// Run one stall check and act on it.
    pub fn check_stall(&mut self) -> StallAction {
        let position = self.element.current_time();
        let action = self.stall.check(
            position,
            self.element.ready_state(),
            &self.element.buffered(),
        );
        match action {
            StallAction::Replay => {
                self.element.pause();
                self.element.play();
            }
            StallAction::Nudge(to) => {
                self.silent_seek(to);
            }
            StallAction::None => {}
        }
        action
    }

    /// Stalls acted upon so far.
    pub fn stalls(&self) -> u32 {
        self.stall.stalls()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    /// Element whose buffered ranges and position are set by the test.
    #[derive(Debug, Default)]
    pub(crate) struct FakeState {
        pub time: f64,
        pub duration: f64,
        pub paused: bool,
        pub buffered: Vec<BufferedRange>,
        pub ready: Option<ReadyState>,
        pub seeks: Vec<f64>,
        pub plays: u32,
        /// Ranges that appear after the first seek lands.
        pub after_seek: Option<Vec<BufferedRange>>,
    }

    #[derive(Debug, Clone, Default)]
    pub(crate) struct FakeElement(pub Arc<Mutex<FakeState>>);

    impl FakeElement {
        pub fn paused() -> Self {
            let element = Self::default();
            element.0.lock().paused = true;
            element
        }
    }

    impl PlaybackElement for FakeElement {
        fn current_time(&self) -> f64 {
            self.0.lock().time
        }
        fn set_current_time(&mut self, time: f64) {
            let mut state = self.0.lock();
            state.time = time;
            state.seeks.push(time);
            if let Some(ranges) = state.after_seek.take() {
                state.buffered = ranges;
            }
        }
        fn duration(&self) -> f64 {
            self.0.lock().duration
        }
        fn set_duration(&mut self, duration: f64) {
            self.0.lock().duration = duration;
        }
        fn buffered(&self) -> Vec<BufferedRange> {
            self.0.lock().buffered.clone()
        }
        fn is_paused(&self) -> bool {
            self.0.lock().paused
        }
        fn play(&mut self) {
            let mut state = self.0.lock();
            state.paused = false;
            state.plays += 1;
        }
        fn pause(&mut self) {
            self.0.lock().paused = true;
        }
        fn ready_state(&self) -> ReadyState {
            self.0.lock().ready.unwrap_or(ReadyState::HaveMetadata)
        }
    }

    fn adapter(element: &FakeElement) -> ClockAdapter {
        ClockAdapter::new(Box::new(element.clone()), ClockConfig::default(), 0.15)
    }

    fn r(start: f64, end: f64) -> BufferedRange {
        BufferedRange::new(start, end)
    }

    #[test]
    fn test_silent_seek_lands() {
        let element = FakeElement::default();
        element.0.lock().buffered = vec![r(0.0, 10.0)];
        let mut clock = adapter(&element);

        assert_eq!(clock.silent_seek(4.0), 4.0);
        assert_eq!(element.0.lock().seeks, vec![4.0]);
    }

    #[test]
    fn test_silent_seek_retries_once() {
        let element = FakeElement::default();
        element.0.lock().buffered = vec![r(4.05, 10.0)];
        let mut clock = adapter(&element);

        let actual = clock.silent_seek(4.0);
        assert!((actual - 4.1).abs() < 1e-9);
        assert_eq!(element.0.lock().seeks.len(), 2);
    }

    #[test]
    fn test_silent_seek_events_swallowed() {
        let element = FakeElement::default();
        element.0.lock().buffered = vec![r(0.0, 10.0)];
        let mut clock = adapter(&element);
        clock.silent_seek(4.0);

        assert_eq!(clock.filter_event(ClockEvent::Seeking { time: 4.0 }), None);
        assert_eq!(clock.filter_event(ClockEvent::Seeked { time: 4.0 }), None);
        // The pair is consumed; a later seek to the same time is visible.
        assert_eq!(
            clock.filter_event(ClockEvent::Seeking { time: 4.0 }),
            Some(ClockEvent::Seeking { time: 4.0 })
        );
        assert_eq!(clock.filter_event(ClockEvent::Play), Some(ClockEvent::Play));
    }

    #[test]
    fn test_visible_seek_not_filtered() {
        let element = FakeElement::default();
        let mut clock = adapter(&element);
        clock.seek(12.0);
        assert_eq!(
            clock.filter_event(ClockEvent::Seeked { time: 12.0 }),
            Some(ClockEvent::Seeked { time: 12.0 })
        );
    }

    #[test]
    fn test_adjust_start_position() {
        let element = FakeElement::default();
        element.0.lock().buffered = vec![r(0.4, 8.0)];
        let mut clock = adapter(&element);
        assert_eq!(clock.adjust_start_position(), Some(0.4));
        assert_eq!(clock.adjust_start_position(), None);
    }

    #[test]
    fn test_adjust_start_ignores_far_data() {
        let element = FakeElement::default();
        element.0.lock().buffered = vec![r(3.0, 8.0)];
        let mut clock = adapter(&element);
        assert_eq!(clock.adjust_start_position(), None);
        assert!(element.0.lock().seeks.is_empty());
    }

    #[test]
    fn test_check_stall_replays() {
        let element = FakeElement::default();
        {
            let mut state = element.0.lock();
            state.time = 5.0;
            state.buffered = vec![r(0.0, 10.0)];
            state.ready = Some(ReadyState::HaveCurrentData);
        }
        let mut clock = adapter(&element);
        assert_eq!(clock.check_stall(), StallAction::None);
        assert_eq!(clock.check_stall(), StallAction::Replay);
        assert_eq!(element.0.lock().plays, 1);
    }

    #[test]
    fn test_check_stall_nudges_silently() {
        let element = FakeElement::default();
        {
            let mut state = element.0.lock();
            state.time = 5.0;
            state.buffered = vec![r(0.0, 5.0), r(5.5, 10.0)];
            state.ready = Some(ReadyState::HaveCurrentData);
        }
        let mut clock = adapter(&element);
        clock.check_stall();
        assert_eq!(clock.check_stall(), StallAction::Nudge(5.5));
        assert_eq!(clock.current_time(), 5.5);
        assert_eq!(clock.filter_event(ClockEvent::Seeked { time: 5.5 }), None);
        assert_eq!(clock.stalls(), 1);
    }

    #[test]
    fn test_play_pause_idempotent() {
        let element = FakeElement::paused();
        let mut clock = adapter(&element);
        clock.play();
        clock.play();
        assert_eq!(element.0.lock().plays, 1);
        clock.pause();
        assert!(clock.is_paused());
    }
}
