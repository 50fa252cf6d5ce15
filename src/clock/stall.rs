//! Stall detection.
//!
//! Checked periodically while playback is nominally running. A stall is a
//! position that did not move between two checks while the element reports
//! it cannot play. What to do about it depends on what is buffered.

use dashline_buffer::{range, BufferedRange};
use dashline_common::ReadyState;
use tracing::debug;

/// Corrective action for a stall.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StallAction {
    /// Playback is advancing or waiting on data that has not arrived.
    None,
    /// Data is buffered at the playhead; pause and play again.
    Replay,
    /// The playhead sits in a small hole; jump to the next buffered start.
    Nudge(f64),
}

/// Compares positions across checks.
#[derive(Debug, Clone)]
pub struct StallDetector {
    tolerance: f64,
    max_jump: f64,
    last_position: Option<f64>,
    stalls: u32,
}

impl StallDetector {
    pub fn new(tolerance: f64, max_jump: f64) -> Self {
        Self {
            tolerance,
            max_jump,
            last_position: None,
            stalls: 0,
        }
    }

    /// Forget the previous position, e.g. after a seek.
    pub fn reset(&mut self) {
        self.last_position = None;
    }

    /// Number of stalls acted upon.
    pub fn stalls(&self) -> u32 {
        self.stalls
    }

    /// Evaluate one periodic check.
    pub fn check(
        &mut self,
        position: f64,
        ready_state: ReadyState,
        buffered: &[BufferedRange],
    ) -> StallAction {
        let previous = self.last_position.replace(position);
        let Some(previous) = previous else {
            return StallAction::None;
        };
        if (position - previous).abs() > f64::EPSILON || ready_state.can_play() {
            return StallAction::None;
        }

        let merged = range::merge(buffered, self.tolerance);
        let ahead = merged
            .iter()
            .find(|r| position >= r.start && position < r.end)
            .map(|r| r.end - position)
            .unwrap_or(0.0);
        if ahead > self.tolerance {
            self.stalls += 1;
            debug!(position, ahead, "Stalled with data ahead, replaying");
            return StallAction::Replay;
        }

        let next = merged
            .iter()
            .map(|r| r.start)
            .find(|start| *start > position && *start - position <= self.max_jump);
        match next {
            Some(start) => {
                self.stalls += 1;
                debug!(position, to = start, "Stalled in a hole, nudging");
                StallAction::Nudge(start)
            }
            None => StallAction::None,
        }
    }
}
