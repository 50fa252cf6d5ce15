//! Period bookkeeping.
//!
//! Two period indices are tracked. The *buffering* period is the one whose
//! segments are being fetched and appended; it only moves forward when every
//! track has buffered to its end. The *playing* period follows the playhead
//! and trails the buffering period by at most one.

use dashline_buffer::{range, BufferedRange};
use serde::Serialize;

use crate::manifest::ManifestModel;

/// Period position reported to the application.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PeriodInfo {
    pub playing_index: usize,
    pub buffering_index: usize,
    /// Start of the playing period.
    pub start: f64,
    /// End of the playing period.
    pub end: f64,
    pub count: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PeriodCursor {
    pub playing: usize,
    pub buffering: usize,
    pub count: usize,
}

impl PeriodCursor {
    pub fn new(index: usize, count: usize) -> Self {
        Self {
            playing: index,
            buffering: index,
            count,
        }
    }

    /// Point both indices at `index`.
    pub fn jump(&mut self, index: usize) {
        self.playing = index;
        self.buffering = index;
    }

    /// Whether the buffering period is the last one.
    pub fn buffering_last(&self) -> bool {
        self.buffering + 1 >= self.count
    }

    pub fn info(&self, manifest: &dyn ManifestModel) -> Option<PeriodInfo> {
        let period = manifest.data_for_index(self.playing)?;
        Some(PeriodInfo {
            playing_index: self.playing,
            buffering_index: self.buffering,
            start: period.start,
            end: period.end,
            count: self.count,
        })
    }
}

/// Where to resume when the playhead is stuck in front of a period boundary.
///
/// Applies when less than `min_ahead` seconds are buffered at `position` and
/// buffered data begins at or after `next_start`. Returns the start of that
/// data.
pub fn boundary_repair_target(
    buffered: &[BufferedRange],
    position: f64,
    next_start: f64,
    tolerance: f64,
    min_ahead: f64,
) -> Option<f64> {
    if position >= next_start {
        return None;
    }
    let merged = range::merge(buffered, tolerance);
    let ahead = merged
        .iter()
        .find(|r| r.contains(position, tolerance))
        .map(|r| (r.end - position).max(0.0))
        .unwrap_or(0.0);
    if ahead >= min_ahead {
        return None;
    }
    merged
        .iter()
        .map(|r| r.start)
        .find(|start| *start >= next_start - tolerance && *start > position + tolerance)
}
