//! Segment fetch scheduler interface.
//!
//! The scheduler owns request timing and quality selection. It delivers
//! chunks back through the session mailbox, tagged with the generation of the
//! [`FetchRequest`] that produced them, so deliveries for an abandoned
//! position are dropped on arrival.

use async_trait::async_trait;
use dashline_common::{Generation, TrackKind};

/// Instruction to fetch one track's segments of a period.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FetchRequest {
    pub track: TrackKind,
    /// Period index.
    pub period: usize,
    /// Adaptation set within the period.
    pub adaptation_set: usize,
    /// Presentation time to start from.
    pub from: f64,
    pub generation: Generation,
}

/// Per-track request scheduling and quality selection.
#[async_trait]
pub trait SegmentScheduler: Send + Sync {
    /// Start fetching sequentially from `request.from` to the period end.
    fn start(&self, request: FetchRequest);

    /// Drop requests that have not been issued yet.
    fn cancel_pending(&self, track: TrackKind);

    /// Abort requests currently on the wire.
    fn abort_in_flight(&self, track: TrackKind);

    /// Fetch the segment covering `at` again, typically to fill a gap.
    fn refetch(&self, track: TrackKind, at: f64, generation: Generation);

    /// Seconds buffered and queued ahead of the playhead, reported every tick.
    fn report_buffer_level(&self, track: TrackKind, seconds: f64);

    /// Start time of the segment covering `target` in period `period`.
    async fn segment_start_time(&self, track: TrackKind, period: usize, target: f64)
        -> Option<f64>;
}
