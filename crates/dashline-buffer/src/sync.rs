//! Post-seek alignment barrier.
//!
//! After a seek every track locates the chunk fetched for the seek's request
//! time and records how far its presentation start drifted from that request
//! ([`SyncAnchor::diff`]). Once all tracks are ready, [`align`] computes the
//! smallest drift and, if it is large enough to leave a visible seam or a
//! track would start before zero, shifts every track by the same amount.
//! All tracks then leave sync mode in the same call. [`release`] does the
//! same with a partial set of anchors when a track never finds one.

use tracing::{debug, info, warn};

use crate::engine::SegmentAppendEngine;

/// What one track found for the seek target.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct SyncAnchor {
    /// `presentation_start - request_start_time` of the anchor chunk.
    pub diff: f64,
    /// Timestamp offset of the anchor chunk.
    pub offset: f64,
    /// Presentation start of the anchor chunk.
    pub start: f64,
}

/// Result of a completed alignment.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct Alignment {
    /// Smallest drift across tracks.
    pub min_diff: f64,
    /// Shift applied to every track (zero when none was needed).
    pub shift: f64,
    /// Whether chunks were moved.
    pub shifted: bool,
}

/// Release every engine from sync mode once all located their anchor.
///
/// Returns `None`, touching nothing, while any engine is still waiting.
pub fn align(engines: &mut [&mut SegmentAppendEngine], max_diff: f64) -> Option<Alignment> {
    if engines.is_empty() {
        return None;
    }

    let mut anchors = Vec::with_capacity(engines.len());
    for engine in engines.iter() {
        match engine.sync_anchor() {
            Some(anchor) => anchors.push(anchor),
            None => {
                debug!(track = %engine.track(), "Alignment waiting on track");
                return None;
            }
        }
    }

    Some(apply(engines, &anchors, max_diff))
}

/// Release every engine from sync mode with whatever anchors were found.
///
/// Used when a track never located its anchor. The shift is computed from
/// the anchored tracks only; tracks without an anchor are shifted the same.
pub fn release(engines: &mut [&mut SegmentAppendEngine], max_diff: f64) -> Alignment {
    let anchors: Vec<SyncAnchor> = engines.iter().filter_map(|e| e.sync_anchor()).collect();
    warn!(
        anchored = anchors.len(),
        tracks = engines.len(),
        "Releasing alignment barrier without every anchor"
    );
    apply(engines, &anchors, max_diff)
}

fn apply(
    engines: &mut [&mut SegmentAppendEngine],
    anchors: &[SyncAnchor],
    max_diff: f64,
) -> Alignment {
    let min_diff = if anchors.is_empty() {
        0.0
    } else {
        anchors.iter().map(|a| a.diff).fold(f64::INFINITY, f64::min)
    };
    let negative_start = anchors.iter().any(|a| a.start + a.offset < 0.0);
    let shifted = min_diff > max_diff || negative_start;
    let shift = if shifted { -min_diff } else { 0.0 };

    for engine in engines.iter_mut() {
        if shifted {
            engine.apply_shift(shift);
        }
        engine.finish_sync();
    }

    if shifted {
        info!(min_diff, shift, tracks = engines.len(), "Tracks realigned after seek");
    } else {
        debug!(min_diff, tracks = engines.len(), "Tracks aligned without shift");
    }

    Alignment {
        min_diff,
        shift,
        shifted,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::SegmentChunk;
    use crate::engine::{EngineConfig, TickContext, TickOutcome};
    use crate::sink::MemorySink;
    use assert_matches::assert_matches;
    use bytes::Bytes;
    use dashline_common::{Generation, TrackKind};

    fn syncing_engine(track: TrackKind, target: f64) -> SegmentAppendEngine {
        let mut engine = SegmentAppendEngine::new(track, EngineConfig::default());
        engine.set_append_enabled(true);
        engine.reset(Generation::new(1));
        engine.begin_sync(target);
        engine
    }

    fn anchor_chunk(request: f64, presentation: f64) -> SegmentChunk {
        SegmentChunk::new(0.0, request, 2.0, vec![0u8; 4])
            .with_timing(presentation, presentation - request)
    }

    fn locate(engine: &mut SegmentAppendEngine, sink: &mut MemorySink, target: f64) {
        let outcome = engine.tick(sink, &TickContext::at(target).syncing(true));
        assert_matches!(outcome, TickOutcome::SyncReady(_));
    }

    #[test]
    fn test_waits_for_every_track() {
        let mut video = syncing_engine(TrackKind::Video, 10.0);
        let mut audio = syncing_engine(TrackKind::Audio, 10.0);
        let mut sink = MemorySink::instant(TrackKind::Video);

        video.enqueue(anchor_chunk(10.0, 11.5), Some(Bytes::new()));
        locate(&mut video, &mut sink, 10.0);

        assert_eq!(align(&mut [&mut video, &mut audio], 1.0), None);
        assert!(video.is_syncing());
        assert!(audio.is_syncing());
        assert_eq!(video.shift(), 0.0);
    }

    #[test]
    fn test_shifts_by_min_diff() {
        let mut video = syncing_engine(TrackKind::Video, 10.0);
        let mut audio = syncing_engine(TrackKind::Audio, 10.0);
        let mut sink = MemorySink::instant(TrackKind::Video);

        video.enqueue(anchor_chunk(10.0, 12.0), Some(Bytes::new()));
        audio.enqueue(anchor_chunk(10.0, 11.5), Some(Bytes::new()));
        locate(&mut video, &mut sink, 10.0);
        locate(&mut audio, &mut sink, 10.0);

        let alignment = align(&mut [&mut video, &mut audio], 1.0).unwrap();
        assert!(alignment.shifted);
        assert_eq!(alignment.min_diff, 1.5);
        assert_eq!(alignment.shift, -1.5);

        assert!(!video.is_syncing());
        assert!(!audio.is_syncing());
        assert_eq!(video.queue().front().unwrap().presentation_start, 10.5);
        assert_eq!(audio.queue().front().unwrap().presentation_start, 10.0);
        assert_eq!(audio.queue().front().unwrap().timestamp_offset, 0.0);

        // Chunks arriving after alignment receive the same shift.
        video.enqueue(anchor_chunk(12.0, 14.0), None);
        assert_eq!(video.queue().get(1).unwrap().presentation_start, 12.5);
    }

    #[test]
    fn test_small_diff_left_alone() {
        let mut video = syncing_engine(TrackKind::Video, 10.0);
        let mut audio = syncing_engine(TrackKind::Audio, 10.0);
        let mut sink = MemorySink::instant(TrackKind::Video);

        video.enqueue(anchor_chunk(10.0, 10.2), Some(Bytes::new()));
        audio.enqueue(anchor_chunk(10.0, 10.0), Some(Bytes::new()));
        locate(&mut video, &mut sink, 10.0);
        locate(&mut audio, &mut sink, 10.0);

        let alignment = align(&mut [&mut video, &mut audio], 1.0).unwrap();
        assert!(!alignment.shifted);
        assert_eq!(alignment.shift, 0.0);
        assert_eq!(video.queue().front().unwrap().presentation_start, 10.2);
        assert!(!video.is_syncing());
    }

    #[test]
    fn test_negative_start_forces_shift() {
        let mut video = syncing_engine(TrackKind::Video, 0.0);
        let mut sink = MemorySink::instant(TrackKind::Video);
        video.enqueue(
            SegmentChunk::new(0.0, 0.0, 2.0, vec![0u8; 4]).with_timing(0.5, -1.0),
            Some(Bytes::new()),
        );
        locate(&mut video, &mut sink, 0.0);

        let alignment = align(&mut [&mut video], 1.0).unwrap();
        assert!(alignment.shifted);
        assert_eq!(alignment.shift, -0.5);
    }

    #[test]
    fn test_release_with_partial_anchors() {
        let mut video = syncing_engine(TrackKind::Video, 10.0);
        let mut audio = syncing_engine(TrackKind::Audio, 10.0);
        let mut sink = MemorySink::instant(TrackKind::Video);

        video.enqueue(anchor_chunk(10.0, 12.0), Some(Bytes::new()));
        audio.enqueue(anchor_chunk(12.0, 14.0), Some(Bytes::new()));
        locate(&mut video, &mut sink, 10.0);

        let alignment = release(&mut [&mut video, &mut audio], 1.0);
        assert!(alignment.shifted);
        assert_eq!(alignment.shift, -2.0);
        assert!(!video.is_syncing());
        assert!(!audio.is_syncing());
        assert_eq!(audio.queue().front().unwrap().presentation_start, 12.0);
    }

    #[test]
    fn test_release_without_anchors() {
        let mut video = syncing_engine(TrackKind::Video, 10.0);
        let alignment = release(&mut [&mut video], 1.0);
        assert!(!alignment.shifted);
        assert_eq!(alignment.shift, 0.0);
        assert!(!video.is_syncing());
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(align(&mut [], 1.0), None);
    }
}
