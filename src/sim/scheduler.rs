//! Synthetic segment scheduler.
//!
//! Fetches one track's segments sequentially on a spawned task per
//! [`FetchRequest`], waiting while the reported buffer level is at the
//! prefetch horizon. Fetching is simulated with a sleep; bytes are filler.
//! A new request or a cancellation ends the previous task.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dashline_buffer::{SegmentChunk, SubChunk};
use dashline_common::{AdaptationSet, Generation, Period, TrackKind};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::config::{BufferConfig, SimulationConfig};
use crate::fetch::{FetchRequest, SegmentScheduler};
use crate::manifest::{Manifest, ManifestModel};
use crate::session::{SessionHandle, SessionMessage};

/// How often a throttled fetch loop re-checks the buffer level.
const LEVEL_POLL: Duration = Duration::from_millis(50);

/// Pieces per segment in progressive mode.
const PIECES: u32 = 4;

const EPSILON: f64 = 1e-6;

#[derive(Debug, Default)]
struct TrackFetch {
    token: CancellationToken,
    level: f64,
}

#[derive(Debug, Default)]
struct FetchState {
    tracks: HashMap<TrackKind, TrackFetch>,
    /// Segments skipped once, to simulate lost requests.
    missing: Vec<(TrackKind, f64)>,
}

/// One segment to deliver.
#[derive(Debug, Clone, Copy)]
struct Segment {
    track: TrackKind,
    generation: Generation,
    period_start: f64,
    adaptation_set: usize,
    quality: usize,
    bandwidth: u64,
    time: f64,
    duration: f64,
    last: bool,
}

struct Shared {
    manifest: Arc<Manifest>,
    handle: SessionHandle,
    sim: SimulationConfig,
    prefetch: HashMap<TrackKind, f64>,
    state: Mutex<FetchState>,
}

pub struct SyntheticScheduler {
    shared: Arc<Shared>,
}

impl SyntheticScheduler {
    pub fn new(
        manifest: Arc<Manifest>,
        handle: SessionHandle,
        sim: SimulationConfig,
        buffer: &BufferConfig,
    ) -> Self {
        let prefetch = TrackKind::ALL
            .iter()
            .map(|kind| (*kind, buffer.track(*kind).prefetch_threshold))
            .collect();
        Self {
            shared: Arc::new(Shared {
                manifest,
                handle,
                sim,
                prefetch,
                state: Mutex::new(FetchState::default()),
            }),
        }
    }

    /// Skip the segment of `track` covering `time` the first time it is fetched.
    pub fn with_missing(self, track: TrackKind, time: f64) -> Self {
        self.shared.state.lock().missing.push((track, time));
        self
    }

    fn cancel(&self, track: TrackKind) {
        if let Some(fetch) = self.shared.state.lock().tracks.get(&track) {
            fetch.token.cancel();
        }
    }
}

/// Start of the segment covering `time` on a grid anchored at `period_start`.
fn grid_floor(period_start: f64, time: f64, segment: f64) -> f64 {
    let index = ((time - period_start) / segment + EPSILON).floor().max(0.0);
    period_start + index * segment
}

fn init_segment(segment: &Segment) -> Bytes {
    Bytes::from(format!(
        "init:{}:{}:{}:{}",
        segment.track, segment.period_start, segment.adaptation_set, segment.quality
    ))
}

impl Shared {
    fn prefetch(&self, track: TrackKind) -> f64 {
        self.prefetch.get(&track).copied().unwrap_or(20.0)
    }

    fn level(&self, track: TrackKind) -> f64 {
        self.state
            .lock()
            .tracks
            .get(&track)
            .map(|t| t.level)
            .unwrap_or(0.0)
    }

    fn add_level(&self, track: TrackKind, seconds: f64) {
        if let Some(fetch) = self.state.lock().tracks.get_mut(&track) {
            fetch.level += seconds;
        }
    }

    fn take_missing(&self, track: TrackKind, time: f64) -> bool {
        let segment = self.sim.segment_duration;
        let mut state = self.state.lock();
        let position = state.missing.iter().position(|(kind, at)| {
            *kind == track && *at >= time - EPSILON && *at < time + segment - EPSILON
        });
        match position {
            Some(index) => {
                state.missing.remove(index);
                true
            }
            None => false,
        }
    }

    fn clear_missing(&self, track: TrackKind, time: f64) {
        let segment = self.sim.segment_duration;
        self.state.lock().missing.retain(|(kind, at)| {
            !(*kind == track && *at >= time - EPSILON && *at < time + segment - EPSILON)
        });
    }

    /// Higher quality once half the prefetch horizon is buffered.
    fn pick_quality(&self, adaptation: &AdaptationSet, level: f64, prefetch: f64) -> usize {
        let top = adaptation.representations.len().saturating_sub(1);
        if level >= prefetch / 2.0 {
            top.min(1)
        } else {
            0
        }
    }

    fn segment(
        &self,
        request: &FetchRequest,
        period: &Period,
        adaptation: &AdaptationSet,
        quality: usize,
        time: f64,
    ) -> Segment {
        let duration = self.sim.segment_duration.min(period.end - time);
        Segment {
            track: request.track,
            generation: request.generation,
            period_start: period.start,
            adaptation_set: adaptation.index,
            quality,
            bandwidth: adaptation
                .representations
                .get(quality)
                .map(|r| r.bandwidth)
                .unwrap_or(0),
            time,
            duration,
            last: time + duration >= period.end - EPSILON,
        }
    }

    /// Presentation start and timestamp offset of a segment.
    fn timing(&self, segment: &Segment) -> (f64, f64) {
        match segment.track {
            TrackKind::Audio => (segment.time + self.sim.audio_drift, self.sim.audio_drift),
            TrackKind::Video => (segment.time, 0.0),
        }
    }

    fn payload(segment: &Segment, duration: f64) -> Bytes {
        let size = (segment.bandwidth as f64 * duration / 8.0 / 1000.0).max(1.0) as usize;
        Bytes::from(vec![segment.quality as u8; size])
    }

    fn chunk(&self, segment: &Segment, progressive: bool) -> SegmentChunk {
        let (presentation, offset) = self.timing(segment);
        let chunk = if progressive {
            SegmentChunk::progressive(segment.period_start, segment.time, segment.duration)
        } else {
            SegmentChunk::new(
                segment.period_start,
                segment.time,
                segment.duration,
                Self::payload(segment, segment.duration),
            )
        };
        let chunk = chunk
            .with_quality(segment.adaptation_set, segment.quality)
            .with_timing(presentation, offset);
        if segment.last {
            chunk.last_in_period()
        } else {
            chunk
        }
    }

    /// Hand one segment to the session. Returns false once delivery is
    /// pointless: the session stopped or the fetch was cancelled.
    async fn deliver(
        &self,
        segment: Segment,
        init: Option<Bytes>,
        progressive: bool,
        token: &CancellationToken,
    ) -> bool {
        let chunk = self.chunk(&segment, progressive);
        let key = chunk.key();
        trace!(
            track = %segment.track,
            time = segment.time,
            quality = segment.quality,
            "Segment delivered"
        );
        let sent = self.handle.send(SessionMessage::ChunkDelivered {
            generation: segment.generation,
            track: segment.track,
            chunk,
            init,
        });
        if !sent || !progressive {
            return sent;
        }

        let (presentation, _) = self.timing(&segment);
        let piece_duration = segment.duration / f64::from(PIECES);
        let piece_latency = self.sim.fetch_latency() / PIECES;
        for index in 0..PIECES {
            tokio::select! {
                _ = token.cancelled() => return false,
                _ = tokio::time::sleep(piece_latency) => {}
            }
            let piece = SubChunk::new(
                presentation + f64::from(index) * piece_duration,
                piece_duration,
                Self::payload(&segment, piece_duration),
            );
            let sent = self.handle.send(SessionMessage::PieceDelivered {
                generation: segment.generation,
                track: segment.track,
                key,
                piece,
            });
            if !sent {
                return false;
            }
        }
        self.handle.send(SessionMessage::ChunkComplete {
            generation: segment.generation,
            track: segment.track,
            key,
        })
    }

    async fn fetch_period(self: Arc<Self>, request: FetchRequest, token: CancellationToken) {
        let track = request.track;
        let Some(period) = self.manifest.data_for_index(request.period).cloned() else {
            warn!(track = %track, period = request.period, "Fetch for unknown period");
            return;
        };
        let Some(adaptation) = period
            .adaptation_sets
            .iter()
            .find(|a| a.index == request.adaptation_set)
            .cloned()
        else {
            warn!(track = %track, adaptation_set = request.adaptation_set, "Fetch for unknown adaptation set");
            return;
        };

        let step = self.sim.segment_duration;
        let prefetch = self.prefetch(track);
        let mut time = grid_floor(period.start, request.from, step);
        let mut quality = None;
        let mut first = true;
        debug!(
            track = %track,
            period = period.index,
            from = time,
            generation = %request.generation,
            "Fetching period"
        );

        while time < period.end - EPSILON {
            // The segment a seek lands on is never held back by the level.
            if !first {
                while self.level(track) + step > prefetch {
                    tokio::select! {
                        _ = token.cancelled() => return,
                        _ = tokio::time::sleep(LEVEL_POLL) => {}
                    }
                }
            }
            first = false;

            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(self.sim.fetch_latency()) => {}
            }

            if self.take_missing(track, time) {
                info!(track = %track, time, "Simulated segment loss");
                time += step;
                continue;
            }

            let selected = self.pick_quality(&adaptation, self.level(track), prefetch);
            let segment = self.segment(&request, &period, &adaptation, selected, time);
            let init = (quality != Some(selected)).then(|| init_segment(&segment));
            if quality.is_some() && init.is_some() {
                debug!(track = %track, quality = selected, "Quality switched");
            }
            quality = Some(selected);

            if !self.deliver(segment, init, self.sim.progressive, &token).await {
                return;
            }
            self.add_level(track, segment.duration);
            time += step;
        }
        debug!(track = %track, period = period.index, "Period fetched");
    }

    async fn refetch(
        self: Arc<Self>,
        track: TrackKind,
        at: f64,
        generation: Generation,
        token: CancellationToken,
    ) {
        let Some(period) = self.manifest.period_at(at).cloned() else {
            return;
        };
        let Some(adaptation) = period.adaptation_set(track, Some("main")).cloned() else {
            return;
        };
        tokio::select! {
            _ = token.cancelled() => return,
            _ = tokio::time::sleep(self.sim.fetch_latency()) => {}
        }

        let time = grid_floor(period.start, at, self.sim.segment_duration);
        self.clear_missing(track, time);
        let request = FetchRequest {
            track,
            period: period.index,
            adaptation_set: adaptation.index,
            from: time,
            generation,
        };
        let segment = self.segment(&request, &period, &adaptation, 0, time);
        debug!(track = %track, time, "Refetching segment");
        self.deliver(segment, Some(init_segment(&segment)), false, &token)
            .await;
    }
}

#[async_trait]
impl SegmentScheduler for SyntheticScheduler {
    fn start(&self, request: FetchRequest) {
        let token = {
            let mut state = self.shared.state.lock();
            let fetch = state.tracks.entry(request.track).or_default();
            fetch.token.cancel();
            fetch.token = CancellationToken::new();
            fetch.level = 0.0;
            fetch.token.clone()
        };
        tokio::spawn(Arc::clone(&self.shared).fetch_period(request, token));
    }

    fn cancel_pending(&self, track: TrackKind) {
        trace!(track = %track, "Pending fetches cancelled");
        self.cancel(track);
    }

    fn abort_in_flight(&self, track: TrackKind) {
        trace!(track = %track, "In-flight fetch aborted");
        self.cancel(track);
    }

    fn refetch(&self, track: TrackKind, at: f64, generation: Generation) {
        let token = self
            .shared
            .state
            .lock()
            .tracks
            .get(&track)
            .map(|t| t.token.clone())
            .unwrap_or_default();
        tokio::spawn(Arc::clone(&self.shared).refetch(track, at, generation, token));
    }

    fn report_buffer_level(&self, track: TrackKind, seconds: f64) {
        if let Some(fetch) = self.shared.state.lock().tracks.get_mut(&track) {
            fetch.level = seconds;
        }
    }

    async fn segment_start_time(&self, _track: TrackKind, period: usize, target: f64) -> Option<f64> {
        let period = self.shared.manifest.data_for_index(period)?;
        Some(grid_floor(period.start, target, self.shared.sim.segment_duration))
    }
}
