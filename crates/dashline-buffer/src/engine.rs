//! The per-track segment append engine.
//!
//! [`SegmentAppendEngine::tick`] is the single scheduling decision point for a
//! track. It never blocks and never returns an error: every decision is
//! reported as a [`TickOutcome`] so the caller keeps its loop going whatever
//! happens inside the engine.
//!
//! # Normal mode
//!
//! 1. Leading chunks that fell behind the playhead are dropped, as are chunks
//!    older than what was already appended in the same period.
//! 2. The head of the queue must join the buffered edge within the tolerance.
//!    Otherwise a [`GapSignal`] is emitted, once per distinct gap.
//! 3. A run of contiguous pieces sharing one init segment identity and one
//!    timestamp offset is collected, capped by the append enable threshold.
//! 4. If the run cannot reach the lookahead threshold and nothing else is
//!    queued, the append is deferred.
//! 5. The init segment is prepended when the identity differs from the last
//!    appended one, and the run is handed to the sink.
//!
//! # Sync mode
//!
//! After a seek the engine only locates its anchor chunk (the chunk fetched
//! for the seek's request time) and reports it. Appending resumes once
//! [`crate::sync::align`] released every track at once.

use bytes::Bytes;
use dashline_common::{Error, Generation, TrackKind};
use tracing::{debug, trace, warn};

use crate::chunk::{Appendable, ChunkKey, SegmentChunk, SubChunk};
use crate::init::{InitSegmentKey, InitSegmentStore};
use crate::queue::ChunkQueue;
use crate::range::{self, BufferedRange, DEFAULT_TOLERANCE};
use crate::sink::{AppendRequest, DecodeSink};
use crate::sync::SyncAnchor;

/// Tolerance used to match a chunk's request time with a sync target.
const REQUEST_EPSILON: f64 = 1e-3;

/// Thresholds for one track.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineConfig {
    /// Maximum gap between two intervals still treated as one range.
    pub tolerance: f64,
    /// Lookahead horizon the scheduler prefetches up to, in seconds.
    pub prefetch_threshold: f64,
    /// Maximum seconds handed to the sink in one append.
    pub append_enable_threshold: f64,
    /// Lookahead an append should reach when the caller requests none.
    pub min_append_lookahead: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tolerance: DEFAULT_TOLERANCE,
            prefetch_threshold: 20.0,
            append_enable_threshold: 10.0,
            min_append_lookahead: 2.0,
        }
    }
}

impl EngineConfig {
    /// Lookahead an append must reach: `min(requested, prefetch - 0.5)`.
    pub fn effective_threshold(&self, requested: Option<f64>) -> f64 {
        requested
            .unwrap_or(self.min_append_lookahead)
            .min(self.prefetch_threshold - 0.5)
            .max(0.0)
    }
}

/// Result of [`SegmentAppendEngine::enqueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    /// Inserted; carries the new queue length.
    Queued(usize),
    /// An identical fetch is already queued.
    Rejected,
}

/// Inputs of one scheduling decision.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickContext {
    /// Playhead position in seconds.
    pub current_time: f64,
    /// Whether tracks are waiting on the post-seek alignment barrier.
    pub waiting_for_sync: bool,
    /// Lookahead requested by the caller instead of the configured one.
    pub threshold_override: Option<f64>,
}

impl TickContext {
    /// Normal-mode tick at `current_time`.
    pub fn at(current_time: f64) -> Self {
        Self {
            current_time,
            waiting_for_sync: false,
            threshold_override: None,
        }
    }

    /// Mark the tick as part of the alignment handshake.
    #[must_use]
    pub fn syncing(mut self, waiting: bool) -> Self {
        self.waiting_for_sync = waiting;
        self
    }

    /// Request a lookahead threshold.
    #[must_use]
    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold_override = Some(threshold);
        self
    }
}

/// Why a tick did nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleReason {
    /// Appending is not permitted yet.
    NotPermitted,
    /// Nothing is queued.
    Empty,
    /// The sink is processing a previous append.
    SinkBusy,
    /// The head chunk has not delivered any piece yet.
    WaitingForData,
    /// No init segment is known for the head chunk's identity.
    MissingInit,
}

/// A detected discontinuity between the buffered edge and the queue.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GapSignal {
    pub track: TrackKind,
    /// Suggested time to fetch from: `request_start_time - duration / 2`.
    pub refetch_time: f64,
    /// Buffered edge.
    pub gap_start: f64,
    /// Start of the next queued data.
    pub gap_end: f64,
}

/// Summary of an append handed to the sink.
#[derive(Debug, Clone, PartialEq)]
pub struct AppendReport {
    pub start: f64,
    pub end: f64,
    /// Pieces included in the append.
    pub units: usize,
    pub bytes: usize,
    /// Init segment prepended, when the identity changed.
    pub init: Option<InitSegmentKey>,
    /// Whether the run reached the last chunk of its period.
    pub reached_period_end: bool,
}

/// Outcome of one [`SegmentAppendEngine::tick`].
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    Idle(IdleReason),
    /// Not enough data queued to reach the lookahead threshold.
    Deferred { lookahead: f64 },
    /// A new gap was found.
    Gap(GapSignal),
    /// The gap already signalled is still open.
    GapPending,
    /// Sync mode; the anchor chunk has not arrived yet.
    SyncPending,
    /// Sync mode; the anchor was located.
    SyncReady(SyncAnchor),
    Appended(AppendReport),
    /// The sink rejected the append; the data stays queued.
    Retry(Error),
    /// The sink failed irrecoverably.
    Fatal(Error),
}

#[derive(Debug, Clone, Copy)]
struct InFlight {
    generation: Generation,
    range: BufferedRange,
}

#[derive(Debug, Clone, Copy)]
struct SyncState {
    target: f64,
    anchor: Option<SyncAnchor>,
}

/// One piece of a run, identified by the queue slot it came from.
struct RunPiece {
    slot: usize,
    start: f64,
    end: f64,
    data: Bytes,
}

/// Segment append engine for one track.
#[derive(Debug)]
pub struct SegmentAppendEngine {
    track: TrackKind,
    config: EngineConfig,
    queue: ChunkQueue,
    inits: InitSegmentStore,
    pointer: Option<InitSegmentKey>,
    append_enabled: bool,
    generation: Generation,
    in_flight: Option<InFlight>,
    last_append: Option<BufferedRange>,
    last_request: Option<(f64, f64)>,
    signalled_gap: Option<ChunkKey>,
    under_threshold: bool,
    finished_period: bool,
    sync: Option<SyncState>,
    shift: f64,
}

impl SegmentAppendEngine {
    /// Create an engine for `track`.
    pub fn new(track: TrackKind, config: EngineConfig) -> Self {
        Self {
            track,
            config,
            queue: ChunkQueue::new(),
            inits: InitSegmentStore::new(),
            pointer: None,
            append_enabled: false,
            generation: Generation::default(),
            in_flight: None,
            last_append: None,
            last_request: None,
            signalled_gap: None,
            under_threshold: false,
            finished_period: false,
            sync: None,
            shift: 0.0,
        }
    }

    pub fn track(&self) -> TrackKind {
        self.track
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// Queued chunks, in append order.
    pub fn queue(&self) -> &ChunkQueue {
        &self.queue
    }

    /// Identity of the last appended chunk.
    pub fn pointer(&self) -> Option<InitSegmentKey> {
        self.pointer
    }

    /// Interval covered by the last append.
    pub fn last_append(&self) -> Option<BufferedRange> {
        self.last_append
    }

    /// Whether the last decision found too little data to append.
    pub fn is_under_threshold(&self) -> bool {
        self.under_threshold
    }

    /// Whether the last chunk of the current period was appended.
    pub fn finished_period(&self) -> bool {
        self.finished_period
    }

    pub fn append_enabled(&self) -> bool {
        self.append_enabled
    }

    /// Permit or withhold appending.
    pub fn set_append_enabled(&mut self, enabled: bool) {
        if self.append_enabled != enabled {
            debug!(track = %self.track, enabled, "Append permission changed");
        }
        self.append_enabled = enabled;
    }

    /// Queue a fetched chunk, storing its init segment when given.
    pub fn enqueue(&mut self, mut chunk: SegmentChunk, init: Option<Bytes>) -> Enqueued {
        if let Some(init) = init {
            self.inits.insert(chunk.identity(), init);
        }
        if self.shift != 0.0 {
            chunk.shift(self.shift);
        }

        let key = chunk.key();
        match self.queue.enqueue(chunk) {
            Some(len) => {
                trace!(
                    track = %self.track,
                    period = key.period_start,
                    request = key.request_start_time,
                    division = key.division_index,
                    queued = len,
                    "Chunk queued"
                );
                Enqueued::Queued(len)
            }
            None => {
                debug!(
                    track = %self.track,
                    request = key.request_start_time,
                    "Duplicate chunk rejected"
                );
                Enqueued::Rejected
            }
        }
    }

    /// Add a progressively delivered piece to a queued chunk.
    pub fn push_piece(&mut self, key: &ChunkKey, mut piece: SubChunk) -> bool {
        piece.start += self.shift;
        self.queue
            .find_mut(key)
            .map(|chunk| chunk.push_piece(piece))
            .unwrap_or(false)
    }

    /// Mark a progressive chunk as fully delivered.
    pub fn complete(&mut self, key: &ChunkKey) -> bool {
        match self.queue.find_mut(key) {
            Some(chunk) => {
                chunk.done = true;
                true
            }
            None => false,
        }
    }

    /// Merged buffered range of the sink covering `target`.
    pub fn get_buffered_range(
        &self,
        sink: &dyn DecodeSink,
        target: f64,
        tolerance: Option<f64>,
    ) -> Option<BufferedRange> {
        range::range_at(
            &sink.buffered(),
            target,
            tolerance.unwrap_or(self.config.tolerance),
        )
    }

    /// Seconds buffered in the sink ahead of `current_time`.
    pub fn sink_lookahead(&self, sink: &dyn DecodeSink, current_time: f64) -> f64 {
        self.get_buffered_range(sink, current_time, None)
            .map(|r| (r.end - current_time).max(0.0))
            .unwrap_or(0.0)
    }

    /// Contiguous buffered plus queued seconds ahead of `current_time`,
    /// capped at the prefetch threshold.
    pub fn buffered_duration(&self, sink: &dyn DecodeSink, current_time: f64) -> f64 {
        let tolerance = self.config.tolerance;
        let mut edge = self
            .get_buffered_range(sink, current_time, None)
            .map(|r| r.end)
            .unwrap_or(current_time);
        for chunk in self.queue.iter() {
            if chunk.end() <= edge {
                continue;
            }
            if chunk.start() > edge + tolerance {
                break;
            }
            edge = chunk.end();
        }
        (edge - current_time).clamp(0.0, self.config.prefetch_threshold)
    }

    /// Whether the sink's range at `from` extends to `until`.
    pub fn is_buffered_to(&self, sink: &dyn DecodeSink, from: f64, until: f64) -> bool {
        self.get_buffered_range(sink, from, None)
            .is_some_and(|r| r.end >= until - self.config.tolerance)
    }

    /// Forget everything queued for a new seek generation or period.
    ///
    /// Init segments are kept; an append still in flight is waited out and
    /// its data removed once it completes.
    pub fn reset(&mut self, generation: Generation) {
        let dropped = self.queue.len();
        self.queue.clear();
        self.generation = generation;
        self.pointer = None;
        self.last_append = None;
        self.last_request = None;
        self.signalled_gap = None;
        self.under_threshold = false;
        self.finished_period = false;
        self.sync = None;
        self.shift = 0.0;
        debug!(track = %self.track, %generation, dropped, "Engine reset");
    }

    /// Move on to the next period without forgetting the last append.
    pub fn begin_period(&mut self) {
        self.finished_period = false;
        self.under_threshold = false;
    }

    /// Drop init segments of periods before `period_start`.
    pub fn forget_inits_before(&mut self, period_start: f64) {
        self.inits.retain_from(period_start);
    }

    /// Whether an init segment is known for `key`.
    pub fn has_init(&self, key: &InitSegmentKey) -> bool {
        self.inits.contains(key)
    }

    /// The sink finished processing an append.
    ///
    /// Returns the interval to remove when the append belonged to an older
    /// generation.
    pub fn on_sink_updated(&mut self) -> Option<BufferedRange> {
        let in_flight = self.in_flight.take()?;
        if in_flight.generation != self.generation {
            debug!(
                track = %self.track,
                stale = %in_flight.generation,
                current = %self.generation,
                "Discarding stale append"
            );
            return Some(in_flight.range);
        }
        None
    }

    /// Whether an append is waiting for the sink to finish.
    pub fn has_in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Enter sync mode, anchoring on the chunk fetched for `target`.
    pub fn begin_sync(&mut self, target: f64) {
        self.sync = Some(SyncState {
            target,
            anchor: None,
        });
    }

    /// Whether the engine is in sync mode.
    pub fn is_syncing(&self) -> bool {
        self.sync.is_some()
    }

    /// Anchor located during sync mode.
    pub fn sync_anchor(&self) -> Option<SyncAnchor> {
        self.sync.and_then(|s| s.anchor)
    }

    /// Request time the pending sync is waiting for.
    pub fn sync_target(&self) -> Option<f64> {
        self.sync.map(|s| s.target)
    }

    /// Anchor on a queued chunk other than the one requested for the target.
    ///
    /// Takes the chunk covering the target, or with `allow_later` the first
    /// chunk ending after it. Returns `None` outside sync mode, when the
    /// anchor is already known or when nothing suitable is queued.
    pub fn reanchor(&mut self, allow_later: bool) -> Option<SyncAnchor> {
        let state = self.sync?;
        if state.anchor.is_some() {
            return None;
        }
        let target = state.target;
        let anchor = self
            .queue
            .iter()
            .find(|c| {
                let ends_after = c.request_start_time + c.duration > target + REQUEST_EPSILON;
                let covers = c.request_start_time <= target + REQUEST_EPSILON && ends_after;
                covers || (allow_later && ends_after)
            })
            .map(anchor_of)?;
        debug!(
            track = %self.track,
            target,
            start = anchor.start,
            allow_later,
            "Sync re-anchored"
        );
        self.sync = Some(SyncState {
            target,
            anchor: Some(anchor),
        });
        Some(anchor)
    }

    /// Shift every queued chunk, and chunks queued later, by `delta` seconds.
    pub fn apply_shift(&mut self, delta: f64) {
        for chunk in self.queue.iter_mut() {
            chunk.shift(delta);
        }
        self.shift += delta;
    }

    /// Seconds every chunk is shifted by since the last reset.
    pub fn shift(&self) -> f64 {
        self.shift
    }

    /// Leave sync mode.
    pub fn finish_sync(&mut self) {
        self.sync = None;
    }

    /// Remove media more than `keep` seconds behind `current_time`.
    pub fn prune_back_buffer(
        &self,
        sink: &mut dyn DecodeSink,
        current_time: f64,
        keep: f64,
    ) -> dashline_common::Result<Option<BufferedRange>> {
        if sink.is_busy() {
            return Ok(None);
        }
        let cutoff = current_time - keep;
        let Some(first) = range::merge(&sink.buffered(), self.config.tolerance)
            .into_iter()
            .next()
        else {
            return Ok(None);
        };
        if first.start >= cutoff - self.config.tolerance {
            return Ok(None);
        }
        let removed = BufferedRange::new(first.start, cutoff.min(first.end));
        sink.remove(removed.start, removed.end)?;
        debug!(
            track = %self.track,
            start = removed.start,
            end = removed.end,
            "Back buffer pruned"
        );
        Ok(Some(removed))
    }

    /// Decide what, if anything, to hand to the sink.
    pub fn tick(&mut self, sink: &mut dyn DecodeSink, ctx: &TickContext) -> TickOutcome {
        if ctx.waiting_for_sync {
            return self.tick_sync();
        }
        if !self.append_enabled {
            return TickOutcome::Idle(IdleReason::NotPermitted);
        }
        if self.queue.is_empty() {
            return TickOutcome::Idle(IdleReason::Empty);
        }
        if sink.is_busy() {
            return TickOutcome::Idle(IdleReason::SinkBusy);
        }

        self.drop_stale(ctx.current_time);
        self.queue.pop_drained();
        if self.queue.is_empty() {
            return TickOutcome::Idle(IdleReason::Empty);
        }

        let tolerance = self.config.tolerance;
        let buffered = sink.buffered();
        let edge = range::range_at(&buffered, ctx.current_time, tolerance)
            .map(|r| r.end)
            .or_else(|| {
                self.last_append.map(|last| {
                    range::range_at(&buffered, last.end, tolerance)
                        .map(|r| r.end)
                        .unwrap_or(last.end)
                })
            });

        let Some(head) = self.queue.front() else {
            return TickOutcome::Idle(IdleReason::Empty);
        };
        let Some(head_start) = head.pending_units().first().map(|u| u.start()) else {
            return TickOutcome::Idle(IdleReason::WaitingForData);
        };
        // Period seams are repaired by the timeline, not re-fetched.
        let crosses_period = self
            .last_request
            .is_some_and(|(period, _)| period != head.period_start);

        if let Some(edge) = edge {
            if !crosses_period && head_start > edge + tolerance {
                return self.signal_gap(edge, head_start);
            }
        }

        let (pieces, reached_end, exhausted) = self.collect_run();
        let (Some(first), Some(last)) = (pieces.first(), pieces.last()) else {
            return TickOutcome::Idle(IdleReason::WaitingForData);
        };
        let (run_start, run_end) = (first.start, last.end);

        let threshold = self.config.effective_threshold(ctx.threshold_override);
        let lookahead = run_end - ctx.current_time;
        if exhausted && !reached_end && lookahead < threshold {
            if !self.under_threshold {
                trace!(track = %self.track, lookahead, threshold, "Append deferred");
            }
            self.under_threshold = true;
            return TickOutcome::Deferred { lookahead };
        }

        self.append_run(sink, pieces, run_start, run_end, reached_end)
    }

    fn tick_sync(&mut self) -> TickOutcome {
        let Some(state) = self.sync else {
            return TickOutcome::SyncPending;
        };
        if let Some(anchor) = state.anchor {
            return TickOutcome::SyncReady(anchor);
        }

        let Some(slot) = self
            .queue
            .position_of_request(state.target, REQUEST_EPSILON)
        else {
            return TickOutcome::SyncPending;
        };
        let Some(chunk) = self.queue.get(slot) else {
            return TickOutcome::SyncPending;
        };

        let anchor = anchor_of(chunk);
        debug!(
            track = %self.track,
            target = state.target,
            diff = anchor.diff,
            offset = anchor.offset,
            "Sync anchor located"
        );
        self.sync = Some(SyncState {
            target: state.target,
            anchor: Some(anchor),
        });
        TickOutcome::SyncReady(anchor)
    }

    /// Drop chunks behind the playhead and chunks older than the last append.
    fn drop_stale(&mut self, current_time: f64) {
        let last_request = self.last_request;
        let dropped = self.queue.drop_leading_while(|chunk| {
            let behind = chunk.end() < current_time - chunk.duration;
            let superseded = last_request.is_some_and(|(period, request)| {
                chunk.period_start == period && chunk.request_start_time < request
            });
            behind || superseded
        });
        if dropped > 0 {
            debug!(track = %self.track, dropped, current_time, "Stale chunks dropped");
        }
    }

    fn signal_gap(&mut self, edge: f64, head_start: f64) -> TickOutcome {
        let Some(head) = self.queue.front() else {
            return TickOutcome::Idle(IdleReason::Empty);
        };
        let key = head.key();
        if self.signalled_gap == Some(key) {
            return TickOutcome::GapPending;
        }
        self.signalled_gap = Some(key);

        let signal = GapSignal {
            track: self.track,
            refetch_time: head.request_start_time - head.duration / 2.0,
            gap_start: edge,
            gap_end: head_start,
        };
        debug!(
            track = %self.track,
            gap_start = edge,
            gap_end = head_start,
            refetch = signal.refetch_time,
            "Gap detected"
        );
        TickOutcome::Gap(signal)
    }

    /// Collect contiguous pieces that can go out in a single append.
    ///
    /// Returns the pieces, whether the run reached the last chunk of its
    /// period and whether it consumed everything currently available.
    fn collect_run(&self) -> (Vec<RunPiece>, bool, bool) {
        let tolerance = self.config.tolerance;
        let cap = self.config.append_enable_threshold;
        let mut pieces: Vec<RunPiece> = Vec::new();
        let mut run_duration = 0.0;

        let Some(head) = self.queue.front() else {
            return (pieces, false, true);
        };
        let identity = head.identity();
        let offset = head.timestamp_offset;

        for (slot, chunk) in self.queue.iter().enumerate() {
            if chunk.identity() != identity || chunk.timestamp_offset != offset {
                return (pieces, false, false);
            }
            for unit in chunk.pending_units() {
                if let Some(prev) = pieces.last() {
                    if unit.start() > prev.end + tolerance {
                        return (pieces, false, false);
                    }
                    if run_duration + unit.duration() > cap {
                        return (pieces, false, false);
                    }
                }
                run_duration += unit.duration();
                pieces.push(RunPiece {
                    slot,
                    start: unit.start(),
                    end: unit.end(),
                    data: unit.data().clone(),
                });
            }
            if !chunk.done {
                return (pieces, false, true);
            }
            if chunk.last_in_period {
                return (pieces, true, false);
            }
        }
        (pieces, false, true)
    }

    fn append_run(
        &mut self,
        sink: &mut dyn DecodeSink,
        pieces: Vec<RunPiece>,
        start: f64,
        end: f64,
        reached_end: bool,
    ) -> TickOutcome {
        let Some(head) = self.queue.front() else {
            return TickOutcome::Idle(IdleReason::Empty);
        };
        let identity = head.identity();
        let timestamp_offset = head.timestamp_offset;

        let mut data = Vec::with_capacity(pieces.len() + 1);
        let init = if self.pointer != Some(identity) {
            let Some(init) = self.inits.get(&identity) else {
                warn!(track = %self.track, %identity, "No init segment for chunk identity");
                return TickOutcome::Idle(IdleReason::MissingInit);
            };
            data.push(init.clone());
            Some(identity)
        } else {
            None
        };

        let units = pieces.len();
        let mut consumed_per_slot: Vec<(usize, usize)> = Vec::new();
        for piece in &pieces {
            match consumed_per_slot.last_mut() {
                Some((slot, count)) if *slot == piece.slot => *count += 1,
                _ => consumed_per_slot.push((piece.slot, 1)),
            }
        }
        data.extend(pieces.into_iter().map(|p| p.data));

        let request = AppendRequest {
            track: self.track,
            generation: self.generation,
            data,
            timestamp_offset,
            start,
            end,
        };
        let bytes = request.byte_len();

        if let Err(err) = sink.append(request) {
            if err.is_fatal() {
                return TickOutcome::Fatal(err);
            }
            warn!(track = %self.track, error = %err, "Append failed, will retry");
            return TickOutcome::Retry(err);
        }

        let mut last_request = None;
        for (slot, count) in consumed_per_slot {
            if let Some(chunk) = self.queue.get_mut(slot) {
                chunk.mark_consumed(count);
                last_request = Some((chunk.period_start, chunk.request_start_time));
            }
        }
        self.queue.pop_drained();

        let range = BufferedRange::new(start, end);
        self.pointer = Some(identity);
        self.last_append = Some(range);
        if last_request.is_some() {
            self.last_request = last_request;
        }
        self.signalled_gap = None;
        self.under_threshold = false;
        if reached_end {
            self.finished_period = true;
        }
        if sink.is_busy() {
            self.in_flight = Some(InFlight {
                generation: self.generation,
                range,
            });
        }

        debug!(
            track = %self.track,
            start,
            end,
            units,
            bytes,
            init = init.is_some(),
            "Appended"
        );
        TickOutcome::Appended(AppendReport {
            start,
            end,
            units,
            bytes,
            init,
            reached_period_end: reached_end,
        })
    }
}

fn anchor_of(chunk: &SegmentChunk) -> SyncAnchor {
    SyncAnchor {
        diff: chunk.presentation_start - chunk.request_start_time,
        offset: chunk.timestamp_offset,
        start: chunk.presentation_start,
    }
}
