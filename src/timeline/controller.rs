//! Playback timeline controller.
//!
//! [`TimelineController`] owns one [`BufferController`] per track and makes
//! every session-level decision: when engines may append, when playback may
//! run, when buffering moves on to the next period and when the stream ends.
//! It is a plain state machine. Inputs arrive as method calls carrying the
//! current [`Instant`]; asynchronous work it needs is handed out as
//! [`TimelineTask`]s and fed back through [`TimelineController::on_task`].
//!
//! # Phases
//!
//! ```text
//! Idle -> Loading -> Buffering <-> Playing -> Ended
//!                        ^            |
//!                        +-- Seeking <+ (via PeriodTransition when the
//!                                        target lies in another period)
//! ```
//!
//! Pausing is orthogonal to the phase. Appends are additionally held back
//! by the [`KeyGate`] until a content key is available.

use std::sync::Arc;

use bytes::Bytes;
use dashline_buffer::{
    sync, Alignment, ChunkKey, SegmentAppendEngine, SegmentChunk, SubChunk, TickContext,
    TickOutcome,
};
use dashline_common::{BufferState, Error, ErrorClass, Generation, SessionId, TrackKind};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};

use crate::clock::{ClockAdapter, ClockEvent, StallAction};
use crate::config::Config;
use crate::drm::DrmAgent;
use crate::events::{EventBus, EventPayload};
use crate::fetch::{FetchRequest, SegmentScheduler};
use crate::manifest::ManifestModel;

use super::gate::KeyGate;
use super::period::{self, PeriodCursor, PeriodInfo};
use super::timers::{Timer, Timers};
use super::track::{BufferController, SinkFactory, TrackSnapshot};

/// Role preferred when picking adaptation sets.
const MAIN_ROLE: &str = "main";

/// Settle periods spent recovering anchors before the barrier is released.
const MAX_SEEK_RECOVERIES: u32 = 3;

/// Controller phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    Loading,
    Buffering,
    Playing,
    Seeking,
    PeriodTransition,
    Ended,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Loading => write!(f, "loading"),
            Self::Buffering => write!(f, "buffering"),
            Self::Playing => write!(f, "playing"),
            Self::Seeking => write!(f, "seeking"),
            Self::PeriodTransition => write!(f, "period_transition"),
            Self::Ended => write!(f, "ended"),
        }
    }
}

/// Result of an asynchronous operation started by the controller.
#[derive(Debug)]
pub enum TaskOutput {
    /// Start time of the segment covering a seek target.
    SegmentStart {
        track: TrackKind,
        generation: Generation,
        time: Option<f64>,
    },
    /// Key sessions were created, or creation failed.
    KeysCreated(dashline_common::Result<()>),
}

/// Asynchronous operation polled by the session driver.
pub type TimelineTask = BoxFuture<'static, TaskOutput>;

/// External collaborators of one controller.
pub struct Collaborators {
    pub clock: ClockAdapter,
    pub scheduler: Arc<dyn SegmentScheduler>,
    pub drm: Arc<dyn DrmAgent>,
    pub sinks: Box<dyn SinkFactory>,
}

/// Point-in-time view of a session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    pub phase: Phase,
    pub paused: bool,
    pub current_time: f64,
    pub duration: f64,
    pub generation: Generation,
    pub buffer_state: BufferState,
    pub key_gate: KeyGate,
    pub period: Option<PeriodInfo>,
    pub tracks: Vec<TrackSnapshot>,
    pub disabled: Vec<TrackKind>,
    pub end_of_stream: bool,
    pub stalls: u32,
    pub error: Option<String>,
}

impl Default for Snapshot {
    fn default() -> Self {
        Self {
            phase: Phase::Idle,
            paused: true,
            current_time: 0.0,
            duration: 0.0,
            generation: Generation::default(),
            buffer_state: BufferState::Empty,
            key_gate: KeyGate::default(),
            period: None,
            tracks: Vec::new(),
            disabled: Vec::new(),
            end_of_stream: false,
            stalls: 0,
            error: None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct SeekState {
    target: f64,
    generation: Generation,
    /// Settle periods elapsed without alignment.
    stalled: u32,
}

pub struct TimelineController {
    session: SessionId,
    config: Arc<Config>,
    events: Arc<EventBus>,
    clock: ClockAdapter,
    scheduler: Arc<dyn SegmentScheduler>,
    drm: Arc<dyn DrmAgent>,
    sinks: Box<dyn SinkFactory>,
    manifest: Option<Arc<dyn ManifestModel>>,
    tracks: Vec<BufferController>,
    disabled: Vec<TrackKind>,
    phase: Phase,
    paused: bool,
    gate: KeyGate,
    periods: PeriodCursor,
    timers: Timers,
    generation: Generation,
    seek: Option<SeekState>,
    queued_seek: Option<f64>,
    last_seek_target: Option<f64>,
    needs_start_adjust: bool,
    eos_signalled: bool,
    buffer_state: BufferState,
    error: Option<Error>,
    tasks: Vec<TimelineTask>,
}

impl TimelineController {
    pub fn new(
        session: SessionId,
        config: Arc<Config>,
        events: Arc<EventBus>,
        parts: Collaborators,
    ) -> Self {
        Self {
            session,
            config,
            events,
            clock: parts.clock,
            scheduler: parts.scheduler,
            drm: parts.drm,
            sinks: parts.sinks,
            manifest: None,
            tracks: Vec::new(),
            disabled: Vec::new(),
            phase: Phase::Idle,
            paused: true,
            gate: KeyGate::NotRequired,
            periods: PeriodCursor::default(),
            timers: Timers::new(),
            generation: Generation::default(),
            seek: None,
            queued_seek: None,
            last_seek_target: None,
            needs_start_adjust: false,
            eos_signalled: false,
            buffer_state: BufferState::Empty,
            error: None,
            tasks: Vec::new(),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn buffer_state(&self) -> BufferState {
        self.buffer_state
    }

    pub fn key_gate(&self) -> KeyGate {
        self.gate
    }

    /// Error that ended the session, if any.
    pub fn error(&self) -> Option<&Error> {
        self.error.as_ref()
    }

    pub fn track(&self, kind: TrackKind) -> Option<&BufferController> {
        self.tracks.iter().find(|t| t.kind() == kind)
    }

    fn track_mut(&mut self, kind: TrackKind) -> Option<&mut BufferController> {
        self.tracks.iter_mut().find(|t| t.kind() == kind)
    }

    pub fn period_info(&self) -> Option<PeriodInfo> {
        self.manifest
            .as_ref()
            .and_then(|m| self.periods.info(m.as_ref()))
    }

    /// Earliest armed timer deadline.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.next_deadline()
    }

    /// Asynchronous operations started since the last call.
    pub fn take_tasks(&mut self) -> Vec<TimelineTask> {
        std::mem::take(&mut self.tasks)
    }

    pub fn snapshot(&self) -> Snapshot {
        let position = self.clock.current_time();
        Snapshot {
            phase: self.phase,
            paused: self.paused,
            current_time: position,
            duration: self.manifest.as_ref().map(|m| m.duration()).unwrap_or(0.0),
            generation: self.generation,
            buffer_state: self.buffer_state,
            key_gate: self.gate,
            period: self.period_info(),
            tracks: self.tracks.iter().map(|t| t.snapshot(position)).collect(),
            disabled: self.disabled.clone(),
            end_of_stream: self.eos_signalled,
            stalls: self.clock.stalls(),
            error: self.error.as_ref().map(ToString::to_string),
        }
    }

    fn emit(&self, payload: EventPayload) {
        self.events.broadcast(self.session, payload);
    }

    fn is_active(&self) -> bool {
        !matches!(self.phase, Phase::Idle | Phase::Loading | Phase::Ended)
    }

    // -----------------------------------------------------------------------
    // Load
    // -----------------------------------------------------------------------

    /// Bind a presentation and start buffering `period`.
    pub fn load(&mut self, manifest: Arc<dyn ManifestModel>, period: usize, now: Instant) {
        if let Err(err) = self.try_load(manifest, period, now) {
            self.fail(err);
        }
    }

    fn try_load(
        &mut self,
        manifest: Arc<dyn ManifestModel>,
        index: usize,
        now: Instant,
    ) -> dashline_common::Result<()> {
        self.unload();
        self.phase = Phase::Loading;

        let Some(period) = manifest.data_for_index(index).cloned() else {
            return Err(Error::invalid_input(format!(
                "period {} is not in the manifest",
                index
            )));
        };
        let duration = manifest.duration();
        self.clock.set_duration(duration);
        self.periods = PeriodCursor::new(index, manifest.periods().len());
        self.generation = self.generation.next();

        for kind in TrackKind::ALL {
            let Some(adaptation) = manifest
                .data_for_role(index, kind, Some(MAIN_ROLE))
                .cloned()
            else {
                debug!(track = %kind, period = index, "No adaptation set for track");
                continue;
            };
            if adaptation.protected && !self.drm.supports_protection() {
                let err = Error::NoKeySystem(format!("{} track is protected", kind));
                self.disable(kind, &err);
                continue;
            }
            match self.sinks.create(kind, &adaptation) {
                Ok(sink) => {
                    let config = self.config.buffer.engine_config(kind);
                    self.tracks
                        .push(BufferController::new(kind, adaptation, config, sink));
                }
                Err(err) if err.class() == ErrorClass::Protection => self.disable(kind, &err),
                Err(err) => return Err(err),
            }
        }
        if self.tracks.is_empty() {
            return Err(Error::NoPlayableTrack { period: index });
        }

        self.manifest = Some(Arc::clone(&manifest));
        self.emit(EventPayload::PlaybackInitialized {
            duration,
            periods: self.periods.count,
            tracks: self.tracks.iter().map(|t| t.kind()).collect(),
        });

        if self.tracks.iter().any(|t| t.adaptation().protected) {
            self.request_keys(now);
        } else {
            self.gate = KeyGate::NotRequired;
        }
        let (open, generation) = (self.gate.is_open(), self.generation);
        for track in &mut self.tracks {
            let engine = track.engine_mut();
            engine.reset(generation);
            engine.set_append_enabled(open);
        }

        if (self.clock.current_time() - period.start).abs() > f64::EPSILON {
            self.last_seek_target = Some(period.start);
            self.clock.seek(period.start);
        }
        self.start_fetching(index, period.start);
        self.phase = Phase::Buffering;
        self.needs_start_adjust = true;

        info!(
            session = %self.session,
            period = index,
            duration,
            tracks = self.tracks.len(),
            protected = !self.gate.is_open(),
            "Presentation loaded"
        );
        Ok(())
    }

    fn unload(&mut self) {
        for track in &mut self.tracks {
            self.scheduler.cancel_pending(track.kind());
            self.scheduler.abort_in_flight(track.kind());
            track.detach();
        }
        self.tracks.clear();
        self.disabled.clear();
        self.manifest = None;
        self.timers.clear();
        self.seek = None;
        self.queued_seek = None;
        self.last_seek_target = None;
        self.eos_signalled = false;
        self.error = None;
        self.gate = KeyGate::NotRequired;
        self.buffer_state = BufferState::Empty;
    }

    fn request_keys(&mut self, now: Instant) {
        self.gate = KeyGate::Pending;
        let protected = |kind| {
            self.track(kind)
                .map(|t| t.adaptation())
                .filter(|a| a.protected)
                .cloned()
        };
        let (video, audio) = (protected(TrackKind::Video), protected(TrackKind::Audio));
        let drm = Arc::clone(&self.drm);
        self.tasks.push(
            async move { TaskOutput::KeysCreated(drm.create_keys_from_period_data(video, audio).await) }
                .boxed(),
        );
        self.timers
            .arm(Timer::DrmTimeout, now + self.config.timeline.drm_key_timeout());
        info!("Waiting for content keys");
    }

    fn start_fetching(&self, period: usize, from: f64) {
        for track in &self.tracks {
            self.scheduler.start(FetchRequest {
                track: track.kind(),
                period,
                adaptation_set: track.adaptation().index,
                from,
                generation: self.generation,
            });
        }
    }

    /// Point every track at its adaptation set in period `index`, disabling
    /// tracks the period does not offer.
    fn retarget_tracks(&mut self, manifest: &dyn ManifestModel, index: usize) {
        let kinds: Vec<TrackKind> = self.tracks.iter().map(|t| t.kind()).collect();
        for kind in kinds {
            match manifest.data_for_role(index, kind, Some(MAIN_ROLE)).cloned() {
                Some(adaptation) => {
                    if let Some(track) = self.track_mut(kind) {
                        track.set_adaptation(adaptation);
                    }
                }
                None => {
                    let err = Error::invalid_input(format!(
                        "period {} has no {} adaptation set",
                        index, kind
                    ));
                    self.disable(kind, &err);
                }
            }
        }
    }

    fn disable(&mut self, kind: TrackKind, reason: &Error) {
        warn!(track = %kind, error = %reason, "Track disabled");
        if let Some(position) = self.tracks.iter().position(|t| t.kind() == kind) {
            let mut track = self.tracks.remove(position);
            track.detach();
            self.scheduler.cancel_pending(kind);
            self.scheduler.abort_in_flight(kind);
        }
        if !self.disabled.contains(&kind) {
            self.disabled.push(kind);
        }
        self.emit(EventPayload::TrackDisabled {
            track: kind,
            reason: reason.to_string(),
        });
    }

    // -----------------------------------------------------------------------
    // Transport
    // -----------------------------------------------------------------------

    pub fn play(&mut self, now: Instant) {
        self.paused = false;
        self.sync_element(now);
    }

    pub fn pause(&mut self, now: Instant) {
        self.paused = true;
        self.sync_element(now);
    }

    fn sync_element(&mut self, now: Instant) {
        if self.phase == Phase::Playing && !self.paused {
            self.clock.play();
            self.timers.arm_if_idle(
                Timer::StallCheck,
                now + self.config.clock.stall_check_interval(),
            );
        } else {
            self.clock.pause();
            self.timers.cancel(Timer::StallCheck);
        }
    }

    /// Seek to `target`.
    ///
    /// A seek issued while the previous one is still aligning is coalesced:
    /// only the latest target is kept and applied once the first completes
    /// or the settle timer fires.
    pub fn seek(&mut self, target: f64, now: Instant) {
        let Some(manifest) = self.manifest.clone() else {
            warn!(target, "Seek before load ignored");
            return;
        };
        if self.error.is_some() {
            warn!(target, "Seek after failure ignored");
            return;
        }
        let latest = (manifest.duration() - self.config.buffer.tolerance).max(0.0);
        let target = target.clamp(0.0, latest);
        if self.seek.is_some() {
            debug!(target, "Seek coalesced");
            self.queued_seek = Some(target);
            return;
        }
        self.apply_seek(manifest, target, now);
    }

    fn apply_seek(&mut self, manifest: Arc<dyn ManifestModel>, target: f64, now: Instant) {
        self.generation = self.generation.next();
        let generation = self.generation;
        for track in &mut self.tracks {
            self.scheduler.cancel_pending(track.kind());
            self.scheduler.abort_in_flight(track.kind());
            track.engine_mut().reset(generation);
        }

        let index = manifest
            .period_at(target)
            .map(|p| p.index)
            .unwrap_or(self.periods.buffering);
        if index != self.periods.buffering || index != self.periods.playing {
            self.phase = Phase::PeriodTransition;
            let previous = self.periods.playing;
            self.periods.jump(index);
            self.retarget_tracks(manifest.as_ref(), index);
            if self.tracks.is_empty() {
                self.fail(Error::NoPlayableTrack { period: index });
                return;
            }
            if index != previous {
                if let Some(period) = manifest.data_for_index(index) {
                    info!(period = index, start = period.start, "Period changed by seek");
                    self.emit(EventPayload::PeriodChanged {
                        index,
                        start: period.start,
                    });
                }
            }
        }

        self.eos_signalled = false;
        self.needs_start_adjust = true;
        self.timers.cancel(Timer::GapCheck);
        self.last_seek_target = Some(target);
        self.clock.seek(target);
        self.phase = Phase::Seeking;
        self.sync_element(now);
        self.seek = Some(SeekState {
            target,
            generation,
            stalled: 0,
        });
        self.timers
            .arm(Timer::SeekSettle, now + self.config.timeline.seek_settle());
        self.emit(EventPayload::SeekStarted { target, generation });
        info!(target, %generation, period = index, "Seeking");

        for track in &self.tracks {
            let kind = track.kind();
            let scheduler = Arc::clone(&self.scheduler);
            self.tasks.push(
                async move {
                    let time = scheduler.segment_start_time(kind, index, target).await;
                    TaskOutput::SegmentStart {
                        track: kind,
                        generation,
                        time,
                    }
                }
                .boxed(),
            );
        }
        self.start_fetching(index, target);
    }

    fn on_seek_settle(&mut self, now: Instant) {
        let Some(seek) = self.seek else {
            return;
        };
        match (self.queued_seek.take(), self.manifest.clone()) {
            (Some(target), Some(manifest)) => {
                debug!(target, "Seek did not settle, moving to latest target");
                self.seek = None;
                self.apply_seek(manifest, target, now);
            }
            _ => self.recover_anchors(seek, now),
        }
    }

    /// Unblock a barrier that is still missing anchors.
    ///
    /// Tracks without an anchor first try a queued chunk covering the
    /// target, then any later chunk; failing both, the target is refetched.
    /// After [`MAX_SEEK_RECOVERIES`] settle periods the barrier is released
    /// with the anchors found so far.
    fn recover_anchors(&mut self, mut seek: SeekState, now: Instant) {
        seek.stalled += 1;
        self.seek = Some(seek);
        if seek.stalled > MAX_SEEK_RECOVERIES {
            self.release_seek(seek, now);
            return;
        }

        let allow_later = seek.stalled > 1;
        let mut refetch = Vec::new();
        for track in &mut self.tracks {
            let kind = track.kind();
            let engine = track.engine_mut();
            if !engine.is_syncing() {
                engine.begin_sync(seek.target);
            }
            if engine.sync_anchor().is_some() || engine.reanchor(allow_later).is_some() {
                continue;
            }
            refetch.push((kind, engine.sync_target().unwrap_or(seek.target)));
        }
        for (kind, at) in refetch {
            warn!(track = %kind, at, attempt = seek.stalled, "Seek anchor missing, refetching");
            self.scheduler.refetch(kind, at, seek.generation);
        }

        self.timers
            .arm(Timer::SeekSettle, now + self.config.timeline.seek_settle());
        self.drive(None, now);
    }

    fn release_seek(&mut self, seek: SeekState, now: Instant) {
        let max_diff = self.config.timeline.max_sync_diff;
        let alignment = {
            let mut engines: Vec<&mut SegmentAppendEngine> =
                self.tracks.iter_mut().map(|t| t.engine_mut()).collect();
            sync::release(&mut engines, max_diff)
        };
        self.complete_seek(seek, alignment, now);
        if self.seek.is_none() {
            self.tick_tracks(None, false);
        }
    }

    /// Re-point buffering at period `index`.
    pub fn set_cueing_period_index(&mut self, index: usize) {
        let Some(manifest) = self.manifest.clone() else {
            warn!(index, "Cueing period before load ignored");
            return;
        };
        if self.seek.is_some() {
            warn!(index, "Cueing period during seek ignored");
            return;
        }
        let Some(period) = manifest.data_for_index(index).cloned() else {
            warn!(index, "Cueing period out of range");
            return;
        };
        if index == self.periods.buffering {
            return;
        }

        self.generation = self.generation.next();
        let generation = self.generation;
        for track in &mut self.tracks {
            self.scheduler.cancel_pending(track.kind());
            self.scheduler.abort_in_flight(track.kind());
            track.engine_mut().reset(generation);
        }
        self.periods.buffering = index;
        self.periods.playing = self.periods.playing.min(index);
        self.retarget_tracks(manifest.as_ref(), index);
        if self.tracks.is_empty() {
            self.fail(Error::NoPlayableTrack { period: index });
            return;
        }
        self.start_fetching(index, period.start);
        info!(period = index, %generation, "Cueing period changed");
    }

    // -----------------------------------------------------------------------
    // Inputs
    // -----------------------------------------------------------------------

    pub fn on_clock_event(&mut self, event: ClockEvent, now: Instant) {
        let Some(event) = self.clock.filter_event(event) else {
            trace!("Silent seek event swallowed");
            return;
        };
        match event {
            ClockEvent::TimeUpdate => self.on_timeupdate(now),
            ClockEvent::Seeking { time } => {
                let ours = self
                    .last_seek_target
                    .is_some_and(|target| (target - time).abs() < 1e-3);
                if !ours {
                    info!(time, "Seek issued on the playback element");
                    self.seek(time, now);
                }
            }
            ClockEvent::Seeked { time } => trace!(time, "Element seeked"),
            ClockEvent::Play | ClockEvent::Pause => trace!(?event, "Element transport"),
            ClockEvent::Stalled => {
                debug!("Element reported a stall");
                if self.phase == Phase::Playing && !self.paused {
                    self.timers.arm(Timer::StallCheck, now);
                }
            }
            ClockEvent::Ended => {
                if self.is_active() {
                    self.finish();
                }
            }
            ClockEvent::Error { message } => {
                self.fail(Error::internal(format!("playback element: {}", message)));
            }
        }
    }

    pub fn on_task(&mut self, output: TaskOutput, now: Instant) {
        match output {
            TaskOutput::SegmentStart {
                track,
                generation,
                time,
            } => {
                if generation != self.generation {
                    trace!(track = %track, %generation, "Stale segment start dropped");
                    return;
                }
                let Some(seek) = self.seek else {
                    return;
                };
                let anchor = time.unwrap_or(seek.target);
                if let Some(controller) = self.track_mut(track) {
                    let engine = controller.engine_mut();
                    if engine.sync_anchor().is_none() {
                        engine.begin_sync(anchor);
                        debug!(track = %track, anchor, target = seek.target, "Waiting for sync anchor");
                    }
                }
                self.drive(None, now);
            }
            TaskOutput::KeysCreated(Ok(())) => debug!("Key sessions created"),
            TaskOutput::KeysCreated(Err(err)) => self.on_key_error(err),
        }
    }

    pub fn on_key_added(&mut self) {
        if self.gate.open(false) {
            self.timers.cancel(Timer::DrmTimeout);
            info!("Content key added");
            self.emit(EventPayload::KeyStatus {
                ready: true,
                forced: false,
            });
            self.set_append_enabled(true);
        } else {
            debug!(gate = ?self.gate, "Key added while gate not pending");
        }
    }

    fn on_drm_timeout(&mut self) {
        if self.gate.open(true) {
            warn!(
                timeout_ms = self.config.timeline.drm_key_timeout_ms,
                "No content key in time, releasing buffering"
            );
            self.emit(EventPayload::KeyStatus {
                ready: true,
                forced: true,
            });
            self.set_append_enabled(true);
        }
    }

    fn on_key_error(&mut self, err: Error) {
        if err.class() != ErrorClass::Protection {
            self.fail(err);
            return;
        }
        let protected: Vec<TrackKind> = self
            .tracks
            .iter()
            .filter(|t| t.adaptation().protected)
            .map(|t| t.kind())
            .collect();
        for kind in protected {
            self.disable(kind, &err);
        }
        if self.tracks.is_empty() {
            self.fail(Error::NoPlayableTrack {
                period: self.periods.buffering,
            });
            return;
        }
        self.gate = KeyGate::NotRequired;
        self.timers.cancel(Timer::DrmTimeout);
        self.set_append_enabled(true);
    }

    fn set_append_enabled(&mut self, enabled: bool) {
        for track in &mut self.tracks {
            track.engine_mut().set_append_enabled(enabled);
        }
    }

    fn accepts(&self, generation: Generation, track: TrackKind) -> bool {
        if generation != self.generation {
            trace!(
                track = %track,
                %generation,
                current = %self.generation,
                "Stale delivery dropped"
            );
            return false;
        }
        true
    }

    /// A fetched chunk arrived.
    pub fn on_chunk(
        &mut self,
        generation: Generation,
        track: TrackKind,
        chunk: SegmentChunk,
        init: Option<Bytes>,
        now: Instant,
    ) {
        if !self.accepts(generation, track) {
            return;
        }
        let Some(controller) = self.track_mut(track) else {
            return;
        };
        controller.engine_mut().enqueue(chunk, init);
        self.drive(Some(track), now);
    }

    /// A piece of a progressive chunk arrived.
    pub fn on_piece(
        &mut self,
        generation: Generation,
        track: TrackKind,
        key: ChunkKey,
        piece: SubChunk,
        now: Instant,
    ) {
        if !self.accepts(generation, track) {
            return;
        }
        let Some(controller) = self.track_mut(track) else {
            return;
        };
        if !controller.engine_mut().push_piece(&key, piece) {
            debug!(track = %track, request = key.request_start_time, "Piece for unknown chunk");
        }
        self.drive(Some(track), now);
    }

    /// A progressive chunk delivered its last piece.
    pub fn on_chunk_complete(
        &mut self,
        generation: Generation,
        track: TrackKind,
        key: ChunkKey,
        now: Instant,
    ) {
        if !self.accepts(generation, track) {
            return;
        }
        if let Some(controller) = self.track_mut(track) {
            controller.engine_mut().complete(&key);
        }
        self.drive(Some(track), now);
    }

    pub fn on_fetch_failed(&mut self, generation: Generation, track: TrackKind, at: f64, err: Error) {
        if !self.accepts(generation, track) {
            return;
        }
        warn!(track = %track, at, error = %err, "Segment fetch failed, refetching");
        self.emit(EventPayload::Error {
            class: err.class(),
            message: err.to_string(),
            fatal: false,
        });
        self.scheduler.refetch(track, at, generation);
    }

    /// A sink finished processing an append.
    pub fn on_sink_updated(&mut self, track: TrackKind, now: Instant) {
        let result = match self.track_mut(track) {
            Some(controller) => controller.sink_updated(),
            None => return,
        };
        match result {
            Ok(Some(stale)) => {
                debug!(track = %track, start = stale.start, end = stale.end, "Stale append removed");
            }
            Ok(None) => {}
            Err(err) => {
                self.on_sink_error(track, err);
                return;
            }
        }
        self.drive(Some(track), now);
    }

    pub fn on_sink_error(&mut self, track: TrackKind, err: Error) {
        if err.is_fatal() {
            self.fail(err);
            return;
        }
        warn!(track = %track, error = %err, "Sink error");
        self.emit(EventPayload::Error {
            class: err.class(),
            message: err.to_string(),
            fatal: false,
        });
    }

    pub fn on_timers(&mut self, now: Instant) {
        for timer in self.timers.take_due(now) {
            trace!(?timer, "Timer fired");
            match timer {
                Timer::GapCheck => self.on_gap_check(now),
                Timer::DrmTimeout => self.on_drm_timeout(),
                Timer::SeekSettle => self.on_seek_settle(now),
                Timer::StallCheck => self.on_stall_check(now),
            }
        }
    }

    // -----------------------------------------------------------------------
    // Scheduling
    // -----------------------------------------------------------------------

    /// Tick engines, then release them from sync mode when all are ready.
    fn drive(&mut self, only: Option<TrackKind>, now: Instant) {
        if !self.is_active() {
            return;
        }
        let syncing = self.seek.is_some();
        self.tick_tracks(only, syncing);
        if syncing && self.try_align(now) && self.seek.is_none() {
            self.tick_tracks(None, false);
        }
    }

    fn tick_tracks(&mut self, only: Option<TrackKind>, syncing: bool) {
        let ctx = TickContext::at(self.clock.current_time()).syncing(syncing);
        let outcomes: Vec<(TrackKind, TickOutcome)> = self
            .tracks
            .iter_mut()
            .filter(|t| only.map_or(true, |kind| t.kind() == kind))
            .map(|t| (t.kind(), t.tick(&ctx)))
            .collect();
        for (kind, outcome) in outcomes {
            self.handle_outcome(kind, outcome);
            if self.phase == Phase::Ended {
                return;
            }
        }
    }

    fn handle_outcome(&mut self, kind: TrackKind, outcome: TickOutcome) {
        match outcome {
            TickOutcome::Gap(signal) => {
                self.scheduler
                    .refetch(kind, signal.refetch_time, self.generation);
                self.emit(EventPayload::CheckBufferGap {
                    track: kind,
                    gap_start: signal.gap_start,
                    gap_end: signal.gap_end,
                    refetch_time: signal.refetch_time,
                });
            }
            TickOutcome::Retry(err) => self.emit(EventPayload::Error {
                class: err.class(),
                message: err.to_string(),
                fatal: false,
            }),
            TickOutcome::Fatal(err) => self.fail(err),
            TickOutcome::Appended(report) if report.reached_period_end => {
                debug!(track = %kind, end = report.end, "Track appended its last chunk of the period");
            }
            _ => {}
        }
    }

    /// Returns whether the pending seek completed.
    fn try_align(&mut self, now: Instant) -> bool {
        let Some(seek) = self.seek else {
            return false;
        };
        let max_diff = self.config.timeline.max_sync_diff;
        let alignment = {
            let mut engines: Vec<&mut SegmentAppendEngine> =
                self.tracks.iter_mut().map(|t| t.engine_mut()).collect();
            sync::align(&mut engines, max_diff)
        };
        let Some(alignment) = alignment else {
            return false;
        };
        self.complete_seek(seek, alignment, now);
        true
    }

    fn complete_seek(&mut self, seek: SeekState, alignment: Alignment, now: Instant) {
        if alignment.shifted {
            self.emit(EventPayload::NeedToModifyOffset {
                shift: alignment.shift,
                min_diff: alignment.min_diff,
            });
        }
        self.seek = None;
        self.timers.cancel(Timer::SeekSettle);
        self.phase = Phase::Buffering;
        let time = self.clock.current_time();
        self.emit(EventPayload::Seeked {
            time,
            generation: seek.generation,
        });
        info!(time, generation = %seek.generation, shift = alignment.shift, "Seek completed");

        if let Some(next) = self.queued_seek.take() {
            self.seek(next, now);
        }
    }

    /// Periodic tick.
    pub fn on_timeupdate(&mut self, now: Instant) {
        if !self.is_active() {
            return;
        }
        self.drive(None, now);
        if !self.is_active() {
            return;
        }
        self.maintain_tracks();
        if self.phase == Phase::Seeking {
            return;
        }

        self.update_phase(now);
        let position = self.clock.current_time();
        self.check_period_boundary(position, now);
        self.check_period_conjunction(position);
        self.check_playing_period(position);
        self.check_end_of_stream(position);
        self.update_buffer_state(position);
    }

    /// Prune back buffers and report buffer levels to the scheduler.
    fn maintain_tracks(&mut self) {
        if self.phase == Phase::Seeking {
            return;
        }
        let position = self.clock.current_time();
        let keep = self.config.buffer.back_buffer;
        let mut failures = Vec::new();
        for track in &mut self.tracks {
            if let Err(err) = track.prune(position, keep) {
                failures.push((track.kind(), err));
            }
            self.scheduler
                .report_buffer_level(track.kind(), track.buffered_duration(position));
        }
        for (kind, err) in failures {
            self.on_sink_error(kind, err);
        }
    }

    fn update_phase(&mut self, now: Instant) {
        let tolerance = self.config.buffer.tolerance;
        match self.phase {
            Phase::Buffering => {
                if self.needs_start_adjust && !self.clock.buffered_ranges().is_empty() {
                    self.needs_start_adjust = false;
                    if let Some(to) = self.clock.adjust_start_position() {
                        debug!(to, "Start position adjusted");
                    }
                }
                let position = self.clock.current_time();
                if self.tracks_ready(position) {
                    self.phase = Phase::Playing;
                    info!(position, "Playback ready");
                }
            }
            Phase::Playing => {
                let position = self.clock.current_time();
                let dry = self.tracks.iter().any(|t| {
                    t.lookahead(position) < tolerance && !t.engine().finished_period()
                });
                if dry && !self.eos_signalled {
                    self.phase = Phase::Buffering;
                    info!(position, "Buffer ran dry, rebuffering");
                }
            }
            _ => {}
        }
        self.sync_element(now);
    }

    fn tracks_ready(&self, position: f64) -> bool {
        let threshold = self.config.buffer.start_threshold;
        self.eos_signalled
            || self.tracks.iter().all(|t| {
                let ahead = t.lookahead(position);
                ahead >= threshold || (t.engine().finished_period() && ahead > 0.0)
            })
    }

    fn next_period_start(&self) -> Option<f64> {
        let manifest = self.manifest.as_ref()?;
        manifest
            .data_for_index(self.periods.playing + 1)
            .map(|p| p.start)
    }

    fn check_period_boundary(&mut self, position: f64, now: Instant) {
        let horizon = self.config.timeline.boundary_horizon;
        match self.next_period_start() {
            Some(next) if position < next && next - position <= horizon => {
                self.timers.arm_if_idle(
                    Timer::GapCheck,
                    now + self.config.timeline.gap_check_interval(),
                );
            }
            _ => self.timers.cancel(Timer::GapCheck),
        }
    }

    fn on_gap_check(&mut self, now: Instant) {
        let Some(next_start) = self.next_period_start() else {
            return;
        };
        let position = self.clock.current_time();
        if position >= next_start {
            return;
        }
        let interval = self.config.timeline.gap_check_interval();
        let target = period::boundary_repair_target(
            &self.clock.buffered_ranges(),
            position,
            next_start,
            self.config.buffer.tolerance,
            interval.as_secs_f64(),
        );
        if let Some(to) = target {
            let landed = self.clock.silent_seek(to);
            info!(
                from = position,
                to = landed,
                boundary = next_start,
                "Skipped discontinuity at period boundary"
            );
            return;
        }
        if next_start - position <= self.config.timeline.boundary_horizon {
            self.timers.arm(Timer::GapCheck, now + interval);
        }
    }

    /// Advance the buffering period once every track reached its end.
    fn check_period_conjunction(&mut self, position: f64) {
        let Some(manifest) = self.manifest.clone() else {
            return;
        };
        if self.periods.buffering_last() || self.periods.buffering > self.periods.playing {
            return;
        }
        let (Some(current), Some(next)) = (
            manifest.data_for_index(self.periods.buffering).cloned(),
            manifest.data_for_index(self.periods.buffering + 1).cloned(),
        ) else {
            return;
        };
        if !self
            .tracks
            .iter()
            .all(|t| t.is_complete_to(position, current.end))
        {
            return;
        }

        info!(period = current.index, next = next.index, "All tracks buffered to period end");
        self.emit(EventPayload::PeriodEnded {
            index: current.index,
        });
        self.periods.buffering = next.index;
        self.retarget_tracks(manifest.as_ref(), next.index);
        if self.tracks.is_empty() {
            self.fail(Error::NoPlayableTrack { period: next.index });
            return;
        }
        for track in &mut self.tracks {
            track.engine_mut().begin_period();
        }
        self.start_fetching(next.index, next.start);
    }

    /// Follow the playhead into the next period.
    fn check_playing_period(&mut self, position: f64) {
        let Some(manifest) = self.manifest.clone() else {
            return;
        };
        while self.periods.playing < self.periods.buffering {
            let Some(next) = manifest.data_for_index(self.periods.playing + 1) else {
                break;
            };
            if position < next.start {
                break;
            }
            self.periods.playing = next.index;
            self.timers.cancel(Timer::GapCheck);
            for track in &mut self.tracks {
                track.engine_mut().forget_inits_before(next.start);
            }
            info!(period = next.index, start = next.start, "Playing period changed");
            self.emit(EventPayload::PeriodChanged {
                index: next.index,
                start: next.start,
            });
        }
    }

    fn check_end_of_stream(&mut self, position: f64) {
        let Some(duration) = self.manifest.as_ref().map(|m| m.duration()) else {
            return;
        };
        let horizon = self.config.timeline.end_of_stream_horizon;
        if !self.eos_signalled
            && self.periods.buffering_last()
            && position >= duration - horizon
            && self
                .tracks
                .iter()
                .all(|t| t.is_complete_to(position, duration))
        {
            let mut failures = Vec::new();
            for track in &mut self.tracks {
                match track.end_of_stream() {
                    Ok(true) => debug!(track = %track.kind(), "End of stream signalled to sink"),
                    Ok(false) => debug!(track = %track.kind(), "Sink already ended"),
                    Err(err) => failures.push((track.kind(), err)),
                }
            }
            self.eos_signalled = true;
            info!(duration, position, "End of stream");
            self.emit(EventPayload::EndOfStream { duration });
            for (kind, err) in failures {
                self.on_sink_error(kind, err);
            }
        }

        if self.eos_signalled && position >= duration - self.config.buffer.tolerance {
            self.finish();
        }
    }

    fn update_buffer_state(&mut self, position: f64) {
        let lookahead = self
            .tracks
            .iter()
            .map(|t| t.lookahead(position))
            .fold(f64::INFINITY, f64::min);
        let lookahead = if lookahead.is_finite() { lookahead } else { 0.0 };

        let state = if self.eos_signalled {
            BufferState::Full
        } else if lookahead < self.config.buffer.tolerance {
            BufferState::Empty
        } else if lookahead < self.config.buffer.low_buffer {
            BufferState::Low
        } else {
            BufferState::Full
        };
        if state != self.buffer_state {
            debug!(%state, lookahead, "Buffer state changed");
            self.buffer_state = state;
            self.emit(EventPayload::BufferStateChange { state });
        }
    }

    fn on_stall_check(&mut self, now: Instant) {
        if self.phase != Phase::Playing || self.paused {
            return;
        }
        match self.clock.check_stall() {
            StallAction::None => {}
            action => info!(?action, position = self.clock.current_time(), "Stall broken"),
        }
        self.timers.arm(
            Timer::StallCheck,
            now + self.config.clock.stall_check_interval(),
        );
    }

    // -----------------------------------------------------------------------
    // Termination
    // -----------------------------------------------------------------------

    /// End the session with a fatal error.
    pub fn fail(&mut self, err: Error) {
        error!(error = %err, class = %err.class(), "Playback failed");
        self.emit(EventPayload::Error {
            class: err.class(),
            message: err.to_string(),
            fatal: true,
        });
        for track in &self.tracks {
            self.scheduler.cancel_pending(track.kind());
            self.scheduler.abort_in_flight(track.kind());
        }
        self.error = Some(err);
        self.finish();
    }

    fn finish(&mut self) {
        if self.phase == Phase::Ended {
            return;
        }
        self.phase = Phase::Ended;
        self.seek = None;
        self.queued_seek = None;
        self.timers.clear();
        self.clock.pause();
        info!(session = %self.session, position = self.clock.current_time(), "Playback ended");
        self.emit(EventPayload::Ended);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::PlaybackElement;
    use crate::manifest::Manifest;
    use async_trait::async_trait;
    use dashline_buffer::{range, BufferedRange, DecodeSink, MemorySink};
    use dashline_common::{AdaptationSet, ReadyState};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    // -- Fakes ----------------------------------------------------------------

    #[derive(Debug, Default)]
    struct ElementState {
        time: f64,
        duration: f64,
        paused: bool,
        sinks: Vec<Arc<Mutex<Vec<BufferedRange>>>>,
    }

    #[derive(Clone, Default)]
    struct TestElement(Arc<Mutex<ElementState>>);

    impl PlaybackElement for TestElement {
        fn current_time(&self) -> f64 {
            self.0.lock().time
        }
        fn set_current_time(&mut self, time: f64) {
            self.0.lock().time = time;
        }
        fn duration(&self) -> f64 {
            self.0.lock().duration
        }
        fn set_duration(&mut self, duration: f64) {
            self.0.lock().duration = duration;
        }
        fn buffered(&self) -> Vec<BufferedRange> {
            let lists: Vec<Vec<BufferedRange>> =
                self.0.lock().sinks.iter().map(|s| s.lock().clone()).collect();
            range::intersect_all(&lists, 0.15)
        }
        fn is_paused(&self) -> bool {
            self.0.lock().paused
        }
        fn play(&mut self) {
            self.0.lock().paused = false;
        }
        fn pause(&mut self) {
            self.0.lock().paused = true;
        }
        fn ready_state(&self) -> ReadyState {
            ReadyState::HaveEnoughData
        }
    }

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Start(FetchRequest),
        Cancel(TrackKind),
        Abort(TrackKind),
        Refetch(TrackKind, f64, Generation),
    }

    #[derive(Default)]
    struct FakeScheduler {
        calls: Mutex<Vec<Call>>,
        unknown_starts: AtomicBool,
    }

    impl FakeScheduler {
        fn starts(&self) -> Vec<FetchRequest> {
            self.calls
                .lock()
                .iter()
                .filter_map(|c| match c {
                    Call::Start(request) => Some(*request),
                    _ => None,
                })
                .collect()
        }

        fn refetches(&self) -> Vec<(TrackKind, f64)> {
            self.calls
                .lock()
                .iter()
                .filter_map(|c| match c {
                    Call::Refetch(track, at, _) => Some((*track, *at)),
                    _ => None,
                })
                .collect()
        }
    }

    #[async_trait]
    impl SegmentScheduler for FakeScheduler {
        fn start(&self, request: FetchRequest) {
            self.calls.lock().push(Call::Start(request));
        }
        fn cancel_pending(&self, track: TrackKind) {
            self.calls.lock().push(Call::Cancel(track));
        }
        fn abort_in_flight(&self, track: TrackKind) {
            self.calls.lock().push(Call::Abort(track));
        }
        fn refetch(&self, track: TrackKind, at: f64, generation: Generation) {
            self.calls.lock().push(Call::Refetch(track, at, generation));
        }
        fn report_buffer_level(&self, _track: TrackKind, _seconds: f64) {}
        async fn segment_start_time(
            &self,
            _track: TrackKind,
            _period: usize,
            target: f64,
        ) -> Option<f64> {
            if self.unknown_starts.load(Ordering::Relaxed) {
                return None;
            }
            Some((target / 2.0).floor() * 2.0)
        }
    }

    struct FakeDrm {
        supports: bool,
        result: dashline_common::Result<()>,
    }

    #[async_trait]
    impl DrmAgent for FakeDrm {
        fn supports_protection(&self) -> bool {
            self.supports
        }
        async fn create_keys_from_period_data(
            &self,
            _video: Option<AdaptationSet>,
            _audio: Option<AdaptationSet>,
        ) -> dashline_common::Result<()> {
            self.result.clone()
        }
    }

    struct FakeSinks {
        element: TestElement,
        unsupported: Vec<TrackKind>,
    }

    impl SinkFactory for FakeSinks {
        fn create(
            &mut self,
            kind: TrackKind,
            adaptation: &AdaptationSet,
        ) -> dashline_common::Result<Box<dyn DecodeSink>> {
            if self.unsupported.contains(&kind) {
                return Err(Error::unsupported_codec(
                    kind,
                    adaptation.codecs().unwrap_or_default(),
                ));
            }
            let sink = MemorySink::instant(kind);
            self.element.0.lock().sinks.push(sink.ranges_handle());
            Ok(Box::new(sink))
        }
    }

    // -- Harness --------------------------------------------------------------

    struct Harness {
        controller: TimelineController,
        scheduler: Arc<FakeScheduler>,
        element: TestElement,
        events: Arc<EventBus>,
        manifest: Arc<Manifest>,
        now: Instant,
    }

    struct Setup {
        periods: Vec<f64>,
        protected: bool,
        drm: FakeDrm,
        unsupported: Vec<TrackKind>,
    }

    impl Default for Setup {
        fn default() -> Self {
            Self {
                periods: vec![30.0, 30.0],
                protected: false,
                drm: FakeDrm {
                    supports: true,
                    result: Ok(()),
                },
                unsupported: Vec::new(),
            }
        }
    }

    impl Harness {
        fn new(setup: Setup) -> Self {
            let element = TestElement::default();
            element.0.lock().paused = true;
            let scheduler = Arc::new(FakeScheduler::default());
            let events = Arc::new(EventBus::default());
            let config = Arc::new(Config::default());
            let clock = ClockAdapter::new(
                Box::new(element.clone()),
                config.clock.clone(),
                config.buffer.tolerance,
            );
            let parts = Collaborators {
                clock,
                scheduler: scheduler.clone(),
                drm: Arc::new(setup.drm),
                sinks: Box::new(FakeSinks {
                    element: element.clone(),
                    unsupported: setup.unsupported,
                }),
            };
            let controller =
                TimelineController::new(SessionId::new(), config, Arc::clone(&events), parts);
            let manifest = Arc::new(Manifest::synthetic(&setup.periods, setup.protected).unwrap());
            Self {
                controller,
                scheduler,
                element,
                events,
                manifest,
                now: Instant::now(),
            }
        }

        fn loaded() -> Self {
            let mut h = Self::new(Setup::default());
            h.load();
            h
        }

        fn load(&mut self) {
            self.controller
                .load(self.manifest.clone(), 0, self.now);
        }

        fn set_time(&self, time: f64) {
            self.element.0.lock().time = time;
        }

        fn later(&self, millis: u64) -> Instant {
            self.now + Duration::from_millis(millis)
        }

        fn run_tasks(&mut self) {
            for task in self.controller.take_tasks() {
                let output = task.now_or_never().expect("fake tasks complete immediately");
                self.controller.on_task(output, self.now);
            }
        }

        fn deliver(&mut self, kind: TrackKind, chunk: SegmentChunk) {
            let generation = self.controller.generation();
            let init = Some(Bytes::from(format!("init-{}", kind)));
            let set = if kind == TrackKind::Video { 0 } else { 1 };
            self.controller
                .on_chunk(generation, kind, chunk.with_quality(set, 0), init, self.now);
        }

        fn deliver_both(&mut self, period_start: f64, request: f64, duration: f64, last: bool) {
            for kind in TrackKind::ALL {
                let mut chunk = SegmentChunk::new(period_start, request, duration, vec![1; 8]);
                if last {
                    chunk = chunk.last_in_period();
                }
                self.deliver(kind, chunk);
            }
        }

        fn tick(&mut self) {
            self.controller.on_timeupdate(self.now);
        }

        fn count(&self, name: &str) -> usize {
            self.events.count(name)
        }

        fn payloads(&self, name: &str) -> Vec<EventPayload> {
            self.events
                .history(usize::MAX)
                .into_iter()
                .map(|e| e.payload)
                .filter(|p| p.name() == name)
                .collect()
        }
    }

    // -- Load -----------------------------------------------------------------

    #[test]
    fn test_load_starts_fetching() {
        let h = Harness::loaded();
        assert_eq!(h.controller.phase(), Phase::Buffering);
        assert_eq!(h.controller.key_gate(), KeyGate::NotRequired);
        assert_eq!(h.count("playback_initialized"), 1);

        let starts = h.scheduler.starts();
        assert_eq!(starts.len(), 2);
        assert!(starts.iter().all(|s| s.period == 0 && s.from == 0.0));
        assert_eq!(starts[1].adaptation_set, 1);
        assert_eq!(h.element.0.lock().duration, 60.0);
    }

    #[test]
    fn test_unsupported_codec_skips_track() {
        let mut h = Harness::new(Setup {
            unsupported: vec![TrackKind::Audio],
            ..Setup::default()
        });
        h.load();
        assert_eq!(h.controller.phase(), Phase::Buffering);
        assert!(h.controller.track(TrackKind::Audio).is_none());
        assert_eq!(h.count("track_disabled"), 1);
        assert_eq!(h.controller.snapshot().disabled, vec![TrackKind::Audio]);
    }

    #[test]
    fn test_no_playable_track_is_fatal() {
        let mut h = Harness::new(Setup {
            unsupported: TrackKind::ALL.to_vec(),
            ..Setup::default()
        });
        h.load();
        assert_eq!(h.controller.phase(), Phase::Ended);
        assert_matches::assert_matches!(
            h.controller.error(),
            Some(Error::NoPlayableTrack { period: 0 })
        );
        assert_eq!(h.count("ended"), 1);
        assert_matches::assert_matches!(
            h.payloads("error").first(),
            Some(EventPayload::Error { fatal: true, .. })
        );
    }

    // -- Buffering and playback -------------------------------------------------

    #[test]
    fn test_element_stall_runs_check_early() {
        let mut h = Harness::loaded();
        h.controller.play(h.now);
        h.tick();
        h.deliver_both(0.0, 0.0, 2.0, false);
        h.tick();
        assert_eq!(h.controller.phase(), Phase::Playing);
        assert_ne!(h.controller.next_deadline(), Some(h.now));

        h.controller.on_clock_event(ClockEvent::Stalled, h.now);
        assert_eq!(h.controller.next_deadline(), Some(h.now));
        assert_eq!(h.controller.snapshot().stalls, 0);
    }

    #[test]
    fn test_element_stall_ignored_while_paused() {
        let mut h = Harness::loaded();
        h.controller.on_clock_event(ClockEvent::Stalled, h.now);
        assert_ne!(h.controller.next_deadline(), Some(h.now));
        assert_eq!(h.controller.snapshot().stalls, 0);
    }

    #[test]
    fn test_buffering_to_playing() {
        let mut h = Harness::loaded();
        h.controller.play(h.now);
        h.tick();
        assert_eq!(h.controller.phase(), Phase::Buffering);
        assert!(h.element.0.lock().paused);

        h.deliver_both(0.0, 0.0, 2.0, false);
        h.tick();
        assert_eq!(h.controller.phase(), Phase::Playing);
        assert!(!h.element.0.lock().paused);
        assert_eq!(h.controller.buffer_state(), BufferState::Low);
        assert_eq!(
            h.payloads("buffer_state_change"),
            vec![EventPayload::BufferStateChange {
                state: BufferState::Low
            }]
        );
    }

    #[test]
    fn test_paused_session_stays_paused() {
        let mut h = Harness::loaded();
        h.deliver_both(0.0, 0.0, 2.0, false);
        h.tick();
        assert_eq!(h.controller.phase(), Phase::Playing);
        assert!(h.controller.is_paused());
        assert!(h.element.0.lock().paused);
    }

    #[test]
    fn test_rebuffers_when_dry() {
        let mut h = Harness::loaded();
        h.controller.play(h.now);
        h.deliver_both(0.0, 0.0, 2.0, false);
        h.tick();
        assert_eq!(h.controller.phase(), Phase::Playing);

        h.set_time(2.0);
        h.tick();
        assert_eq!(h.controller.phase(), Phase::Buffering);
        assert_eq!(h.controller.buffer_state(), BufferState::Empty);
    }

    #[test]
    fn test_start_position_skips_small_hole() {
        let mut h = Harness::loaded();
        for kind in TrackKind::ALL {
            let chunk = SegmentChunk::new(0.0, 0.0, 2.0, vec![1; 8]).with_timing(0.4, 0.4);
            h.deliver(kind, chunk);
        }
        h.tick();
        assert_eq!(h.element.0.lock().time, 0.4);
    }

    // -- Gaps -------------------------------------------------------------------

    #[test]
    fn test_gap_refetched_once() {
        let mut h = Harness::loaded();
        h.deliver(
            TrackKind::Video,
            SegmentChunk::new(0.0, 0.0, 2.0, vec![1; 8]),
        );
        h.deliver(
            TrackKind::Video,
            SegmentChunk::new(0.0, 4.0, 2.0, vec![1; 8]),
        );
        h.tick();
        h.tick();

        assert_eq!(h.scheduler.refetches(), vec![(TrackKind::Video, 3.0)]);
        assert_eq!(
            h.payloads("check_buffer_gap"),
            vec![EventPayload::CheckBufferGap {
                track: TrackKind::Video,
                gap_start: 2.0,
                gap_end: 4.0,
                refetch_time: 3.0,
            }]
        );
    }

    // -- Seeking ----------------------------------------------------------------

    #[test]
    fn test_seek_aligns_tracks_with_shift() {
        let mut h = Harness::loaded();
        h.controller.seek(40.0, h.now);
        assert_eq!(h.controller.phase(), Phase::Seeking);
        assert_eq!(h.element.0.lock().time, 40.0);
        assert_eq!(
            h.payloads("period_changed"),
            vec![EventPayload::PeriodChanged {
                index: 1,
                start: 30.0
            }]
        );
        h.run_tasks();

        h.deliver(
            TrackKind::Video,
            SegmentChunk::new(30.0, 40.0, 2.0, vec![1; 8]).with_timing(41.25, 1.25),
        );
        assert_eq!(h.controller.phase(), Phase::Seeking);
        assert_eq!(h.count("seeked"), 0);

        h.deliver(
            TrackKind::Audio,
            SegmentChunk::new(30.0, 40.0, 2.0, vec![1; 8]).with_timing(41.5, 1.5),
        );
        assert_eq!(h.controller.phase(), Phase::Buffering);
        assert_eq!(
            h.payloads("need_to_modify_offset"),
            vec![EventPayload::NeedToModifyOffset {
                shift: -1.25,
                min_diff: 1.25
            }]
        );
        assert_eq!(h.count("seeked"), 1);

        let video = h.controller.track(TrackKind::Video).unwrap();
        assert_eq!(video.sink().buffered(), vec![BufferedRange::new(40.0, 42.0)]);
        let audio = h.controller.track(TrackKind::Audio).unwrap();
        assert_eq!(audio.sink().buffered(), vec![BufferedRange::new(40.25, 42.25)]);
    }

    #[test]
    fn test_seek_drops_stale_deliveries() {
        let mut h = Harness::loaded();
        let old = h.controller.generation();
        h.controller.seek(10.0, h.now);
        assert!(h.controller.generation() > old);

        h.controller.on_chunk(
            old,
            TrackKind::Video,
            SegmentChunk::new(0.0, 0.0, 2.0, vec![1; 8]),
            None,
            h.now,
        );
        assert_eq!(
            h.controller.track(TrackKind::Video).unwrap().engine().queue().len(),
            0
        );
    }

    #[test]
    fn test_seek_coalesced_until_aligned() {
        let mut h = Harness::loaded();
        h.controller.seek(10.0, h.now);
        h.controller.seek(20.0, h.now);
        h.controller.seek(24.0, h.now);
        assert_eq!(h.count("seek_started"), 1);

        h.run_tasks();
        h.deliver_both(0.0, 10.0, 2.0, false);
        assert_eq!(h.count("seek_started"), 2);
        assert_matches::assert_matches!(
            h.payloads("seek_started").first(),
            Some(EventPayload::SeekStarted { target, .. }) if *target == 24.0
        );
        assert_eq!(h.controller.phase(), Phase::Seeking);
    }

    #[test]
    fn test_settle_timer_applies_latest_seek() {
        let mut h = Harness::loaded();
        h.controller.seek(10.0, h.now);
        let generation = h.controller.generation();
        h.controller.seek(20.0, h.now);

        h.controller.on_timers(h.later(300));
        assert_eq!(h.controller.generation(), generation.next());
        assert_eq!(h.element.0.lock().time, 20.0);
    }

    #[test]
    fn test_lost_anchor_refetched_on_settle() {
        let mut h = Harness::loaded();
        h.controller.seek(10.0, h.now);
        h.run_tasks();
        h.deliver(TrackKind::Video, SegmentChunk::new(0.0, 10.0, 2.0, vec![1; 8]));

        h.controller.on_timers(h.later(300));
        assert_eq!(h.scheduler.refetches(), vec![(TrackKind::Audio, 10.0)]);
        assert_eq!(h.controller.phase(), Phase::Seeking);

        h.deliver(TrackKind::Audio, SegmentChunk::new(0.0, 10.0, 2.0, vec![1; 8]));
        assert_eq!(h.count("seeked"), 1);
        assert_eq!(h.controller.phase(), Phase::Buffering);
    }

    #[test]
    fn test_seek_released_when_anchor_never_arrives() {
        let mut h = Harness::loaded();
        h.controller.seek(10.0, h.now);
        h.run_tasks();
        h.deliver(TrackKind::Video, SegmentChunk::new(0.0, 10.0, 2.0, vec![1; 8]));

        for millis in [300, 600, 900] {
            h.controller.on_timers(h.later(millis));
            assert_eq!(h.controller.phase(), Phase::Seeking);
        }
        assert_eq!(h.scheduler.refetches().len(), 3);

        h.controller.on_timers(h.later(1200));
        assert_eq!(h.count("seeked"), 1);
        assert_eq!(h.controller.phase(), Phase::Buffering);
        let video = h.controller.track(TrackKind::Video).unwrap();
        assert_eq!(video.sink().buffered(), vec![BufferedRange::new(10.0, 12.0)]);
    }

    #[test]
    fn test_later_chunk_becomes_anchor() {
        let mut h = Harness::loaded();
        h.controller.seek(10.0, h.now);
        h.run_tasks();
        h.deliver(TrackKind::Video, SegmentChunk::new(0.0, 10.0, 2.0, vec![1; 8]));
        h.deliver(TrackKind::Audio, SegmentChunk::new(0.0, 12.0, 2.0, vec![1; 8]));

        h.controller.on_timers(h.later(300));
        assert_eq!(h.scheduler.refetches(), vec![(TrackKind::Audio, 10.0)]);
        assert_eq!(h.count("seeked"), 0);

        h.controller.on_timers(h.later(600));
        assert_eq!(h.count("seeked"), 1);
        assert_eq!(h.scheduler.refetches().len(), 1);
    }

    #[test]
    fn test_unknown_segment_start_anchors_on_covering_chunk() {
        let mut h = Harness::loaded();
        h.scheduler.unknown_starts.store(true, Ordering::Relaxed);
        h.controller.seek(11.0, h.now);
        h.run_tasks();
        h.deliver_both(0.0, 10.0, 2.0, false);
        assert_eq!(h.count("seeked"), 0);

        h.controller.on_timers(h.later(300));
        assert_eq!(h.count("seeked"), 1);
        assert!(h.scheduler.refetches().is_empty());
    }

    #[test]
    fn test_external_seek_event() {
        let mut h = Harness::loaded();
        h.controller
            .on_clock_event(ClockEvent::Seeking { time: 12.0 }, h.now);
        assert_eq!(h.count("seek_started"), 1);

        // The element echoes the seek the controller issued.
        h.controller
            .on_clock_event(ClockEvent::Seeking { time: 12.0 }, h.now);
        assert_eq!(h.count("seek_started"), 1);
    }

    // -- Periods ----------------------------------------------------------------

    #[test]
    fn test_period_conjunction_waits_for_every_track() {
        let mut h = Harness::new(Setup {
            periods: vec![4.0, 4.0],
            ..Setup::default()
        });
        h.load();
        h.deliver_both(0.0, 0.0, 2.0, false);
        h.deliver(
            TrackKind::Video,
            SegmentChunk::new(0.0, 2.0, 2.0, vec![1; 8]).last_in_period(),
        );
        h.tick();
        assert_eq!(h.count("period_ended"), 0);
        assert!(h.scheduler.starts().iter().all(|s| s.period == 0));

        h.deliver(
            TrackKind::Audio,
            SegmentChunk::new(0.0, 2.0, 2.0, vec![1; 8]).last_in_period(),
        );
        h.tick();
        assert_eq!(
            h.payloads("period_ended"),
            vec![EventPayload::PeriodEnded { index: 0 }]
        );
        let next: Vec<FetchRequest> = h
            .scheduler
            .starts()
            .into_iter()
            .filter(|s| s.period == 1)
            .collect();
        assert_eq!(next.len(), 2);
        assert!(next.iter().all(|s| s.from == 4.0));
        assert_eq!(h.controller.period_info().unwrap().buffering_index, 1);
        assert_eq!(h.controller.period_info().unwrap().playing_index, 0);

        h.deliver_both(4.0, 4.0, 2.0, false);
        h.set_time(4.1);
        h.tick();
        assert_eq!(h.controller.period_info().unwrap().playing_index, 1);
        assert_eq!(h.count("period_changed"), 1);
    }

    #[test]
    fn test_boundary_discontinuity_repaired() {
        let mut h = Harness::loaded();
        h.set_time(28.0);
        h.deliver_both(0.0, 28.0, 1.5, true);
        h.tick();
        assert_eq!(h.controller.period_info().unwrap().buffering_index, 1);

        for kind in TrackKind::ALL {
            let chunk = SegmentChunk::new(30.0, 30.0, 2.0, vec![1; 8]).with_timing(30.6, 0.6);
            h.deliver(kind, chunk);
        }
        h.set_time(29.45);
        h.tick();

        h.controller.on_timers(h.later(250));
        assert_eq!(h.element.0.lock().time, 30.6);

        h.tick();
        assert_eq!(h.controller.period_info().unwrap().playing_index, 1);
        // Silent seeks never reach the session as seeks.
        h.controller
            .on_clock_event(ClockEvent::Seeking { time: 30.6 }, h.now);
        assert_eq!(h.count("seek_started"), 0);
    }

    #[test]
    fn test_cueing_period_repoints_buffering() {
        let mut h = Harness::loaded();
        h.controller.set_cueing_period_index(1);
        let info = h.controller.period_info().unwrap();
        assert_eq!(info.buffering_index, 1);
        assert_eq!(info.playing_index, 0);
        assert!(h
            .scheduler
            .starts()
            .iter()
            .any(|s| s.period == 1 && s.from == 30.0));
    }

    // -- Protection ---------------------------------------------------------------

    #[test]
    fn test_key_gate_holds_appends_until_timeout() {
        let mut h = Harness::new(Setup {
            protected: true,
            ..Setup::default()
        });
        h.load();
        h.run_tasks();
        assert_eq!(h.controller.key_gate(), KeyGate::Pending);

        h.deliver_both(0.0, 0.0, 2.0, false);
        let video = h.controller.track(TrackKind::Video).unwrap();
        assert!(video.sink().buffered().is_empty());

        h.controller.on_timers(h.later(1000));
        assert_eq!(h.controller.key_gate(), KeyGate::Ready { forced: true });
        assert_eq!(
            h.payloads("key_status"),
            vec![EventPayload::KeyStatus {
                ready: true,
                forced: true
            }]
        );

        h.tick();
        let video = h.controller.track(TrackKind::Video).unwrap();
        assert_eq!(video.sink().buffered(), vec![BufferedRange::new(0.0, 2.0)]);
    }

    #[test]
    fn test_key_added_opens_gate() {
        let mut h = Harness::new(Setup {
            protected: true,
            ..Setup::default()
        });
        h.load();
        h.controller.on_key_added();
        assert_eq!(h.controller.key_gate(), KeyGate::Ready { forced: false });

        // The timeout no longer fires.
        h.controller.on_timers(h.later(1000));
        assert_eq!(h.count("key_status"), 1);
    }

    #[test]
    fn test_missing_key_system_disables_protected_tracks() {
        let mut h = Harness::new(Setup {
            protected: true,
            drm: FakeDrm {
                supports: false,
                result: Ok(()),
            },
            ..Setup::default()
        });
        h.load();
        assert_eq!(h.count("track_disabled"), 2);
        assert_eq!(h.controller.phase(), Phase::Ended);
    }

    #[test]
    fn test_key_rejection_is_fatal() {
        let mut h = Harness::new(Setup {
            protected: true,
            drm: FakeDrm {
                supports: true,
                result: Err(Error::KeyRejected("license denied".to_string())),
            },
            ..Setup::default()
        });
        h.load();
        h.run_tasks();
        assert_eq!(h.controller.phase(), Phase::Ended);
        assert_matches::assert_matches!(h.controller.error(), Some(Error::KeyRejected(_)));
    }

    // -- End of stream and failures ----------------------------------------------

    #[test]
    fn test_end_of_stream_signalled_once() {
        let mut h = Harness::new(Setup {
            periods: vec![4.0],
            ..Setup::default()
        });
        h.load();
        h.deliver_both(0.0, 0.0, 2.0, false);
        h.deliver_both(0.0, 2.0, 2.0, true);
        h.set_time(3.0);
        h.tick();
        h.tick();
        assert_eq!(h.count("end_of_stream"), 1);
        assert_eq!(h.controller.buffer_state(), BufferState::Full);
        assert_ne!(h.controller.phase(), Phase::Ended);

        h.set_time(3.9);
        h.tick();
        assert_eq!(h.controller.phase(), Phase::Ended);
        assert_eq!(h.count("ended"), 1);
        assert!(h.controller.error().is_none());
    }

    #[test]
    fn test_fatal_sink_error_ends_session() {
        let mut h = Harness::loaded();
        h.controller
            .on_sink_error(TrackKind::Video, Error::decode_sink(TrackKind::Video, "gone"));
        assert_eq!(h.controller.phase(), Phase::Ended);
        assert_eq!(h.count("ended"), 1);

        // Transient sink errors are only reported.
        let mut h = Harness::loaded();
        h.controller
            .on_sink_error(TrackKind::Video, Error::append(TrackKind::Video, "busy"));
        assert_eq!(h.controller.phase(), Phase::Buffering);
        assert_matches::assert_matches!(
            h.payloads("error").first(),
            Some(EventPayload::Error { fatal: false, .. })
        );
    }

    #[test]
    fn test_fetch_failure_refetches() {
        let mut h = Harness::loaded();
        let generation = h.controller.generation();
        h.controller.on_fetch_failed(
            generation,
            TrackKind::Audio,
            6.0,
            Error::fetch(TrackKind::Audio, "timeout"),
        );
        assert_eq!(h.scheduler.refetches(), vec![(TrackKind::Audio, 6.0)]);
    }

    #[test]
    fn test_snapshot_serializes() {
        let h = Harness::loaded();
        let json = serde_json::to_value(h.controller.snapshot()).unwrap();
        assert_eq!(json["phase"], "buffering");
        assert_eq!(json["period"]["count"], 2);
        assert_eq!(json["tracks"].as_array().unwrap().len(), 2);
    }
}
