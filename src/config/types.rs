use dashline_buffer::EngineConfig;
use dashline_common::TrackKind;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub buffer: BufferConfig,

    #[serde(default)]
    pub timeline: TimelineConfig,

    #[serde(default)]
    pub clock: ClockConfig,

    #[serde(default)]
    pub simulation: SimulationConfig,
}

impl Config {
    /// Non-fatal oddities worth logging.
    pub fn warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.buffer.back_buffer < self.buffer.low_buffer {
            warnings.push(format!(
                "back_buffer ({}s) is shorter than low_buffer ({}s); seeking back will refetch",
                self.buffer.back_buffer, self.buffer.low_buffer
            ));
        }

        for kind in TrackKind::ALL {
            let track = self.buffer.track(kind);
            if self.buffer.start_threshold > track.prefetch_threshold - 0.5 {
                warnings.push(format!(
                    "start_threshold ({}s) exceeds what the {} track appends ahead ({}s)",
                    self.buffer.start_threshold,
                    kind,
                    track.prefetch_threshold - 0.5
                ));
            }
        }

        let gap_check_secs = self.timeline.gap_check_interval().as_secs_f64();
        if self.timeline.boundary_horizon < gap_check_secs {
            warnings.push(format!(
                "boundary_horizon ({}s) is shorter than the gap check interval ({}s)",
                self.timeline.boundary_horizon, gap_check_secs
            ));
        }

        warnings
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct BufferConfig {
    /// Maximum gap between two buffered intervals still treated as one range
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,

    /// Lookahead an append should reach when nothing else is requested
    #[serde(default = "default_min_append_lookahead")]
    pub min_append_lookahead: f64,

    /// Lookahead every track needs before playback starts
    #[serde(default = "default_start_threshold")]
    pub start_threshold: f64,

    /// Below this lookahead the buffer is reported as low
    #[serde(default = "default_low_buffer")]
    pub low_buffer: f64,

    /// Seconds kept behind the playhead before pruning
    #[serde(default = "default_back_buffer")]
    pub back_buffer: f64,

    #[serde(default)]
    pub video: TrackBufferConfig,

    #[serde(default)]
    pub audio: TrackBufferConfig,
}

fn default_tolerance() -> f64 {
    dashline_buffer::DEFAULT_TOLERANCE
}
fn default_min_append_lookahead() -> f64 {
    2.0
}
fn default_start_threshold() -> f64 {
    2.0
}
fn default_low_buffer() -> f64 {
    4.0
}
fn default_back_buffer() -> f64 {
    30.0
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            tolerance: default_tolerance(),
            min_append_lookahead: default_min_append_lookahead(),
            start_threshold: default_start_threshold(),
            low_buffer: default_low_buffer(),
            back_buffer: default_back_buffer(),
            video: TrackBufferConfig::default(),
            audio: TrackBufferConfig::default(),
        }
    }
}

impl BufferConfig {
    /// Per-track thresholds.
    pub fn track(&self, kind: TrackKind) -> &TrackBufferConfig {
        match kind {
            TrackKind::Video => &self.video,
            TrackKind::Audio => &self.audio,
        }
    }

    /// Append engine settings for one track.
    pub fn engine_config(&self, kind: TrackKind) -> EngineConfig {
        let track = self.track(kind);
        EngineConfig {
            tolerance: self.tolerance,
            prefetch_threshold: track.prefetch_threshold,
            append_enable_threshold: track.append_enable_threshold,
            min_append_lookahead: self.min_append_lookahead,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct TrackBufferConfig {
    /// Lookahead the scheduler fetches up to
    #[serde(default = "default_prefetch_threshold")]
    pub prefetch_threshold: f64,

    /// Maximum seconds handed to the sink in one append
    #[serde(default = "default_append_enable_threshold")]
    pub append_enable_threshold: f64,
}

fn default_prefetch_threshold() -> f64 {
    20.0
}
fn default_append_enable_threshold() -> f64 {
    10.0
}

impl Default for TrackBufferConfig {
    fn default() -> Self {
        Self {
            prefetch_threshold: default_prefetch_threshold(),
            append_enable_threshold: default_append_enable_threshold(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct TimelineConfig {
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    /// Period boundary polling interval while near a boundary
    #[serde(default = "default_gap_check_interval_ms")]
    pub gap_check_interval_ms: u64,

    /// Distance to the next period start at which boundary polling starts
    #[serde(default = "default_boundary_horizon")]
    pub boundary_horizon: f64,

    /// Forced key-processed signal when the real one never arrives
    #[serde(default = "default_drm_key_timeout_ms")]
    pub drm_key_timeout_ms: u64,

    /// Debounce before a coalesced seek is applied
    #[serde(default = "default_seek_settle_ms")]
    pub seek_settle_ms: u64,

    /// Drift across tracks above which queued chunks are shifted
    #[serde(default = "default_max_sync_diff")]
    pub max_sync_diff: f64,

    /// Distance to the media end at which end of stream is considered
    #[serde(default = "default_end_of_stream_horizon")]
    pub end_of_stream_horizon: f64,
}

fn default_tick_interval_ms() -> u64 {
    100
}
fn default_gap_check_interval_ms() -> u64 {
    200
}
fn default_boundary_horizon() -> f64 {
    1.0
}
fn default_drm_key_timeout_ms() -> u64 {
    1000
}
fn default_seek_settle_ms() -> u64 {
    250
}
fn default_max_sync_diff() -> f64 {
    1.0
}
fn default_end_of_stream_horizon() -> f64 {
    5.0
}

impl Default for TimelineConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            gap_check_interval_ms: default_gap_check_interval_ms(),
            boundary_horizon: default_boundary_horizon(),
            drm_key_timeout_ms: default_drm_key_timeout_ms(),
            seek_settle_ms: default_seek_settle_ms(),
            max_sync_diff: default_max_sync_diff(),
            end_of_stream_horizon: default_end_of_stream_horizon(),
        }
    }
}

impl TimelineConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn gap_check_interval(&self) -> Duration {
        Duration::from_millis(self.gap_check_interval_ms)
    }

    pub fn drm_key_timeout(&self) -> Duration {
        Duration::from_millis(self.drm_key_timeout_ms)
    }

    pub fn seek_settle(&self) -> Duration {
        Duration::from_millis(self.seek_settle_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ClockConfig {
    #[serde(default = "default_stall_check_interval_ms")]
    pub stall_check_interval_ms: u64,

    /// Offset of the single retry when a silent seek misses the buffer
    #[serde(default = "default_silent_seek_retry_offset")]
    pub silent_seek_retry_offset: f64,

    /// Largest initial gap skipped when adjusting the start position
    #[serde(default = "default_max_start_gap")]
    pub max_start_gap: f64,

    /// Largest jump a stall nudge may make
    #[serde(default = "default_max_stall_jump")]
    pub max_stall_jump: f64,
}

fn default_stall_check_interval_ms() -> u64 {
    1500
}
fn default_silent_seek_retry_offset() -> f64 {
    0.1
}
fn default_max_start_gap() -> f64 {
    1.0
}
fn default_max_stall_jump() -> f64 {
    1.5
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            stall_check_interval_ms: default_stall_check_interval_ms(),
            silent_seek_retry_offset: default_silent_seek_retry_offset(),
            max_start_gap: default_max_start_gap(),
            max_stall_jump: default_max_stall_jump(),
        }
    }
}

impl ClockConfig {
    pub fn stall_check_interval(&self) -> Duration {
        Duration::from_millis(self.stall_check_interval_ms)
    }
}

/// Settings of the synthetic presentation played by `dashline simulate`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SimulationConfig {
    /// Duration of each period in seconds
    #[serde(default = "default_period_durations")]
    pub period_durations: Vec<f64>,

    #[serde(default = "default_segment_duration")]
    pub segment_duration: f64,

    #[serde(default = "default_fetch_latency_ms")]
    pub fetch_latency_ms: u64,

    #[serde(default = "default_append_latency_ms")]
    pub append_latency_ms: u64,

    /// Delay before the key is added; unset means it never arrives
    #[serde(default = "default_drm_key_latency_ms")]
    pub drm_key_latency_ms: Option<u64>,

    /// Whether periods carry content protection
    #[serde(default)]
    pub protected: bool,

    /// Deliver segments as progressive pieces
    #[serde(default)]
    pub progressive: bool,

    /// Presentation drift of audio segments relative to their request time
    #[serde(default)]
    pub audio_drift: f64,

    /// Media seconds advanced per wall-clock second
    #[serde(default = "default_playback_rate")]
    pub playback_rate: f64,
}

fn default_period_durations() -> Vec<f64> {
    vec![30.0, 30.0]
}
fn default_segment_duration() -> f64 {
    2.0
}
fn default_fetch_latency_ms() -> u64 {
    50
}
fn default_append_latency_ms() -> u64 {
    20
}
fn default_drm_key_latency_ms() -> Option<u64> {
    Some(100)
}
fn default_playback_rate() -> f64 {
    1.0
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            period_durations: default_period_durations(),
            segment_duration: default_segment_duration(),
            fetch_latency_ms: default_fetch_latency_ms(),
            append_latency_ms: default_append_latency_ms(),
            drm_key_latency_ms: default_drm_key_latency_ms(),
            protected: false,
            progressive: false,
            audio_drift: 0.0,
            playback_rate: default_playback_rate(),
        }
    }
}

impl SimulationConfig {
    pub fn fetch_latency(&self) -> Duration {
        Duration::from_millis(self.fetch_latency_ms)
    }

    pub fn append_latency(&self) -> Duration {
        Duration::from_millis(self.append_latency_ms)
    }

    pub fn drm_key_latency(&self) -> Option<Duration> {
        self.drm_key_latency_ms.map(Duration::from_millis)
    }

    /// Total presentation duration.
    pub fn total_duration(&self) -> f64 {
        self.period_durations.iter().sum()
    }
}
