//! Error taxonomy shared by every dashline component.
//!
//! Errors fall into four classes that decide how the timeline reacts:
//!
//! - **Transient** failures (append exception, fetch failure) are logged and
//!   the offending chunk stays queued for the next tick.
//! - **Timeline** failures (gap, desync) become re-fetch requests.
//! - **Protection** failures (unsupported codec, no key system) disable a
//!   single track.
//! - **Fatal** failures end the session.

use crate::types::TrackKind;

/// How the timeline controller should treat an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorClass {
    /// Retried on the next scheduling tick.
    Transient,
    /// Reported to the scheduler as a re-fetch request.
    Timeline,
    /// Disables the affected track only.
    Protection,
    /// Ends the session.
    Fatal,
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transient => write!(f, "transient"),
            Self::Timeline => write!(f, "timeline"),
            Self::Protection => write!(f, "protection"),
            Self::Fatal => write!(f, "fatal"),
        }
    }
}

/// Common error type for dashline.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    /// The decode sink rejected an append but remains usable.
    #[error("append failed on {track} track: {message}")]
    Append { track: TrackKind, message: String },

    /// A segment request failed.
    #[error("fetch failed on {track} track: {message}")]
    Fetch { track: TrackKind, message: String },

    /// The next queued data does not join the buffered edge.
    #[error("timeline gap on {track} track at {at:.3}s")]
    Gap { track: TrackKind, at: f64 },

    /// Tracks disagree on their start beyond the allowed tolerance.
    #[error("tracks desynchronized by {diff:.3}s")]
    Desync { diff: f64 },

    /// The platform cannot decode the track's codec.
    #[error("unsupported codec on {track} track: {codec}")]
    UnsupportedCodec { track: TrackKind, codec: String },

    /// Content is protected but no compatible key system exists.
    #[error("no compatible key system: {0}")]
    NoKeySystem(String),

    /// The decode sink failed irrecoverably.
    #[error("decode sink error on {track} track: {message}")]
    DecodeSink { track: TrackKind, message: String },

    /// The key system rejected the content keys.
    #[error("content key rejected: {0}")]
    KeyRejected(String),

    /// No track of the period could be initialized.
    #[error("no playable track in period {period}")]
    NoPlayableTrack { period: usize },

    /// Invalid input was provided.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// An internal invariant was violated.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create an Append error.
    pub fn append<S: Into<String>>(track: TrackKind, msg: S) -> Self {
        Self::Append {
            track,
            message: msg.into(),
        }
    }

    /// Create a Fetch error.
    pub fn fetch<S: Into<String>>(track: TrackKind, msg: S) -> Self {
        Self::Fetch {
            track,
            message: msg.into(),
        }
    }

    /// Create a Gap error.
    pub fn gap(track: TrackKind, at: f64) -> Self {
        Self::Gap { track, at }
    }

    /// Create an UnsupportedCodec error.
    pub fn unsupported_codec<S: Into<String>>(track: TrackKind, codec: S) -> Self {
        Self::UnsupportedCodec {
            track,
            codec: codec.into(),
        }
    }

    /// Create a DecodeSink error.
    pub fn decode_sink<S: Into<String>>(track: TrackKind, msg: S) -> Self {
        Self::DecodeSink {
            track,
            message: msg.into(),
        }
    }

    /// Create a new InvalidInput error.
    pub fn invalid_input<S: Into<String>>(msg: S) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Create a new Internal error.
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }

    /// Classify this error.
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Append { .. } | Self::Fetch { .. } => ErrorClass::Transient,
            Self::Gap { .. } | Self::Desync { .. } => ErrorClass::Timeline,
            Self::UnsupportedCodec { .. } | Self::NoKeySystem(_) => ErrorClass::Protection,
            Self::DecodeSink { .. }
            | Self::KeyRejected(_)
            | Self::NoPlayableTrack { .. }
            | Self::InvalidInput(_)
            | Self::Internal(_) => ErrorClass::Fatal,
        }
    }

    /// Whether this error ends the session.
    pub fn is_fatal(&self) -> bool {
        self.class() == ErrorClass::Fatal
    }

    /// The track this error is scoped to, if any.
    pub fn track(&self) -> Option<TrackKind> {
        match self {
            Self::Append { track, .. }
            | Self::Fetch { track, .. }
            | Self::Gap { track, .. }
            | Self::UnsupportedCodec { track, .. }
            | Self::DecodeSink { track, .. } => Some(*track),
            _ => None,
        }
    }
}

/// Result type alias using the common Error type.
pub type Result<T> = std::result::Result<T, Error>;
