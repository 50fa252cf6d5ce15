//! Core timeline type definitions.
//!
//! A presentation is split into [`Period`]s. Each period offers one or more
//! [`AdaptationSet`]s per [`TrackKind`], and each adaptation set holds the
//! encoded qualities ([`Representation`]s) a scheduler may choose between.
//! All enums serialize in lowercase.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of media track buffered by the player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    /// Video track.
    Video,
    /// Audio track.
    Audio,
}

impl TrackKind {
    /// All track kinds, in initialization order.
    pub const ALL: [TrackKind; 2] = [TrackKind::Video, TrackKind::Audio];
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Video => write!(f, "video"),
            Self::Audio => write!(f, "audio"),
        }
    }
}

impl std::str::FromStr for TrackKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "video" => Ok(Self::Video),
            "audio" => Ok(Self::Audio),
            _ => Err(format!("Invalid track kind: {}", s)),
        }
    }
}

/// One concrete encoded quality within an adaptation set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Representation {
    /// Position within the adaptation set (the "quality" index).
    pub index: usize,
    /// Manifest identifier.
    #[serde(default)]
    pub id: String,
    /// Declared bandwidth in bits per second.
    #[serde(default)]
    pub bandwidth: u64,
    /// RFC 6381 codec string.
    #[serde(default)]
    pub codecs: String,
}

/// A group of interchangeable representations for one track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdaptationSet {
    /// Position within the period.
    pub index: usize,
    /// Track this adaptation set feeds.
    pub kind: TrackKind,
    /// Role (e.g. "main", "commentary").
    #[serde(default)]
    pub role: Option<String>,
    /// Language tag.
    #[serde(default)]
    pub lang: Option<String>,
    /// MIME type of the segments.
    #[serde(default)]
    pub mime_type: String,
    /// Whether the content carries a content protection descriptor.
    #[serde(default)]
    pub protected: bool,
    /// Available qualities, lowest first.
    #[serde(default)]
    pub representations: Vec<Representation>,
}

impl AdaptationSet {
    /// Codec string of the first representation, if any.
    pub fn codecs(&self) -> Option<&str> {
        self.representations
            .first()
            .map(|r| r.codecs.as_str())
            .filter(|c| !c.is_empty())
    }
}

/// A contiguous time range of the presentation with its own tracks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Period {
    /// Position in the period list.
    pub index: usize,
    /// Presentation start in seconds.
    pub start: f64,
    /// Presentation end in seconds.
    pub end: f64,
    /// Adaptation sets offered in this period.
    #[serde(default)]
    pub adaptation_sets: Vec<AdaptationSet>,
}

impl Period {
    /// Duration of the period in seconds.
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }

    /// Whether `time` lies inside `[start, end)`.
    pub fn contains(&self, time: f64) -> bool {
        time >= self.start && time < self.end
    }

    /// Find the adaptation set for `kind`, preferring one with `role`.
    pub fn adaptation_set(&self, kind: TrackKind, role: Option<&str>) -> Option<&AdaptationSet> {
        let mut candidates = self.adaptation_sets.iter().filter(|a| a.kind == kind);
        match role {
            Some(role) => {
                let all: Vec<&AdaptationSet> = candidates.collect();
                all.iter()
                    .find(|a| a.role.as_deref() == Some(role))
                    .or_else(|| all.first())
                    .copied()
            }
            None => candidates.next(),
        }
    }

    /// Whether any adaptation set is protected.
    pub fn is_protected(&self) -> bool {
        self.adaptation_sets.iter().any(|a| a.protected)
    }
}

/// Coarse buffer health reported to the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BufferState {
    /// Nothing buffered ahead of the playhead.
    Empty,
    /// Some lookahead, below the comfortable threshold.
    Low,
    /// Enough lookahead to play through.
    Full,
}

impl fmt::Display for BufferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "empty"),
            Self::Low => write!(f, "low"),
            Self::Full => write!(f, "full"),
        }
    }
}

/// Readiness of the playback element, ordered from least to most data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadyState {
    /// No information about the media.
    HaveNothing,
    /// Duration and dimensions known.
    HaveMetadata,
    /// Data for the current position only.
    HaveCurrentData,
    /// Data for the current position and a little beyond.
    HaveFutureData,
    /// Enough data to play through.
    HaveEnoughData,
}

impl ReadyState {
    /// Whether playback can advance from the current position.
    pub fn can_play(self) -> bool {
        self >= ReadyState::HaveFutureData
    }
}
