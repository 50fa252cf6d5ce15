//! Read-only manifest model.
//!
//! The timeline only consumes parsed periods; parsing MPDs is somebody
//! else's job. [`Manifest`] is a plain serde model used by the simulator and
//! by tests, and it can be loaded from JSON.

use anyhow::{Context, Result};
use dashline_common::{AdaptationSet, Period, Representation, TrackKind};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Period data as seen by the timeline controller.
pub trait ManifestModel: Send + Sync {
    /// All periods, ordered by start time.
    fn periods(&self) -> &[Period];

    /// Declared media duration in seconds.
    fn duration(&self) -> f64;

    /// Adaptation set for `kind` in period `index`, preferring `role`.
    fn data_for_role(
        &self,
        index: usize,
        kind: TrackKind,
        role: Option<&str>,
    ) -> Option<&AdaptationSet> {
        self.data_for_index(index)
            .and_then(|period| period.adaptation_set(kind, role))
    }

    /// Period by index.
    fn data_for_index(&self, index: usize) -> Option<&Period> {
        self.periods().get(index)
    }

    /// Period containing `time`; times past the end map to the last period.
    fn period_at(&self, time: f64) -> Option<&Period> {
        let periods = self.periods();
        periods
            .iter()
            .find(|p| p.contains(time))
            .or_else(|| periods.last().filter(|p| time >= p.end))
            .or_else(|| periods.first().filter(|p| time < p.start))
    }
}

/// A parsed presentation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    /// Declared duration; defaults to the end of the last period.
    #[serde(default)]
    pub duration: Option<f64>,
    pub periods: Vec<Period>,
}

impl Manifest {
    /// Build a manifest and check period ordering.
    pub fn new(periods: Vec<Period>) -> Result<Self> {
        let manifest = Self {
            duration: None,
            periods,
        };
        manifest.validate()?;
        Ok(manifest)
    }

    /// Load a JSON manifest.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read manifest: {:?}", path))?;
        let manifest: Manifest = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse manifest: {:?}", path))?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// A presentation of back-to-back periods with one video and one audio
    /// adaptation set each.
    pub fn synthetic(period_durations: &[f64], protected: bool) -> Result<Self> {
        let mut start = 0.0;
        let mut periods = Vec::with_capacity(period_durations.len());
        for (index, duration) in period_durations.iter().enumerate() {
            let end = start + duration;
            periods.push(Period {
                index,
                start,
                end,
                adaptation_sets: vec![
                    AdaptationSet {
                        index: 0,
                        kind: TrackKind::Video,
                        role: Some("main".to_string()),
                        lang: None,
                        mime_type: "video/mp4".to_string(),
                        protected,
                        representations: vec![
                            representation(0, "v-low", 800_000, "avc1.64001f"),
                            representation(1, "v-high", 3_000_000, "avc1.640028"),
                        ],
                    },
                    AdaptationSet {
                        index: 1,
                        kind: TrackKind::Audio,
                        role: Some("main".to_string()),
                        lang: Some("en".to_string()),
                        mime_type: "audio/mp4".to_string(),
                        protected,
                        representations: vec![representation(0, "a-main", 128_000, "mp4a.40.2")],
                    },
                ],
            });
            start = end;
        }
        Self::new(periods)
    }

    fn validate(&self) -> Result<()> {
        if self.periods.is_empty() {
            anyhow::bail!("Manifest has no periods");
        }
        for (position, period) in self.periods.iter().enumerate() {
            if period.index != position {
                anyhow::bail!(
                    "Period at position {} declares index {}",
                    position,
                    period.index
                );
            }
            if period.end <= period.start {
                anyhow::bail!("Period {} ends before it starts", period.index);
            }
        }
        for pair in self.periods.windows(2) {
            if pair[1].start < pair[0].end {
                anyhow::bail!(
                    "Period {} overlaps period {}",
                    pair[1].index,
                    pair[0].index
                );
            }
        }
        Ok(())
    }
}

fn representation(index: usize, id: &str, bandwidth: u64, codecs: &str) -> Representation {
    Representation {
        index,
        id: id.to_string(),
        bandwidth,
        codecs: codecs.to_string(),
    }
}

impl ManifestModel for Manifest {
    fn periods(&self) -> &[Period] {
        &self.periods
    }

    fn duration(&self) -> f64 {
        self.duration
            .or_else(|| self.periods.last().map(|p| p.end))
            .unwrap_or(0.0)
    }
}
