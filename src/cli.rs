use clap::{Parser, Subcommand};
use dashline_common::TrackKind;
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Parser)]
#[command(name = "dashline")]
#[command(author, version, about = "MPEG-DASH buffering and timeline control")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Play the synthetic presentation on the simulated platform
    Simulate(SimulateArgs),

    /// Validate configuration file
    Validate {
        /// Config file to validate (uses default if not specified)
        config: Option<PathBuf>,
    },

    /// Display version information
    Version,
}

#[derive(clap::Args, Debug, Clone)]
pub struct SimulateArgs {
    /// Media seconds per wall-clock second (overrides the config)
    #[arg(long)]
    pub rate: Option<f64>,

    /// Stop once the playhead reaches this position
    #[arg(long)]
    pub until: Option<f64>,

    /// Seek when the playhead reaches a position, as TARGET@AT (repeatable)
    #[arg(long, value_name = "TARGET@AT")]
    pub seek: Vec<SeekAt>,

    /// Lose a segment on its first fetch, as TRACK@TIME (repeatable)
    #[arg(long, value_name = "TRACK@TIME")]
    pub drop_segment: Vec<DropSegment>,

    /// Give up after this many wall-clock seconds
    #[arg(long, default_value = "120")]
    pub timeout: u64,

    /// Output the final report as JSON
    #[arg(long)]
    pub json: bool,
}

/// A seek scheduled at a playhead position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeekAt {
    pub target: f64,
    pub at: f64,
}

impl FromStr for SeekAt {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (target, at) = s
            .split_once('@')
            .ok_or_else(|| format!("expected TARGET@AT, got '{}'", s))?;
        let target = target
            .trim()
            .parse()
            .map_err(|_| format!("invalid seek target '{}'", target))?;
        let at = at
            .trim()
            .parse()
            .map_err(|_| format!("invalid seek position '{}'", at))?;
        Ok(Self { target, at })
    }
}

/// A segment lost on its first fetch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DropSegment {
    pub track: TrackKind,
    pub time: f64,
}

impl FromStr for DropSegment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (track, time) = s
            .split_once('@')
            .ok_or_else(|| format!("expected TRACK@TIME, got '{}'", s))?;
        let track = match track.trim().to_ascii_lowercase().as_str() {
            "video" => TrackKind::Video,
            "audio" => TrackKind::Audio,
            other => return Err(format!("unknown track '{}'", other)),
        };
        let time = time
            .trim()
            .parse()
            .map_err(|_| format!("invalid time '{}'", time))?;
        Ok(Self { track, time })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_seek_at() {
        assert_eq!(
            "40@5.5".parse::<SeekAt>().unwrap(),
            SeekAt {
                target: 40.0,
                at: 5.5
            }
        );
        assert!("40".parse::<SeekAt>().is_err());
        assert!("x@1".parse::<SeekAt>().is_err());
    }

    #[test]
    fn test_parse_drop_segment() {
        assert_eq!(
            "Video@6".parse::<DropSegment>().unwrap(),
            DropSegment {
                track: TrackKind::Video,
                time: 6.0
            }
        );
        assert!("text@6".parse::<DropSegment>().is_err());
    }

    #[test]
    fn test_cli_parses_simulate() {
        let cli = Cli::parse_from([
            "dashline",
            "simulate",
            "--rate",
            "4",
            "--seek",
            "40@5",
            "--seek",
            "10@45",
            "--json",
        ]);
        match cli.command {
            Commands::Simulate(args) => {
                assert_eq!(args.rate, Some(4.0));
                assert_eq!(args.seek.len(), 2);
                assert!(args.json);
                assert_eq!(args.timeout, 120);
            }
            _ => panic!("expected simulate"),
        }
    }
}
