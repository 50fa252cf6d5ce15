mod types;

pub use types::*;

use anyhow::{Context, Result};
use dashline_common::TrackKind;
use std::path::Path;

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    validate_config(&config)?;

    for warning in config.warnings() {
        tracing::warn!("{}", warning);
    }

    Ok(config)
}

/// Load config from default locations or return default config
pub fn load_config_or_default(custom_path: Option<&Path>) -> Result<Config> {
    if let Some(path) = custom_path {
        return load_config(path);
    }

    let default_paths = [
        "./dashline.toml",
        "~/.config/dashline/config.toml",
        "/etc/dashline/config.toml",
    ];

    for path_str in default_paths {
        let path = shellexpand::tilde(path_str);
        let path = Path::new(path.as_ref());
        if path.exists() {
            return load_config(path);
        }
    }

    Ok(Config::default())
}

/// Validate configuration
pub fn validate_config(config: &Config) -> Result<()> {
    let buffer = &config.buffer;
    if buffer.tolerance <= 0.0 {
        anyhow::bail!("Buffer tolerance must be positive, got {}", buffer.tolerance);
    }
    if buffer.back_buffer < 0.0 {
        anyhow::bail!("Back buffer cannot be negative");
    }

    for kind in TrackKind::ALL {
        let track = buffer.track(kind);
        if track.prefetch_threshold <= 0.5 {
            anyhow::bail!(
                "The {} prefetch threshold must exceed 0.5s, got {}",
                kind,
                track.prefetch_threshold
            );
        }
        if track.append_enable_threshold > track.prefetch_threshold {
            anyhow::bail!(
                "The {} append enable threshold ({}) exceeds its prefetch threshold ({})",
                kind,
                track.append_enable_threshold,
                track.prefetch_threshold
            );
        }
    }

    let timeline = &config.timeline;
    for (name, value) in [
        ("tick_interval_ms", timeline.tick_interval_ms),
        ("gap_check_interval_ms", timeline.gap_check_interval_ms),
        ("drm_key_timeout_ms", timeline.drm_key_timeout_ms),
        ("stall_check_interval_ms", config.clock.stall_check_interval_ms),
    ] {
        if value == 0 {
            anyhow::bail!("{} cannot be 0", name);
        }
    }

    let simulation = &config.simulation;
    if simulation.segment_duration <= 0.0 {
        anyhow::bail!("Simulation segment duration must be positive");
    }
    if simulation.period_durations.iter().any(|d| *d <= 0.0) {
        anyhow::bail!("Simulation period durations must be positive");
    }
    if simulation.playback_rate <= 0.0 {
        anyhow::bail!("Simulation playback rate must be positive");
    }

    Ok(())
}
