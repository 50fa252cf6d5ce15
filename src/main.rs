mod cli;

use dashline::{
    config,
    events::{Event, EventBus},
    sim::{Simulation, SimulationOptions},
    timeline::{Phase, Snapshot},
};

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands, SimulateArgs};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::TryRecvError};

/// How often the simulation is observed.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Serialize)]
struct SimulationReport {
    snapshot: Snapshot,
    events: BTreeMap<&'static str, usize>,
    timed_out: bool,
}

async fn simulate(config: config::Config, args: SimulateArgs) -> Result<()> {
    let mut config = config;
    if let Some(rate) = args.rate {
        if rate <= 0.0 {
            anyhow::bail!("Playback rate must be positive, got {}", rate);
        }
        config.simulation.playback_rate = rate;
    }
    let config = Arc::new(config);
    let events = Arc::new(EventBus::default());
    let mut rx = events.subscribe();

    let options = SimulationOptions {
        missing: args.drop_segment.iter().map(|d| (d.track, d.time)).collect(),
        ..SimulationOptions::default()
    };
    let simulation = Simulation::spawn(Arc::clone(&config), Arc::clone(&events), options)?;
    simulation.start();

    let mut seeks = args.seek.clone();
    seeks.sort_by(|a, b| a.at.total_cmp(&b.at));
    let mut seeks = seeks.into_iter().peekable();

    let mut counts: BTreeMap<&'static str, usize> = BTreeMap::new();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(args.timeout);
    let mut interval = tokio::time::interval(POLL_INTERVAL);
    let mut timed_out = false;

    loop {
        interval.tick().await;
        drain_events(&mut rx, &mut counts);

        let snapshot = simulation.handle.snapshot();
        if snapshot.phase == Phase::Ended {
            break;
        }
        if args.until.is_some_and(|until| snapshot.current_time >= until) {
            tracing::info!(position = snapshot.current_time, "Stop position reached");
            break;
        }
        while let Some(seek) = seeks.next_if(|s| snapshot.current_time >= s.at) {
            tracing::info!(target = seek.target, at = snapshot.current_time, "Scheduled seek");
            simulation.handle.seek(seek.target);
        }
        if tokio::time::Instant::now() >= deadline {
            tracing::warn!(timeout = args.timeout, "Simulation did not finish in time");
            timed_out = true;
            break;
        }
    }

    let snapshot = simulation.handle.snapshot();
    let outcome = simulation.shutdown().await?;
    drain_events(&mut rx, &mut counts);

    let report = SimulationReport {
        snapshot,
        events: counts,
        timed_out,
    };
    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }

    if let Err(err) = outcome {
        anyhow::bail!("Playback failed: {}", err);
    }
    if timed_out {
        anyhow::bail!("Simulation timed out after {}s", args.timeout);
    }
    Ok(())
}

fn drain_events(rx: &mut broadcast::Receiver<Event>, counts: &mut BTreeMap<&'static str, usize>) {
    loop {
        match rx.try_recv() {
            Ok(event) => {
                tracing::debug!(event = event.payload.name(), "Session event");
                *counts.entry(event.payload.name()).or_default() += 1;
            }
            Err(TryRecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Event observer lagged");
            }
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
        }
    }
}

fn print_report(report: &SimulationReport) {
    let snapshot = &report.snapshot;
    println!(
        "Simulation {} at {:.2}s of {:.2}s",
        snapshot.phase, snapshot.current_time, snapshot.duration
    );
    println!("  Generation: {}", snapshot.generation);
    println!("  Buffer: {}", snapshot.buffer_state);
    if let Some(period) = &snapshot.period {
        println!(
            "  Period: {} of {} (buffering {})",
            period.playing_index + 1,
            period.count,
            period.buffering_index + 1
        );
    }
    for track in &snapshot.tracks {
        println!(
            "  Track {}: {:.2}s ahead, {} queued",
            track.kind, track.lookahead, track.queued
        );
    }
    if !snapshot.disabled.is_empty() {
        let disabled: Vec<String> = snapshot.disabled.iter().map(ToString::to_string).collect();
        println!("  Disabled: {}", disabled.join(", "));
    }
    println!("  Stalls: {}", snapshot.stalls);
    if let Some(error) = &snapshot.error {
        println!("  Error: {}", error);
    }
    println!("  Events:");
    for (name, count) in &report.events {
        println!("    {}: {}", name, count);
    }
}

fn validate_config(path: Option<&std::path::Path>) -> Result<()> {
    let config = match path {
        Some(p) => {
            println!("Validating config: {:?}", p);
            let config = config::load_config(p)?;
            println!("✓ Configuration is valid");
            config
        }
        None => {
            println!("No config file specified, using defaults");
            config::Config::default()
        }
    };

    let buffer = &config.buffer;
    println!("  Tolerance: {}s", buffer.tolerance);
    println!(
        "  Start threshold: {}s, low buffer: {}s, back buffer: {}s",
        buffer.start_threshold, buffer.low_buffer, buffer.back_buffer
    );
    println!(
        "  Video prefetch/append: {}s/{}s",
        buffer.video.prefetch_threshold, buffer.video.append_enable_threshold
    );
    println!(
        "  Audio prefetch/append: {}s/{}s",
        buffer.audio.prefetch_threshold, buffer.audio.append_enable_threshold
    );
    println!(
        "  Tick: {}ms, DRM key timeout: {}ms",
        config.timeline.tick_interval_ms, config.timeline.drm_key_timeout_ms
    );
    println!(
        "  Simulation: {} periods, {}s total",
        config.simulation.period_durations.len(),
        config.simulation.total_duration()
    );
    for warning in config.warnings() {
        println!("  ⚠ {}", warning);
    }

    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "dashline=trace,dashline_buffer=trace,dashline_common=debug".to_string()
        } else {
            "dashline=info,dashline_buffer=info".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Simulate(args) => {
            let config = config::load_config_or_default(cli.config.as_deref())?;
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(simulate(config, args))
        }
        Commands::Validate {
            config: config_path,
        } => {
            let path = config_path.or(cli.config);
            validate_config(path.as_deref())
        }
        Commands::Version => {
            println!("dashline {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}
