// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

mod config;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use clap::Parser;
use num_complex::Complex;
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;
use tokio::task;
use tracing::{debug, error, info, warn};

use trx_app::{init_logging, ConfigFile};
use trx_channelizer::{
    IqSource, PolyphaseChannelSource, PolyphaseChannelSourceManager, SimulatedTuner,
    TokioScheduler, TunerController,
};
use trx_core::{DynResult, InterleavedSamples, SourceEvent};

use config::DdcConfig;

const PKG_DESCRIPTION: &str = concat!(env!("CARGO_PKG_NAME"), " - polyphase channelizer daemon");
const PRODUCER_THREAD_NAME: &str = "iq-producer";

#[derive(Debug, Parser)]
#[command(
    author = env!("CARGO_PKG_AUTHORS"),
    version = env!("CARGO_PKG_VERSION"),
    about = PKG_DESCRIPTION,
)]
struct Cli {
    /// Path to configuration file
    #[arg(long = "config", short = 'C', value_name = "FILE")]
    config: Option<PathBuf>,
    /// Print example configuration and exit
    #[arg(long = "print-config")]
    print_config: bool,
    /// Override the configured log level
    #[arg(long = "log-level", value_name = "LEVEL")]
    log_level: Option<String>,
    /// Stop after this many seconds instead of waiting for Ctrl+C
    #[arg(short = 'd', long = "duration", value_name = "SECS")]
    duration: Option<u64>,
}

/// Reads the simulated tuner on a dedicated thread and pushes buffers into
/// the source manager at the tuner's sample rate.
fn spawn_producer(
    tuner: Arc<SimulatedTuner>,
    source_manager: Arc<PolyphaseChannelSourceManager>,
    buffer_len: usize,
    running: Arc<AtomicBool>,
) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name(PRODUCER_THREAD_NAME.to_string())
        .spawn(move || {
            let mut iq = tuner.iq_source();
            let mut buf = vec![Complex::new(0.0f32, 0.0); buffer_len];
            let started = Instant::now();
            let mut produced: u64 = 0;
            let mut dropped: u64 = 0;

            while running.load(Ordering::Acquire) {
                let timestamp = iq.timestamp_ms();
                let count = match iq.read_into(&mut buf) {
                    Ok(count) => count,
                    Err(e) => {
                        error!("Tuner read failed: {}", e);
                        break;
                    }
                };
                if !source_manager.receive(InterleavedSamples::from_complex(&buf[..count], timestamp))
                {
                    dropped += 1;
                }
                produced += count as u64;

                let sample_rate = tuner.sample_rate();
                if sample_rate > 0.0 {
                    let due = Duration::from_secs_f64(produced as f64 / sample_rate);
                    if let Some(wait) = due.checked_sub(started.elapsed()) {
                        thread::sleep(wait);
                    }
                }
            }
            info!(
                "Producer stopped after {} samples ({} buffers not accepted)",
                produced, dropped
            );
        })
}

/// Logs sample rate and mean power of one channel's output.
async fn report_channel(source: Arc<PolyphaseChannelSource>, interval: Duration) {
    let mut rx = source.subscribe();
    let mut ticker = tokio::time::interval(interval);
    let mut samples: usize = 0;
    let mut power_sum = 0.0f64;
    let mut window_start = Instant::now();
    let channel = source.tuner_channel();

    loop {
        tokio::select! {
            received = rx.recv() => match received {
                Ok(buffer) => {
                    samples += buffer.len();
                    power_sum += buffer.mean_power() as f64 * buffer.len() as f64;
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!("{}: consumer lagged, {} buffers skipped", channel, skipped);
                }
                Err(RecvError::Closed) => break,
            },
            _ = ticker.tick() => {
                let elapsed = window_start.elapsed().as_secs_f64();
                if samples > 0 && elapsed > 0.0 {
                    let power = power_sum / samples as f64;
                    info!(
                        "{}: {:.0} samples/s (nominal {:.0}), mean power {:.1} dB, offset {} Hz",
                        channel,
                        samples as f64 / elapsed,
                        source.sample_rate(),
                        10.0 * power.max(1e-20).log10(),
                        source.frequency_offset()
                    );
                } else if let Some(message) = source.error_message() {
                    warn!("{}: no output ({})", channel, message);
                }
                samples = 0;
                power_sum = 0.0;
                window_start = Instant::now();
            }
        }
    }
    debug!("{}: output stream closed", channel);
}

#[tokio::main]
async fn main() -> DynResult<()> {
    let cli = Cli::parse();

    if cli.print_config {
        println!("{}", DdcConfig::example_toml());
        return Ok(());
    }

    let (mut cfg, config_path) = DdcConfig::load(cli.config.as_deref())?;
    if cli.log_level.is_some() {
        cfg.general.log_level = cli.log_level.clone();
    }
    cfg.validate()
        .map_err(|e| format!("Invalid trx-ddc configuration: {}", e))?;

    init_logging(cfg.general.log_level.as_deref());

    if let Some(ref path) = config_path {
        info!("Loaded configuration from {}", path.display());
    }

    let scheduler = TokioScheduler::current().ok_or("trx-ddc must run inside a tokio runtime")?;
    let tuner = Arc::new(SimulatedTuner::new(
        cfg.tuner.frequency,
        cfg.tuner.limits,
        cfg.tuner.tones.clone(),
    )?);
    info!(
        "Simulated tuner at {} Hz, {:.0} samples/s, {} tone(s)",
        tuner.frequency(),
        tuner.sample_rate(),
        tuner.tones().len()
    );

    let source_manager = PolyphaseChannelSourceManager::new(
        tuner.clone(),
        cfg.channelizer,
        cfg.placement.mode,
        Arc::new(scheduler),
    )?;
    source_manager.add_source_event_listener(Arc::new(|event: &SourceEvent| match event {
        SourceEvent::SourceOverflow(overflowing) => {
            if *overflowing {
                warn!("Channel output overflow");
            } else {
                info!("Channel output overflow cleared");
            }
        }
        SourceEvent::ChannelCountChange(count) => info!("Active channels: {}", count),
        other => debug!("Source event {:?}", other),
    }));

    let mut sources = Vec::new();
    for channel in &cfg.channels {
        match source_manager.source(*channel) {
            Ok(source) => {
                info!("Admitted {} at offset {} Hz", channel, source.frequency_offset());
                sources.push(source);
            }
            Err(e) => warn!("Cannot admit {}: {}", channel, e),
        }
    }
    if sources.is_empty() {
        warn!("No channels admitted");
    }

    let stats_interval = Duration::from_millis(cfg.report.stats_interval_ms);
    let mut task_handles = Vec::new();
    for source in &sources {
        task_handles.push(task::spawn(report_channel(source.clone(), stats_interval)));
        source.start();
    }

    if cfg.report.snapshot_interval_ms > 0 {
        let manager = source_manager.channel_manager().clone();
        let interval = Duration::from_millis(cfg.report.snapshot_interval_ms);
        task_handles.push(task::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let Some(snapshot) = manager.snapshot() else {
                    continue;
                };
                match serde_json::to_string(&snapshot) {
                    Ok(json) => info!("State: {}", json),
                    Err(e) => warn!("Cannot serialize state snapshot: {}", e),
                }
            }
        }));
    }

    let running = Arc::new(AtomicBool::new(true));
    let producer = spawn_producer(
        tuner.clone(),
        source_manager.clone(),
        cfg.tuner.buffer_len,
        running.clone(),
    )?;

    match cli.duration {
        Some(secs) => {
            tokio::select! {
                result = signal::ctrl_c() => {
                    result?;
                    info!("Ctrl+C received, shutting down");
                }
                _ = tokio::time::sleep(Duration::from_secs(secs)) => {
                    info!("Run duration of {} s elapsed, shutting down", secs);
                }
            }
        }
        None => {
            signal::ctrl_c().await?;
            info!("Ctrl+C received, shutting down");
        }
    }

    debug!("{}", source_manager.channel_manager().state_description());
    for source in &sources {
        source_manager.release_source(source);
    }
    running.store(false, Ordering::Release);
    if task::spawn_blocking(move || producer.join())
        .await?
        .is_err()
    {
        error!("Producer thread panicked");
    }

    for handle in &task_handles {
        if !handle.is_finished() {
            handle.abort();
        }
    }
    Ok(())
}
