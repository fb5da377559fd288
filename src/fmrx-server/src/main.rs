// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

mod config;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};

use fmrx_app::{init_logging, parse_frequency};
use fmrx_core::{DynResult, Freq, ReceiverEvent, RxError};
use fmrx_receiver::{
    scan, AudioOutput, FileIqSource, IqSource, MockIqSource, NullOutput, Receiver, ToneIqSource,
    Tuning,
};

use config::{OutputKind, ServerConfig, SourceKind};

const PKG_DESCRIPTION: &str = concat!(env!("CARGO_PKG_NAME"), " - FM broadcast receiver");

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
    /// List audio output devices and exit
    #[arg(long = "list-audio-devices")]
    list_audio_devices: bool,
    /// Tune to this frequency (e.g. 101.5M, 107700k, 98.1)
    #[arg(short = 'f', long = "freq", value_parser = parse_frequency)]
    freq: Option<u64>,
    /// Front-end sample rate in Hz
    #[arg(short = 's', long = "sample-rate")]
    sample_rate: Option<u32>,
    /// Gain: "auto" or a value in dB
    #[arg(short = 'g', long = "gain")]
    gain: Option<String>,
    /// Replay a raw IQ capture instead of the configured source
    #[arg(long = "file", value_name = "PATH")]
    file: Option<PathBuf>,
    /// Scan [scan].start_hz..stop_hz and tune to the strongest channel
    #[arg(long = "scan")]
    scan: bool,
}

/// Fold command line overrides into the loaded configuration.
fn apply_cli(cli: &Cli, cfg: &mut ServerConfig) -> DynResult<()> {
    if let Some(freq) = cli.freq {
        cfg.tuning.freq_hz = freq;
    }
    if let Some(rate) = cli.sample_rate {
        cfg.pipeline.sample_rate = rate;
    }
    if let Some(gain) = cli.gain.as_deref() {
        if gain.eq_ignore_ascii_case("auto") {
            cfg.tuning.gain.mode = "auto".to_string();
        } else {
            let value: f64 = gain
                .trim_end_matches("dB")
                .trim()
                .parse()
                .map_err(|e| format!("Invalid gain '{}': {}", gain, e))?;
            cfg.tuning.gain.mode = "manual".to_string();
            cfg.tuning.gain.value = value;
        }
    }
    if let Some(path) = &cli.file {
        cfg.source.kind = SourceKind::File;
        cfg.source.path = Some(path.clone());
    }
    if cli.scan {
        cfg.scan.auto_tune = true;
    }
    Ok(())
}

fn build_source(cfg: &ServerConfig) -> DynResult<Box<dyn IqSource>> {
    let rate = cfg.pipeline.sample_rate;
    let source = &cfg.source;
    let built: Box<dyn IqSource> = match source.kind {
        SourceKind::Mock => {
            let mock = MockIqSource::new(rate);
            Box::new(if source.paced { mock.paced() } else { mock })
        }
        SourceKind::Tone => {
            let tone = ToneIqSource::open(source.stations.clone(), rate, cfg.tuning.freq_hz);
            Box::new(if source.paced { tone.paced() } else { tone })
        }
        SourceKind::File => {
            let path = source
                .path
                .as_deref()
                .ok_or("[source].path is required when kind = \"file\"")?;
            Box::new(
                FileIqSource::open(path, source.format, rate)?
                    .looping(source.looping)
                    .paced(source.paced),
            )
        }
        #[cfg(feature = "soapysdr")]
        SourceKind::Soapysdr => Box::new(fmrx_receiver::RealIqSource::open(
            &source.args,
            cfg.tuning.freq_hz,
            rate,
            source.bandwidth_hz,
            cfg.tuning.gain.gain()?,
        )?),
        #[cfg(not(feature = "soapysdr"))]
        SourceKind::Soapysdr => {
            return Err("kind = \"soapysdr\" needs a build with the soapysdr feature".into())
        }
    };
    info!("IQ source: {}", built.describe());
    Ok(built)
}

fn build_output(cfg: &ServerConfig) -> DynResult<Arc<dyn AudioOutput>> {
    match cfg.audio.kind {
        OutputKind::Null => Ok(Arc::new(NullOutput::new(cfg.audio.paced))),
        #[cfg(feature = "cpal")]
        OutputKind::Cpal => Ok(Arc::new(fmrx_receiver::CpalOutput::new(
            cfg.audio.device.clone(),
        ))),
        #[cfg(not(feature = "cpal"))]
        OutputKind::Cpal => Err("kind = \"cpal\" needs a build with the cpal feature".into()),
    }
}

#[cfg(feature = "cpal")]
fn list_audio_devices() -> DynResult<()> {
    for name in fmrx_receiver::list_output_devices()? {
        println!("{}", name);
    }
    Ok(())
}

#[cfg(not(feature = "cpal"))]
fn list_audio_devices() -> DynResult<()> {
    Err("audio device listing needs a build with the cpal feature".into())
}

/// Scan the configured band and return the frequency to start on.
fn auto_tune(cfg: &ServerConfig, source: &mut dyn IqSource) -> DynResult<Freq> {
    let configured = Freq::new(cfg.tuning.freq_hz);
    match scan::auto_tune(
        source,
        cfg.scan.range(),
        cfg.scan.step_hz,
        &cfg.scan.settings(),
        configured,
    ) {
        Ok((result, best)) => {
            for entry in result.entries().iter().take(5) {
                info!("  {}  power {:.6}", entry.freq, entry.power);
            }
            Ok(best.freq)
        }
        Err(RxError::ScanEmpty(reason)) => {
            warn!("Auto-tune found no channel ({}); staying on {}", reason, configured);
            Ok(configured)
        }
        Err(e) => Err(e.into()),
    }
}

fn log_status(receiver: &Receiver) {
    let status = receiver.status();
    let stats = status.stats;
    info!(
        "{} {}: {} frame(s) played, {} queued, {} overrun(s), {} underrun(s), {} skipped block(s)",
        status.state,
        status.freq.map(|f| f.to_string()).unwrap_or_default(),
        stats.popped,
        status.queued_frames,
        stats.overruns,
        stats.underruns,
        stats.skipped_blocks
    );

    if let (Some(row), Some(freqs)) = (receiver.spectrum(), receiver.spectrum_frequencies()) {
        // Bin 0 is the tuned carrier; report the strongest neighbour.
        let peak = row
            .iter()
            .zip(&freqs)
            .skip(1)
            .max_by(|a, b| a.0.total_cmp(b.0));
        if let Some((db, hz)) = peak {
            debug!("Spectrum peak at {:.3} MHz ({:.1} dB)", hz / 1e6, db);
        }
    }
}

#[tokio::main]
async fn main() -> DynResult<()> {
    let cli = Cli::parse();

    if cli.print_config {
        println!("{}", ServerConfig::example_combined_toml());
        return Ok(());
    }

    let (mut cfg, config_path) = if let Some(ref path) = cli.config {
        (ServerConfig::load_from_file(path)?, Some(path.clone()))
    } else {
        ServerConfig::load_from_default_paths()?
    };

    init_logging(cfg.general.log_level.as_deref());

    if let Some(ref path) = config_path {
        info!("Loaded configuration from {}", path.display());
    }

    if cli.list_audio_devices {
        return list_audio_devices();
    }

    apply_cli(&cli, &mut cfg)?;
    cfg.validate()?;
    let gain = cfg.tuning.gain.gain()?;

    let mut source = build_source(&cfg)?;
    let freq = if cfg.scan.auto_tune {
        auto_tune(&cfg, source.as_mut())?
    } else {
        Freq::new(cfg.tuning.freq_hz)
    };

    let mut receiver = Receiver::new(build_output(&cfg)?);
    let mut events = receiver.subscribe();
    receiver.start(source, cfg.pipeline.clone(), Tuning { freq, gain })?;

    let status_every = Duration::from_secs(cfg.general.status_interval_secs.max(1));
    let mut status_tick = tokio::time::interval(status_every);
    status_tick.tick().await;

    let ctrl_c = signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            res = &mut ctrl_c => {
                res?;
                info!("Ctrl+C received, shutting down");
                break;
            }
            _ = status_tick.tick(), if cfg.general.status_interval_secs > 0 => {
                log_status(&receiver);
            }
            event = events.recv() => match event {
                Ok(ReceiverEvent::Error(e)) => {
                    error!("Receiver stopped: {}", e);
                    break;
                }
                Ok(event) => debug!("Event: {}", event),
                Err(RecvError::Lagged(n)) => warn!("Dropped {} receiver event(s)", n),
                Err(RecvError::Closed) => break,
            }
        }
    }

    // Stopping joins the worker threads.
    let result = tokio::task::block_in_place(|| receiver.stop());
    log_status(&receiver);
    match result {
        Ok(()) => Ok(()),
        Err(RxError::SourceRead(msg))
            if cfg.source.kind == SourceKind::File && msg.starts_with("end of IQ file") =>
        {
            info!("Capture file finished");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}
