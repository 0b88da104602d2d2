//! Streaming wakeword host entry point.
//!
//! ## Runtime note
//!
//! Three threads: the replay pacing thread (inside `ReplaySource`), a stdin
//! reader that splits host input into command lines, and this main loop. The
//! main loop is the only owner of the engine; it multiplexes command lines
//! and transfer completions with `crossbeam_channel::select!`, so commands and
//! chunk processing never interleave.
//!
//! Replies go to stdout. Logs go to stderr.

mod commands;
mod settings;
mod state;

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use anyhow::Context;
use crossbeam_channel::{select, unbounded, Receiver};
use settings::{default_settings_path, load_settings, AppSettings};
use state::AppState;
use sww_core::{
    audio::wav, CaptureCompleteEvent, DetectionEvent, ModelHandle, ReplayConfig, ReplaySource,
    StubModel, WakewordEngine,
};
use tokio::sync::broadcast::{self, error::TryRecvError};
use tracing::{error, info, warn};

/// Characters that end a host command.
const COMMAND_TERMINATORS: [u8; 2] = [b'%', b'\n'];
/// Longest accepted command line; extra characters are dropped.
const MAX_COMMAND_LEN: usize = 4096;
/// Idle wake-up so broadcast events are flushed even without traffic.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

fn main() -> anyhow::Result<()> {
    // ── Tracing ───────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let settings_path = std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(default_settings_path);
    let settings = load_settings(&settings_path);
    info!(settings_path = ?settings_path, "sww host starting");

    let config = settings.engine_config();
    config.validate().context("invalid engine configuration")?;
    let reference = load_reference(&settings, config.sample_rate)?;

    // ── Engine ────────────────────────────────────────────────────────────
    let (source, transfers) = ReplaySource::spawn(
        reference.clone(),
        ReplayConfig {
            sample_rate: config.sample_rate,
            channels: config.channels,
            realtime: settings.realtime_replay,
            looping: settings.loop_replay,
            ..ReplayConfig::default()
        },
    )
    .context("failed to start the replay source")?;
    let model = ModelHandle::new(StubModel::new(
        config.model_input_size,
        config.num_mel_filters,
    ));
    let engine = WakewordEngine::new(config, model, Box::new(source))
        .context("failed to construct the engine")?;
    engine.warm_up().context("model warm-up failed")?;

    let mut detections = engine.subscribe_detections();
    let mut captures = engine.subscribe_captures();
    let mut app = AppState::new(engine, settings, settings_path, reference);

    let command_lines = spawn_command_reader()?;
    let stdout = io::stdout();

    loop {
        select! {
            recv(command_lines) -> line => match line {
                Ok(line) => {
                    let reply = commands::respond(&mut app, &line);
                    write_lines(&mut stdout.lock(), &reply);
                }
                Err(_) => {
                    info!("input closed, shutting down");
                    break;
                }
            },
            recv(transfers) -> event => match event {
                Ok(event) => app.engine.on_transfer_event(event),
                Err(_) => warn!("audio source disconnected"),
            },
            default(POLL_INTERVAL) => {}
        }

        while let Some(event) = next_event(&mut detections) {
            on_detection(&mut app, event);
        }
        while let Some(event) = next_event(&mut captures) {
            let lines = on_capture_complete(&app, event);
            write_lines(&mut stdout.lock(), &lines);
        }
    }

    if app.engine.state().0.is_busy() {
        let _ = app.engine.stop();
    }
    Ok(())
}

/// Reference waveform at `sample_rate`, or silence when none is configured.
fn load_reference(settings: &AppSettings, sample_rate: u32) -> anyhow::Result<Vec<i16>> {
    match settings.reference_wav.as_deref() {
        Some(path) => {
            let wave = wav::load_mono_i16(path, sample_rate)
                .with_context(|| format!("failed to load reference wav {}", path.display()))?;
            info!(
                path = %path.display(),
                samples = wave.samples.len(),
                source_rate = wave.source_rate,
                "reference waveform loaded"
            );
            Ok(wave.samples)
        }
        None => {
            info!(seconds = settings.silence_seconds, "no reference waveform; replaying silence");
            Ok(vec![0; settings.silence_seconds as usize * sample_rate as usize])
        }
    }
}

/// Read stdin on a dedicated thread and emit one string per command.
fn spawn_command_reader() -> anyhow::Result<Receiver<String>> {
    let (tx, rx) = unbounded();
    thread::Builder::new()
        .name("sww-commands".into())
        .spawn(move || {
            let stdin = io::stdin();
            let mut input = stdin.lock();
            let mut line = Vec::with_capacity(MAX_COMMAND_LEN);
            loop {
                let buf = match input.fill_buf() {
                    Ok([]) => break,
                    Ok(buf) => buf,
                    Err(e) => {
                        error!("stdin read failed: {e}");
                        break;
                    }
                };
                let consumed = buf.len();
                for &byte in buf {
                    if COMMAND_TERMINATORS.contains(&byte) {
                        let command = String::from_utf8_lossy(&line).trim().to_string();
                        line.clear();
                        if tx.send(command).is_err() {
                            return;
                        }
                    } else if line.len() < MAX_COMMAND_LEN {
                        line.push(byte);
                    }
                }
                input.consume(consumed);
            }
        })
        .context("failed to spawn the command reader")?;
    Ok(rx)
}

fn next_event<T: Clone>(rx: &mut broadcast::Receiver<T>) -> Option<T> {
    loop {
        match rx.try_recv() {
            Ok(event) => return Some(event),
            Err(TryRecvError::Lagged(skipped)) => {
                warn!(skipped, "event receiver lagged");
            }
            Err(TryRecvError::Empty | TryRecvError::Closed) => return None,
        }
    }
}

fn on_detection(app: &mut AppState, event: DetectionEvent) {
    info!(cycle = event.cycle, score = event.score, "detection");
    app.log
        .write(&format!("[{}]: Detection ({}).\r\n", event.cycle, event.score));
}

fn on_capture_complete(app: &AppState, event: CaptureCompleteEvent) -> Vec<String> {
    let recorded = app.engine.recording().unwrap_or(&[]);
    let mut lines = vec![format!(
        "Receive completed {} samples read out of {} requested",
        event.samples_read, event.samples_requested
    )];
    let values: Vec<String> = recorded.iter().map(ToString::to_string).collect();
    lines.push(format!("[{}]", values.join(", ")));

    if let Some(path) = app.settings.capture_output.as_deref() {
        let config = app.engine.config();
        let channels = u16::try_from(config.channels).unwrap_or(u16::MAX);
        match wav::write_i16(path, recorded, config.sample_rate, channels) {
            Ok(()) => info!(path = %path.display(), samples = recorded.len(), "capture written"),
            Err(e) => error!("failed to write capture: {e}"),
        }
    }
    lines
}

fn write_lines(out: &mut impl Write, lines: &[String]) {
    for line in lines {
        if writeln!(out, "{line}\r").is_err() {
            return;
        }
    }
    let _ = out.flush();
}
