//! Text command boundary.
//!
//! A command is one line of space-separated tokens (the host terminates it
//! with `%` or a newline). `respond` parses it into a [`Command`], runs it
//! against the [`AppState`] and returns the reply lines, always ending with
//! [`READY`].

use std::fmt::Display;

use sww_core::{
    engine::offline::{extract_window, infer_waveform},
    AcquisitionState, SwwError,
};
use tracing::{info, warn};

use crate::settings::save_settings;
use crate::state::{AppState, Upload};

/// Final line of every reply.
pub const READY: &str = "m-ready";

const HELP: &str = "\
name                -- print out an identifying message
set_name D [V]      -- set and persist the device (and vendor) name
profile             -- print the firmware and model versions
run_model           -- run the model once on the current input tensor
extract [offset]    -- run the feature extractor on one window of the reference waveform
infer_wav [offset]  -- run the full pipeline over the reference waveform
extract_uart_stream -- run one mono stride from the db buffer through the pipeline
i2scap [n]          -- capture n raw samples (default: the whole recording buffer)
start               -- start wakeword detection on the audio source
stop                -- stop detection or capture
state               -- print the acquisition state and last transfer status
db load N | db <hex> | db print [N] | db print_i16 [N] | db getptr | db setptr N
                    -- upload to / inspect the host data buffer
log                 -- print and clear the event log
help                -- print this help message";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Name,
    /// Persist a new device name and, optionally, a vendor name.
    SetName {
        device: String,
        vendor: Option<String>,
    },
    Profile,
    Help,
    Start,
    Stop,
    State,
    Capture(Option<usize>),
    Extract(usize),
    InferWav(usize),
    ExtractUartStream,
    RunModel,
    Db(DbCommand),
    Log,
    /// Only a terminator was received.
    Empty,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DbCommand {
    Load(usize),
    Data(String),
    Print(Option<usize>),
    PrintI16(Option<usize>),
    GetPtr,
    SetPtr(usize),
}

impl Command {
    /// Parse one command line. Numeric arguments must be non-negative
    /// decimal integers.
    pub fn parse(line: &str) -> Result<Self, String> {
        let mut tokens = line.split_whitespace();
        let Some(head) = tokens.next() else {
            return Ok(Command::Empty);
        };
        let arg = tokens.next();

        let command = match head {
            "name" => Command::Name,
            "set_name" => match arg {
                Some(device) => Command::SetName {
                    device: device.to_string(),
                    vendor: tokens.next().map(str::to_string),
                },
                None => {
                    return Err(
                        "Error: set_name requires a name: 'set_name <device> [vendor]'".into(),
                    )
                }
            },
            "profile" => Command::Profile,
            "help" => Command::Help,
            "start" => Command::Start,
            "stop" => Command::Stop,
            "state" => Command::State,
            "i2scap" => Command::Capture(parse_optional(arg, "capture length")?),
            "extract" => Command::Extract(parse_optional(arg, "offset")?.unwrap_or(0)),
            "infer_wav" => Command::InferWav(parse_optional(arg, "offset")?.unwrap_or(0)),
            "extract_uart_stream" => Command::ExtractUartStream,
            "run_model" => Command::RunModel,
            "log" => Command::Log,
            "db" => Command::Db(parse_db(arg, tokens.next())?),
            _ => return Err(format!("Unrecognized command {}", line.trim())),
        };
        Ok(command)
    }
}

fn parse_number(raw: &str, what: &str) -> Result<usize, String> {
    raw.parse::<usize>()
        .map_err(|_| format!("Error: {what} ({raw}) must be a non-negative integer"))
}

fn parse_optional(raw: Option<&str>, what: &str) -> Result<Option<usize>, String> {
    raw.map(|r| parse_number(r, what)).transpose()
}

fn parse_db(sub: Option<&str>, arg: Option<&str>) -> Result<DbCommand, String> {
    let Some(sub) = sub else {
        return Err(
            "Error: db requires a sub-command: 'db load <Nbytes>'; 'db print [Nbytes]', 'db <hexstring>'"
                .into(),
        );
    };
    match sub {
        "load" => {
            let raw = arg.unwrap_or("");
            match raw.parse::<usize>() {
                Ok(n) if n > 0 => Ok(DbCommand::Load(n)),
                _ => Err(format!(
                    "Error: Transfer size ({raw}) must be valid int; greater than 0.\nUsage: 'db load N'; N>0"
                )),
            }
        }
        "getptr" => Ok(DbCommand::GetPtr),
        "setptr" => match arg {
            Some(raw) => Ok(DbCommand::SetPtr(parse_number(raw, "pointer")?)),
            None => Err("Error: setptr requires a numeric argument: 'db setptr 123%'".into()),
        },
        "print" => Ok(DbCommand::Print(parse_optional(arg, "byte count")?)),
        "print_i16" => Ok(DbCommand::PrintI16(parse_optional(arg, "value count")?)),
        hex if hex.starts_with(|c: char| c.is_ascii_hexdigit()) => {
            Ok(DbCommand::Data(hex.to_string()))
        }
        other => Err(format!("Error: db: Unrecognized sub-command {other}")),
    }
}

/// Parse and run one command line.
pub fn respond(state: &mut AppState, line: &str) -> Vec<String> {
    let line = line.trim();
    let mut out = vec![format!("Received command: {line}")];
    match Command::parse(line) {
        Ok(command) => execute(state, command, &mut out),
        Err(message) => {
            warn!(line, "rejected command");
            out.extend(message.lines().map(str::to_string));
        }
    }
    out.push(READY.into());
    out
}

fn execute(state: &mut AppState, command: Command, out: &mut Vec<String>) {
    match command {
        Command::Name => out.push(format!(
            "m-name-{}-[{}]",
            state.settings.device_name, state.settings.vendor_name
        )),
        Command::SetName { device, vendor } => set_name(state, &device, vendor.as_deref(), out),
        Command::Profile => {
            let model = state.engine.model().0.lock().version().to_string();
            out.push(format!("m-profile-[{}]", env!("CARGO_PKG_VERSION")));
            out.push(format!("m-model-[{model}]"));
        }
        Command::Help => out.extend(HELP.lines().map(str::to_string)),
        Command::Start => start(state, out),
        Command::Stop => stop(state, out),
        Command::State => report_state(state, out),
        Command::Capture(samples) => capture(state, samples, out),
        Command::Extract(offset) => extract(state, offset, out),
        Command::InferWav(offset) => infer_wav(state, offset, out),
        Command::ExtractUartStream => extract_uart_stream(state, out),
        Command::RunModel => run_model(state, out),
        Command::Db(db) => run_db(state, db, out),
        Command::Log => {
            let (pos, text) = state.log.take();
            out.push(format!("Log contents[cp={pos}]:"));
            out.push(format!("<{text}>"));
        }
        Command::Empty => {
            out.push("Empty command (only a % read).  Type 'help%' for help".into())
        }
    }
}

fn set_name(state: &mut AppState, device: &str, vendor: Option<&str>, out: &mut Vec<String>) {
    let mut settings = state.settings.clone();
    settings.device_name = device.to_string();
    if let Some(vendor) = vendor {
        settings.vendor_name = vendor.to_string();
    }
    settings.normalize();
    if let Err(e) = save_settings(&state.settings_path, &settings) {
        warn!(path = %state.settings_path.display(), "failed to persist settings: {e}");
        out.push(format!("Error: could not save settings: {e}"));
        return;
    }
    info!(device = %settings.device_name, vendor = %settings.vendor_name, "device name updated");
    state.settings = settings;
    out.push(format!(
        "m-name-{}-[{}]",
        state.settings.device_name, state.settings.vendor_name
    ));
}

fn busy_message(err: &SwwError) -> Option<&'static str> {
    matches!(err, SwwError::Busy(_))
        .then_some("Acquisition currently in progress. Ignoring request")
}

fn start(state: &mut AppState, out: &mut Vec<String>) {
    match state.engine.start() {
        Ok(status) => {
            if state.engine.config().general_buffer_bytes == 0 {
                out.push(
                    "WARNING:  Activation buffer unavailable.  Activation logging will not work."
                        .into(),
                );
            }
            out.push("Listening for audio data ... ".into());
            out.push(format!("Receive initiated. status={}", status.code()));
        }
        Err(e) => out.push(busy_message(&e).map_or_else(|| format!("Error: {e}"), str::to_string)),
    }
}

fn stop(state: &mut AppState, out: &mut Vec<String>) {
    match state.engine.stop() {
        Ok(report) => match report.previous {
            AcquisitionState::Streaming => {
                out.push("Streaming stopped.".into());
                out.push("target activations: ".into());
                out.push(join_values(&report.activations));
            }
            _ => {
                out.push("Wav capture stopped.".into());
                out.push(format!("{} samples captured", report.samples_captured));
            }
        },
        Err(SwwError::NotRunning) => {
            out.push("Acquisition is already idle.  Ignoring stop request".into())
        }
        Err(SwwError::StopPending) => out.push("Stop already requested.".into()),
        Err(e) => out.push(format!("Error: {e}")),
    }
}

fn report_state(state: &AppState, out: &mut Vec<String>) {
    let (acq, status) = state.engine.state();
    out.push(format!("status={}, state={} ({acq:?})", status.code(), acq as u8));
    out.push("    Status: 0=OK, 1=Error, 2=Busy, 3=Timeout; State: 0=Idle, 1=Streaming, 2=FileCapture, 3=Stopping".into());
    let samples_read = state.engine.recording().map_or(0, <[i16]>::len);
    out.push(format!("samples_read={samples_read}"));
    match serde_json::to_string(&state.engine.diagnostics_snapshot()) {
        Ok(json) => out.push(format!("diagnostics={json}")),
        Err(e) => warn!("diagnostics not serializable: {e}"),
    }
}

fn capture(state: &mut AppState, samples: Option<usize>, out: &mut Vec<String>) {
    match state.engine.capture(samples) {
        Ok(request) => {
            match samples {
                Some(requested) if request.clamped => out.push(format!(
                    "Requested length {requested} exceeds available memory. Capturing {} samples",
                    request.samples
                )),
                None => out.push(format!(
                    "No length specified.  Capturing {} samples",
                    request.samples
                )),
                Some(_) => {}
            }
            out.push("Listening for audio data ... ".into());
            out.push(format!(
                "Receive initiated. status={}, state={}",
                request.status.code(),
                AcquisitionState::FileCapture as u8
            ));
        }
        Err(SwwError::BufferUnavailable(_)) => out.push(
            "WARNING: Recording buffer has no allocated memory. Capture will fail.".into(),
        ),
        Err(e) => out.push(busy_message(&e).map_or_else(|| format!("Error: {e}"), str::to_string)),
    }
}

fn extract(state: &AppState, offset: usize, out: &mut Vec<String>) {
    let config = state.engine.config();
    match extract_window(config, &state.reference, offset) {
        Ok(features) => {
            let input = &state.reference[offset..offset + config.window_len];
            let body = serde_json::json!({ "Input": input, "Output": features });
            out.push(body.to_string());
        }
        Err(e) => out.push(format!("Error: {e}")),
    }
}

fn infer_wav(state: &mut AppState, offset: usize, out: &mut Vec<String>) {
    out.push(format!("Inferring on reference wav with offset = {offset}"));
    let report = match infer_waveform(
        state.engine.config(),
        state.engine.model(),
        &state.reference,
        offset,
    ) {
        Ok(report) => report,
        Err(e) => {
            out.push(format!("Error: {e}"));
            return;
        }
    };

    for step in &report.steps {
        out.push(format!("({}, {}), ", join_values(&step.features), step.score));
        if step.detected {
            let line = format!("[{}]: Detection ({}).", step.index, step.score);
            state.log.write(&format!("{line}\r\n"));
            out.push(line);
        } else if step.near_miss {
            out.push(format!("[{}]: Near miss ({}). ", step.index, step.score));
        }
    }
    info!(
        steps = report.steps.len(),
        detections = report.detections().count(),
        "offline inference finished"
    );
}

fn extract_uart_stream(state: &mut AppState, out: &mut Vec<String>) {
    let stride = state.engine.config().window_stride;
    let samples = state.db.samples(Some(stride));
    match state.engine.process_mono_chunk(&samples) {
        Ok(cycle) => {
            out.push(format!("m-features-[{}]", join_signed(&cycle.features)));
            out.push(format!("m-activations-[{}]", join_signed(&cycle.output)));
        }
        Err(e) => out.push(busy_message(&e).map_or_else(|| format!("Error: {e}"), str::to_string)),
    }
}

fn run_model(state: &mut AppState, out: &mut Vec<String>) {
    match state.engine.run_model(None) {
        Ok(run) => {
            out.push(format!("Model run took {} us", run.elapsed.as_micros()));
            out.push(format!("Output = [{}]", join_values(&run.output)));
        }
        Err(e) => out.push(busy_message(&e).map_or_else(|| format!("Error: {e}"), str::to_string)),
    }
}

fn run_db(state: &mut AppState, command: DbCommand, out: &mut Vec<String>) {
    let db = &mut state.db;
    match command {
        DbCommand::Load(n) => match db.begin(n) {
            Ok(()) => out.push(format!("Expecting {n} bytes")),
            Err(message) => out.extend(message.lines().map(str::to_string)),
        },
        DbCommand::Data(hex) => match db.push_hex(&hex) {
            Ok(Upload::Done) => out.push("m-load-done".into()),
            Ok(Upload::Partial(n)) => out.push(format!("{n} bytes received")),
            Err(message) => out.extend(message.lines().map(str::to_string)),
        },
        DbCommand::GetPtr => out.push(format!("m-buff-ptr-{}", db.ptr())),
        DbCommand::SetPtr(ptr) => db.set_ptr(ptr),
        DbCommand::Print(n) => {
            let hex: Vec<String> = db.bytes(n).iter().map(|b| format!("{b:02x}")).collect();
            out.push(format!("m-buffer-{}", hex.join("-")));
        }
        DbCommand::PrintI16(n) => out.push(format!("[{}]", join_values(&db.samples(n)))),
    }
}

fn join_values<T: Display>(values: &[T]) -> String {
    values
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// `%+3d`-style: explicit sign, right-aligned to three columns.
fn join_signed(values: &[i8]) -> String {
    values
        .iter()
        .map(|v| format!("{v:+3}"))
        .collect::<Vec<_>>()
        .join(", ")
}
