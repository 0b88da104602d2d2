//! Persistent host settings (JSON file in the app data directory).

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sww_core::EngineConfig;

/// Upper bound on the general-purpose buffer a settings file may request.
const MAX_GENERAL_BUFFER_BYTES: usize = 4 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct AppSettings {
    /// Identity reported by the `name` command.
    pub device_name: String,
    pub vendor_name: String,
    /// Reference waveform used by `extract`, `infer_wav` and the replay
    /// source. `None` replays silence.
    pub reference_wav: Option<PathBuf>,
    /// Where finished captures are written as WAV. `None` only prints them.
    pub capture_output: Option<PathBuf>,
    /// Pace the replay source to wall-clock time.
    pub realtime_replay: bool,
    pub loop_replay: bool,
    pub detect_threshold: i8,
    pub near_miss_threshold: i8,
    pub general_buffer_bytes: usize,
    /// Bytes kept by the `log` command buffer before it wraps.
    pub log_capacity: usize,
    /// Seconds of silence replayed when no reference waveform is set.
    pub silence_seconds: u32,
}

impl Default for AppSettings {
    fn default() -> Self {
        let engine = EngineConfig::default();
        Self {
            device_name: "sww-host".into(),
            vendor_name: "sww".into(),
            reference_wav: None,
            capture_output: None,
            realtime_replay: true,
            loop_replay: false,
            detect_threshold: engine.detect_threshold,
            near_miss_threshold: engine.near_miss_threshold,
            general_buffer_bytes: engine.general_buffer_bytes,
            log_capacity: 1024,
            silence_seconds: 10,
        }
    }
}

impl AppSettings {
    pub fn normalize(&mut self) {
        self.device_name = normalize_name(&self.device_name, "sww-host");
        self.vendor_name = normalize_name(&self.vendor_name, "sww");
        self.reference_wav = normalize_path(self.reference_wav.take());
        self.capture_output = normalize_path(self.capture_output.take());
        if self.near_miss_threshold > self.detect_threshold {
            self.near_miss_threshold = self.detect_threshold;
        }
        self.general_buffer_bytes = self.general_buffer_bytes.min(MAX_GENERAL_BUFFER_BYTES);
        self.log_capacity = self.log_capacity.clamp(64, 64 * 1024);
        self.silence_seconds = self.silence_seconds.clamp(1, 600);
    }

    /// Engine configuration for these settings; everything not exposed here
    /// keeps its default.
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            detect_threshold: self.detect_threshold,
            near_miss_threshold: self.near_miss_threshold,
            general_buffer_bytes: self.general_buffer_bytes,
            ..EngineConfig::default()
        }
    }
}

fn normalize_name(raw: &str, fallback: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        fallback.into()
    } else {
        trimmed.replace(char::is_whitespace, "-")
    }
}

fn normalize_path(raw: Option<PathBuf>) -> Option<PathBuf> {
    raw.filter(|p| !p.as_os_str().is_empty())
}

pub fn default_settings_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("sww")
            .join("settings.json")
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var_os("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                std::env::var_os("HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("/tmp"))
                    .join(".local")
                    .join("share")
            })
            .join("sww")
            .join("settings.json")
    }
}

/// Read settings from `path`. A missing or unparsable file yields defaults.
pub fn load_settings(path: &Path) -> AppSettings {
    let mut settings = fs::read_to_string(path)
        .ok()
        .and_then(|raw| serde_json::from_str::<AppSettings>(&raw).ok())
        .unwrap_or_default();
    settings.normalize();
    settings
}

pub fn save_settings(path: &Path, settings: &AppSettings) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(settings).map_err(std::io::Error::other)?;
    fs::write(path, json)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("sww-settings-{}-{name}.json", std::process::id()))
    }

    #[test]
    fn missing_file_yields_defaults() {
        let settings = load_settings(&temp_path("missing"));
        assert_eq!(settings, AppSettings::default());
        assert_eq!(settings.engine_config(), EngineConfig::default());
    }

    #[test]
    fn partial_camel_case_file_fills_defaults() {
        let path = temp_path("partial");
        fs::write(&path, r#"{ "detectThreshold": 90, "logCapacity": 1 }"#).unwrap();
        let settings = load_settings(&path);
        let _ = fs::remove_file(&path);

        assert_eq!(settings.detect_threshold, 90);
        assert_eq!(settings.near_miss_threshold, 90, "clamped to the detection threshold");
        assert_eq!(settings.log_capacity, 64);
        assert_eq!(settings.device_name, "sww-host");
        assert_eq!(settings.engine_config().detect_threshold, 90);
    }

    #[test]
    fn save_then_load_keeps_values() {
        let path = temp_path("roundtrip");
        let mut settings = AppSettings {
            device_name: "  bench rig ".into(),
            reference_wav: Some(PathBuf::from("/data/marvin.wav")),
            general_buffer_bytes: 8_000,
            ..AppSettings::default()
        };
        settings.normalize();
        save_settings(&path, &settings).unwrap();
        let loaded = load_settings(&path);
        let _ = fs::remove_file(&path);

        assert_eq!(loaded.device_name, "bench-rig");
        assert_eq!(loaded, settings);
        assert_eq!(loaded.engine_config().recording_capacity(), 4_000);
    }

    #[test]
    fn oversized_buffer_is_capped() {
        let mut settings = AppSettings {
            general_buffer_bytes: usize::MAX,
            reference_wav: Some(PathBuf::new()),
            ..AppSettings::default()
        };
        settings.normalize();
        assert_eq!(settings.general_buffer_bytes, MAX_GENERAL_BUFFER_BYTES);
        assert_eq!(settings.reference_wav, None);
    }
}
