//! WAV file I/O via `hound`.
//!
//! Reference clips are loaded as i16 mono at the engine rate (first channel
//! only, matching what the streaming path keeps from a stereo transfer).
//! Finished captures are written back as interleaved 16-bit PCM.

use std::path::Path;

use tracing::info;

use crate::audio::resample::resample_i16;
use crate::error::{Result, SwwError};

/// Decoded first-channel samples plus the file's original format.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedWave {
    pub samples: Vec<i16>,
    pub source_rate: u32,
    pub source_channels: u16,
}

fn wav_err(e: hound::Error) -> SwwError {
    match e {
        hound::Error::IoError(io) => SwwError::Io(io),
        other => SwwError::Audio(other.to_string()),
    }
}

/// Read `path`, keep channel 0 and resample to `target_rate` when needed.
///
/// # Errors
/// `SwwError::Io` for filesystem failures, `SwwError::Audio` for malformed
/// or unsupported files.
pub fn load_mono_i16(path: &Path, target_rate: u32) -> Result<LoadedWave> {
    let mut reader = hound::WavReader::open(path).map_err(wav_err)?;
    let spec = reader.spec();
    let channels = usize::from(spec.channels.max(1));

    let interleaved: Vec<i16> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .map(|s| s.map(|v| (v * 32768.0).clamp(-32768.0, 32767.0) as i16))
            .collect::<std::result::Result<_, _>>()
            .map_err(wav_err)?,
        hound::SampleFormat::Int if spec.bits_per_sample <= 16 => reader
            .samples::<i16>()
            .collect::<std::result::Result<_, _>>()
            .map_err(wav_err)?,
        hound::SampleFormat::Int => {
            let shift = spec.bits_per_sample - 16;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| (v >> shift) as i16))
                .collect::<std::result::Result<_, _>>()
                .map_err(wav_err)?
        }
    };

    let first: Vec<i16> = interleaved.iter().step_by(channels).copied().collect();
    let samples = resample_i16(&first, spec.sample_rate, target_rate)?;

    info!(
        path = %path.display(),
        source_rate = spec.sample_rate,
        channels = spec.channels,
        samples = samples.len(),
        "reference waveform loaded"
    );

    Ok(LoadedWave {
        samples,
        source_rate: spec.sample_rate,
        source_channels: spec.channels,
    })
}

/// Write interleaved i16 samples as a 16-bit PCM WAV file.
///
/// # Errors
/// `SwwError::Io` / `SwwError::Audio` on write failure.
pub fn write_i16(path: &Path, samples: &[i16], sample_rate: u32, channels: u16) -> Result<()> {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).map_err(wav_err)?;
    for &s in samples {
        writer.write_sample(s).map_err(wav_err)?;
    }
    writer.finalize().map_err(wav_err)?;
    info!(path = %path.display(), samples = samples.len(), "capture written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("sww-wav-{}-{name}.wav", std::process::id()))
    }

    #[test]
    fn stereo_file_loads_first_channel() {
        let path = temp_path("stereo");
        let interleaved = [10i16, -10, 20, -20, 30, -30];
        write_i16(&path, &interleaved, 16_000, 2).unwrap();

        let loaded = load_mono_i16(&path, 16_000).unwrap();
        assert_eq!(loaded.samples, vec![10, 20, 30]);
        assert_eq!(loaded.source_channels, 2);
        assert_eq!(loaded.source_rate, 16_000);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn other_rates_are_resampled() {
        let path = temp_path("8k");
        write_i16(&path, &vec![0i16; 4_000], 8_000, 1).unwrap();
        let loaded = load_mono_i16(&path, 16_000).unwrap();
        assert_eq!(loaded.samples.len(), 8_000);
        assert_eq!(loaded.source_rate, 8_000);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = load_mono_i16(Path::new("/definitely/not/here.wav"), 16_000).unwrap_err();
        assert!(matches!(err, SwwError::Io(_)));
    }
}
