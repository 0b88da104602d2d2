//! Host state shared by the command handlers.
//!
//! `AppState` owns the engine plus the two host-side buffers the command
//! boundary exposes: the `db` upload buffer and the text event log.

use std::path::PathBuf;

use sww_core::WakewordEngine;

use crate::settings::AppSettings;

pub struct AppState {
    pub engine: WakewordEngine,
    pub settings: AppSettings,
    /// Where `set_name` persists `settings`.
    pub settings_path: PathBuf,
    /// Mono reference waveform at the engine rate.
    pub reference: Vec<i16>,
    pub db: DbBuffer,
    pub log: LogBuffer,
}

impl AppState {
    pub fn new(
        engine: WakewordEngine,
        settings: AppSettings,
        settings_path: PathBuf,
        reference: Vec<i16>,
    ) -> Self {
        // One transfer's worth of bytes, enough for a mono stride of samples.
        let db_bytes = engine.config().chunk_len() * std::mem::size_of::<i16>();
        let log = LogBuffer::new(settings.log_capacity);
        Self {
            engine,
            settings,
            settings_path,
            reference,
            db: DbBuffer::new(db_bytes),
            log,
        }
    }
}

/// Outcome of a hex upload segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upload {
    /// The announced size (or the buffer) is full; upload mode ends.
    Done,
    /// Bytes loaded so far.
    Partial(usize),
}

/// Host-visible byte buffer filled by `db load N` followed by hex segments.
#[derive(Debug)]
pub struct DbBuffer {
    bytes: Vec<u8>,
    /// Upload mode: `db load` was issued and the transfer is not complete.
    loading: bool,
    transfer_size: usize,
    loaded: usize,
}

impl DbBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            bytes: vec![0; capacity],
            loading: false,
            transfer_size: 0,
            loaded: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.bytes.len()
    }

    /// Enter upload mode for `size` bytes and rewind the write pointer.
    pub fn begin(&mut self, size: usize) -> Result<(), String> {
        if size == 0 {
            self.loading = false;
            return Err(format!(
                "Error: Transfer size ({size}) must be valid int; greater than 0.\nUsage: 'db load N'; N>0"
            ));
        }
        self.loading = true;
        self.transfer_size = size;
        self.loaded = 0;
        Ok(())
    }

    /// Decode one hex segment into the buffer. Pairs decoded before a bad
    /// pair stay in the buffer.
    pub fn push_hex(&mut self, hex: &str) -> Result<Upload, String> {
        if !self.loading {
            return Err(
                "Error: Must issue db load <Nbytes> command before transmitting data.".into(),
            );
        }
        let digits = hex.as_bytes();
        if digits.len() % 2 != 0 {
            return Err(format!(
                "Error: number of hex digits in data string must be even. Received {}\nStill waiting for data",
                digits.len()
            ));
        }

        for (i, pair) in digits.chunks_exact(2).enumerate() {
            let byte = std::str::from_utf8(pair)
                .ok()
                .filter(|p| p.bytes().all(|b| b.is_ascii_hexdigit()))
                .and_then(|p| u8::from_str_radix(p, 16).ok());
            let Some(byte) = byte else {
                return Err(format!(
                    "Error: Received non-hex digit in character pair '{}' at location {}\nCanceling segment upload. Still waiting for data",
                    String::from_utf8_lossy(pair),
                    2 * i + 2
                ));
            };
            if let Some(slot) = self.bytes.get_mut(self.loaded) {
                *slot = byte;
            }
            self.loaded += 1;
            if self.loaded >= self.bytes.len() || self.loaded >= self.transfer_size {
                self.loading = false;
                return Ok(Upload::Done);
            }
        }
        Ok(Upload::Partial(self.loaded))
    }

    pub fn ptr(&self) -> usize {
        self.loaded
    }

    /// Move the write pointer, clamped to the buffer.
    pub fn set_ptr(&mut self, ptr: usize) {
        self.loaded = ptr.min(self.bytes.len());
    }

    /// First `n` bytes; `None`, zero or anything past the end means all.
    pub fn bytes(&self, n: Option<usize>) -> &[u8] {
        let n = match n {
            Some(n) if n > 0 && n <= self.bytes.len() => n,
            _ => self.bytes.len(),
        };
        &self.bytes[..n]
    }

    /// First `n` little-endian `i16` values, with the same clamping as `bytes`.
    pub fn samples(&self, n: Option<usize>) -> Vec<i16> {
        let max = self.bytes.len() / 2;
        let n = match n {
            Some(n) if n > 0 && n <= max => n,
            _ => max,
        };
        self.bytes
            .chunks_exact(2)
            .take(n)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect()
    }
}

/// Bounded text log. A message that would not fit clears the buffer first.
#[derive(Debug)]
pub struct LogBuffer {
    text: String,
    capacity: usize,
}

impl LogBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            text: String::with_capacity(capacity),
            capacity: capacity.max(2),
        }
    }

    pub fn write(&mut self, message: &str) {
        if self.text.len() + message.len() >= self.capacity {
            self.text.clear();
        }
        let mut end = message.len().min(self.capacity - 1);
        while !message.is_char_boundary(end) {
            end -= 1;
        }
        self.text.push_str(&message[..end]);
    }

    /// Current write position in bytes.
    pub fn position(&self) -> usize {
        self.text.len()
    }

    /// `(position, contents)`, leaving the log empty.
    pub fn take(&mut self) -> (usize, String) {
        let pos = self.text.len();
        (pos, std::mem::take(&mut self.text))
    }
}
