// Copyright 2025 Chris Custine
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! IQ recording playback source.
//!
//! Replays `.cf32` raw IQ (interleaved little-endian float32 pairs) or
//! 16-bit stereo WAV recordings (left = I, right = Q), delivering chunks
//! from a background thread at the configured sample rate. Used for offline
//! runs and tests; implements the same [`SampleSource`] contract as the
//! RTL-SDR source.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use hound::WavReader;
use num_complex::Complex32;

use super::{ChunkCallback, SampleSource, SourceError};

/// Playback source for raw IQ or WAV recordings.
#[derive(Debug)]
pub struct FileSource {
    path: PathBuf,
    sample_rate: f64,
    /// Pace delivery at the sample rate instead of replaying flat-out.
    throttle: bool,
    samples: Option<Arc<Vec<Complex32>>>,
    thread: Option<JoinHandle<()>>,
    stop_flag: Arc<AtomicBool>,
}

impl FileSource {
    /// Create a playback source for `path`. Nothing is read until
    /// [`open`](SampleSource::open).
    pub fn new(path: impl AsRef<Path>, sample_rate: f64, throttle: bool) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            sample_rate,
            throttle,
            samples: None,
            thread: None,
            stop_flag: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Total samples loaded, once open.
    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.as_ref().map_or(0, |s| s.len())
    }

    /// True before `open` or for an empty recording.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn load_cf32(path: &Path) -> Result<Vec<Complex32>, SourceError> {
        let bytes = fs::read(path)?;
        if bytes.len() % 8 != 0 {
            return Err(SourceError::Open(format!(
                "{}: length {} is not a whole number of IQ float32 pairs",
                path.display(),
                bytes.len()
            )));
        }
        let samples = bytes
            .chunks_exact(8)
            .map(|pair| {
                let i = f32::from_le_bytes([pair[0], pair[1], pair[2], pair[3]]);
                let q = f32::from_le_bytes([pair[4], pair[5], pair[6], pair[7]]);
                Complex32::new(i, q)
            })
            .collect();
        Ok(samples)
    }

    fn load_wav(path: &Path) -> Result<Vec<Complex32>, SourceError> {
        let mut reader = WavReader::open(path)
            .map_err(|e| SourceError::Open(format!("{}: {e}", path.display())))?;
        let spec = reader.spec();
        if spec.channels != 2 {
            return Err(SourceError::Open(format!(
                "WAV IQ recordings must be stereo, found {} channel(s)",
                spec.channels
            )));
        }
        if spec.bits_per_sample != 16 {
            return Err(SourceError::Open(format!(
                "WAV IQ recordings must be 16-bit, found {} bits per sample",
                spec.bits_per_sample
            )));
        }

        #[allow(clippy::cast_possible_truncation, reason = "capacity hint only")]
        let mut samples = Vec::with_capacity(reader.duration() as usize);
        let mut interleaved = reader.samples::<i16>();
        while let (Some(i), Some(q)) = (interleaved.next(), interleaved.next()) {
            let i = i.map_err(|e| SourceError::Open(e.to_string()))?;
            let q = q.map_err(|e| SourceError::Open(e.to_string()))?;
            // Normalize int16 to -1.0..1.0, same scaling as live capture.
            samples.push(Complex32::new(
                f32::from(i) / 32768.0,
                f32::from(q) / 32768.0,
            ));
        }
        Ok(samples)
    }
}

impl SampleSource for FileSource {
    fn open(&mut self) -> Result<(), SourceError> {
        let extension = self
            .path
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or("")
            .to_lowercase();

        let samples = if extension == "wav" {
            Self::load_wav(&self.path)?
        } else {
            if !matches!(extension.as_str(), "cf32" | "iq" | "cfile") {
                log::warn!("unknown file extension '.{extension}', assuming raw IQ format");
            }
            Self::load_cf32(&self.path)?
        };

        #[allow(clippy::cast_precision_loss, reason = "duration log only")]
        log::info!(
            "opened IQ recording {} ({} samples, {:.2} s at {:.3} MHz)",
            self.path.display(),
            samples.len(),
            samples.len() as f64 / self.sample_rate,
            self.sample_rate / 1e6
        );
        self.samples = Some(Arc::new(samples));
        Ok(())
    }

    fn close(&mut self) {
        if self.thread.is_some() {
            let _ = self.cancel_read();
        }
        self.samples = None;
    }

    fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    fn start_async_read(
        &mut self,
        mut callback: ChunkCallback,
        chunk_size: usize,
    ) -> Result<(), SourceError> {
        if self.thread.is_some() {
            return Err(SourceError::AlreadyReading);
        }
        let Some(samples) = self.samples.clone() else {
            return Err(SourceError::Open(format!(
                "{} is not open",
                self.path.display()
            )));
        };
        if chunk_size == 0 {
            return Err(SourceError::Config("chunk size must be non-zero".into()));
        }

        self.stop_flag.store(false, Ordering::Relaxed);
        let stop_flag = self.stop_flag.clone();
        let chunk_interval = if self.throttle {
            Duration::from_secs_f64(chunk_size as f64 / self.sample_rate)
        } else {
            Duration::ZERO
        };

        self.thread = Some(std::thread::spawn(move || {
            for chunk in samples.chunks(chunk_size) {
                if stop_flag.load(Ordering::Relaxed) {
                    log::debug!("file playback cancelled");
                    return;
                }
                callback(chunk.to_vec());
                if !chunk_interval.is_zero() {
                    std::thread::sleep(chunk_interval);
                }
            }
            log::info!("IQ recording playback finished");
        }));
        Ok(())
    }

    fn cancel_read(&mut self) -> Result<(), SourceError> {
        let Some(thread) = self.thread.take() else {
            return Err(SourceError::NotStreaming);
        };
        self.stop_flag.store(true, Ordering::Relaxed);
        if thread.join().is_err() {
            log::error!("file playback thread panicked");
        }
        Ok(())
    }
}

impl Drop for FileSource {
    fn drop(&mut self) {
        self.close();
    }
}
