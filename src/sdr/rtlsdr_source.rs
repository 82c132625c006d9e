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

//! RTL-SDR hardware source.
//!
//! Device enumeration, configuration, and the background read thread that
//! delivers IQ chunks to the acquisition bridge. Enable the `hardware`
//! feature to compile with RTL-SDR support.

use super::{ChunkCallback, SampleSource, SourceError};

/// RTL-SDR reads must be a multiple of 512 bytes (USB packet size); one
/// sample is two bytes, so chunk sizes must be multiples of 512 samples to
/// keep every read aligned.
pub const READ_ALIGNMENT: usize = 512;

/// Information about an RTL-SDR device.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    /// Device index (0-based)
    pub index: u32,
    /// Device name (manufacturer + product)
    pub name: String,
    /// Device serial number
    pub serial: String,
}

/// Gain mode for RTL-SDR tuner.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GainMode {
    /// Automatic gain control
    Auto,
    /// Manual gain (value in tenths of dB, e.g. 386 = 38.6 dB)
    Manual(i32),
}

impl GainMode {
    /// Build a gain mode from an optional dB value (`None` = AGC).
    #[must_use]
    pub fn from_db(gain_db: Option<f64>) -> Self {
        match gain_db {
            None => Self::Auto,
            #[allow(
                clippy::cast_possible_truncation,
                reason = "tuner gain range fits comfortably in i32"
            )]
            Some(db) => Self::Manual((db * 10.0).round() as i32),
        }
    }
}

/// RTL-SDR session parameters, applied inside the read thread at start.
#[derive(Debug, Clone)]
pub struct RtlSdrConfig {
    /// Device index to open
    pub device_index: u32,
    /// Center frequency in Hz
    pub center_frequency: u32,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Tuner gain mode
    pub gain_mode: GainMode,
    /// Frequency correction in PPM
    pub ppm_correction: i32,
}

impl Default for RtlSdrConfig {
    fn default() -> Self {
        Self {
            device_index: 0,
            center_frequency: 160_270_968,
            sample_rate: 2_400_000, // 2.4 MHz
            gain_mode: GainMode::Manual(386),
            ppm_correction: 0,
        }
    }
}

/// Enumerate available RTL-SDR devices.
///
/// Returns a list of device information for all connected RTL-SDR dongles.
/// When the `hardware` feature is disabled, returns an empty list.
#[cfg(feature = "hardware")]
pub fn list_devices() -> Vec<DeviceInfo> {
    let count = rtlsdr::get_device_count();
    let mut devices = Vec::new();

    #[allow(clippy::cast_sign_loss, reason = "librtlsdr indices are non-negative")]
    for i in 0..count {
        let name = rtlsdr::get_device_name(i);
        if let Ok(usb_strings) = rtlsdr::get_device_usb_strings(i) {
            devices.push(DeviceInfo {
                index: i as u32,
                name,
                serial: usb_strings.serial,
            });
        }
    }

    devices
}

/// Enumerate available RTL-SDR devices (stub when hardware feature is disabled).
#[cfg(not(feature = "hardware"))]
pub fn list_devices() -> Vec<DeviceInfo> {
    log::warn!("RTL-SDR hardware support not compiled (enable 'hardware' feature)");
    Vec::new()
}

/// RTL-SDR sample source.
///
/// The librtlsdr handle is not `Send`, so the device is opened, configured,
/// and read entirely inside the background thread spawned by
/// `start_async_read`; initialization errors are reported back
/// synchronously over a channel. Each successful `read_sync` yields exactly
/// one chunk, converted from interleaved u8 IQ to `Complex<f32>` and handed
/// to the delivery callback on that thread.
#[derive(Debug)]
pub struct RtlSdrSource {
    config: RtlSdrConfig,
    #[cfg_attr(not(feature = "hardware"), allow(dead_code, reason = "hardware-only"))]
    opened: bool,
    #[cfg_attr(not(feature = "hardware"), allow(dead_code, reason = "hardware-only"))]
    stop_flag: std::sync::Arc<std::sync::atomic::AtomicBool>,
    #[cfg_attr(not(feature = "hardware"), allow(dead_code, reason = "hardware-only"))]
    thread: Option<std::thread::JoinHandle<()>>,
}

impl RtlSdrSource {
    /// Create a source for the given session parameters.
    #[must_use]
    pub fn new(config: RtlSdrConfig) -> Self {
        Self {
            config,
            opened: false,
            stop_flag: std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false)),
            thread: None,
        }
    }
}

#[cfg(feature = "hardware")]
impl SampleSource for RtlSdrSource {
    fn open(&mut self) -> Result<(), SourceError> {
        let count = rtlsdr::get_device_count();
        #[allow(clippy::cast_sign_loss, reason = "librtlsdr count is non-negative")]
        if self.config.device_index >= count as u32 {
            return Err(SourceError::Open(format!(
                "RTL-SDR device {} not found ({count} device(s) present)",
                self.config.device_index
            )));
        }
        self.opened = true;
        Ok(())
    }

    fn close(&mut self) {
        if self.thread.is_some() {
            let _ = self.cancel_read();
        }
        self.opened = false;
    }

    fn sample_rate(&self) -> f64 {
        f64::from(self.config.sample_rate)
    }

    fn alignment(&self) -> usize {
        READ_ALIGNMENT
    }

    fn start_async_read(
        &mut self,
        mut callback: ChunkCallback,
        chunk_size: usize,
    ) -> Result<(), SourceError> {
        use std::sync::atomic::Ordering;

        if self.thread.is_some() {
            return Err(SourceError::AlreadyReading);
        }
        if !self.opened {
            return Err(SourceError::Open("RTL-SDR source is not open".into()));
        }

        let config = self.config.clone();
        self.stop_flag.store(false, Ordering::Relaxed);
        let stop_flag = self.stop_flag.clone();

        // Channel to communicate initialization errors back to this thread
        let (init_tx, init_rx) = std::sync::mpsc::channel::<Result<(), SourceError>>();

        let thread = std::thread::spawn(move || {
            #[allow(clippy::cast_possible_wrap, reason = "librtlsdr expects i32 indices")]
            let mut device = match rtlsdr::open(config.device_index as i32) {
                Ok(dev) => dev,
                Err(e) => {
                    let _ = init_tx.send(Err(SourceError::Open(format!(
                        "failed to open RTL-SDR device {}: {e}",
                        config.device_index
                    ))));
                    return;
                }
            };

            if let Err(e) = device.set_center_freq(config.center_frequency) {
                let _ = init_tx.send(Err(SourceError::Config(format!(
                    "failed to set center frequency: {e}"
                ))));
                return;
            }
            if let Err(e) = device.set_sample_rate(config.sample_rate) {
                let _ = init_tx.send(Err(SourceError::Config(format!(
                    "failed to set sample rate: {e}"
                ))));
                return;
            }
            match config.gain_mode {
                GainMode::Auto => {
                    if let Err(e) = device.set_tuner_gain_mode(false) {
                        let _ = init_tx.send(Err(SourceError::Config(format!(
                            "failed to set gain mode: {e}"
                        ))));
                        return;
                    }
                }
                GainMode::Manual(gain_tenths_db) => {
                    if let Err(e) = device.set_tuner_gain_mode(true) {
                        let _ = init_tx.send(Err(SourceError::Config(format!(
                            "failed to set gain mode: {e}"
                        ))));
                        return;
                    }
                    if let Err(e) = device.set_tuner_gain(gain_tenths_db) {
                        let _ = init_tx.send(Err(SourceError::Config(format!(
                            "failed to set gain: {e}"
                        ))));
                        return;
                    }
                }
            }
            if config.ppm_correction != 0 {
                if let Err(e) = device.set_freq_correction(config.ppm_correction) {
                    let _ = init_tx.send(Err(SourceError::Config(format!(
                        "failed to set PPM correction: {e}"
                    ))));
                    return;
                }
            }
            if let Err(e) = device.reset_buffer() {
                let _ = init_tx.send(Err(SourceError::Open(format!(
                    "failed to reset buffer: {e}"
                ))));
                return;
            }

            log::info!("RTL-SDR configured:");
            log::info!(
                "  Center frequency: {:.3} MHz",
                f64::from(config.center_frequency) / 1e6
            );
            log::info!("  Sample rate: {:.3} MHz", f64::from(config.sample_rate) / 1e6);
            log::info!("  Gain: {:?}", config.gain_mode);
            log::info!("  PPM correction: {}", config.ppm_correction);

            let _ = init_tx.send(Ok(()));

            let read_bytes = chunk_size * 2;
            let mut read_count = 0u64;
            log::info!("starting RTL-SDR read loop ({read_bytes} bytes per read)...");

            while !stop_flag.load(Ordering::Relaxed) {
                #[allow(clippy::cast_possible_wrap, reason = "librtlsdr expects i32 lengths")]
                match device.read_sync(read_bytes as i32) {
                    Ok(buf) => {
                        read_count += 1;
                        if read_count % 100 == 0 {
                            log::debug!("RTL-SDR read #{read_count}: {} bytes", buf.len());
                        }

                        // Interleaved uint8 I,Q centered on 127.5; rescale
                        // to -1.0..1.0.
                        let chunk: Vec<num_complex::Complex32> = buf
                            .chunks_exact(2)
                            .map(|iq| {
                                num_complex::Complex32::new(
                                    (f32::from(iq[0]) - 127.5) / 127.5,
                                    (f32::from(iq[1]) - 127.5) / 127.5,
                                )
                            })
                            .collect();
                        callback(chunk);
                    }
                    Err(e) => {
                        log::error!(
                            "RTL-SDR read error after {read_count} successful reads: {e}"
                        );
                        break;
                    }
                }
            }

            log::info!(
                "RTL-SDR read loop exited after {read_count} reads, closing USB handle"
            );
            drop(device);
        });

        // Surface configuration failures synchronously.
        match init_rx.recv_timeout(std::time::Duration::from_secs(5)) {
            Ok(Ok(())) => {
                self.thread = Some(thread);
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                self.stop_flag.store(true, Ordering::Relaxed);
                Err(SourceError::Open("RTL-SDR initialization timed out".into()))
            }
        }
    }

    fn cancel_read(&mut self) -> Result<(), SourceError> {
        let Some(thread) = self.thread.take() else {
            return Err(SourceError::NotStreaming);
        };
        self.stop_flag
            .store(true, std::sync::atomic::Ordering::Relaxed);
        if thread.join().is_err() {
            log::error!("RTL-SDR read thread panicked");
        }
        Ok(())
    }
}

/// Stub implementation when hardware feature is disabled.
#[cfg(not(feature = "hardware"))]
impl SampleSource for RtlSdrSource {
    fn open(&mut self) -> Result<(), SourceError> {
        Err(SourceError::Open(
            "RTL-SDR hardware support not compiled (enable 'hardware' feature)".into(),
        ))
    }

    fn close(&mut self) {
        self.opened = false;
    }

    fn sample_rate(&self) -> f64 {
        f64::from(self.config.sample_rate)
    }

    fn alignment(&self) -> usize {
        READ_ALIGNMENT
    }

    fn start_async_read(
        &mut self,
        _callback: ChunkCallback,
        _chunk_size: usize,
    ) -> Result<(), SourceError> {
        Err(SourceError::Open(
            "RTL-SDR hardware support not compiled (enable 'hardware' feature)".into(),
        ))
    }

    fn cancel_read(&mut self) -> Result<(), SourceError> {
        Err(SourceError::NotStreaming)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gain_mode_from_db() {
        assert_eq!(GainMode::from_db(None), GainMode::Auto);
        assert_eq!(GainMode::from_db(Some(38.6)), GainMode::Manual(386));
        assert_eq!(GainMode::from_db(Some(49.6)), GainMode::Manual(496));
    }

    #[test]
    fn default_config_matches_session_defaults() {
        let config = RtlSdrConfig::default();
        assert_eq!(config.sample_rate, 2_400_000);
        assert_eq!(config.center_frequency, 160_270_968);
        assert_eq!(config.gain_mode, GainMode::Manual(386));
    }
}
