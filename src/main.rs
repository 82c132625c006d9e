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

//! pulsetrack: track a periodic VHF beacon with an RTL-SDR.
//!
//! Wires the acquisition bridge into the pulse detector: chunks stream from
//! the source into the bounded buffer, windows are pulled off and processed
//! on a blocking worker so the consumer loop never waits behind CPU-bound
//! filtering, and each detected pulse goes to the event sink.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use mimalloc::MiMalloc;
use tokio_util::sync::CancellationToken;

use pulsetrack::bridge::AcquisitionBridge;
use pulsetrack::buffer::StreamBuffer;
use pulsetrack::config::{SampleConfig, DEFAULT_BUFFER_WINDOWS};
use pulsetrack::dsp::scan::CarrierScan;
use pulsetrack::dsp::{DetectorConfig, PulseDetector};
use pulsetrack::sdr::file_source::FileSource;
use pulsetrack::sdr::rtlsdr_source::{list_devices, GainMode, RtlSdrConfig, RtlSdrSource};
use pulsetrack::sdr::SampleSource;
use pulsetrack::sink::{EventSink, LogSink};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

/// Normalized magnitude a scan FFT block must clear to report a carrier.
const SCAN_THRESHOLD: f32 = 0.1;

#[derive(Debug, Parser)]
#[command(name = "pulsetrack", version, about = "RTL-SDR beacon pulse tracker")]
struct Args {
    /// Replay an IQ recording (.cf32/.iq/.cfile raw or 16-bit stereo .wav)
    /// instead of live hardware
    #[arg(long, value_name = "PATH")]
    file: Option<PathBuf>,

    /// RTL-SDR device index
    #[arg(long, default_value_t = 0)]
    device: u32,

    /// List connected RTL-SDR devices and exit
    #[arg(long)]
    list_devices: bool,

    /// Sample rate in Hz
    #[arg(long, default_value_t = 2.4e6)]
    sample_rate: f64,

    /// Tuned center frequency in Hz
    #[arg(long, default_value_t = 160_270_968)]
    center_freq: u32,

    /// Tuner gain in dB
    #[arg(long, default_value_t = 38.6, conflicts_with = "agc")]
    gain: f64,

    /// Use automatic gain control instead of a fixed gain
    #[arg(long)]
    agc: bool,

    /// Frequency correction in PPM
    #[arg(long, default_value_t = 0)]
    ppm: i32,

    /// Samples per chunk read from the source (RTL-SDR requires a multiple
    /// of 512)
    #[arg(long, default_value_t = 65_536)]
    chunk_size: usize,

    /// Samples per detection window
    #[arg(long, default_value_t = 102_400)]
    window: usize,

    /// Beacon carrier offset from the tuned center, in Hz
    #[arg(long, default_value_t = -4.38e5, allow_hyphen_values = true)]
    freq_offset: f64,

    /// FIR low-pass tap count
    #[arg(long, default_value_t = 501)]
    fir_taps: usize,

    /// FIR cutoff, normalized to Nyquist
    #[arg(long, default_value_t = 0.02)]
    fir_cutoff: f64,

    /// Decimation factor after filtering
    #[arg(long, default_value_t = 100)]
    decimation: usize,

    /// Envelope smoothing length, in decimated samples
    #[arg(long, default_value_t = 10)]
    smoothing: usize,

    /// Absolute detection threshold on the smoothed envelope
    #[arg(long, default_value_t = 0.9)]
    threshold: f32,

    /// Buffer capacity in samples (default: three windows)
    #[arg(long)]
    buffer_capacity: Option<usize>,

    /// Run a coarse FFT carrier scan on one window and exit
    #[arg(long)]
    scan: bool,

    /// Beacon beep duration in seconds (sets the scan FFT size)
    #[arg(long, default_value_t = 0.017)]
    beep_duration: f64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    if args.list_devices {
        let devices = list_devices();
        if devices.is_empty() {
            println!("no RTL-SDR devices found");
        }
        for d in devices {
            println!("{}: {} (serial {})", d.index, d.name, d.serial);
        }
        return Ok(());
    }

    run(args).await
}

async fn run(args: Args) -> anyhow::Result<()> {
    let sample_config = SampleConfig {
        sample_rate: args.sample_rate,
        center_freq: args.center_freq,
        gain_db: if args.agc { None } else { Some(args.gain) },
        chunk_size: args.chunk_size,
    };
    let detector_config = DetectorConfig {
        sample_rate: args.sample_rate,
        freq_offset: args.freq_offset,
        window_len: args.window,
        fir_taps: args.fir_taps,
        fir_cutoff: args.fir_cutoff,
        decimation: args.decimation,
        smooth_len: args.smoothing,
        threshold: args.threshold,
    };
    let mut detector = PulseDetector::new(detector_config)?;

    let capacity = args
        .buffer_capacity
        .unwrap_or(args.window * DEFAULT_BUFFER_WINDOWS);
    if capacity != 0 && capacity < args.window {
        bail!(
            "buffer capacity {capacity} cannot hold one {}-sample window",
            args.window
        );
    }

    let mut source: Box<dyn SampleSource> = if let Some(path) = &args.file {
        Box::new(FileSource::new(path, sample_config.sample_rate, true))
    } else {
        #[allow(
            clippy::cast_possible_truncation,
            clippy::cast_sign_loss,
            reason = "RTL-SDR sample rates fit in u32"
        )]
        let rtl_config = RtlSdrConfig {
            device_index: args.device,
            center_frequency: sample_config.center_freq,
            sample_rate: sample_config.sample_rate as u32,
            gain_mode: GainMode::from_db(sample_config.gain_db),
            ppm_correction: args.ppm,
        };
        Box::new(RtlSdrSource::new(rtl_config))
    };
    source.open().context("opening sample source")?;

    let buffer = Arc::new(StreamBuffer::new(capacity));
    let mut bridge = AcquisitionBridge::new(source, buffer.clone());
    bridge.start(sample_config.chunk_size)?;

    if args.scan {
        let window = buffer
            .get_timeout(args.window, Duration::from_secs(30))
            .await
            .context("no samples arrived within 30 s")?;
        let scanner = CarrierScan::new(args.sample_rate, args.beep_duration, SCAN_THRESHOLD);
        let offsets = scanner.scan(&window);
        if offsets.is_empty() {
            log::info!("no carriers above threshold in the scanned window");
        }
        for f in offsets {
            log::info!("carrier at {:+.1} kHz from center", f / 1e3);
        }
        bridge.stop().await;
        return Ok(());
    }

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                log::info!("interrupt received, stopping session");
                shutdown.cancel();
            }
        });
    }

    let mut sink = LogSink;
    loop {
        tokio::select! {
            () = shutdown.cancelled() => {
                bridge.stop().await;
                break;
            }
            result = buffer.get(args.window) => match result {
                Ok(window) => {
                    // Keep the numerically heavy pass off the consumer's
                    // scheduling path.
                    let mut d = detector;
                    let (d, events) = tokio::task::spawn_blocking(move || {
                        let events = d.process(&window);
                        (d, events)
                    })
                    .await
                    .context("detector worker failed")?;
                    detector = d;
                    for event in &events {
                        sink.publish(event);
                    }
                }
                Err(_) => break,
            }
        }
    }

    bridge.stop().await;
    log::info!(
        "session complete: {} samples processed, {} chunk(s) lost to overruns",
        detector.samples_processed(),
        bridge.overruns()
    );
    Ok(())
}
