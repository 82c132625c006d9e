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

//! Coarse FFT carrier scan.
//!
//! Diagnostic aid for finding a beacon's offset from the tuned center
//! frequency: the window is chopped into beep-duration-sized blocks, each
//! block is FFT'd, and any block whose normalized peak magnitude clears the
//! threshold reports the offset frequency of that peak. Not part of the
//! detection path.

use std::sync::Arc;

use num_complex::Complex32;
use rustfft::{Fft, FftPlanner};

/// FFT-based scan for strong narrowband emitters in a sample window.
pub struct CarrierScan {
    fft: Arc<dyn Fft<f32>>,
    fft_size: usize,
    sample_rate: f64,
    threshold: f32,
}

impl std::fmt::Debug for CarrierScan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CarrierScan")
            .field("fft_size", &self.fft_size)
            .field("sample_rate", &self.sample_rate)
            .field("threshold", &self.threshold)
            .finish_non_exhaustive()
    }
}

impl CarrierScan {
    /// Build a scan whose FFT covers half a beep duration, so at least one
    /// full block lands inside each beep.
    #[must_use]
    pub fn new(sample_rate: f64, beep_duration: f64, threshold: f32) -> Self {
        #[allow(
            clippy::cast_possible_truncation,
            clippy::cast_sign_loss,
            reason = "block sizes are far below usize::MAX"
        )]
        let fft_size = ((beep_duration * sample_rate / 2.0) as usize).max(16);
        let fft = FftPlanner::new().plan_fft_forward(fft_size);
        Self {
            fft,
            fft_size,
            sample_rate,
            threshold,
        }
    }

    /// FFT block size in samples.
    #[must_use]
    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    /// Scan `samples`, returning the peak offset frequency (Hz relative to
    /// the tuned center) of every block whose normalized peak magnitude
    /// exceeds the threshold.
    #[must_use]
    pub fn scan(&self, samples: &[Complex32]) -> Vec<f64> {
        let mut found = Vec::new();
        let mut block = vec![Complex32::new(0.0, 0.0); self.fft_size];
        #[allow(clippy::cast_precision_loss, reason = "FFT sizes are small")]
        let scale = 1.0 / self.fft_size as f32;

        for chunk in samples.chunks_exact(self.fft_size) {
            block.copy_from_slice(chunk);
            self.fft.process(&mut block);

            let (peak_bin, peak_mag) = block
                .iter()
                .enumerate()
                .map(|(i, c)| (i, c.norm() * scale))
                .fold((0, 0.0f32), |best, cur| if cur.1 > best.1 { cur } else { best });

            if peak_mag > self.threshold {
                // Bins above fft_size / 2 are negative offsets.
                #[allow(clippy::cast_precision_loss, reason = "FFT sizes are small")]
                let bin = if peak_bin < self.fft_size / 2 {
                    peak_bin as f64
                } else {
                    peak_bin as f64 - self.fft_size as f64
                };
                #[allow(clippy::cast_precision_loss, reason = "FFT sizes are small")]
                let freq = bin * self.sample_rate / self.fft_size as f64;
                found.push(freq);
            }
        }
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::TAU;

    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        reason = "synthetic test tone"
    )]
    fn tone(n: usize, freq: f64, sample_rate: f64, amplitude: f32) -> Vec<Complex32> {
        (0..n)
            .map(|i| {
                let phase = TAU * freq * i as f64 / sample_rate;
                amplitude * Complex32::new(phase.cos() as f32, phase.sin() as f32)
            })
            .collect()
    }

    #[test]
    fn finds_positive_offset_tone() {
        let scan = CarrierScan::new(48_000.0, 1_024.0 * 2.0 / 48_000.0, 0.1);
        assert_eq!(scan.fft_size(), 1_024);

        let samples = tone(4_096, 1_200.0, 48_000.0, 1.0);
        let found = scan.scan(&samples);
        assert_eq!(found.len(), 4);
        let bin_width = 48_000.0 / 1_024.0;
        for f in found {
            assert!((f - 1_200.0).abs() <= bin_width, "found {f}");
        }
    }

    #[test]
    fn finds_negative_offset_tone() {
        let scan = CarrierScan::new(48_000.0, 1_024.0 * 2.0 / 48_000.0, 0.1);
        let samples = tone(2_048, -6_000.0, 48_000.0, 1.0);
        let found = scan.scan(&samples);
        assert!(!found.is_empty());
        let bin_width = 48_000.0 / 1_024.0;
        for f in found {
            assert!((f + 6_000.0).abs() <= bin_width, "found {f}");
        }
    }

    #[test]
    fn quiet_window_reports_nothing() {
        let scan = CarrierScan::new(48_000.0, 1_024.0 * 2.0 / 48_000.0, 0.1);
        let samples = tone(2_048, 1_200.0, 48_000.0, 0.01);
        assert!(scan.scan(&samples).is_empty());
    }
}
