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

//! FIR filter design and valid-region convolution.

use num_complex::Complex32;
use std::f64::consts::PI;

fn sinc(x: f64) -> f64 {
    if x.abs() < 1e-12 {
        1.0
    } else {
        (PI * x).sin() / (PI * x)
    }
}

/// Design a Hamming-windowed sinc low-pass filter with unity DC gain.
///
/// `cutoff` is normalized to the Nyquist frequency (1.0 = Nyquist). Prefer
/// an odd `taps` count for a symmetric, integer group delay of
/// `(taps - 1) / 2` samples.
///
/// # Panics
/// Panics if `taps` is zero or `cutoff` is outside `(0, 1)`.
#[must_use]
pub fn lowpass(taps: usize, cutoff: f64) -> Vec<f32> {
    assert!(taps > 0, "filter needs at least one tap");
    assert!(
        cutoff > 0.0 && cutoff < 1.0,
        "cutoff must be within (0, 1) of Nyquist"
    );
    if taps == 1 {
        return vec![1.0];
    }

    #[allow(clippy::cast_precision_loss, reason = "tap counts are small")]
    let center = (taps - 1) as f64 / 2.0;
    #[allow(clippy::cast_precision_loss, reason = "tap counts are small")]
    let mut h: Vec<f64> = (0..taps)
        .map(|n| {
            let window = 0.54 - 0.46 * (2.0 * PI * n as f64 / (taps - 1) as f64).cos();
            cutoff * sinc(cutoff * (n as f64 - center)) * window
        })
        .collect();

    // Normalize so a constant input passes unchanged.
    let sum: f64 = h.iter().sum();
    for v in &mut h {
        *v /= sum;
    }

    #[allow(clippy::cast_possible_truncation, reason = "coefficients are in [-1, 1]")]
    let h: Vec<f32> = h.into_iter().map(|v| v as f32).collect();
    h
}

/// "Valid"-region convolution: only output samples with full kernel support
/// are produced, so the result has `x.len() - h.len() + 1` samples. Returns
/// an empty vector when the input is shorter than the kernel.
#[must_use]
pub fn convolve_valid(x: &[Complex32], h: &[f32]) -> Vec<Complex32> {
    if x.len() < h.len() || h.is_empty() {
        return Vec::new();
    }
    let out_len = x.len() - h.len() + 1;
    let mut out = Vec::with_capacity(out_len);
    for k in 0..out_len {
        let mut acc = Complex32::new(0.0, 0.0);
        // True convolution flips the kernel; ours are symmetric but keep
        // the definition honest.
        for (j, &c) in h.iter().rev().enumerate() {
            acc += x[k + j] * c;
        }
        out.push(acc);
    }
    out
}

/// Valid-region moving average over a real envelope. Output length is
/// `x.len() - len + 1`; empty when the input is shorter than the window.
#[must_use]
pub fn moving_average(x: &[f32], len: usize) -> Vec<f32> {
    if len == 0 || x.len() < len {
        return Vec::new();
    }
    #[allow(clippy::cast_precision_loss, reason = "window lengths are small")]
    let scale = 1.0 / len as f32;
    let mut out = Vec::with_capacity(x.len() - len + 1);
    let mut acc: f32 = x[..len].iter().sum();
    out.push(acc * scale);
    for k in len..x.len() {
        acc += x[k] - x[k - len];
        out.push(acc * scale);
    }
    out
}
