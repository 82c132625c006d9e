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

//! Session configuration.
//!
//! Every value here is externally supplied (CLI or caller); nothing in the
//! acquisition or detection path hardcodes them.

/// Buffer capacity default, in processing windows.
pub const DEFAULT_BUFFER_WINDOWS: usize = 3;

/// Sample acquisition parameters.
#[derive(Debug, Clone)]
pub struct SampleConfig {
    /// Sample rate in Hz.
    pub sample_rate: f64,
    /// Tuned center frequency in Hz.
    pub center_freq: u32,
    /// Tuner gain in dB, `None` for AGC.
    pub gain_db: Option<f64>,
    /// Samples per chunk read from the source.
    pub chunk_size: usize,
}

impl Default for SampleConfig {
    fn default() -> Self {
        Self {
            sample_rate: 2.4e6,
            center_freq: 160_270_968,
            gain_db: Some(38.6),
            chunk_size: 65_536,
        }
    }
}
