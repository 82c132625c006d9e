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

//! Signal processing: FIR filtering, the pulse-detection pipeline, and a
//! coarse FFT carrier scan.

pub mod detector;
pub mod fir;
pub mod scan;

pub use detector::{DetectorConfig, PulseDetector, PulseEvent};
