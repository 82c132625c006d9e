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

//! Beacon pulse tracker for RTL-SDR front ends.
//!
//! Streams complex baseband samples from a hardware source (or an IQ
//! recording) through a bounded concurrent buffer into a pulse-detection
//! pipeline, reporting each detected beacon pulse as a rate-per-minute and
//! RSSI estimate.
//!
//! Acquisition runs on the source's own delivery thread; the
//! [`bridge::AcquisitionBridge`] hands chunks across to the tokio domain
//! through a bounded channel, [`buffer::StreamBuffer`] applies
//! backpressure, and [`dsp::PulseDetector`] turns fixed windows of samples
//! into [`dsp::PulseEvent`]s.

pub mod bridge;
pub mod buffer;
pub mod config;
pub mod dsp;
pub mod sdr;
pub mod sink;
