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

//! Sample sources delivering IQ chunks from their own execution context.

pub mod file_source;
pub mod rtlsdr_source;

use num_complex::Complex32;

/// One chunk of IQ samples, immutable once delivered.
pub type SampleChunk = Vec<Complex32>;

/// Delivery callback invoked by a source for each new chunk. Runs on the
/// source's own thread, never on the consumer's scheduler.
pub type ChunkCallback = Box<dyn FnMut(SampleChunk) + Send>;

/// Errors raised by sample sources.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// The device or file could not be opened.
    #[error("failed to open sample source: {0}")]
    Open(String),
    /// A device parameter was rejected.
    #[error("invalid source configuration: {0}")]
    Config(String),
    /// `start_async_read` was called while a read is already running.
    #[error("an asynchronous read is already in progress")]
    AlreadyReading,
    /// `cancel_read` was called with no read in progress.
    #[error("no asynchronous read in progress")]
    NotStreaming,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A front end that streams fixed-size IQ chunks to a callback.
///
/// `start_async_read` begins delivering chunks of exactly `chunk_size`
/// samples on the source's own thread; `cancel_read` stops delivery and
/// joins that thread. `chunk_size` must be a multiple of
/// [`alignment`](Self::alignment).
pub trait SampleSource: Send {
    /// Open the underlying device or file and apply session parameters.
    fn open(&mut self) -> Result<(), SourceError>;

    /// Release the device handle. Safe to call when not open.
    fn close(&mut self);

    /// Sample rate the source delivers at, in Hz.
    fn sample_rate(&self) -> f64;

    /// Required chunk-size multiple. RTL-SDR reads must be multiples of 512.
    fn alignment(&self) -> usize {
        1
    }

    /// Begin asynchronous delivery of `chunk_size`-sample chunks to
    /// `callback`.
    fn start_async_read(
        &mut self,
        callback: ChunkCallback,
        chunk_size: usize,
    ) -> Result<(), SourceError>;

    /// Cancel an in-flight asynchronous read and wait for the delivery
    /// thread to finish (dropping the callback).
    fn cancel_read(&mut self) -> Result<(), SourceError>;
}
