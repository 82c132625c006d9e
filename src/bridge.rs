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

//! Acquisition bridge between a sample source's delivery thread and the
//! consumer's buffer.
//!
//! The source invokes its delivery callback on its own thread, outside the
//! tokio scheduling domain. The callback hands each chunk across that
//! boundary with a bounded mpsc `try_send`; a full channel drops the chunk
//! and counts an overrun, so delivery never blocks the hardware thread. A
//! forwarding task on the consumer side receives chunks and moves them into
//! the [`StreamBuffer`] with a non-blocking put, again dropping on `Full`.
//! Bounded latency wins over completeness under overload.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::buffer::{BufferError, StreamBuffer};
use crate::sdr::{SampleChunk, SampleSource, SourceError};

/// Default depth of the delivery-thread-to-forwarder channel, in chunks.
pub const DEFAULT_HANDOFF_DEPTH: usize = 32;

/// Session lifecycle errors, surfaced synchronously from `start`/`stop`.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// A session parameter is unusable; the session never begins.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// `start` was called while a session is active.
    #[error("a streaming session is already active")]
    AlreadyStreaming,
    /// An operation that requires an active session was called without one.
    #[error("no streaming session is active")]
    NotStreaming,
    #[error(transparent)]
    Source(#[from] SourceError),
}

/// Owns the sample source and runs the producer side of a streaming
/// session. At most one session is active between `start` and `stop`.
pub struct AcquisitionBridge {
    source: Box<dyn SampleSource>,
    buffer: Arc<StreamBuffer>,
    handoff_depth: usize,
    overruns: Arc<AtomicU64>,
    forward_task: Option<JoinHandle<()>>,
    streaming: bool,
}

impl std::fmt::Debug for AcquisitionBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AcquisitionBridge")
            .field("streaming", &self.streaming)
            .field("handoff_depth", &self.handoff_depth)
            .field("overruns", &self.overruns.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl AcquisitionBridge {
    /// Create a bridge feeding `buffer` from `source`.
    pub fn new(source: Box<dyn SampleSource>, buffer: Arc<StreamBuffer>) -> Self {
        Self {
            source,
            buffer,
            handoff_depth: DEFAULT_HANDOFF_DEPTH,
            overruns: Arc::new(AtomicU64::new(0)),
            forward_task: None,
            streaming: false,
        }
    }

    /// Override the hand-off channel depth (in chunks).
    #[must_use]
    pub fn with_handoff_depth(mut self, depth: usize) -> Self {
        self.handoff_depth = depth.max(1);
        self
    }

    /// The buffer this bridge feeds.
    #[must_use]
    pub fn buffer(&self) -> Arc<StreamBuffer> {
        self.buffer.clone()
    }

    /// Chunks dropped so far because the hand-off channel or the buffer was
    /// full.
    #[must_use]
    pub fn overruns(&self) -> u64 {
        self.overruns.load(Ordering::Relaxed)
    }

    /// True between a successful `start` and the completion of `stop`.
    #[must_use]
    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    /// Sample rate of the owned source, in Hz.
    #[must_use]
    pub fn sample_rate(&self) -> f64 {
        self.source.sample_rate()
    }

    /// Open the source and begin a streaming session delivering
    /// `chunk_size`-sample chunks into the buffer.
    pub fn start(&mut self, chunk_size: usize) -> Result<(), SessionError> {
        if self.streaming {
            return Err(SessionError::AlreadyStreaming);
        }
        let alignment = self.source.alignment();
        if chunk_size == 0 || chunk_size % alignment != 0 {
            return Err(SessionError::InvalidConfig(format!(
                "chunk size {chunk_size} must be a non-zero multiple of {alignment}"
            )));
        }

        let (tx, mut rx) = mpsc::channel::<SampleChunk>(self.handoff_depth);

        let overruns = self.overruns.clone();
        let callback = Box::new(move |chunk: SampleChunk| {
            // Runs on the source's delivery thread. Never block here.
            match tx.try_send(chunk) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(dropped)) => {
                    overruns.fetch_add(1, Ordering::Relaxed);
                    log::warn!("hand-off overrun: dropped {}-sample chunk", dropped.len());
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    log::debug!("chunk delivered after session teardown, dropping");
                }
            }
        });

        self.source.start_async_read(callback, chunk_size)?;

        let buffer = self.buffer.clone();
        let overruns = self.overruns.clone();
        self.forward_task = Some(tokio::spawn(async move {
            while let Some(chunk) = rx.recv().await {
                match buffer.try_put(&chunk) {
                    Ok(()) => {}
                    Err(BufferError::Full) => {
                        overruns.fetch_add(1, Ordering::Relaxed);
                        log::warn!(
                            "buffer overrun: dropped {}-sample chunk ({} pending)",
                            chunk.len(),
                            buffer.len()
                        );
                    }
                    Err(e) => {
                        // Closed: in-flight hand-off raced with teardown.
                        log::debug!("hand-off failed during teardown: {e}");
                    }
                }
            }
            // Channel closed: the source dropped the callback, either at end
            // of input or after cancel_read. Wake a blocked consumer.
            buffer.close();
        }));

        self.streaming = true;
        log::info!(
            "streaming session started ({chunk_size}-sample chunks at {:.3} MHz)",
            self.source.sample_rate() / 1e6
        );
        Ok(())
    }

    /// Stop the session: cancel the device read, close the buffer so a
    /// blocked consumer wakes, wait for all in-flight hand-offs, and drain
    /// residual samples. Teardown faults are logged and swallowed.
    /// Idempotent when no session is active.
    pub async fn stop(&mut self) {
        if !self.streaming {
            log::debug!("stop called with no active session");
            return;
        }
        self.streaming = false;

        if let Err(e) = self.source.cancel_read() {
            log::warn!("cancel during teardown: {e}");
        }
        self.buffer.close();

        if let Some(task) = self.forward_task.take() {
            if let Err(e) = task.await {
                log::warn!("forward task failed during teardown: {e}");
            }
        }

        let dropped = self.buffer.drain();
        if dropped > 0 {
            log::debug!("discarded {dropped} unconsumed samples at session end");
        }
        log::info!(
            "streaming session stopped ({} chunk(s) dropped to overruns)",
            self.overruns()
        );
    }
}

impl Drop for AcquisitionBridge {
    fn drop(&mut self) {
        // Guard against a session left running: stop production and release
        // the device handle. The forward task ends on its own once the
        // callback is gone.
        if self.streaming {
            if let Err(e) = self.source.cancel_read() {
                log::warn!("cancel during drop: {e}");
            }
            self.buffer.close();
        }
        self.source.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sdr::ChunkCallback;
    use num_complex::Complex32;
    use std::sync::atomic::AtomicBool;
    use std::time::Duration;

    /// Source that delivers a fixed number of synthetic chunks from its own
    /// thread, like the hardware read loop.
    struct MockSource {
        chunks: usize,
        chunk_interval: Duration,
        alignment: usize,
        stop_flag: Arc<AtomicBool>,
        thread: Option<std::thread::JoinHandle<()>>,
    }

    impl MockSource {
        fn new(chunks: usize, chunk_interval: Duration, alignment: usize) -> Self {
            Self {
                chunks,
                chunk_interval,
                alignment,
                stop_flag: Arc::new(AtomicBool::new(false)),
                thread: None,
            }
        }
    }

    impl SampleSource for MockSource {
        fn open(&mut self) -> Result<(), SourceError> {
            Ok(())
        }

        fn close(&mut self) {}

        fn sample_rate(&self) -> f64 {
            1_000.0
        }

        fn alignment(&self) -> usize {
            self.alignment
        }

        fn start_async_read(
            &mut self,
            mut callback: ChunkCallback,
            chunk_size: usize,
        ) -> Result<(), SourceError> {
            if self.thread.is_some() {
                return Err(SourceError::AlreadyReading);
            }
            self.stop_flag.store(false, Ordering::Relaxed);
            let stop = self.stop_flag.clone();
            let chunks = self.chunks;
            let interval = self.chunk_interval;
            self.thread = Some(std::thread::spawn(move || {
                #[allow(clippy::cast_precision_loss, reason = "test indices are small")]
                for k in 0..chunks {
                    if stop.load(Ordering::Relaxed) {
                        return;
                    }
                    let chunk: SampleChunk = (0..chunk_size)
                        .map(|i| Complex32::new((k * chunk_size + i) as f32, 0.0))
                        .collect();
                    callback(chunk);
                    if !interval.is_zero() {
                        std::thread::sleep(interval);
                    }
                }
            }));
            Ok(())
        }

        fn cancel_read(&mut self) -> Result<(), SourceError> {
            let Some(thread) = self.thread.take() else {
                return Err(SourceError::NotStreaming);
            };
            self.stop_flag.store(true, Ordering::Relaxed);
            let _ = thread.join();
            Ok(())
        }
    }

    #[tokio::test]
    async fn misaligned_chunk_size_is_rejected() {
        let buffer = Arc::new(StreamBuffer::new(0));
        let source = MockSource::new(1, Duration::ZERO, 512);
        let mut bridge = AcquisitionBridge::new(Box::new(source), buffer);

        assert!(matches!(
            bridge.start(1000),
            Err(SessionError::InvalidConfig(_))
        ));
        assert!(matches!(bridge.start(0), Err(SessionError::InvalidConfig(_))));
        assert!(!bridge.is_streaming());
    }

    #[tokio::test]
    async fn double_start_is_rejected() {
        let buffer = Arc::new(StreamBuffer::new(0));
        let source = MockSource::new(4, Duration::from_millis(5), 1);
        let mut bridge = AcquisitionBridge::new(Box::new(source), buffer);

        bridge.start(64).unwrap();
        assert!(matches!(bridge.start(64), Err(SessionError::AlreadyStreaming)));
        bridge.stop().await;
    }

    #[tokio::test]
    async fn chunks_arrive_in_order_and_eof_closes_buffer() {
        let buffer = Arc::new(StreamBuffer::new(0));
        let source = MockSource::new(4, Duration::ZERO, 1);
        let mut bridge = AcquisitionBridge::new(Box::new(source), buffer.clone());

        bridge.start(256).unwrap();

        let mut received = Vec::new();
        while let Ok(samples) = buffer.get(256).await {
            received.extend(samples);
        }

        assert_eq!(received.len(), 4 * 256);
        #[allow(clippy::cast_precision_loss, reason = "test indices are small")]
        for (i, s) in received.iter().enumerate() {
            assert_eq!(s.re, i as f32);
        }
        assert_eq!(bridge.overruns(), 0);
        bridge.stop().await;
    }

    #[tokio::test]
    async fn stop_releases_blocked_consumer_and_is_idempotent() {
        let buffer = Arc::new(StreamBuffer::new(0));
        let source = MockSource::new(1_000_000, Duration::from_millis(10), 1);
        let mut bridge = AcquisitionBridge::new(Box::new(source), buffer.clone());

        bridge.start(16).unwrap();

        let consumer = {
            let buffer = buffer.clone();
            // Far more samples than the source will deliver before stop.
            tokio::spawn(async move { buffer.get(1 << 30).await })
        };

        tokio::time::sleep(Duration::from_millis(30)).await;
        bridge.stop().await;

        assert_eq!(consumer.await.unwrap().unwrap_err(), BufferError::Closed);
        assert!(buffer.is_empty());
        assert!(!bridge.is_streaming());

        // Second stop is a no-op.
        bridge.stop().await;
    }

    #[tokio::test]
    async fn overruns_counted_when_consumer_stalls() {
        // Buffer holds exactly one chunk and nothing consumes it; the
        // hand-off channel holds one more. Everything else must be dropped
        // and counted.
        let buffer = Arc::new(StreamBuffer::new(64));
        let source = MockSource::new(10, Duration::ZERO, 1);
        let mut bridge =
            AcquisitionBridge::new(Box::new(source), buffer.clone()).with_handoff_depth(1);

        bridge.start(64).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(bridge.overruns() >= 1);
        assert_eq!(buffer.len(), 64);
        bridge.stop().await;
    }
}
