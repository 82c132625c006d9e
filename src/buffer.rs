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

//! Bounded FIFO buffer of complex samples bridging the hardware delivery
//! context to the single DSP consumer.
//!
//! Writers append whole chunks, the reader removes an exact sample count.
//! Both sides get non-blocking, blocking, and timed variants. `close()` is
//! the shutdown sentinel: it wakes every blocked caller, and once the
//! remaining samples cannot satisfy a read the reader observes `Closed`.

use std::collections::VecDeque;
use std::pin::pin;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use num_complex::Complex32;
use tokio::sync::Notify;

/// Errors surfaced by [`StreamBuffer`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum BufferError {
    /// Not enough free space for the chunk (bounded buffer only).
    #[error("buffer full")]
    Full,
    /// Fewer samples available than requested.
    #[error("buffer empty")]
    Empty,
    /// The buffer was closed and cannot satisfy the operation.
    #[error("buffer closed")]
    Closed,
}

struct Inner {
    samples: VecDeque<Complex32>,
    closed: bool,
}

/// Thread-safe FIFO sample store with backpressure.
///
/// A `capacity` of zero means unbounded. All length changes happen inside a
/// single critical section; the lock is never held across a suspension
/// point, only for bookkeeping plus the chunk copy itself.
#[derive(Debug)]
pub struct StreamBuffer {
    capacity: usize,
    inner: Mutex<Inner>,
    readable: Notify,
    writable: Notify,
}

impl std::fmt::Debug for Inner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Inner")
            .field("len", &self.samples.len())
            .field("closed", &self.closed)
            .finish()
    }
}

impl StreamBuffer {
    /// Create a buffer holding at most `capacity` samples (0 = unbounded).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Mutex::new(Inner {
                samples: VecDeque::new(),
                closed: false,
            }),
            readable: Notify::new(),
            writable: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append `samples` if space is immediately available.
    pub fn try_put(&self, samples: &[Complex32]) -> Result<(), BufferError> {
        let mut inner = self.lock();
        if inner.closed {
            return Err(BufferError::Closed);
        }
        if self.capacity > 0 && inner.samples.len() + samples.len() > self.capacity {
            return Err(BufferError::Full);
        }
        inner.samples.extend(samples.iter().copied());
        drop(inner);
        self.readable.notify_waiters();
        Ok(())
    }

    /// Append `samples`, suspending until enough space frees up.
    ///
    /// A chunk larger than the whole capacity of a bounded buffer can never
    /// fit and will wait until the buffer is closed.
    pub async fn put(&self, samples: &[Complex32]) -> Result<(), BufferError> {
        let mut notified = pin!(self.writable.notified());
        loop {
            {
                let mut inner = self.lock();
                if inner.closed {
                    return Err(BufferError::Closed);
                }
                if self.capacity == 0
                    || inner.samples.len() + samples.len() <= self.capacity
                {
                    inner.samples.extend(samples.iter().copied());
                    drop(inner);
                    self.readable.notify_waiters();
                    return Ok(());
                }
                // Register for wake-up while still holding the lock so a
                // notify between unlock and await cannot be missed.
                notified.as_mut().enable();
            }
            notified.as_mut().await;
            notified.set(self.writable.notified());
        }
    }

    /// Like [`put`](Self::put), but gives up with `Full` after `timeout`.
    pub async fn put_timeout(
        &self,
        samples: &[Complex32],
        timeout: Duration,
    ) -> Result<(), BufferError> {
        match tokio::time::timeout(timeout, self.put(samples)).await {
            Ok(res) => res,
            Err(_) => Err(BufferError::Full),
        }
    }

    /// Remove and return exactly `count` samples if immediately available.
    pub fn try_get(&self, count: usize) -> Result<Vec<Complex32>, BufferError> {
        let mut inner = self.lock();
        if inner.samples.len() < count {
            return Err(if inner.closed {
                BufferError::Closed
            } else {
                BufferError::Empty
            });
        }
        let out: Vec<Complex32> = inner.samples.drain(..count).collect();
        drop(inner);
        self.writable.notify_waiters();
        Ok(out)
    }

    /// Remove and return exactly `count` samples, suspending until they
    /// exist. Fails with `Closed` once the buffer is closed and the
    /// remaining samples cannot satisfy the request.
    pub async fn get(&self, count: usize) -> Result<Vec<Complex32>, BufferError> {
        let mut notified = pin!(self.readable.notified());
        loop {
            {
                let mut inner = self.lock();
                if inner.samples.len() >= count {
                    let out: Vec<Complex32> = inner.samples.drain(..count).collect();
                    drop(inner);
                    self.writable.notify_waiters();
                    return Ok(out);
                }
                if inner.closed {
                    return Err(BufferError::Closed);
                }
                notified.as_mut().enable();
            }
            notified.as_mut().await;
            notified.set(self.readable.notified());
        }
    }

    /// Like [`get`](Self::get), but gives up with `Empty` after `timeout`.
    pub async fn get_timeout(
        &self,
        count: usize,
        timeout: Duration,
    ) -> Result<Vec<Complex32>, BufferError> {
        match tokio::time::timeout(timeout, self.get(count)).await {
            Ok(res) => res,
            Err(_) => Err(BufferError::Empty),
        }
    }

    /// Number of samples currently buffered.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().samples.len()
    }

    /// True if no samples are buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True if a bounded buffer is at capacity. Unbounded buffers are never
    /// full.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.capacity > 0 && self.len() >= self.capacity
    }

    /// Configured capacity in samples (0 = unbounded).
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// True once [`close`](Self::close) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Close the buffer, waking every blocked reader and writer. Further
    /// puts fail with `Closed`; reads drain what remains, then fail with
    /// `Closed`. Idempotent.
    pub fn close(&self) {
        let mut inner = self.lock();
        inner.closed = true;
        drop(inner);
        self.readable.notify_waiters();
        self.writable.notify_waiters();
    }

    /// Discard all buffered samples, returning how many were dropped.
    pub fn drain(&self) -> usize {
        let mut inner = self.lock();
        let dropped = inner.samples.len();
        inner.samples.clear();
        drop(inner);
        self.writable.notify_waiters();
        dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[allow(clippy::cast_precision_loss, reason = "test indices are small")]
    fn chunk(range: std::ops::Range<usize>) -> Vec<Complex32> {
        range.map(|i| Complex32::new(i as f32, -(i as f32))).collect()
    }

    #[tokio::test]
    async fn fifo_order_across_chunk_boundaries() {
        let buf = StreamBuffer::new(0);
        buf.try_put(&chunk(0..100)).unwrap();
        buf.try_put(&chunk(100..250)).unwrap();

        let head = buf.get(130).await.unwrap();
        let tail = buf.get(120).await.unwrap();

        let mut recovered = head;
        recovered.extend(tail);
        assert_eq!(recovered, chunk(0..250));
        assert!(buf.is_empty());
    }

    #[tokio::test]
    async fn try_put_full_leaves_buffer_unchanged() {
        let buf = StreamBuffer::new(8);
        buf.try_put(&chunk(0..6)).unwrap();

        assert_eq!(buf.try_put(&chunk(6..11)), Err(BufferError::Full));
        assert_eq!(buf.len(), 6);
        assert_eq!(buf.try_get(6).unwrap(), chunk(0..6));
    }

    #[tokio::test]
    async fn try_get_empty_leaves_buffer_unchanged() {
        let buf = StreamBuffer::new(8);
        buf.try_put(&chunk(0..4)).unwrap();

        assert_eq!(buf.try_get(5).unwrap_err(), BufferError::Empty);
        assert_eq!(buf.len(), 4);
        assert_eq!(buf.try_get(4).unwrap(), chunk(0..4));
    }

    #[tokio::test]
    async fn blocking_get_waits_for_writer() {
        let buf = Arc::new(StreamBuffer::new(0));
        let writer = {
            let buf = buf.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                buf.try_put(&chunk(0..64)).unwrap();
                tokio::time::sleep(Duration::from_millis(10)).await;
                buf.try_put(&chunk(64..128)).unwrap();
            })
        };

        let got = buf.get(128).await.unwrap();
        assert_eq!(got, chunk(0..128));
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn blocking_put_waits_for_reader() {
        let buf = Arc::new(StreamBuffer::new(64));
        buf.try_put(&chunk(0..64)).unwrap();
        assert!(buf.is_full());

        let reader = {
            let buf = buf.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                buf.try_get(32).unwrap()
            })
        };

        buf.put(&chunk(64..96)).await.unwrap();
        assert_eq!(reader.await.unwrap(), chunk(0..32));
        assert_eq!(buf.len(), 64);
    }

    #[tokio::test]
    async fn timed_get_fails_empty_after_timeout() {
        let buf = StreamBuffer::new(16);
        buf.try_put(&chunk(0..2)).unwrap();
        let res = buf.get_timeout(8, Duration::from_millis(20)).await;
        assert_eq!(res.unwrap_err(), BufferError::Empty);
        assert_eq!(buf.len(), 2);
    }

    #[tokio::test]
    async fn timed_put_fails_full_after_timeout() {
        let buf = StreamBuffer::new(4);
        buf.try_put(&chunk(0..4)).unwrap();
        let res = buf.put_timeout(&chunk(4..6), Duration::from_millis(20)).await;
        assert_eq!(res.unwrap_err(), BufferError::Full);
        assert_eq!(buf.len(), 4);
    }

    #[tokio::test]
    async fn close_releases_blocked_reader() {
        let buf = Arc::new(StreamBuffer::new(0));
        let reader = {
            let buf = buf.clone();
            tokio::spawn(async move { buf.get(1024).await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        buf.close();

        assert_eq!(reader.await.unwrap().unwrap_err(), BufferError::Closed);
        assert_eq!(buf.try_put(&chunk(0..1)), Err(BufferError::Closed));
    }

    #[tokio::test]
    async fn remaining_samples_readable_after_close() {
        let buf = StreamBuffer::new(0);
        buf.try_put(&chunk(0..10)).unwrap();
        buf.close();

        assert_eq!(buf.try_get(10).unwrap(), chunk(0..10));
        assert_eq!(buf.try_get(1).unwrap_err(), BufferError::Closed);
    }

    #[tokio::test]
    async fn samples_conserved_under_concurrent_load() {
        const CHUNKS: usize = 100;
        const CHUNK_LEN: usize = 128;
        let buf = Arc::new(StreamBuffer::new(512));

        let producer = {
            let buf = buf.clone();
            tokio::spawn(async move {
                for k in 0..CHUNKS {
                    buf.put(&chunk(k * CHUNK_LEN..(k + 1) * CHUNK_LEN))
                        .await
                        .unwrap();
                }
            })
        };

        let mut received = Vec::with_capacity(CHUNKS * CHUNK_LEN);
        while received.len() < CHUNKS * CHUNK_LEN {
            received.extend(buf.get(256).await.unwrap());
        }
        producer.await.unwrap();

        assert_eq!(received, chunk(0..CHUNKS * CHUNK_LEN));
        assert!(buf.is_empty());
    }
}
