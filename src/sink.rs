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

//! Pulse event sinks.

use crate::dsp::PulseEvent;

/// Consumer of detected pulses, invoked once per event in detection order.
pub trait EventSink: Send {
    /// Handle one detected pulse. Events are ephemeral; sinks must copy
    /// anything they want to keep.
    fn publish(&mut self, event: &PulseEvent);
}

/// Sink that logs each pulse, the interactive equivalent of a live readout.
#[derive(Debug, Default)]
pub struct LogSink;

impl EventSink for LogSink {
    fn publish(&mut self, event: &PulseEvent) {
        match event.rate_bpm {
            Some(bpm) => log::info!(
                "BPM: {bpm:.2}  rssi: {:.2}  width: {} samples",
                event.rssi,
                event.width
            ),
            None => log::info!(
                "pulse  rssi: {:.2}  width: {} samples (no successor edge for a rate)",
                event.rssi,
                event.width
            ),
        }
    }
}

/// Sink that collects events in memory for later inspection.
#[derive(Debug, Default)]
pub struct CollectSink {
    events: Vec<PulseEvent>,
}

impl CollectSink {
    /// Events received so far.
    #[must_use]
    pub fn events(&self) -> &[PulseEvent] {
        &self.events
    }
}

impl EventSink for CollectSink {
    fn publish(&mut self, event: &PulseEvent) {
        self.events.push(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collect_sink_keeps_events_in_publish_order() {
        let mut sink = CollectSink::default();
        let first = PulseEvent {
            rate_bpm: Some(72.0),
            width: 100,
            rssi: 4.0,
        };
        let last = PulseEvent {
            rate_bpm: None,
            width: 98,
            rssi: 3.9,
        };
        sink.publish(&first);
        sink.publish(&last);

        assert_eq!(sink.events(), [first, last]);
    }
}
