use crate::error::AppError;
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

pub mod mock;
pub mod serial;

/// Frames longer than this without a closing brace are dropped.
pub const MAX_FRAME_BYTES: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct OccupancyEvent {
    pub occupied: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceSignal {
    Connected,
    Event(OccupancyEvent),
    Disconnected { reason: String },
}

/// Raw text from an occupancy sensor link.
pub trait OccupancySource {
    /// `Ok(None)` once the link has closed.
    fn read_chunk(&mut self) -> Result<Option<String>, AppError>;
}

/// Extracts `{...}` frames from an arbitrarily chunked text stream.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: String,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &str) -> Vec<OccupancyEvent> {
        self.buffer.push_str(chunk);
        let mut events = Vec::new();

        loop {
            let Some(start) = self.buffer.find('{') else {
                self.buffer.clear();
                break;
            };
            let Some(offset) = self.buffer[start..].find('}') else {
                if self.buffer.len() - start > MAX_FRAME_BYTES {
                    warn!(bytes = self.buffer.len() - start, "Dropping oversized frame");
                    self.buffer.clear();
                } else {
                    self.buffer.drain(..start);
                }
                break;
            };
            let end = start + offset + 1;
            match serde_json::from_str::<OccupancyEvent>(&self.buffer[start..end]) {
                Ok(event) => events.push(event),
                Err(err) => {
                    warn!(frame = &self.buffer[start..end], error = %err, "Dropping malformed frame");
                }
            }
            self.buffer.drain(..end);
        }

        events
    }
}

/// Read `source` until it closes, fails, or `stop` is raised, forwarding
/// decoded events. Returns early if `on_signal` reports the receiver is gone.
pub fn pump_source<S, F>(source: &mut S, stop: &AtomicBool, mut on_signal: F)
where
    S: OccupancySource,
    F: FnMut(SourceSignal) -> Result<(), AppError>,
{
    let mut decoder = FrameDecoder::new();
    if on_signal(SourceSignal::Connected).is_err() {
        return;
    }

    let reason = loop {
        if stop.load(Ordering::Relaxed) {
            break "stopped".to_string();
        }
        match source.read_chunk() {
            Ok(Some(chunk)) => {
                for event in decoder.push(&chunk) {
                    debug!(occupied = event.occupied, "Occupancy frame");
                    if let Err(err) = on_signal(SourceSignal::Event(event)) {
                        warn!(error = %err, "Occupancy receiver gone, stopping source");
                        return;
                    }
                }
            }
            Ok(None) => {
                info!("Occupancy source closed");
                break "closed".to_string();
            }
            Err(err) => {
                warn!(error = %err, "Occupancy source failed");
                break err.to_string();
            }
        }
    };

    let _ = on_signal(SourceSignal::Disconnected { reason });
}
