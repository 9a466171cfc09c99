use serde::{Deserialize, Serialize};

/// Milliseconds since the Unix epoch.
pub type TimestampMs = u64;

/// One complete occupied-then-vacated interval with its computed fee.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub start: TimestampMs,
    pub end: TimestampMs,
    /// Seconds.
    pub duration: f64,
    pub fee: f64,
}

/// Live elapsed time and running fee while a spot is occupied.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SessionTick {
    pub elapsed_secs: u64,
    pub fee: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tariff {
    hourly_rate: f64,
}

impl Tariff {
    pub fn new(hourly_rate: f64) -> Self {
        Self { hourly_rate }
    }

    pub fn hourly_rate(&self) -> f64 {
        self.hourly_rate
    }

    pub fn fee_for(&self, duration_secs: f64) -> f64 {
        (duration_secs / 3600.0 * self.hourly_rate).max(0.0)
    }
}

impl Session {
    /// Build a session from entry/exit timestamps. Returns `None` when the exit
    /// does not come strictly after the entry.
    pub fn from_bounds(start: TimestampMs, end: TimestampMs, tariff: &Tariff) -> Option<Self> {
        if end <= start {
            return None;
        }
        let duration = (end - start) as f64 / 1000.0;
        Some(Self {
            start,
            end,
            duration,
            fee: tariff.fee_for(duration),
        })
    }
}
