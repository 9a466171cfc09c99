use super::timer::{Scheduler, TimerHandle, TimerKind};
use serde::Serialize;
use std::time::Duration;

pub const SETTLE_DELAY: Duration = Duration::from_millis(1_000);
pub const DISMISS_DELAY: Duration = Duration::from_millis(2_500);

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PaymentStatus {
    None,
    Due { fee: f64 },
    Processing { fee: f64 },
    Paid { fee: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PaymentStep {
    Settled { fee: f64 },
    Closed,
    Stale,
}

/// Simulated payment prompt: due → processing → paid → closed.
#[derive(Debug)]
pub struct PaymentFlow {
    status: PaymentStatus,
    timer: Option<TimerHandle>,
    success: bool,
}

impl PaymentFlow {
    pub fn new() -> Self {
        Self {
            status: PaymentStatus::None,
            timer: None,
            success: false,
        }
    }

    pub fn status(&self) -> PaymentStatus {
        self.status
    }

    pub fn success(&self) -> bool {
        self.success
    }

    pub fn clear_success(&mut self) {
        self.success = false;
    }

    pub fn open(&mut self, fee: f64) {
        self.status = PaymentStatus::Due { fee };
        self.success = false;
    }

    /// Start processing a due payment. Returns `false` if nothing is due.
    pub fn begin<S: Scheduler>(&mut self, scheduler: &mut S) -> bool {
        let PaymentStatus::Due { fee } = self.status else {
            return false;
        };
        self.status = PaymentStatus::Processing { fee };
        self.timer = Some(scheduler.schedule(SETTLE_DELAY, TimerKind::PaymentSettle));
        true
    }

    pub fn on_timer<S: Scheduler>(&mut self, handle: TimerHandle, scheduler: &mut S) -> PaymentStep {
        if self.timer != Some(handle) {
            return PaymentStep::Stale;
        }
        self.timer = None;
        match self.status {
            PaymentStatus::Processing { fee } => {
                self.status = PaymentStatus::Paid { fee };
                self.success = true;
                self.timer = Some(scheduler.schedule(DISMISS_DELAY, TimerKind::PaymentDismiss));
                PaymentStep::Settled { fee }
            }
            PaymentStatus::Paid { .. } => {
                self.status = PaymentStatus::None;
                PaymentStep::Closed
            }
            PaymentStatus::None | PaymentStatus::Due { .. } => PaymentStep::Stale,
        }
    }

    /// Abandon a payment that has not started processing.
    pub fn cancel(&mut self) -> bool {
        if matches!(self.status, PaymentStatus::Due { .. }) {
            self.status = PaymentStatus::None;
            true
        } else {
            false
        }
    }

    pub fn abort<S: Scheduler>(&mut self, scheduler: &mut S) {
        if let Some(handle) = self.timer.take() {
            scheduler.cancel(handle);
        }
        self.status = PaymentStatus::None;
    }
}

impl Default for PaymentFlow {
    fn default() -> Self {
        Self::new()
    }
}
