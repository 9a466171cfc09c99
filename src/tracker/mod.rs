//! Occupancy session tracking.
//!
//! Turns a stream of occupancy booleans into discrete parking sessions. A
//! vacant reading only ends a session after it has held for the exit debounce
//! window, and sessions shorter than the minimum duration are discarded as
//! sensor flicker. A completed session opens the payment flow; until that flow
//! concludes, occupancy input is ignored.

use crate::session::{Session, SessionTick, Tariff, TimestampMs};
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info, warn};

pub mod payment;
pub mod timer;

use payment::{PaymentFlow, PaymentStatus, PaymentStep};
use timer::{Clock, Scheduler, TimerHandle, TimerKind};

pub const DEFAULT_EXIT_DEBOUNCE: Duration = Duration::from_millis(1_500);
pub const DEFAULT_MIN_DURATION_SECS: f64 = 3.0;
pub const DEFAULT_HOURLY_RATE: f64 = 20.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SpotPhase {
    Vacant,
    Occupied,
    PendingExit,
    AwaitingPayment,
}

#[derive(Debug, Clone, Copy)]
pub struct TrackerSettings {
    pub tariff: Tariff,
    pub exit_debounce: Duration,
    pub min_duration_secs: f64,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            tariff: Tariff::new(DEFAULT_HOURLY_RATE),
            exit_debounce: DEFAULT_EXIT_DEBOUNCE,
            min_duration_secs: DEFAULT_MIN_DURATION_SECS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DiscardReason {
    /// No usable entry time when the exit was confirmed.
    InvalidEntry,
    TooShort { duration_secs: f64 },
}

#[derive(Debug, Clone, PartialEq)]
pub enum TrackerUpdate {
    Unchanged,
    /// Input arrived while a completed session is waiting on payment.
    Ignored,
    Entered { start: TimestampMs },
    ExitPending,
    ExitReverted { start: TimestampMs },
    Completed(Session),
    Discarded(DiscardReason),
    PaymentStarted,
    PaymentSettled { fee: f64 },
    PaymentClosed,
    PaymentCancelled,
    Reset,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TrackerSnapshot {
    pub phase: SpotPhase,
    pub entry_time: Option<TimestampMs>,
    pub tick: Option<SessionTick>,
    pub payment: PaymentStatus,
    pub payment_success: bool,
}

pub struct SessionTracker<C, S> {
    clock: C,
    scheduler: S,
    settings: TrackerSettings,
    phase: SpotPhase,
    entry_time: Option<TimestampMs>,
    pending_exit: Option<TimerHandle>,
    payment: PaymentFlow,
}

impl<C: Clock, S: Scheduler> SessionTracker<C, S> {
    pub fn new(clock: C, scheduler: S, settings: TrackerSettings) -> Self {
        Self {
            clock,
            scheduler,
            settings,
            phase: SpotPhase::Vacant,
            entry_time: None,
            pending_exit: None,
            payment: PaymentFlow::new(),
        }
    }

    pub fn phase(&self) -> SpotPhase {
        self.phase
    }

    pub fn entry_time(&self) -> Option<TimestampMs> {
        self.entry_time
    }

    pub fn snapshot(&self) -> TrackerSnapshot {
        TrackerSnapshot {
            phase: self.phase,
            entry_time: self.entry_time,
            tick: self.tick(),
            payment: self.payment.status(),
            payment_success: self.payment.success(),
        }
    }

    pub fn handle_occupancy(&mut self, occupied: bool) -> TrackerUpdate {
        match (self.phase, occupied) {
            (SpotPhase::AwaitingPayment, _) => {
                debug!(occupied, "Ignoring occupancy while payment is pending");
                TrackerUpdate::Ignored
            }
            (SpotPhase::Vacant, true) => self.enter(),
            (SpotPhase::Occupied, false) => {
                self.cancel_pending_exit();
                let handle = self
                    .scheduler
                    .schedule(self.settings.exit_debounce, TimerKind::ExitDebounce);
                self.pending_exit = Some(handle);
                self.phase = SpotPhase::PendingExit;
                debug!(
                    debounce_ms = self.settings.exit_debounce.as_millis() as u64,
                    "Vacancy detected, debouncing exit"
                );
                TrackerUpdate::ExitPending
            }
            (SpotPhase::PendingExit, true) => {
                self.cancel_pending_exit();
                self.phase = SpotPhase::Occupied;
                let start = self.entry_time.unwrap_or_default();
                debug!(start, "Vacancy reverted within debounce window");
                TrackerUpdate::ExitReverted { start }
            }
            (SpotPhase::Vacant, false)
            | (SpotPhase::Occupied, true)
            | (SpotPhase::PendingExit, false) => TrackerUpdate::Unchanged,
        }
    }

    pub fn handle_timer(&mut self, handle: TimerHandle) -> TrackerUpdate {
        if self.phase == SpotPhase::PendingExit && self.pending_exit == Some(handle) {
            self.pending_exit = None;
            info!("Exit confirmed after debounce");
            return self.finalize();
        }

        match self.payment.on_timer(handle, &mut self.scheduler) {
            PaymentStep::Settled { fee } => {
                info!(fee, "Payment settled");
                TrackerUpdate::PaymentSettled { fee }
            }
            PaymentStep::Closed => {
                self.phase = SpotPhase::Vacant;
                debug!("Payment flow closed");
                TrackerUpdate::PaymentClosed
            }
            PaymentStep::Stale => {
                debug!(handle = handle.0, "Ignoring stale timer");
                TrackerUpdate::Unchanged
            }
        }
    }

    /// Demonstration toggle: enters when vacant, otherwise confirms the exit
    /// immediately without waiting for the debounce window.
    pub fn manual_toggle(&mut self) -> TrackerUpdate {
        match self.phase {
            SpotPhase::Vacant => self.enter(),
            SpotPhase::Occupied | SpotPhase::PendingExit => {
                self.cancel_pending_exit();
                info!("Exit confirmed by manual toggle");
                self.finalize()
            }
            SpotPhase::AwaitingPayment => TrackerUpdate::Ignored,
        }
    }

    pub fn pay(&mut self) -> TrackerUpdate {
        if self.phase == SpotPhase::AwaitingPayment && self.payment.begin(&mut self.scheduler) {
            info!("Payment processing");
            TrackerUpdate::PaymentStarted
        } else {
            TrackerUpdate::Ignored
        }
    }

    pub fn cancel_payment(&mut self) -> TrackerUpdate {
        if self.phase == SpotPhase::AwaitingPayment && self.payment.cancel() {
            self.phase = SpotPhase::Vacant;
            info!("Payment cancelled, sensing re-armed");
            TrackerUpdate::PaymentCancelled
        } else {
            TrackerUpdate::Ignored
        }
    }

    /// Drop every transient state and return to vacant.
    pub fn reset(&mut self) -> TrackerUpdate {
        self.cancel_pending_exit();
        self.payment.abort(&mut self.scheduler);
        self.payment.clear_success();
        self.entry_time = None;
        self.phase = SpotPhase::Vacant;
        info!("Tracker reset");
        TrackerUpdate::Reset
    }

    /// Elapsed time and running fee; keeps counting through a pending exit.
    pub fn tick(&self) -> Option<SessionTick> {
        if !matches!(self.phase, SpotPhase::Occupied | SpotPhase::PendingExit) {
            return None;
        }
        let start = self.entry_time?;
        let elapsed_secs = self.clock.now_ms().saturating_sub(start) / 1000;
        Some(SessionTick {
            elapsed_secs,
            fee: self.settings.tariff.fee_for(elapsed_secs as f64),
        })
    }

    fn enter(&mut self) -> TrackerUpdate {
        let start = self.clock.now_ms();
        self.cancel_pending_exit();
        self.entry_time = Some(start);
        self.payment.clear_success();
        self.phase = SpotPhase::Occupied;
        info!(start, "Vehicle entered");
        TrackerUpdate::Entered { start }
    }

    fn cancel_pending_exit(&mut self) {
        if let Some(handle) = self.pending_exit.take() {
            self.scheduler.cancel(handle);
        }
    }

    fn finalize(&mut self) -> TrackerUpdate {
        let exit = self.clock.now_ms();
        let entry = self.entry_time.take();
        self.phase = SpotPhase::Vacant;

        let Some(session) =
            entry.and_then(|start| Session::from_bounds(start, exit, &self.settings.tariff))
        else {
            warn!(entry = ?entry, exit, "Invalid entry time, ignoring session");
            return TrackerUpdate::Discarded(DiscardReason::InvalidEntry);
        };

        if session.duration < self.settings.min_duration_secs {
            info!(
                duration_secs = session.duration,
                min_secs = self.settings.min_duration_secs,
                "Session too short, ignoring"
            );
            return TrackerUpdate::Discarded(DiscardReason::TooShort {
                duration_secs: session.duration,
            });
        }

        info!(
            start = session.start,
            end = session.end,
            duration_secs = session.duration,
            fee = session.fee,
            "Session completed"
        );
        self.payment.open(session.fee);
        self.phase = SpotPhase::AwaitingPayment;
        TrackerUpdate::Completed(session)
    }
}
