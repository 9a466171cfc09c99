use crate::session::TimestampMs;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerHandle(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    ExitDebounce,
    PaymentSettle,
    PaymentDismiss,
}

pub trait Clock {
    fn now_ms(&self) -> TimestampMs;
}

/// Cancellable one-shot timers. A fired timer is delivered back to the tracker
/// as its handle; a cancelled handle must never be delivered.
pub trait Scheduler {
    fn schedule(&mut self, delay: Duration, kind: TimerKind) -> TimerHandle;
    fn cancel(&mut self, handle: TimerHandle);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> TimestampMs {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis() as TimestampMs)
            .unwrap_or(0)
    }
}

#[derive(Debug)]
struct VirtualInner {
    now_ms: TimestampMs,
    next_id: u64,
    pending: Vec<(TimestampMs, TimerHandle, TimerKind)>,
}

/// Manually advanced clock and scheduler for deterministic timer tests.
/// Clones share the same timeline.
#[derive(Debug, Clone)]
pub struct VirtualTimers {
    inner: Arc<Mutex<VirtualInner>>,
}

impl VirtualTimers {
    pub fn starting_at(now_ms: TimestampMs) -> Self {
        Self {
            inner: Arc::new(Mutex::new(VirtualInner {
                now_ms,
                next_id: 1,
                pending: Vec::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VirtualInner> {
        // A panicking test is the only way to poison this lock.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn set_now(&self, now_ms: TimestampMs) {
        self.lock().now_ms = now_ms;
    }

    pub fn pending_count(&self) -> usize {
        self.lock().pending.len()
    }

    /// Pop the earliest timer due at or before `until`, moving the clock to its
    /// due time. Returns `None` (and moves the clock to `until`) when nothing
    /// is due.
    pub fn pop_due(&self, until: TimestampMs) -> Option<(TimerHandle, TimerKind)> {
        let mut inner = self.lock();
        let next = inner
            .pending
            .iter()
            .enumerate()
            .filter(|(_, (due, _, _))| *due <= until)
            .min_by_key(|(_, (due, handle, _))| (*due, *handle))
            .map(|(index, _)| index);

        match next {
            Some(index) => {
                let (due, handle, kind) = inner.pending.remove(index);
                inner.now_ms = inner.now_ms.max(due);
                Some((handle, kind))
            }
            None => {
                inner.now_ms = inner.now_ms.max(until);
                None
            }
        }
    }
}

impl Clock for VirtualTimers {
    fn now_ms(&self) -> TimestampMs {
        self.lock().now_ms
    }
}

impl Scheduler for VirtualTimers {
    fn schedule(&mut self, delay: Duration, kind: TimerKind) -> TimerHandle {
        let mut inner = self.lock();
        let handle = TimerHandle(inner.next_id);
        inner.next_id += 1;
        let due = inner.now_ms + delay.as_millis() as TimestampMs;
        inner.pending.push((due, handle, kind));
        handle
    }

    fn cancel(&mut self, handle: TimerHandle) {
        self.lock().pending.retain(|(_, pending, _)| *pending != handle);
    }
}
