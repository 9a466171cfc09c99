//! Single event loop owning the tracker and the history.
//!
//! Occupancy signals, timer expiries, API commands and the display tick are
//! all handled here one at a time, so tracker state needs no locking. Results
//! are published into the shared [`AppState`] for readers.

use crate::error::AppError;
use crate::history::store::SessionPersistence;
use crate::history::{Confirmation, HistoryStats, SessionHistory};
use crate::sensor::{OccupancySource, SourceSignal, pump_source};
use crate::state::AppState;
use crate::tracker::timer::{Clock, Scheduler, TimerHandle, TimerKind};
use crate::tracker::{SessionTracker, TrackerUpdate};
use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, RwLock};
use std::time::{Duration, SystemTime};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub const COMMAND_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug)]
pub enum RuntimeCommand {
    Source(SourceSignal),
    TimerFired(TimerHandle),
    Toggle,
    Pay,
    CancelPayment,
    Reset,
    ClearHistory {
        confirmation: Confirmation,
        reply: oneshot::Sender<ClearOutcome>,
    },
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClearOutcome {
    pub cleared: bool,
    pub stats: HistoryStats,
}

/// Timers as tokio tasks that post `TimerFired` back into the command channel.
pub struct TokioScheduler {
    commands: mpsc::Sender<RuntimeCommand>,
    next_id: u64,
    tasks: HashMap<TimerHandle, JoinHandle<()>>,
}

impl TokioScheduler {
    pub fn new(commands: mpsc::Sender<RuntimeCommand>) -> Self {
        Self {
            commands,
            next_id: 1,
            tasks: HashMap::new(),
        }
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(&mut self, delay: Duration, kind: TimerKind) -> TimerHandle {
        self.tasks.retain(|_, task| !task.is_finished());
        let handle = TimerHandle(self.next_id);
        self.next_id += 1;
        let commands = self.commands.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            debug!(handle = handle.0, kind = ?kind, "Timer fired");
            let _ = commands.send(RuntimeCommand::TimerFired(handle)).await;
        });
        self.tasks.insert(handle, task);
        handle
    }

    fn cancel(&mut self, handle: TimerHandle) {
        if let Some(task) = self.tasks.remove(&handle) {
            task.abort();
        }
    }
}

pub struct Runtime<C, S, P> {
    tracker: SessionTracker<C, S>,
    history: SessionHistory<P>,
    state: Arc<RwLock<AppState>>,
}

impl<C, S, P> Runtime<C, S, P>
where
    C: Clock,
    S: Scheduler,
    P: SessionPersistence,
{
    pub fn new(
        tracker: SessionTracker<C, S>,
        history: SessionHistory<P>,
        state: Arc<RwLock<AppState>>,
    ) -> Result<Self, AppError> {
        let runtime = Self {
            tracker,
            history,
            state,
        };
        runtime.publish_history()?;
        runtime.publish_spot()?;
        Ok(runtime)
    }

    pub fn tracker(&self) -> &SessionTracker<C, S> {
        &self.tracker
    }

    pub fn history(&self) -> &SessionHistory<P> {
        &self.history
    }

    pub fn apply(&mut self, command: RuntimeCommand) -> Result<TrackerUpdate, AppError> {
        let update = match command {
            RuntimeCommand::Source(SourceSignal::Event(event)) => {
                self.tracker.handle_occupancy(event.occupied)
            }
            RuntimeCommand::Source(SourceSignal::Connected) => {
                info!("Occupancy source connected");
                self.set_source_connected(true)?;
                TrackerUpdate::Unchanged
            }
            RuntimeCommand::Source(SourceSignal::Disconnected { reason }) => {
                warn!(
                    reason = %reason,
                    phase = ?self.tracker.phase(),
                    "Occupancy source disconnected"
                );
                self.set_source_connected(false)?;
                TrackerUpdate::Unchanged
            }
            RuntimeCommand::TimerFired(handle) => self.tracker.handle_timer(handle),
            RuntimeCommand::Toggle => self.tracker.manual_toggle(),
            RuntimeCommand::Pay => self.tracker.pay(),
            RuntimeCommand::CancelPayment => self.tracker.cancel_payment(),
            RuntimeCommand::Reset => self.tracker.reset(),
            RuntimeCommand::ClearHistory {
                confirmation,
                reply,
            } => {
                let cleared = self.history.clear(confirmation);
                self.publish_history()?;
                let outcome = ClearOutcome {
                    cleared,
                    stats: self.history.aggregate(),
                };
                if reply.send(outcome).is_err() {
                    debug!("Clear requester went away before reply");
                }
                TrackerUpdate::Unchanged
            }
            RuntimeCommand::Shutdown => TrackerUpdate::Unchanged,
        };

        if let TrackerUpdate::Completed(session) = &update {
            self.history.append(session.clone());
            self.publish_history()?;
            let mut guard = self.state.write().map_err(|_| AppError::StateLock)?;
            guard.publish_completed(session.clone());
        }
        self.publish_spot()?;
        Ok(update)
    }

    /// Refresh the live elapsed time and fee.
    pub fn tick(&self) -> Result<(), AppError> {
        self.publish_spot()
    }

    pub async fn run(mut self, mut commands: mpsc::Receiver<RuntimeCommand>, tick_interval: Duration) {
        let mut ticker = tokio::time::interval(tick_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(
            tick_interval_ms = tick_interval.as_millis() as u64,
            "Session runtime started"
        );

        loop {
            tokio::select! {
                command = commands.recv() => {
                    let Some(command) = command else { break };
                    if matches!(command, RuntimeCommand::Shutdown) {
                        break;
                    }
                    if let Err(err) = self.apply(command) {
                        warn!(error = %err, "Failed to apply runtime command");
                    }
                }
                _ = ticker.tick() => {
                    if let Err(err) = self.tick() {
                        warn!(error = %err, "Failed to publish session tick");
                    }
                }
            }
        }

        info!("Session runtime stopped");
    }

    fn set_source_connected(&self, connected: bool) -> Result<(), AppError> {
        let mut guard = self.state.write().map_err(|_| AppError::StateLock)?;
        guard.set_source_connected(connected);
        Ok(())
    }

    fn publish_spot(&self) -> Result<(), AppError> {
        let snapshot = self.tracker.snapshot();
        let mut guard = self.state.write().map_err(|_| AppError::StateLock)?;
        guard.set_spot(snapshot, SystemTime::now());
        Ok(())
    }

    fn publish_history(&self) -> Result<(), AppError> {
        let sessions = self.history.list().to_vec();
        let stats = self.history.aggregate();
        let mut guard = self.state.write().map_err(|_| AppError::StateLock)?;
        guard.set_history(sessions, stats);
        Ok(())
    }
}

/// Read `source` on a dedicated thread and forward its signals to the runtime.
pub fn spawn_source_thread<T>(
    mut source: T,
    commands: mpsc::Sender<RuntimeCommand>,
    stop: Arc<AtomicBool>,
) -> std::thread::JoinHandle<()>
where
    T: OccupancySource + Send + 'static,
{
    std::thread::spawn(move || {
        pump_source(&mut source, &stop, |signal| {
            commands
                .blocking_send(RuntimeCommand::Source(signal))
                .map_err(|_| AppError::RuntimeClosed)
        });
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::HISTORY_KEY;
    use crate::history::store::MemoryStore;
    use crate::sensor::OccupancyEvent;
    use crate::sensor::mock::ScriptedSource;
    use crate::session::Tariff;
    use crate::tracker::timer::{SystemClock, VirtualTimers};
    use crate::tracker::{SpotPhase, TrackerSettings};

    type TestRuntime = Runtime<VirtualTimers, VirtualTimers, Arc<MemoryStore>>;

    fn runtime(timers: &VirtualTimers, store: Arc<MemoryStore>) -> Result<(TestRuntime, Arc<RwLock<AppState>>), AppError> {
        let state = Arc::new(RwLock::new(AppState::default()));
        let tracker = SessionTracker::new(timers.clone(), timers.clone(), TrackerSettings::default());
        let history = SessionHistory::open(store);
        let runtime = Runtime::new(tracker, history, Arc::clone(&state))?;
        Ok((runtime, state))
    }

    fn occupancy(occupied: bool) -> RuntimeCommand {
        RuntimeCommand::Source(SourceSignal::Event(OccupancyEvent { occupied }))
    }

    fn fire_due(runtime: &mut TestRuntime, timers: &VirtualTimers, until: u64) -> Result<(), AppError> {
        while let Some((handle, _)) = timers.pop_due(until) {
            runtime.apply(RuntimeCommand::TimerFired(handle))?;
        }
        Ok(())
    }

    #[test]
    fn completed_session_reaches_history_and_state() -> Result<(), AppError> {
        let timers = VirtualTimers::starting_at(0);
        let store = Arc::new(MemoryStore::new());
        let (mut runtime, state) = runtime(&timers, Arc::clone(&store))?;
        let completed_rx = state.read().map_err(|_| AppError::StateLock)?.subscribe_completed();

        runtime.apply(occupancy(true))?;
        timers.set_now(10_000);
        runtime.apply(occupancy(false))?;
        fire_due(&mut runtime, &timers, 12_000)?;

        assert_eq!(runtime.history().list().len(), 1);
        let guard = state.read().map_err(|_| AppError::StateLock)?;
        assert_eq!(guard.sessions().len(), 1);
        assert_eq!(guard.stats().total_sessions, 1);
        assert_eq!(guard.spot().phase, SpotPhase::AwaitingPayment);
        assert_eq!(completed_rx.borrow().as_ref().map(|s| s.end), Some(11_500));
        Ok(())
    }

    #[test]
    fn disconnect_leaves_pending_exit_in_place() -> Result<(), AppError> {
        let timers = VirtualTimers::starting_at(0);
        let (mut runtime, state) = runtime(&timers, Arc::new(MemoryStore::new()))?;

        runtime.apply(RuntimeCommand::Source(SourceSignal::Connected))?;
        runtime.apply(occupancy(true))?;
        timers.set_now(5_000);
        runtime.apply(occupancy(false))?;
        runtime.apply(RuntimeCommand::Source(SourceSignal::Disconnected {
            reason: "unplugged".to_string(),
        }))?;

        assert_eq!(runtime.tracker().phase(), SpotPhase::PendingExit);
        assert!(!state.read().map_err(|_| AppError::StateLock)?.source_connected());

        runtime.apply(RuntimeCommand::Reset)?;
        assert_eq!(runtime.tracker().phase(), SpotPhase::Vacant);
        assert_eq!(timers.pending_count(), 0);
        Ok(())
    }

    #[test]
    fn clear_history_replies_with_outcome() -> Result<(), Box<dyn std::error::Error>> {
        let timers = VirtualTimers::starting_at(0);
        let (mut runtime, state) = runtime(&timers, Arc::new(MemoryStore::new()))?;
        runtime.apply(RuntimeCommand::Toggle)?;
        timers.set_now(60_000);
        runtime.apply(RuntimeCommand::Toggle)?;

        let (reply, mut declined_rx) = oneshot::channel();
        runtime.apply(RuntimeCommand::ClearHistory {
            confirmation: Confirmation::Declined,
            reply,
        })?;
        let declined = declined_rx.try_recv()?;
        assert!(!declined.cleared);
        assert_eq!(declined.stats.total_sessions, 1);

        let (reply, mut confirmed_rx) = oneshot::channel();
        runtime.apply(RuntimeCommand::ClearHistory {
            confirmation: Confirmation::Confirmed,
            reply,
        })?;
        let confirmed = confirmed_rx.try_recv()?;
        assert!(confirmed.cleared);
        assert_eq!(confirmed.stats.total_sessions, 0);
        assert!(state.read().map_err(|_| AppError::StateLock)?.sessions().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn run_loop_processes_source_thread_events() -> Result<(), Box<dyn std::error::Error>> {
        let timers = VirtualTimers::starting_at(0);
        let store = Arc::new(MemoryStore::new());
        let (runtime, state) = runtime(&timers, store)?;
        let (tx, rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);

        let source = ScriptedSource::from_readings(&[true, false, true]);
        let reader = spawn_source_thread(source, tx.clone(), Arc::new(AtomicBool::new(false)));
        let loop_handle = tokio::spawn(runtime.run(rx, Duration::from_millis(10)));

        tokio::task::spawn_blocking(move || reader.join()).await?.ok();
        tx.send(RuntimeCommand::Shutdown).await?;
        loop_handle.await?;

        let guard = state.read().map_err(|_| std::io::Error::other("state lock poisoned"))?;
        assert_eq!(guard.spot().phase, SpotPhase::Occupied);
        assert_eq!(guard.spot().entry_time, Some(0));
        assert!(!guard.source_connected());
        Ok(())
    }

    #[tokio::test]
    async fn tokio_scheduler_debounces_exits_in_real_time() -> Result<(), Box<dyn std::error::Error>> {
        let state = Arc::new(RwLock::new(AppState::default()));
        let store = Arc::new(MemoryStore::new());
        let (tx, rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let settings = TrackerSettings {
            tariff: Tariff::new(20.0),
            exit_debounce: Duration::from_millis(150),
            min_duration_secs: 0.2,
        };
        let tracker = SessionTracker::new(SystemClock, TokioScheduler::new(tx.clone()), settings);
        let runtime = Runtime::new(tracker, SessionHistory::open(Arc::clone(&store)), Arc::clone(&state))?;
        let loop_handle = tokio::spawn(runtime.run(rx, Duration::from_millis(50)));
        let phase = || state.read().map(|guard| guard.spot().phase).ok();

        tx.send(occupancy(true)).await?;
        tokio::time::sleep(Duration::from_millis(400)).await;

        // Vacancy reverted inside the window: the pending timer is aborted.
        tx.send(occupancy(false)).await?;
        tokio::time::sleep(Duration::from_millis(40)).await;
        tx.send(occupancy(true)).await?;
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(phase(), Some(SpotPhase::Occupied));
        assert_eq!(store.load(HISTORY_KEY)?.unwrap_or_default().len(), 0);

        // Vacancy held past the window: the timer fires through the channel.
        tx.send(occupancy(false)).await?;
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(phase(), Some(SpotPhase::AwaitingPayment));
        let sessions = store.load(HISTORY_KEY)?.unwrap_or_default();
        assert_eq!(sessions.len(), 1);
        assert!(sessions[0].duration >= 0.8);

        tx.send(RuntimeCommand::Shutdown).await?;
        loop_handle.await?;
        Ok(())
    }
}
