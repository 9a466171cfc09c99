use crate::history::HistoryStats;
use crate::session::Session;
use crate::tracker::payment::PaymentStatus;
use crate::tracker::{SpotPhase, TrackerSnapshot};
use std::time::SystemTime;
use tokio::sync::watch;

#[derive(Debug)]
pub struct AppState {
    hourly_rate: f64,
    source_connected: bool,
    spot: TrackerSnapshot,
    spot_tx: watch::Sender<TrackerSnapshot>,
    spot_updated_at: SystemTime,
    sessions: Vec<Session>,
    stats: HistoryStats,
    completed_tx: watch::Sender<Option<Session>>,
}

impl AppState {
    pub fn new(hourly_rate: f64) -> Self {
        let spot = TrackerSnapshot {
            phase: SpotPhase::Vacant,
            entry_time: None,
            tick: None,
            payment: PaymentStatus::None,
            payment_success: false,
        };
        let (spot_tx, _spot_rx) = watch::channel(spot);
        let (completed_tx, _completed_rx) = watch::channel(None);
        Self {
            hourly_rate,
            source_connected: false,
            spot,
            spot_tx,
            spot_updated_at: SystemTime::now(),
            sessions: Vec::new(),
            stats: HistoryStats::from_sessions(&[]),
            completed_tx,
        }
    }

    pub fn hourly_rate(&self) -> f64 {
        self.hourly_rate
    }

    pub fn source_connected(&self) -> bool {
        self.source_connected
    }

    pub fn set_source_connected(&mut self, connected: bool) {
        self.source_connected = connected;
    }

    pub fn spot(&self) -> &TrackerSnapshot {
        &self.spot
    }

    pub fn spot_updated_at(&self) -> SystemTime {
        self.spot_updated_at
    }

    pub fn subscribe_spot(&self) -> watch::Receiver<TrackerSnapshot> {
        self.spot_tx.subscribe()
    }

    pub fn set_spot(&mut self, spot: TrackerSnapshot, at: SystemTime) {
        self.spot = spot;
        self.spot_updated_at = at;
        self.spot_tx.send_replace(spot);
    }

    pub fn sessions(&self) -> &[Session] {
        &self.sessions
    }

    pub fn stats(&self) -> &HistoryStats {
        &self.stats
    }

    pub fn set_history(&mut self, sessions: Vec<Session>, stats: HistoryStats) {
        self.sessions = sessions;
        self.stats = stats;
    }

    /// Receives every completed session; this is the payment prompt signal.
    pub fn subscribe_completed(&self) -> watch::Receiver<Option<Session>> {
        self.completed_tx.subscribe()
    }

    pub fn publish_completed(&mut self, session: Session) {
        self.completed_tx.send_replace(Some(session));
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new(crate::tracker::DEFAULT_HOURLY_RATE)
    }
}
