use crate::session::Session;
use serde::Serialize;
use tracing::{info, warn};

pub mod store;

use store::{PersistError, SessionPersistence};

pub const HISTORY_KEY: &str = "parking_history";

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct HistoryStats {
    pub total_sessions: usize,
    pub total_revenue: f64,
    /// Seconds; zero for an empty history.
    pub avg_duration: f64,
}

impl HistoryStats {
    pub fn from_sessions(sessions: &[Session]) -> Self {
        let total_sessions = sessions.len();
        // f64's Sum starts from -0.0; fold from +0.0 so empty totals serialize as 0.0.
        let total_revenue = sessions.iter().fold(0.0, |sum, session| sum + session.fee);
        let avg_duration = if total_sessions == 0 {
            0.0
        } else {
            sessions.iter().fold(0.0, |sum, session| sum + session.duration) / total_sessions as f64
        };
        Self {
            total_sessions,
            total_revenue,
            avg_duration,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    Confirmed,
    Declined,
}

impl From<bool> for Confirmation {
    fn from(confirmed: bool) -> Self {
        if confirmed {
            Confirmation::Confirmed
        } else {
            Confirmation::Declined
        }
    }
}

/// Append-only record of completed sessions backed by best-effort persistence.
pub struct SessionHistory<P> {
    sessions: Vec<Session>,
    persistence: P,
}

impl<P: SessionPersistence> SessionHistory<P> {
    /// Load the stored history; anything unreadable starts an empty one.
    /// Undecodable contents are set aside first so the next append does not
    /// overwrite them.
    pub fn open(persistence: P) -> Self {
        let sessions = match persistence.load(HISTORY_KEY) {
            Ok(Some(sessions)) => {
                info!(count = sessions.len(), "Session history loaded");
                sessions
            }
            Ok(None) => Vec::new(),
            Err(err @ PersistError::Json(_)) => {
                match persistence.set_aside(HISTORY_KEY) {
                    Ok(()) => warn!(error = %err, "Stored session history is corrupt, set aside and starting empty"),
                    Err(aside) => warn!(
                        error = %err,
                        set_aside_error = %aside,
                        "Stored session history is corrupt and could not be set aside"
                    ),
                }
                Vec::new()
            }
            Err(err) => {
                warn!(error = %err, "Failed to load session history, starting empty");
                Vec::new()
            }
        };
        Self {
            sessions,
            persistence,
        }
    }

    pub fn append(&mut self, session: Session) {
        self.sessions.push(session);
        self.persist();
    }

    pub fn list(&self) -> &[Session] {
        &self.sessions
    }

    pub fn aggregate(&self) -> HistoryStats {
        HistoryStats::from_sessions(&self.sessions)
    }

    /// Returns `true` when the history was cleared.
    pub fn clear(&mut self, confirmation: Confirmation) -> bool {
        if confirmation != Confirmation::Confirmed {
            info!("History clear declined");
            return false;
        }
        let removed = self.sessions.len();
        self.sessions.clear();
        self.persist();
        info!(removed, "Session history cleared");
        true
    }

    fn persist(&self) {
        if let Err(err) = self.persistence.save(HISTORY_KEY, &self.sessions) {
            warn!(
                error = %err,
                count = self.sessions.len(),
                "Failed to persist session history"
            );
        }
    }
}
