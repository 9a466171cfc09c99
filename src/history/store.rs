use crate::session::Session;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("history io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("history encoding error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("history store unavailable: {0}")]
    Unavailable(String),
}

/// Key-value persistence for the session history.
pub trait SessionPersistence {
    /// `Ok(None)` when nothing has been stored under `key` yet.
    fn load(&self, key: &str) -> Result<Option<Vec<Session>>, PersistError>;
    fn save(&self, key: &str, sessions: &[Session]) -> Result<(), PersistError>;

    /// Move an unreadable value out of the way so the next save cannot
    /// overwrite it. Stores with nothing to keep may ignore this.
    fn set_aside(&self, _key: &str) -> Result<(), PersistError> {
        Ok(())
    }
}

/// Stores each key as `<dir>/<key>.json`.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }

    pub fn set_aside_path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json.corrupt"))
    }
}

impl SessionPersistence for JsonFileStore {
    fn load(&self, key: &str) -> Result<Option<Vec<Session>>, PersistError> {
        let path = self.path_for(key);
        let contents = match std::fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        Ok(Some(serde_json::from_str(&contents)?))
    }

    fn save(&self, key: &str, sessions: &[Session]) -> Result<(), PersistError> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec(sessions)?)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    /// Renames `<key>.json` to `<key>.json.corrupt`, replacing any earlier copy.
    fn set_aside(&self, key: &str) -> Result<(), PersistError> {
        std::fs::rename(self.path_for(key), self.set_aside_path_for(key))?;
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Vec<Session>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sessions(key: &str, sessions: Vec<Session>) -> Self {
        let store = Self::new();
        if let Ok(mut entries) = store.entries.lock() {
            entries.insert(key.to_string(), sessions);
        }
        store
    }
}

impl SessionPersistence for MemoryStore {
    fn load(&self, key: &str) -> Result<Option<Vec<Session>>, PersistError> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| PersistError::Unavailable("memory store lock poisoned".to_string()))?;
        Ok(entries.get(key).cloned())
    }

    fn save(&self, key: &str, sessions: &[Session]) -> Result<(), PersistError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| PersistError::Unavailable("memory store lock poisoned".to_string()))?;
        entries.insert(key.to_string(), sessions.to_vec());
        Ok(())
    }
}

impl<P: SessionPersistence + ?Sized> SessionPersistence for std::sync::Arc<P> {
    fn load(&self, key: &str) -> Result<Option<Vec<Session>>, PersistError> {
        (**self).load(key)
    }

    fn save(&self, key: &str, sessions: &[Session]) -> Result<(), PersistError> {
        (**self).save(key, sessions)
    }

    fn set_aside(&self, key: &str) -> Result<(), PersistError> {
        (**self).set_aside(key)
    }
}
