use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("source error: {0}")]
    Source(String),
    #[error("source io error: {0}")]
    SourceIo(#[from] std::io::Error),
    #[error("runtime channel closed")]
    RuntimeClosed,
    #[error("state lock poisoned")]
    StateLock,
}
