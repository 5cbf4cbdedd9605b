use thiserror::Error;

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("adapter timeout")]
    Timeout,
    #[error("fixture lock timeout")]
    LockTimeout,
    #[error("parse error: {0}")]
    Parse(String),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, AdapterError>;
