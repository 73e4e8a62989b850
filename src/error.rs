use thiserror::Error;

#[derive(Error, Debug)]
pub enum IncrError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("directory is already locked: {0}")]
    AlreadyLocked(String),
    #[error("lock error: {0}")]
    Lock(String),
    #[error("command \"{command}\" failed: {stderr}")]
    Fsctl { command: String, stderr: String },
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("remote version mismatch: local={local}, remote={remote}")]
    VersionMismatch { local: u32, remote: u32 },
    #[error("malformed receive-check response: {0}")]
    Protocol(String),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("stream error: {0}")]
    Stream(String),
    #[error("operation cancelled")]
    Cancelled,
    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),
    #[error("already exists: {0}")]
    AlreadyExists(String),
}

pub type Result<T> = std::result::Result<T, IncrError>;
