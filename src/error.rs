use thiserror::Error;

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("invalid date range: {0}")]
    InvalidRange(String),
    #[error("no checkpoint to resume at {0}")]
    CheckpointUnavailable(String),
    #[error("checkpoint file invalid or unreadable: {0}")]
    CheckpointCorrupt(String),
    #[error("failed to fetch messages: {0}")]
    Fetch(String),
    #[error("another import is already running (lock: {0})")]
    AlreadyRunning(String),
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("gateway request failed: {0}")]
    Transport(String),
    #[error("gateway returned http status {0}")]
    Status(u16),
    #[error("gateway response could not be decoded: {0}")]
    Decode(String),
    #[error("gateway reported an error: {0}")]
    Reported(String),
}
