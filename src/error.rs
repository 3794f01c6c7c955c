//! 错误类型定义
//! Error types for the people counter

use thiserror::Error;

/// Result type alias for the counter library
pub type Result<T> = std::result::Result<T, CounterError>;

/// 计数系统错误
#[derive(Error, Debug)]
pub enum CounterError {
    #[error("Failed to open capture source: {0}")]
    CaptureOpen(String),

    #[error("Failed to read frame: {0}")]
    CaptureRead(String),

    #[error("Detector failed: {0}")]
    Detector(String),

    #[error("Failed to persist event: {0}")]
    Persist(String),

    #[error("Producer of the previous run is still shutting down")]
    ProducerBusy,

    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Mail transport failed: {0}")]
    Transport(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CounterError {
    pub fn capture_open<S: Into<String>>(msg: S) -> Self {
        Self::CaptureOpen(msg.into())
    }

    pub fn capture_read<S: Into<String>>(msg: S) -> Self {
        Self::CaptureRead(msg.into())
    }

    pub fn detector<S: Into<String>>(msg: S) -> Self {
        Self::Detector(msg.into())
    }

    pub fn persist<S: Into<String>>(msg: S) -> Self {
        Self::Persist(msg.into())
    }
}
