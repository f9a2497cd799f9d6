use thiserror::Error;

use super::types::Channel;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Acquisition error: {0}")]
    Acquisition(String),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Current transformer {channel} is installed backwards")]
    ReversedPolarity { channel: Channel },
    #[error("Write error: {reason}")]
    Write { reason: String, fatal: bool },
    #[error("Config error: {0}")]
    Config(String),
    #[error("Calibration aborted: {0}")]
    Aborted(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl EngineError {
    pub fn is_fatal(&self) -> bool {
        match self {
            EngineError::Write { fatal, .. } => *fatal,
            EngineError::Acquisition(_) => false,
            _ => true,
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
