use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PodrelayError {
    #[error("Probe failed: {0}")]
    Probe(String),

    #[error("Corrupt segment {}: {size} bytes (minimum {min})", .path.display())]
    CorruptSegment { path: PathBuf, size: u64, min: u64 },

    #[error("Degenerate split plan: {0}")]
    PlanningDegenerate(String),

    #[error("Segment extraction failed: {0}")]
    Extraction(String),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Relay failed: {0}")]
    Relay(String),

    #[error("Upload ledger error: {0}")]
    Ledger(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PodrelayError {
    /// Whether this error came from the analysis tool rather than the file system or planner.
    pub fn is_probe(&self) -> bool {
        matches!(self, PodrelayError::Probe(_))
    }
}

pub type Result<T> = std::result::Result<T, PodrelayError>;
