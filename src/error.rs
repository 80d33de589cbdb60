use thiserror::Error;

#[derive(Error, Debug)]
pub enum MirrorError {
    #[error("IO operation failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialization error: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("Invalid mirror URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Unsupported protocol: {0}")]
    UnknownProtocol(String),

    #[error("Unknown distribution: {0}")]
    UnknownDistribution(String),

    #[error("Invalid mirror source: {0}")]
    InvalidSource(String),

    #[error("Round count must be a positive integer, got {0}")]
    InvalidRounds(u32),

    #[error("Probe timeout must be greater than zero, got {0:?}")]
    InvalidTimeout(std::time::Duration),

    #[error("No mirrors to rank")]
    NoMirrors,

    #[error("Ranking run incomplete: {filled} of {expected} samples recorded")]
    IncompleteRun { filled: usize, expected: usize },

    #[error("Probe task failed: {0}")]
    ProbeTask(#[from] tokio::task::JoinError),

    #[error("{0}")]
    Custom(String),
}

pub type Result<T> = std::result::Result<T, MirrorError>;
