use thiserror::Error;

/// Errors returned by the ranker trainer.
#[derive(Debug, Error)]
pub enum TrainerError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("dataset error: {0}")]
    Dataset(String),

    #[error("training error: {0}")]
    Training(String),
}

/// Errors raised by an experiment tracking store.
#[derive(Debug, Error)]
pub enum TrackingError {
    #[error("tracking store I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("tracking metadata could not be encoded: {0}")]
    Metadata(#[from] serde_yaml::Error),

    #[error("invalid tracking key {0:?}")]
    InvalidKey(String),
}
