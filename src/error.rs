use thiserror::Error;

/// Crate-wide error taxonomy.
///
/// Trial rejection is deliberately *not* represented here: a window failing
/// validation is an expected outcome during a live session and is reported
/// through [`crate::recorder::TrialOutcome`] instead.
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("failed to reach acquisition device: {0}")]
    Connection(String),
    #[error("channel count mismatch: expected {expected}, got {actual}")]
    ChannelMismatch { expected: usize, actual: usize },
    #[error("acquisition stream fault: {0}")]
    Stream(String),
    #[error("failed to persist trial artifact: {0}")]
    Artifact(String),
}

impl From<std::io::Error> for HarnessError {
    fn from(value: std::io::Error) -> Self {
        HarnessError::Artifact(value.to_string())
    }
}

impl From<rmp_serde::encode::Error> for HarnessError {
    fn from(value: rmp_serde::encode::Error) -> Self {
        HarnessError::Artifact(value.to_string())
    }
}

impl From<rmp_serde::decode::Error> for HarnessError {
    fn from(value: rmp_serde::decode::Error) -> Self {
        HarnessError::Artifact(value.to_string())
    }
}
