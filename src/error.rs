use std::time::Duration;

use thiserror::Error;

/// Failures reading or interpreting the odds feed.
///
/// The first four abort the current poll; the `Malformed*` variants only
/// drop the offending race or horse.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("odds feed request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("odds feed returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("odds feed response is not valid JSON: {0}")]
    Decode(String),

    #[error("odds feed timed out after {0:?}")]
    Timeout(Duration),

    #[error("snapshot has no race list")]
    MalformedSnapshot,

    #[error("race {race_id} skipped: {reason}")]
    MalformedRace { race_id: String, reason: String },

    #[error("horse in race {race_id} skipped: {reason}")]
    MalformedHorse { race_id: String, reason: String },
}

impl FeedError {
    /// True when the whole poll has to be abandoned.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            FeedError::Transport(_)
                | FeedError::Status { .. }
                | FeedError::Decode(_)
                | FeedError::Timeout(_)
        )
    }
}

/// Failures delivering an alert to the chat sink.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("alert delivery failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("alert sink returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("alert delivery timed out after {0:?}")]
    Timeout(Duration),
}
