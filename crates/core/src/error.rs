use thiserror::Error;

pub type RewardResult<T> = Result<T, RewardError>;

#[derive(Error, Debug)]
pub enum RewardError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Payout rail error: {0}")]
    PayoutRail(String),

    #[error("Reference generation exhausted after {attempts} attempts")]
    ReferenceExhausted { attempts: u32 },

    #[error("Settlement already in progress for period {0}")]
    PeriodLocked(String),

    #[error("Batch aborted: {0}")]
    BatchAborted(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}
