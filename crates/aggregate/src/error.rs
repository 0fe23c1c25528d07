use moodwatch_core::CoreError;
use moodwatch_store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum AggregateError {
    #[error(transparent)]
    InvalidDay(#[from] CoreError),

    #[error("invalid rolling window: {0} days")]
    InvalidWindow(u32),

    #[error("storage failure: {0}")]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, AggregateError>;
