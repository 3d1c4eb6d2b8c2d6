use thiserror::Error;

use crate::error::StoreError;

#[derive(Debug, Error)]
pub enum AcquisitionError {
    #[error("sample rate must be greater than zero")]
    InvalidSampleRate,
    #[error("batch sample {index} is out of order or not finite")]
    UnorderedBatch { index: usize },
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("source failed: {0}")]
    Source(String),
    #[error("acquisition worker panicked")]
    WorkerPanicked,
}
