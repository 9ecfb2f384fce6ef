use onefocus_core::ErrorKind;
use onefocus_storage::{ApiError, StoreError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("{0}")]
    Precondition(String),
}

impl SyncError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::Api(err) => err.kind(),
            SyncError::Store(err) => err.kind(),
            SyncError::Precondition(_) => ErrorKind::FatalPrecondition,
        }
    }
}
