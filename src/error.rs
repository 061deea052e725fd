//! Error types shared by the store, the remote boundary and the sync engine.

use thiserror::Error;

use crate::remote::RemoteError;

/// Failure of any core operation.
///
/// Variants map onto the four failure classes the sync layer distinguishes:
/// connectivity, remote rejection, local storage, and caller misuse
/// (active-visit violations, concurrent syncs, bad input).
#[derive(Debug, Error)]
pub enum AppError {
    /// A sync or online-only entry point was called while offline.
    #[error("offline: cannot {0} without connectivity")]
    Offline(&'static str),

    /// The remote store rejected or could not be reached for an operation.
    #[error("remote error: {0}")]
    Remote(#[from] RemoteError),

    /// The LMDB environment failed.
    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Another Sync-Up or Sync-Down run currently holds the sync guard.
    #[error("a sync run is already in progress")]
    SyncInProgress,

    #[error("visit {visit_id} is already active; end it before starting another")]
    ActiveVisitExists { visit_id: String },

    #[error("no active visit")]
    NoActiveVisit,

    #[error("validation error: {0}")]
    Validation(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl From<lmdb::Error> for AppError {
    fn from(err: lmdb::Error) -> Self {
        AppError::Storage(format!("LMDB error: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Storage(format!("IO error: {err}"))
    }
}

pub type AppResult<T> = Result<T, AppError>;
