use crate::store::StoreError;
use ota_core::error::AppError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DaoError {
    /// A uniqueness invariant (email, access key, deployment key) would be violated.
    #[error("{0}")]
    DuplicateEntity(String),

    #[error("{0}")]
    NotFound(String),

    /// An index row resolved to a primary row that is missing or no longer matches.
    #[error("Index divergence: {0}")]
    ConsistencyDivergence(String),

    #[error("Validation error: {0}")]
    Validation(#[from] validator::ValidationErrors),

    /// A versioned write found the row changed since it was read.
    #[error("Concurrent modification: {0}")]
    ConcurrentModification(String),

    #[error("Codec error: {0}")]
    Codec(String),

    /// A bug in how a write was assembled, not a property of stored data.
    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl DaoError {
    pub fn not_found(message: impl Into<String>) -> Self {
        DaoError::NotFound(message.into())
    }

    pub fn duplicate(message: impl Into<String>) -> Self {
        DaoError::DuplicateEntity(message.into())
    }

    /// Divergence is reported to callers exactly like an ordinary miss.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            DaoError::NotFound(_) | DaoError::ConsistencyDivergence(_)
        )
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, DaoError::DuplicateEntity(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, DaoError::ConcurrentModification(_))
    }
}

impl From<serde_json::Error> for DaoError {
    fn from(err: serde_json::Error) -> Self {
        DaoError::Codec(err.to_string())
    }
}

impl From<DaoError> for AppError {
    fn from(err: DaoError) -> Self {
        match err {
            DaoError::DuplicateEntity(msg) => AppError::Conflict(anyhow::anyhow!(msg)),
            DaoError::NotFound(msg) => AppError::NotFound(anyhow::anyhow!(msg)),
            DaoError::ConsistencyDivergence(_) => {
                AppError::NotFound(anyhow::anyhow!("Not found"))
            }
            DaoError::ConcurrentModification(msg) => AppError::Conflict(anyhow::anyhow!(msg)),
            DaoError::Validation(e) => AppError::ValidationError(e),
            DaoError::Codec(msg) | DaoError::Internal(msg) => {
                AppError::InternalError(anyhow::anyhow!(msg))
            }
            DaoError::Store(e) => AppError::DatabaseError(anyhow::Error::new(e)),
        }
    }
}
