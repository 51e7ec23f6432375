//! Error taxonomy for the review engine.
//!
//! Structural and authorization errors are raised before any write.
//! Storage failures during creation abort the enclosing transaction;
//! storage failures during deletion never reach this type, they are
//! logged by the media manager instead.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReviewError {
    /// The referenced shop, review, user or media row does not exist,
    /// or does not belong to the stated parent.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// The actor lacks the role or ownership the mutation requires.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("file storage failure: {0}")]
    FileStorage(String),

    /// Aggregate recomputation failed after a review change; the change
    /// is rolled back together with it.
    #[error("consistency failure: {0}")]
    Consistency(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type Result<T> = std::result::Result<T, ReviewError>;

impl ReviewError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized(message.into())
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    /// Machine-readable code used in HTTP error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::Unauthorized(_) => "unauthorized",
            Self::BadRequest(_) => "bad_request",
            Self::FileStorage(_) => "file_storage",
            Self::Consistency(_) => "consistency",
            Self::Database(_) => "internal",
        }
    }

    /// HTTP status code the server answers with for this error.
    pub fn status(&self) -> u16 {
        match self {
            Self::NotFound { .. } => 404,
            Self::Unauthorized(_) => 403,
            Self::BadRequest(_) => 400,
            Self::FileStorage(_) | Self::Consistency(_) | Self::Database(_) => 500,
        }
    }
}
