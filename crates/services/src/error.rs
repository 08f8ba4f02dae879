//! Shared error types for the services crate.

use thiserror::Error;

use course_core::model::{CourseError, CourseId, ParseIdError, SectionError, SectionId};
use storage::blob::BlobError;
use storage::repository::StorageError;
use storage::signing::SigningError;
use storage::sqlite::SqliteInitError;

use crate::media::TranscodeError;

/// Errors emitted by the course, section, media, progress and playback services.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ServiceError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("{resource} {id} not found")]
    NotFound { resource: &'static str, id: String },

    #[error("authentication required")]
    Unauthorized,

    #[error("access to course {0} requires enrollment")]
    Forbidden(CourseId),

    #[error(transparent)]
    Transcode(#[from] TranscodeError),

    #[error("blob storage failed: {0}")]
    Storage(#[from] BlobError),

    #[error("persistence failed: {0}")]
    Persistence(#[from] StorageError),

    #[error(transparent)]
    Signing(#[from] SigningError),
}

impl ServiceError {
    #[must_use]
    pub fn course_not_found(id: CourseId) -> Self {
        Self::NotFound {
            resource: "course",
            id: id.to_string(),
        }
    }

    #[must_use]
    pub fn section_not_found(id: SectionId) -> Self {
        Self::NotFound {
            resource: "section",
            id: id.to_string(),
        }
    }

    /// HTTP status an upstream route should answer with.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            ServiceError::Validation(_) => 400,
            ServiceError::NotFound { .. } => 404,
            ServiceError::Unauthorized => 401,
            ServiceError::Forbidden(_) => 403,
            ServiceError::Transcode(_) => 502,
            ServiceError::Storage(_) => 503,
            ServiceError::Persistence(StorageError::NotFound) => 404,
            ServiceError::Persistence(StorageError::Conflict) => 409,
            ServiceError::Persistence(_) | ServiceError::Signing(_) => 500,
        }
    }
}

impl From<CourseError> for ServiceError {
    fn from(err: CourseError) -> Self {
        match err {
            CourseError::SectionNotFound(id) => Self::section_not_found(id),
            other => Self::Validation(other.to_string()),
        }
    }
}

impl From<SectionError> for ServiceError {
    fn from(err: SectionError) -> Self {
        Self::Validation(err.to_string())
    }
}

impl From<ParseIdError> for ServiceError {
    fn from(err: ParseIdError) -> Self {
        Self::Validation(err.to_string())
    }
}

/// Errors emitted while bootstrapping app services.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AppServicesError {
    #[error("invalid service config: {0}")]
    Config(#[from] ServiceError),
    #[error(transparent)]
    Sqlite(#[from] SqliteInitError),
    #[error(transparent)]
    Blob(#[from] BlobError),
    #[error(transparent)]
    Signing(#[from] SigningError),
}
