use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;
use thiserror::Error;

use crate::{
    registry::subdir::RegistryError,
    services::{storer::StorerError, thumbnail::ThumbnailError},
};

/// A lightweight wrapper for general errors that keeps the message local.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::internal(err.to_string())
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::internal(err.to_string())
    }
}

impl From<StorerError> for AppError {
    fn from(err: StorerError) -> Self {
        let status = match &err {
            StorerError::NotFound(_) => StatusCode::NOT_FOUND,
            StorerError::InvalidPath(_) => StatusCode::BAD_REQUEST,
            StorerError::AlreadyExists(_) => StatusCode::CONFLICT,
            StorerError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        AppError::new(status, err.to_string())
    }
}

/// Everything that can go wrong between receiving an upload request and
/// answering it. Every variant ends up in the response formatter; none of
/// them is fatal for the process.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("missing parameter `{0}`")]
    MissingParam(&'static str),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("uploads into `{0}` are not allowed")]
    NotAllowed(String),
    #[error("field `{field}` is not registered for `{subdir}`")]
    InvalidField { subdir: String, field: String },
    #[error("unknown file type `{0}`")]
    UnknownFileType(String),
    #[error("unknown upload client `{0}`")]
    UnknownClient(String),
    #[error("no files uploaded")]
    NoFiles,
    #[error("{file}: {reason}")]
    Invalid { file: String, reason: String },
    #[error("{file}: extension `{ext}` is not accepted here")]
    UnsupportedType { file: String, ext: String },
    #[error("{file}: larger than the {limit} byte limit")]
    TooLarge { file: String, limit: u64 },
    #[error("checkin rejected: {0}")]
    Checkin(String),
    #[error("file already exists: {0}")]
    ExistsFile(String),
    #[error(transparent)]
    Storer(StorerError),
    #[error(transparent)]
    Thumbnail(#[from] ThumbnailError),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error("invalid multipart body: {0}")]
    Multipart(String),
    #[error("background task failed: {0}")]
    Task(String),
}

impl From<StorerError> for UploadError {
    fn from(err: StorerError) -> Self {
        match err {
            StorerError::AlreadyExists(path) => UploadError::ExistsFile(path),
            other => UploadError::Storer(other),
        }
    }
}

impl From<tokio::task::JoinError> for UploadError {
    fn from(err: tokio::task::JoinError) -> Self {
        UploadError::Task(err.to_string())
    }
}

impl UploadError {
    pub fn status(&self) -> StatusCode {
        match self {
            UploadError::MissingParam(_)
            | UploadError::Registry(_)
            | UploadError::InvalidField { .. }
            | UploadError::UnknownFileType(_)
            | UploadError::UnknownClient(_)
            | UploadError::NoFiles
            | UploadError::Invalid { .. }
            | UploadError::Multipart(_) => StatusCode::BAD_REQUEST,
            UploadError::NotAllowed(_) | UploadError::Checkin(_) => StatusCode::FORBIDDEN,
            UploadError::UnsupportedType { .. } => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            UploadError::TooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            UploadError::ExistsFile(_) => StatusCode::CONFLICT,
            UploadError::Storer(StorerError::InvalidPath(_)) => StatusCode::BAD_REQUEST,
            UploadError::Storer(_)
            | UploadError::Thumbnail(_)
            | UploadError::Database(_)
            | UploadError::Task(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<UploadError> for AppError {
    fn from(err: UploadError) -> Self {
        AppError::new(err.status(), err.to_string())
    }
}
