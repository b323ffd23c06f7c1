//! Error taxonomy for model loading, image decoding and inference.
//!
//! `ModelLoadError` is fatal at startup. `ImageDecodeError` and
//! `ClassificationError` are request scoped and never touch the cached model.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum ModelLoadError {
    #[error("Model artifact not found at {}", path.display())]
    NotFound { path: PathBuf },

    #[error("Failed to read model artifact: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid model configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid label mapping: {0}")]
    Labels(String),

    #[error("Failed to load model weights: {0}")]
    Weights(String),

    #[error("Failed to fetch model from hub: {0}")]
    Hub(String),

    #[error("Model loading task failed: {0}")]
    Task(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ImageDecodeError {
    #[error("Uploaded image is empty")]
    Empty,

    #[error("Unsupported image format {0}, expected JPEG or PNG")]
    UnsupportedFormat(String),

    #[error("Invalid image data: {0}")]
    Malformed(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ClassificationError {
    #[error("Failed to prepare image for inference: {0}")]
    Preprocess(String),

    #[error("Inference failed: {0}")]
    Inference(String),

    #[error("Model returned {actual} scores for {expected} classes")]
    OutputShape { expected: usize, actual: usize },

    #[error("Model returned invalid score {score} for class {class_id}")]
    InvalidScore { class_id: usize, score: f32 },

    #[error("Inference task failed: {0}")]
    Task(String),
}

/// Everything a single classification request can fail with.
#[derive(Debug, thiserror::Error)]
pub enum ClassifyError {
    #[error(transparent)]
    Decode(#[from] ImageDecodeError),

    #[error(transparent)]
    Model(#[from] ModelLoadError),

    #[error(transparent)]
    Classification(#[from] ClassificationError),
}

impl ClassifyError {
    /// Label used for the error counter.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Decode(_) => "decode",
            Self::Model(_) => "model",
            Self::Classification(_) => "classification",
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

/// Errors surfaced by the HTTP handlers.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Multipart field 'file' is missing")]
    MissingFile,

    #[error("Invalid multipart body: {0}")]
    Multipart(String),

    #[error("Upload exceeds the {limit} byte limit")]
    TooLarge { limit: usize },

    #[error(transparent)]
    Classify(#[from] ClassifyError),
}

impl ApiError {
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::MissingFile => "MISSING_FILE",
            Self::Multipart(_) => "BAD_MULTIPART",
            Self::TooLarge { .. } => "UPLOAD_TOO_LARGE",
            Self::Classify(ClassifyError::Decode(ImageDecodeError::Empty)) => "EMPTY_IMAGE",
            Self::Classify(ClassifyError::Decode(ImageDecodeError::UnsupportedFormat(_))) => {
                "UNSUPPORTED_IMAGE"
            }
            Self::Classify(ClassifyError::Decode(ImageDecodeError::Malformed(_))) => {
                "INVALID_IMAGE"
            }
            Self::Classify(ClassifyError::Model(_)) => "MODEL_UNAVAILABLE",
            Self::Classify(ClassifyError::Classification(_)) => "CLASSIFICATION_FAILED",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::MissingFile | Self::Multipart(_) => StatusCode::BAD_REQUEST,
            Self::TooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Classify(ClassifyError::Decode(ImageDecodeError::Empty)) => {
                StatusCode::BAD_REQUEST
            }
            Self::Classify(ClassifyError::Decode(ImageDecodeError::UnsupportedFormat(_))) => {
                StatusCode::UNSUPPORTED_MEDIA_TYPE
            }
            Self::Classify(ClassifyError::Decode(ImageDecodeError::Malformed(_))) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            Self::Classify(ClassifyError::Model(_)) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Classify(ClassifyError::Classification(_)) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let error = ErrorResponse {
            error: self.to_string(),
            code: self.error_code().to_string(),
        };
        (self.status_code(), Json(error)).into_response()
    }
}
