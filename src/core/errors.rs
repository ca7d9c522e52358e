// Custom error types for better error handling and debugging
//
// Using thiserror for ergonomic error definitions with:
// - Context preservation
// - Type-safe error matching
// - Automatic Display/Error trait implementations
// - Source error chaining

use thiserror::Error;

use crate::core::types::ServiceState;

/// Recognition engine errors
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("ONNX inference failed: {0}")]
    InferenceFailed(#[from] ort::Error),

    #[error("Recognition model not found at: {0}")]
    ModelNotFound(String),

    #[error("Vocabulary not found at: {0}")]
    VocabNotFound(String),

    #[error("Vocabulary parsing failed: {0}")]
    VocabParseFailed(String),

    #[error("Image preprocessing failed: {0}")]
    PreprocessingFailed(String),

    #[error("Recognition model produced no outputs")]
    NoModelOutput,

    #[error("Unexpected logits shape: {0:?}")]
    UnexpectedLogitsShape(Vec<usize>),
}

/// Model registry errors
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Failed to load recognition model for language '{lang}': {source}")]
    ModelInit {
        lang: String,
        #[source]
        source: ModelError,
    },

    #[error("Language '{0}' is not supported")]
    UnsupportedLanguage(String),
}

/// Worker pool errors
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("Executor is stopped and no longer accepts work")]
    Stopped,
}

/// OCR service errors (lifecycle and job execution)
#[derive(Debug, Error)]
pub enum OcrServiceError {
    #[error("OCR model initialization failed: {0}")]
    Initialization(#[source] RegistryError),

    #[error("OCR service is not ready (state: {0})")]
    NotReady(ServiceState),

    #[error("Language '{0}' is not supported")]
    UnsupportedLanguage(String),

    #[error("OCR execution failed: {0}")]
    ExecutionFailed(#[source] ModelError),

    #[error("OCR worker terminated before returning a result")]
    WorkerGone,

    #[error("Task join failed: {0}")]
    TaskJoinFailed(String),
}

/// Image source errors, raised before a job reaches the OCR service
#[derive(Debug, Error)]
pub enum ImageLoadError {
    #[error("Failed to read image at {path}: {source}")]
    ReadFailed {
        path: String,
        source: std::io::Error,
    },

    #[error("Failed to decode image at {path}: {source}")]
    DecodeFailed {
        path: String,
        source: image::ImageError,
    },

    #[error("Image decoding task failed: {0}")]
    TaskFailed(String),
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Worker thread count must be > 0")]
    InvalidWorkerCount,

    #[error("Concurrent job limit must be > 0")]
    InvalidJobLimit,

    #[error("No OCR languages configured")]
    NoLanguages,

    #[error("Invalid language code: '{0}'")]
    InvalidLanguageCode(String),

    #[error("Classifier pattern failed to compile: {0}")]
    InvalidPattern(#[from] regex::Error),
}
