// Library exports for the financial document OCR backend

pub mod classify;
pub mod core;
pub mod engine;
pub mod service;
pub mod utils;

pub use self::core::{
    config::Config,
    errors::{
        ConfigError, ExecutorError, ImageLoadError, ModelError, OcrServiceError, RegistryError,
    },
    types::{OcrJob, OcrLine, OcrOutcome, OcrResponse, ServiceState},
};

pub use classify::{Classification, FinancialDocumentClassifier, Tag};
pub use engine::{CrnnRecognizer, TextRecognizer};
pub use service::{BoundedExecutor, ModelRegistry, OcrService};
