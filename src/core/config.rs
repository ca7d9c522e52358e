use crate::core::errors::ConfigError;
use std::env;
use tracing::Level;

/// Languages served when OCR_LANGUAGES is not set
pub const DEFAULT_LANGUAGES: [&str; 5] = ["en", "es", "fr", "de", "it"];

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub log_level: Level,
}

/// OCR service configuration
#[derive(Debug, Clone)]
pub struct OcrConfig {
    /// Number of OS threads in the blocking worker pool
    pub worker_threads: usize,
    /// Maximum number of OCR invocations executing at once (permit count).
    /// Defaults to 1: recognition sessions are not safe for concurrent calls
    /// against a single model instance.
    pub max_concurrent_jobs: usize,
    pub languages: Vec<String>,
    pub models_dir: String,
    /// The local image `POST /ocr` operates on
    pub image_path: String,
}

/// Main application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub ocr: OcrConfig,
}

impl Config {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if it exists
        let _ = dotenvy::dotenv();

        let config = Self::load_from_env()?;
        config.validate()?;
        Ok(config)
    }

    fn load_from_env() -> Result<Self, ConfigError> {
        // Parse log level
        let log_level = env::var("LOG_LEVEL")
            .ok()
            .and_then(|s| match s.to_lowercase().as_str() {
                "trace" => Some(Level::TRACE),
                "debug" => Some(Level::DEBUG),
                "info" => Some(Level::INFO),
                "warn" | "warning" => Some(Level::WARN),
                "error" => Some(Level::ERROR),
                _ => None,
            })
            .unwrap_or(Level::INFO);

        // Comma-separated language codes, or the default set
        let languages = env::var("OCR_LANGUAGES")
            .ok()
            .map(|langs| {
                langs
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_else(|| DEFAULT_LANGUAGES.iter().map(|s| s.to_string()).collect());

        Ok(Self {
            server: ServerConfig {
                host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: env::var("SERVER_PORT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(8000),
                log_level,
            },
            ocr: OcrConfig {
                worker_threads: env::var("OCR_WORKER_THREADS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(8),
                max_concurrent_jobs: env::var("OCR_MAX_CONCURRENT_JOBS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(1),
                languages,
                models_dir: env::var("OCR_MODELS_DIR").unwrap_or_else(|_| "models".to_string()),
                image_path: env::var("OCR_IMAGE_PATH")
                    .unwrap_or_else(|_| "example.png".to_string()),
            },
        })
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.ocr.worker_threads == 0 {
            return Err(ConfigError::InvalidWorkerCount);
        }

        if self.ocr.max_concurrent_jobs == 0 {
            return Err(ConfigError::InvalidJobLimit);
        }

        if self.ocr.languages.is_empty() {
            return Err(ConfigError::NoLanguages);
        }

        for lang in &self.ocr.languages {
            let valid = !lang.is_empty()
                && lang.len() <= 16
                && lang
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
            if !valid {
                return Err(ConfigError::InvalidLanguageCode(lang.clone()));
            }
        }

        Ok(())
    }

    pub fn server_host(&self) -> &str {
        &self.server.host
    }

    pub fn server_port(&self) -> u16 {
        self.server.port
    }

    pub fn log_level(&self) -> Level {
        self.server.log_level
    }

    pub fn worker_threads(&self) -> usize {
        self.ocr.worker_threads
    }

    pub fn max_concurrent_jobs(&self) -> usize {
        self.ocr.max_concurrent_jobs
    }

    pub fn languages(&self) -> &[String] {
        &self.ocr.languages
    }

    pub fn models_dir(&self) -> &str {
        &self.ocr.models_dir
    }

    pub fn image_path(&self) -> &str {
        &self.ocr.image_path
    }
}

// Note: No Default implementation because Config::new() can fail
// Users should explicitly call Config::new()? and handle errors
