// Shared types for the OCR workflow

use std::fmt;

use image::DynamicImage;
use serde::Serialize;

/// Lifecycle state of the OCR service.
///
/// Transitions are monotonic: Uninitialized → Ready → Draining → Stopped.
/// Jobs are only accepted while the state is Ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Uninitialized,
    Ready,
    Draining,
    Stopped,
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ServiceState::Uninitialized => "uninitialized",
            ServiceState::Ready => "ready",
            ServiceState::Draining => "draining",
            ServiceState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// One OCR request unit. Owns its image buffer for the duration of the job.
pub struct OcrJob {
    pub image: DynamicImage,
    pub lang: String,
    pub correct_orientation: bool,
}

impl OcrJob {
    pub fn new(image: DynamicImage, lang: impl Into<String>) -> Self {
        Self {
            image,
            lang: lang.into(),
            correct_orientation: true,
        }
    }
}

/// One recognized text line: four corner points, text, confidence in [0, 1].
/// Immutable once produced by the engine.
#[derive(Debug, Clone, Serialize)]
pub struct OcrLine {
    pub bbox: [[f32; 2]; 4],
    pub text: String,
    pub confidence: f32,
}

/// Aggregate result of one job. Lines are kept in detection order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct OcrOutcome {
    pub lines: Vec<OcrLine>,
}

impl OcrOutcome {
    /// Per-line text in detection order.
    pub fn texts(&self) -> Vec<String> {
        self.lines.iter().map(|line| line.text.clone()).collect()
    }

    /// All recognized text, one line per detection, joined by newlines.
    pub fn joined_text(&self) -> String {
        self.lines
            .iter()
            .map(|line| line.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Response body for `POST /ocr`
#[derive(Debug, Serialize)]
pub struct OcrResponse {
    pub lang: String,
    pub is_financial: bool,
    pub keywords: Vec<String>,
    pub texts: Vec<String>,
}
