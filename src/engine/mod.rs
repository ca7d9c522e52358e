// Recognition engine: per-language CRNN text recognition over ONNX Runtime
// CPU-only inference; one session per language model

use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, GrayImage};
use ndarray::Array4;
use ort::{session::Session, value::Value};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

use crate::core::errors::ModelError;
use crate::core::types::OcrLine;

/// Recognition model input height
const TARGET_HEIGHT: u32 = 48;
const MIN_WIDTH: u32 = 16;

/// Luminance below this counts as ink when banding rows
const INK_THRESHOLD: u8 = 140;
/// Fraction of dark pixels for a row to count as text
const MIN_INK_ROW_RATIO: f32 = 0.01;
/// Bands separated by at most this many rows are merged
const MAX_MERGE_GAP: u32 = 2;
const MIN_BAND_HEIGHT: u32 = 4;
const BAND_PADDING: u32 = 2;

/// The recognition capability the OCR service schedules work against.
///
/// Implementations return all detected lines in top-to-bottom detection
/// order. They must be callable from worker threads, but a single instance
/// is never invoked concurrently while the service runs with the default
/// permit count of 1.
pub trait TextRecognizer: Send + Sync {
    fn recognize(
        &self,
        image: &DynamicImage,
        correct_orientation: bool,
    ) -> Result<Vec<OcrLine>, ModelError>;
}

/// CRNN line recognizer backed by a per-language ONNX model.
///
/// Expects `<models_dir>/<lang>/rec.onnx` plus a tab-separated vocabulary at
/// `<models_dir>/<lang>/vocab.txt`. The session is mutex-guarded: ONNX
/// sessions are not safe for concurrent `run` calls.
pub struct CrnnRecognizer {
    lang: String,
    session: Mutex<Session>,
    input_name: String,
    vocab: HashMap<usize, String>,
    blank_index: usize,
}

impl CrnnRecognizer {
    pub fn load(models_dir: &Path, lang: &str) -> Result<Self, ModelError> {
        let model_path = models_dir.join(lang).join("rec.onnx");
        let vocab_path = models_dir.join(lang).join("vocab.txt");

        if !model_path.exists() {
            return Err(ModelError::ModelNotFound(model_path.display().to_string()));
        }
        if !vocab_path.exists() {
            return Err(ModelError::VocabNotFound(vocab_path.display().to_string()));
        }

        info!(
            "Loading recognition model for '{}' from {}",
            lang,
            model_path.display()
        );

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(&model_path)?;

        let input_name = session
            .inputs
            .first()
            .map(|input| input.name.clone())
            .unwrap_or_else(|| "x".to_string());

        let content = std::fs::read_to_string(&vocab_path).map_err(|e| {
            ModelError::VocabParseFailed(format!("{}: {}", vocab_path.display(), e))
        })?;
        let (vocab, blank_index) = parse_vocabulary(&content)?;

        debug!(
            "'{}' vocabulary: {} entries, blank index {}",
            lang,
            vocab.len(),
            blank_index
        );

        Ok(Self {
            lang: lang.to_string(),
            session: Mutex::new(session),
            input_name,
            vocab,
            blank_index,
        })
    }

    /// Preprocess one line band for the recognition model:
    /// resize to the target height keeping aspect ratio, convert to RGB,
    /// normalize to [0, 1], return a [1, 3, H, W] tensor.
    fn preprocess_band(&self, band: &DynamicImage) -> Result<Array4<f32>, ModelError> {
        let (w, h) = band.dimensions();
        if w == 0 || h == 0 {
            return Err(ModelError::PreprocessingFailed(format!(
                "empty band ({}x{})",
                w, h
            )));
        }

        let scale = TARGET_HEIGHT as f32 / h as f32;
        let new_w = ((w as f32 * scale) as u32).max(MIN_WIDTH);

        let resized = band.resize_exact(new_w, TARGET_HEIGHT, FilterType::Lanczos3);
        let rgb = resized.to_rgb8();

        let mut tensor = Array4::<f32>::zeros((1, 3, TARGET_HEIGHT as usize, new_w as usize));
        for y in 0..TARGET_HEIGHT as usize {
            for x in 0..new_w as usize {
                let pixel = rgb.get_pixel(x as u32, y as u32);
                tensor[[0, 0, y, x]] = pixel[0] as f32 / 255.0;
                tensor[[0, 1, y, x]] = pixel[1] as f32 / 255.0;
                tensor[[0, 2, y, x]] = pixel[2] as f32 / 255.0;
            }
        }

        Ok(tensor)
    }

    /// Run the model on a single line band and decode the logits.
    fn recognize_band(&self, band: &DynamicImage) -> Result<(String, f32), ModelError> {
        let tensor = self.preprocess_band(band)?;

        let data_shape: Vec<usize> = tensor.shape().to_vec();
        let (data_flat, _offset) = tensor.into_raw_vec_and_offset();
        let shape_arr: [usize; 4] = [data_shape[0], data_shape[1], data_shape[2], data_shape[3]];
        let data_value = Value::from_array((shape_arr, data_flat))?;

        // Run inference - extract data while session is held, then release
        let (dims, logits) = {
            let mut session = self.session.lock();
            let outputs = session.run(ort::inputs![self.input_name.as_str() => data_value])?;

            // Prefer a named "output", otherwise take the first available
            let (shape, logits_data) = if let Some(output) = outputs.get("output") {
                output.try_extract_tensor::<f32>()?
            } else {
                let first_key = outputs.keys().next().ok_or(ModelError::NoModelOutput)?;
                outputs[first_key].try_extract_tensor::<f32>()?
            };

            let dims: Vec<usize> = shape.iter().map(|&x| x as usize).collect();
            let logits: Vec<f32> = logits_data.to_vec();
            (dims, logits)
        };

        // Output is [S, 1, V], [1, S, V], or [S, V]
        let (seq_len, vocab_size) = match dims.as_slice() {
            [s, 1, v] => (*s, *v),
            [1, s, v] => (*s, *v),
            [s, v] => (*s, *v),
            _ => return Err(ModelError::UnexpectedLogitsShape(dims)),
        };

        Ok(ctc_greedy_decode(
            &self.vocab,
            self.blank_index,
            &logits,
            seq_len,
            vocab_size,
        ))
    }
}

impl TextRecognizer for CrnnRecognizer {
    fn recognize(
        &self,
        image: &DynamicImage,
        correct_orientation: bool,
    ) -> Result<Vec<OcrLine>, ModelError> {
        let gray = image.to_luma8();
        let bands = find_text_bands(&gray);
        debug!(
            "Found {} candidate text bands (lang: {})",
            bands.len(),
            self.lang
        );

        let mut lines = Vec::with_capacity(bands.len());
        for (y0, y1) in bands {
            let Some((x0, x1)) = ink_column_extent(&gray, y0, y1) else {
                continue;
            };

            let cy0 = y0.saturating_sub(BAND_PADDING);
            let cy1 = (y1 + BAND_PADDING).min(gray.height());
            let cx0 = x0.saturating_sub(BAND_PADDING);
            let cx1 = (x1 + BAND_PADDING).min(gray.width());

            let mut band = image.crop_imm(cx0, cy0, cx1 - cx0, cy1 - cy0);
            if correct_orientation && band.height() > band.width() * 2 {
                // Vertical band: rotate into reading orientation
                band = band.rotate90();
            }

            let (text, confidence) = self.recognize_band(&band)?;
            if text.is_empty() {
                continue;
            }

            lines.push(OcrLine {
                bbox: [
                    [cx0 as f32, cy0 as f32],
                    [cx1 as f32, cy0 as f32],
                    [cx1 as f32, cy1 as f32],
                    [cx0 as f32, cy1 as f32],
                ],
                text,
                confidence,
            });
        }

        Ok(lines)
    }
}

/// Parse a tab-separated vocabulary (`index\tchar` per line).
/// `<space>` maps to a literal space; `<blank>` marks the CTC blank index.
/// Without an explicit `<blank>` line, the blank falls after the last index.
fn parse_vocabulary(content: &str) -> Result<(HashMap<usize, String>, usize), ModelError> {
    let mut vocab = HashMap::new();
    let mut blank_index = None;
    let mut max_index = 0usize;

    for (line_no, raw) in content.lines().enumerate() {
        let line = raw.trim_end_matches('\r');
        if line.is_empty() {
            continue;
        }

        let Some((idx_str, char_str)) = line.split_once('\t') else {
            return Err(ModelError::VocabParseFailed(format!(
                "line {}: missing tab separator",
                line_no + 1
            )));
        };

        let idx: usize = idx_str.trim().parse().map_err(|_| {
            ModelError::VocabParseFailed(format!("line {}: invalid index '{}'", line_no + 1, idx_str))
        })?;
        max_index = max_index.max(idx);

        match char_str {
            "<blank>" => {
                blank_index = Some(idx);
            }
            "<space>" => {
                vocab.insert(idx, " ".to_string());
            }
            _ => {
                vocab.insert(idx, char_str.to_string());
            }
        }
    }

    if vocab.is_empty() {
        return Err(ModelError::VocabParseFailed(
            "no vocabulary entries".to_string(),
        ));
    }

    Ok((vocab, blank_index.unwrap_or(max_index + 1)))
}

/// CTC greedy decode: collapse repeated indices, drop blanks, average the
/// per-character best probabilities into a line confidence.
fn ctc_greedy_decode(
    vocab: &HashMap<usize, String>,
    blank_index: usize,
    logits: &[f32],
    seq_len: usize,
    vocab_size: usize,
) -> (String, f32) {
    let mut text = String::new();
    let mut confidences = Vec::new();
    let mut prev_idx: Option<usize> = None;

    for t in 0..seq_len {
        let offset = t * vocab_size;
        let Some(frame) = logits.get(offset..offset + vocab_size) else {
            break;
        };

        let mut best_idx = 0;
        let mut best_val = f32::NEG_INFINITY;
        for (i, &val) in frame.iter().enumerate() {
            if val > best_val {
                best_val = val;
                best_idx = i;
            }
        }

        if best_idx != blank_index && Some(best_idx) != prev_idx {
            if let Some(ch) = vocab.get(&best_idx) {
                text.push_str(ch);
                confidences.push(best_val.clamp(0.0, 1.0));
            }
        }

        prev_idx = Some(best_idx);
    }

    let confidence = if confidences.is_empty() {
        0.0
    } else {
        confidences.iter().sum::<f32>() / confidences.len() as f32
    };

    (text, confidence)
}

/// Split an image into horizontal text bands by row ink density.
/// Returns half-open (y_start, y_end) ranges in top-to-bottom order.
fn find_text_bands(gray: &GrayImage) -> Vec<(u32, u32)> {
    let (width, height) = gray.dimensions();
    if width == 0 || height == 0 {
        return Vec::new();
    }

    let min_ink = ((width as f32 * MIN_INK_ROW_RATIO).ceil() as u32).max(1);

    let mut raw_bands = Vec::new();
    let mut start: Option<u32> = None;
    for y in 0..height {
        let ink = (0..width)
            .filter(|&x| gray.get_pixel(x, y)[0] < INK_THRESHOLD)
            .count() as u32;
        match (ink >= min_ink, start) {
            (true, None) => start = Some(y),
            (false, Some(s)) => {
                raw_bands.push((s, y));
                start = None;
            }
            _ => {}
        }
    }
    if let Some(s) = start {
        raw_bands.push((s, height));
    }

    // Merge bands separated by tiny gaps, then drop specks
    let mut bands: Vec<(u32, u32)> = Vec::with_capacity(raw_bands.len());
    for (s, e) in raw_bands {
        match bands.last_mut() {
            Some(last) if s.saturating_sub(last.1) <= MAX_MERGE_GAP => last.1 = e,
            _ => bands.push((s, e)),
        }
    }
    bands.retain(|(s, e)| e - s >= MIN_BAND_HEIGHT);

    bands
}

/// Horizontal ink extent within a band, as a half-open (x_start, x_end) range.
fn ink_column_extent(gray: &GrayImage, y0: u32, y1: u32) -> Option<(u32, u32)> {
    let (width, _) = gray.dimensions();
    let mut first = None;
    let mut last = None;

    for x in 0..width {
        if (y0..y1).any(|y| gray.get_pixel(x, y)[0] < INK_THRESHOLD) {
            if first.is_none() {
                first = Some(x);
            }
            last = Some(x);
        }
    }

    match (first, last) {
        (Some(f), Some(l)) => Some((f, l + 1)),
        _ => None,
    }
}
