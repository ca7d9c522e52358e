use image::DynamicImage;

use crate::core::errors::ImageLoadError;

/// Asynchronously read and decode an image from disk.
///
/// The file read uses tokio's async fs; decoding is CPU-intensive and runs
/// under spawn_blocking to avoid stalling the async runtime.
pub async fn load_image_from_path(path: &str) -> Result<DynamicImage, ImageLoadError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|source| ImageLoadError::ReadFailed {
            path: path.to_string(),
            source,
        })?;

    let path = path.to_string();
    tokio::task::spawn_blocking(move || {
        image::load_from_memory(&bytes).map_err(|source| ImageLoadError::DecodeFailed {
            path,
            source,
        })
    })
    .await
    .map_err(|e| ImageLoadError::TaskFailed(e.to_string()))?
}
