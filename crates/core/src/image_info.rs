//! Header-only image dimension probing.
//!
//! Only width and height are read; pixel data is never decoded.

use std::path::Path;

use crate::types::ImageSize;

/// Error type for image probing.
#[derive(Debug, thiserror::Error)]
pub enum ImageInfoError {
    #[error("failed to open image {path}: {source}")]
    Open {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to decode image header {path}: {source}")]
    Decode {
        path: String,
        source: image::ImageError,
    },
}

/// Read the pixel dimensions of the image at `path`.
///
/// The format is guessed from the file contents, not the extension.
/// Blocking; call from `spawn_blocking` in async contexts.
pub fn read_dimensions(path: &Path) -> Result<ImageSize, ImageInfoError> {
    let display = path.display().to_string();

    let reader = image::ImageReader::open(path)
        .and_then(|r| r.with_guessed_format())
        .map_err(|source| ImageInfoError::Open {
            path: display.clone(),
            source,
        })?;

    let (width, height) = reader
        .into_dimensions()
        .map_err(|source| ImageInfoError::Decode {
            path: display,
            source,
        })?;

    Ok(ImageSize { width, height })
}
