//! Image source adapter: turns an uploaded file or a camera still into a
//! [`CanonicalImage`].
//!
//! File validation trusts the declared content type and does not sniff
//! magic bytes. That matches how a browser file input reports types and is
//! a known gap, not an oversight to be patched here.

use std::path::Path;

use deepcheck_hw::{CaptureError, CaptureSession};
use thiserror::Error;

use crate::types::{CanonicalImage, ImageMime};

/// Upload limit advertised to users ("PNG, JPG up to 5MB").
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 5 * 1024 * 1024;

/// Why a file was rejected before submission.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvalidInput {
    #[error("file must be an image (declared type {declared})")]
    NotAnImage { declared: String },
    #[error("unsupported image type {declared}; use PNG or JPEG")]
    UnsupportedImageType { declared: String },
    #[error("image is {size} bytes; the limit is {max} bytes")]
    TooLarge { size: usize, max: usize },
    #[error("could not read file: {reason}")]
    Unreadable { reason: String },
}

/// A user-chosen file as the picker hands it over: name, declared type, bytes.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub name: String,
    pub declared_mime: String,
    pub bytes: Vec<u8>,
}

impl UploadedFile {
    pub fn new(name: impl Into<String>, declared_mime: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            declared_mime: declared_mime.into(),
            bytes,
        }
    }

    /// Read a file from disk, declaring its type from the extension.
    pub fn read(path: &Path) -> Result<Self, InvalidInput> {
        let bytes = std::fs::read(path).map_err(|e| InvalidInput::Unreadable {
            reason: format!("{}: {e}", path.display()),
        })?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let declared = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(mime_for_extension)
            .unwrap_or("application/octet-stream");
        Ok(Self::new(name, declared, bytes))
    }
}

/// Content type a file picker would report for an extension.
pub fn mime_for_extension(ext: &str) -> &'static str {
    match ext.to_ascii_lowercase().as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" | "jpe" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "tif" | "tiff" => "image/tiff",
        _ => "application/octet-stream",
    }
}

/// Validate an uploaded file and wrap it as a canonical image.
///
/// Accepts exactly `image/png` and `image/jpeg` up to `max_bytes`.
pub fn from_file(file: UploadedFile, max_bytes: usize) -> Result<CanonicalImage, InvalidInput> {
    let declared = file.declared_mime.trim();
    let is_image = declared
        .get(..6)
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case("image/"));
    if !is_image {
        return Err(InvalidInput::NotAnImage {
            declared: declared.to_string(),
        });
    }

    let mime = ImageMime::from_declared(declared).ok_or_else(|| InvalidInput::UnsupportedImageType {
        declared: declared.to_string(),
    })?;

    if file.bytes.len() > max_bytes {
        return Err(InvalidInput::TooLarge {
            size: file.bytes.len(),
            max: max_bytes,
        });
    }

    tracing::debug!(name = %file.name, mime = %mime, bytes = file.bytes.len(), "accepted upload");
    Ok(CanonicalImage::new(file.bytes, mime))
}

/// Grab one still from the active session and encode it as PNG.
///
/// Leaves the session untouched; stopping the camera is the lifecycle
/// manager's job.
pub fn from_frame(
    session: &CaptureSession,
    max_bytes: usize,
) -> Result<CanonicalImage, CaptureError> {
    let frame = session.grab_frame()?;
    let png = frame
        .to_png()
        .map_err(|e| CaptureError::CaptureFailed(e.to_string()))?;
    if png.len() > max_bytes {
        return Err(CaptureError::CaptureFailed(format!(
            "encoded still is {} bytes; the limit is {max_bytes} bytes",
            png.len()
        )));
    }
    tracing::debug!(
        width = frame.width,
        height = frame.height,
        bytes = png.len(),
        "encoded camera still"
    );
    Ok(CanonicalImage::new(png, ImageMime::Png))
}
