//! Image signature verification.

use image::ImageFormat;

use crate::error::{Error, Result};

/// Image formats accepted as generation output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    Png,
    Jpeg,
    Gif,
    WebP,
}

impl ImageKind {
    pub fn extension(self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpg",
            Self::Gif => "gif",
            Self::WebP => "webp",
        }
    }

    /// Detect the format from the leading magic bytes.
    pub fn from_magic_bytes(data: &[u8]) -> Option<Self> {
        match image::guess_format(data).ok()? {
            ImageFormat::Png => Some(Self::Png),
            ImageFormat::Jpeg => Some(Self::Jpeg),
            ImageFormat::Gif => Some(Self::Gif),
            ImageFormat::WebP => Some(Self::WebP),
            _ => None,
        }
    }
}

/// Check that `data` is a non-empty image in a supported format.
pub fn verify(data: &[u8], content_type: Option<&str>) -> Result<ImageKind> {
    if data.is_empty() {
        return Err(Error::verification("empty response body"));
    }
    ImageKind::from_magic_bytes(data).ok_or_else(|| {
        let ct = content_type.unwrap_or("unknown content type");
        Error::verification(format!(
            "unrecognised image signature ({} bytes, {ct})",
            data.len()
        ))
    })
}
