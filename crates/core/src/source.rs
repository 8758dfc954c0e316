//! User-selected source images and their acceptance rules.
//!
//! A [`SourceImage`] only exists once the MIME type and byte size checks
//! have passed, so downstream code never sees a rejected file.

use std::io::Cursor;

use image::{ImageFormat, ImageReader};

use crate::error::CoreError;

/// MIME types accepted on file selection.
pub const ALLOWED_MIME_TYPES: &[&str] = &["image/jpeg", "image/png", "image/webp"];

/// Largest accepted source file (10 MiB).
pub const MAX_SOURCE_BYTES: usize = 10 * 1024 * 1024;

/// An accepted, immutable user image.
#[derive(Debug, Clone)]
pub struct SourceImage {
    name: String,
    mime_type: String,
    bytes: Vec<u8>,
    width: u32,
    height: u32,
}

impl SourceImage {
    /// Validate and accept a selected file.
    ///
    /// Checks run cheapest first: MIME allow-list, byte size, then a
    /// header-only dimension read. Nothing is fully decoded here.
    pub fn accept(
        name: impl Into<String>,
        mime_type: impl Into<String>,
        bytes: Vec<u8>,
    ) -> Result<Self, CoreError> {
        let name = name.into();
        let mime_type = mime_type.into();

        validate_mime_type(&mime_type)?;
        validate_size(bytes.len())?;

        let (width, height) = read_dimensions(&bytes, &mime_type)?;

        Ok(Self {
            name,
            mime_type,
            bytes,
            width,
            height,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }
}

/// Reject MIME types outside [`ALLOWED_MIME_TYPES`].
pub fn validate_mime_type(mime_type: &str) -> Result<(), CoreError> {
    if ALLOWED_MIME_TYPES.contains(&mime_type) {
        Ok(())
    } else {
        Err(CoreError::Validation(format!(
            "Unsupported file type '{mime_type}'. Only JPG, PNG and WEBP images are accepted"
        )))
    }
}

/// Reject files larger than [`MAX_SOURCE_BYTES`].
pub fn validate_size(len: usize) -> Result<(), CoreError> {
    if len > MAX_SOURCE_BYTES {
        return Err(CoreError::Validation(format!(
            "File is too large ({len} bytes). Images must be 10MB or smaller"
        )));
    }
    Ok(())
}

fn read_dimensions(bytes: &[u8], mime_type: &str) -> Result<(u32, u32), CoreError> {
    let mut reader = ImageReader::new(Cursor::new(bytes));
    if let Some(format) = ImageFormat::from_mime_type(mime_type) {
        reader.set_format(format);
    }
    reader
        .with_guessed_format()
        .map_err(|e| CoreError::Decode(e.to_string()))?
        .into_dimensions()
        .map_err(|e| CoreError::Decode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use image::{ImageBuffer, Rgb};

    use super::*;

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = ImageBuffer::from_pixel(width, height, Rgb([10u8, 20, 30]));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    #[test]
    fn accepts_small_png_and_reads_dimensions() {
        let source = SourceImage::accept("cat.png", "image/png", png_bytes(40, 25)).unwrap();
        assert_eq!(source.width(), 40);
        assert_eq!(source.height(), 25);
        assert_eq!(source.name(), "cat.png");
    }

    #[test]
    fn rejects_unsupported_mime_type() {
        let result = SourceImage::accept("anim.gif", "image/gif", png_bytes(4, 4));
        assert_matches!(result, Err(CoreError::Validation(msg)) if msg.contains("image/gif"));
    }

    #[test]
    fn rejects_oversized_file_before_decoding() {
        // Not a decodable image: the size check must fire first.
        let bytes = vec![0u8; 15 * 1024 * 1024];
        let result = SourceImage::accept("huge.png", "image/png", bytes);
        assert_matches!(result, Err(CoreError::Validation(msg)) if msg.contains("10MB"));
    }

    #[test]
    fn file_exactly_at_limit_passes_size_check() {
        assert!(validate_size(MAX_SOURCE_BYTES).is_ok());
        assert!(validate_size(MAX_SOURCE_BYTES + 1).is_err());
    }

    #[test]
    fn garbage_bytes_fail_with_decode_error() {
        let result = SourceImage::accept("x.png", "image/png", b"definitely not a png".to_vec());
        assert_matches!(result, Err(CoreError::Decode(_)));
    }
}
