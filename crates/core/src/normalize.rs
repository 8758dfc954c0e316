//! Square canvas normalization.
//!
//! Every image is padded (never cropped or scaled) onto a white square
//! whose side is the longer of its two edges, then re-encoded as PNG, so
//! before/after views can assume a 1:1 aspect ratio.

use std::io::Cursor;
use std::path::Path;

use image::metadata::Orientation;
use image::{
    DynamicImage, GenericImageView, ImageDecoder, ImageFormat, ImageReader, Rgba, RgbaImage,
};

use crate::error::CoreError;
use crate::source::SourceImage;

/// Largest canvas side we are willing to allocate.
pub const MAX_CANVAS_SIDE: u32 = 16_384;

/// MIME type of every canonical image.
pub const CANONICAL_MIME_TYPE: &str = "image/png";

const BACKGROUND: Rgba<u8> = Rgba([255, 255, 255, 255]);

/// Square PNG derived from a [`SourceImage`].
#[derive(Debug, Clone)]
pub struct CanonicalImage {
    file_name: String,
    bytes: Vec<u8>,
    side: u32,
}

impl CanonicalImage {
    /// Upload file name: the source name with a `.png` extension.
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Edge length in pixels (width == height).
    pub fn side(&self) -> u32 {
        self.side
    }

    pub fn mime_type(&self) -> &'static str {
        CANONICAL_MIME_TYPE
    }
}

/// Pad `source` onto a centered white square and encode it as PNG.
///
/// The EXIF orientation is applied first, so the square is padded on the
/// axis the image is displayed with.
pub fn normalize(source: &SourceImage) -> Result<CanonicalImage, CoreError> {
    let mut decoder = ImageReader::new(Cursor::new(source.bytes()))
        .with_guessed_format()
        .map_err(|e| CoreError::Decode(e.to_string()))?
        .into_decoder()
        .map_err(|e| CoreError::Decode(e.to_string()))?;
    // Unreadable EXIF is ignored, as browsers do.
    let orientation = decoder.orientation().unwrap_or(Orientation::NoTransforms);
    let mut decoded =
        DynamicImage::from_decoder(decoder).map_err(|e| CoreError::Decode(e.to_string()))?;
    decoded.apply_orientation(orientation);

    let (width, height) = decoded.dimensions();
    let side = width.max(height);
    let mut canvas = allocate_canvas(side)?;

    let (x, y) = centered_offset(side, width, height);
    image::imageops::overlay(&mut canvas, &decoded.to_rgba8(), i64::from(x), i64::from(y));

    let mut encoded = Cursor::new(Vec::new());
    canvas
        .write_to(&mut encoded, ImageFormat::Png)
        .map_err(|e| CoreError::Render(e.to_string()))?;

    Ok(CanonicalImage {
        file_name: canonical_file_name(source.name()),
        bytes: encoded.into_inner(),
        side,
    })
}

/// Top-left corner that centers a `width`×`height` image on a `side` square.
pub fn centered_offset(side: u32, width: u32, height: u32) -> (u32, u32) {
    ((side - width) / 2, (side - height) / 2)
}

fn allocate_canvas(side: u32) -> Result<RgbaImage, CoreError> {
    if side == 0 {
        return Err(CoreError::Render("image has no pixels".to_string()));
    }
    if side > MAX_CANVAS_SIDE {
        return Err(CoreError::Render(format!(
            "canvas side {side}px exceeds the {MAX_CANVAS_SIDE}px limit"
        )));
    }
    Ok(RgbaImage::from_pixel(side, side, BACKGROUND))
}

fn canonical_file_name(name: &str) -> String {
    let stem = Path::new(name)
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .unwrap_or("image");
    format!("{stem}.png")
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use image::{ImageBuffer, Rgb};

    use super::*;

    fn encode(width: u32, height: u32, format: ImageFormat) -> Vec<u8> {
        let img = ImageBuffer::from_pixel(width, height, Rgb([200u8, 0, 0]));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, format).unwrap();
        out.into_inner()
    }

    fn decode(canonical: &CanonicalImage) -> RgbaImage {
        image::load_from_memory_with_format(canonical.bytes(), ImageFormat::Png)
            .unwrap()
            .to_rgba8()
    }

    fn is_white(px: &Rgba<u8>) -> bool {
        px.0 == [255, 255, 255, 255]
    }

    fn is_reddish(px: &Rgba<u8>) -> bool {
        px.0[0] > 150 && px.0[1] < 60 && px.0[2] < 60
    }

    #[test]
    fn landscape_jpeg_is_padded_top_and_bottom() {
        let source =
            SourceImage::accept("photo.jpg", "image/jpeg", encode(500, 300, ImageFormat::Jpeg))
                .unwrap();
        let canonical = normalize(&source).unwrap();

        assert_eq!(canonical.side(), 500);
        assert_eq!(canonical.file_name(), "photo.png");

        let img = decode(&canonical);
        assert_eq!(img.dimensions(), (500, 500));
        // 100px of white padding above and below the content.
        assert!(is_white(img.get_pixel(250, 0)));
        assert!(is_white(img.get_pixel(250, 99)));
        assert!(is_reddish(img.get_pixel(250, 101)));
        assert!(is_reddish(img.get_pixel(250, 398)));
        assert!(is_white(img.get_pixel(250, 400)));
        assert!(is_white(img.get_pixel(250, 499)));
    }

    #[test]
    fn portrait_png_is_padded_left_and_right() {
        let source =
            SourceImage::accept("tall.png", "image/png", encode(20, 60, ImageFormat::Png)).unwrap();
        let canonical = normalize(&source).unwrap();
        let img = decode(&canonical);

        assert_eq!(img.dimensions(), (60, 60));
        assert!(is_white(img.get_pixel(19, 30)));
        assert_eq!(img.get_pixel(20, 30).0, [200, 0, 0, 255]);
        assert_eq!(img.get_pixel(39, 30).0, [200, 0, 0, 255]);
        assert!(is_white(img.get_pixel(40, 30)));
    }

    /// Insert an EXIF APP1 segment carrying `orientation` right after SOI.
    fn with_exif_orientation(jpeg: &[u8], orientation: u8) -> Vec<u8> {
        let mut app1 = vec![0xFF, 0xE1, 0x00, 0x22];
        app1.extend_from_slice(b"Exif\0\0");
        // Big-endian TIFF header, one IFD entry: Orientation (0x0112), SHORT.
        app1.extend_from_slice(&[
            0x4D, 0x4D, 0x00, 0x2A, 0x00, 0x00, 0x00, 0x08, 0x00, 0x01, 0x01, 0x12, 0x00, 0x03,
            0x00, 0x00, 0x00, 0x01, 0x00, orientation, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        ]);

        let mut out = jpeg[..2].to_vec();
        out.extend_from_slice(&app1);
        out.extend_from_slice(&jpeg[2..]);
        out
    }

    #[test]
    fn exif_rotation_is_applied_before_padding() {
        // Stored landscape, displayed portrait (orientation 6: rotate 90° CW).
        let bytes = with_exif_orientation(&encode(60, 20, ImageFormat::Jpeg), 6);
        let source = SourceImage::accept("phone.jpg", "image/jpeg", bytes).unwrap();
        let canonical = normalize(&source).unwrap();
        let img = decode(&canonical);

        assert_eq!(canonical.side(), 60);
        assert!(is_white(img.get_pixel(5, 30)));
        assert!(is_reddish(img.get_pixel(30, 5)));
        assert!(is_reddish(img.get_pixel(30, 55)));
        assert!(is_white(img.get_pixel(55, 30)));
    }

    #[test]
    fn square_input_keeps_its_size() {
        let source =
            SourceImage::accept("sq.webp", "image/png", encode(32, 32, ImageFormat::Png)).unwrap();
        let canonical = normalize(&source).unwrap();
        assert_eq!(canonical.side(), 32);
        assert_eq!(decode(&canonical).get_pixel(0, 0).0, [200, 0, 0, 255]);
    }

    #[test]
    fn transparent_pixels_are_composited_over_white() {
        let img = ImageBuffer::from_pixel(10, 4, Rgba([0u8, 0, 0, 0]));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Png).unwrap();
        let source = SourceImage::accept("clear.png", "image/png", out.into_inner()).unwrap();

        let decoded = decode(&normalize(&source).unwrap());
        assert!(decoded.pixels().all(is_white));
    }

    #[test]
    fn normalize_does_not_touch_the_source() {
        let bytes = encode(8, 4, ImageFormat::Png);
        let source = SourceImage::accept("a.png", "image/png", bytes.clone()).unwrap();
        let _ = normalize(&source).unwrap();
        assert_eq!(source.bytes(), bytes.as_slice());
    }

    #[test]
    fn oversized_canvas_is_a_render_error() {
        assert_matches!(allocate_canvas(MAX_CANVAS_SIDE + 1), Err(CoreError::Render(_)));
        assert_matches!(allocate_canvas(0), Err(CoreError::Render(_)));
    }

    #[test]
    fn offsets_round_down_for_odd_padding() {
        assert_eq!(centered_offset(5, 2, 5), (1, 0));
        assert_eq!(centered_offset(500, 500, 300), (0, 100));
    }

    #[test]
    fn file_name_falls_back_when_stem_missing() {
        assert_eq!(canonical_file_name(""), "image.png");
        assert_eq!(canonical_file_name("archive.tar.gz"), "archive.tar.png");
    }
}
