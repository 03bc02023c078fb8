//! Image encoding: raw bytes → base64 data URI.
//!
//! Two paths. A fetched payload that already is an image goes straight into
//! a data URI. The embedding fallback instead decodes whatever bytes it got
//! into a `DynamicImage` and re-encodes: PNG when the picture shows any
//! transparency, JPEG at a fixed quality otherwise.

use crate::config::JPEG_QUALITY;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{DynamicImage, GenericImageView};
use tracing::debug;

/// Wrap `bytes` in a `data:` URI of the given MIME type.
pub fn to_data_uri(mime: &str, bytes: &[u8]) -> String {
    format!("data:{};base64,{}", mime, STANDARD.encode(bytes))
}

/// Sample the four corners and the centre for non-opaque alpha.
pub fn has_transparency(img: &DynamicImage) -> bool {
    if !img.color().has_alpha() {
        return false;
    }
    let (w, h) = img.dimensions();
    if w == 0 || h == 0 {
        return false;
    }
    let samples = [
        (0, 0),
        (w - 1, 0),
        (0, h - 1),
        (w - 1, h - 1),
        (w / 2, h / 2),
    ];
    samples
        .iter()
        .any(|&(x, y)| img.get_pixel(x, y).0[3] < u8::MAX)
}

/// Re-encode a decoded image, choosing the format by transparency.
///
/// Returns the MIME type and the encoded bytes.
pub fn reencode(img: &DynamicImage) -> Result<(&'static str, Vec<u8>), image::ImageError> {
    let mut buf = Vec::new();
    let mime = if has_transparency(img) {
        img.write_with_encoder(PngEncoder::new(&mut buf))?;
        "image/png"
    } else {
        let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
        rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut buf, JPEG_QUALITY))?;
        "image/jpeg"
    };
    debug!(
        "Re-encoded {}x{} image as {} ({} bytes)",
        img.width(),
        img.height(),
        mime,
        buf.len()
    );
    Ok((mime, buf))
}
