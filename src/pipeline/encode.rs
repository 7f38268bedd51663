//! Image encoding: rendered table PNG → base64 wrapped in `ImageData`.
//!
//! VLM APIs (OpenAI, Anthropic, Gemini) accept images as base64 data-URIs
//! embedded in the JSON request body. The renderer already wrote a PNG, so
//! the bytes go out unchanged; decoding and re-encoding would only cost time.

use crate::error::TablexError;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use std::path::Path;
use tracing::debug;

/// Wrap PNG bytes for the VLM API.
///
/// ## Why `detail: "high"`?
/// Financial tables are dense: footnote markers, parenthesised negatives and
/// thin rules. `detail: "low"` forces a single 512 px overview tile and loses
/// exactly the structure the model has to read.
pub fn encode_png(bytes: &[u8]) -> ImageData {
    let b64 = STANDARD.encode(bytes);
    debug!("Encoded image → {} bytes base64", b64.len());
    ImageData::new(b64, "image/png").with_detail("high")
}

/// Read a rendered table image and wrap it for the VLM API.
pub fn encode_png_file(path: &Path) -> Result<ImageData, TablexError> {
    let bytes = std::fs::read(path).map_err(|e| TablexError::from_io(path, e))?;
    Ok(encode_png(&bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, Rgba, RgbaImage};
    use std::io::Cursor;

    #[test]
    fn encode_small_png_file() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(10, 10, Rgba([255, 0, 0, 255])));
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
            .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("0.png");
        std::fs::write(&path, &buf).unwrap();

        let data = encode_png_file(&path).expect("encode should succeed");
        assert_eq!(data.mime_type, "image/png");
        let decoded = STANDARD.decode(&data.data).expect("valid base64");
        assert_eq!(decoded, buf);
    }

    #[test]
    fn missing_file_is_not_found() {
        let err = encode_png_file(Path::new("/nonexistent/0.png")).unwrap_err();
        assert!(matches!(err, TablexError::FileNotFound { .. }));
    }
}
