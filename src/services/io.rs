//! Image decoding and encoding
//!
//! Keeps file I/O out of the processing service so it can be tested against
//! in-memory images.

use crate::error::{BgRemovalError, Result};
use image::{DynamicImage, ImageFormat, RgbaImage};
use std::io::Cursor;
use std::path::Path;

pub struct ImageIOService;

impl ImageIOService {
    /// Load an image from a file path
    ///
    /// The extension picks the decoder first; files whose content does not
    /// match their extension fall back to content sniffing.
    ///
    /// # Errors
    /// - File missing or unreadable
    /// - Content is not a decodable image
    ///
    /// ```rust,no_run
    /// use bgremove_server::services::ImageIOService;
    ///
    /// let image = ImageIOService::load_image("uploads/cat.jpg")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load_image<P: AsRef<Path>>(path: P) -> Result<DynamicImage> {
        let path_ref = path.as_ref();

        match image::open(path_ref) {
            Ok(img) => Ok(img),
            Err(e) => {
                log::debug!(
                    "Extension-based loading failed for {}: {}. Attempting content-based detection.",
                    path_ref.display(),
                    e
                );

                let data = std::fs::read(path_ref).map_err(|io_err| {
                    BgRemovalError::file_io_error("read image data", path_ref, &io_err)
                })?;

                image::load_from_memory(&data).map_err(|content_err| {
                    BgRemovalError::processing_stage_error(
                        "image loading",
                        &format!("Extension error: {e}. Content error: {content_err}"),
                        Some(&format!(
                            "path: {}, size: {} bytes",
                            path_ref.display(),
                            data.len()
                        )),
                    )
                })
            },
        }
    }

    /// Encode an RGBA image as PNG
    ///
    /// # Errors
    /// - Encoder failure
    pub fn encode_png(image: &RgbaImage) -> Result<Vec<u8>> {
        let mut buffer = Cursor::new(Vec::new());
        image.write_to(&mut buffer, ImageFormat::Png)?;
        Ok(buffer.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;
    use tempfile::TempDir;

    #[test]
    fn test_png_round_trip_keeps_alpha() {
        let image = RgbaImage::from_pixel(3, 2, Rgba([1, 2, 3, 4]));
        let bytes = ImageIOService::encode_png(&image).unwrap();
        assert_eq!(image::guess_format(&bytes).unwrap(), ImageFormat::Png);

        let decoded = image::load_from_memory(&bytes).unwrap().to_rgba8();
        assert_eq!(decoded.get_pixel(2, 1), &Rgba([1, 2, 3, 4]));
    }

    #[test]
    fn test_mislabelled_file_is_sniffed() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("actually_png.jpg");
        let bytes = ImageIOService::encode_png(&RgbaImage::new(4, 4)).unwrap();
        std::fs::write(&path, bytes).unwrap();

        let image = ImageIOService::load_image(&path).unwrap();
        assert_eq!((image.width(), image.height()), (4, 4));
    }

    #[test]
    fn test_garbage_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("noise.png");
        std::fs::write(&path, b"definitely not an image").unwrap();
        assert!(ImageIOService::load_image(&path).is_err());
    }
}
