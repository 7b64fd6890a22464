//! Image to tensor preprocessing
//!
//! Images are resized with their aspect ratio preserved, centered on a padded
//! square canvas and normalized into an NCHW tensor. The returned
//! [`LetterboxTransform`] maps model coordinates back to the original image.

use crate::{
    error::{BgRemovalError, Result},
    models::PreprocessingConfig,
};
use image::{imageops, DynamicImage, ImageBuffer, Rgb, RgbImage};
use ndarray::Array4;

/// Padding color for the area outside the resized image
pub const PADDING_COLOR: [u8; 3] = [255, 255, 255];

/// Placement of the resized image on the model canvas
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LetterboxTransform {
    pub scale: f32,
    pub offset_x: u32,
    pub offset_y: u32,
    pub original_width: u32,
    pub original_height: u32,
}

impl LetterboxTransform {
    /// Map an original image pixel to its position on the model canvas
    #[must_use]
    pub fn to_canvas(&self, x: u32, y: u32) -> (f32, f32) {
        (
            x as f32 * self.scale + self.offset_x as f32,
            y as f32 * self.scale + self.offset_y as f32,
        )
    }
}

pub struct ImagePreprocessor;

impl ImagePreprocessor {
    /// Preprocess an image for inference
    ///
    /// # Errors
    /// - Image has a zero dimension
    /// - Target size is zero or does not fit in memory addressing
    pub fn preprocess_for_inference(
        image: &DynamicImage,
        preprocessing_config: &PreprocessingConfig,
    ) -> Result<(Array4<f32>, LetterboxTransform)> {
        let target_size = preprocessing_config.target_size[0];
        if target_size == 0 {
            return Err(BgRemovalError::invalid_config("Model target size must be non-zero"));
        }

        let rgb_image = image.to_rgb8();
        let (orig_width, orig_height) = rgb_image.dimensions();
        if orig_width == 0 || orig_height == 0 {
            return Err(BgRemovalError::processing(format!(
                "Cannot process an image with zero dimension ({orig_width}x{orig_height})"
            )));
        }

        let target_size_f32 = target_size as f32;
        let scale = (target_size_f32 / orig_width as f32).min(target_size_f32 / orig_height as f32);

        let new_width = ((orig_width as f32 * scale).round() as u32).clamp(1, target_size);
        let new_height = ((orig_height as f32 * scale).round() as u32).clamp(1, target_size);

        let resized = imageops::resize(
            &rgb_image,
            new_width,
            new_height,
            imageops::FilterType::Triangle,
        );

        let offset_x = (target_size - new_width) / 2;
        let offset_y = (target_size - new_height) / 2;

        let mut canvas: RgbImage =
            ImageBuffer::from_pixel(target_size, target_size, Rgb(PADDING_COLOR));
        imageops::replace(&mut canvas, &resized, i64::from(offset_x), i64::from(offset_y));

        let side = usize::try_from(target_size).map_err(|_| {
            BgRemovalError::processing("Target size too large for tensor allocation")
        })?;
        let tensor = Self::canvas_to_tensor(&canvas, preprocessing_config, side);

        let transform = LetterboxTransform {
            scale,
            offset_x,
            offset_y,
            original_width: orig_width,
            original_height: orig_height,
        };
        Ok((tensor, transform))
    }

    fn canvas_to_tensor(
        canvas: &RgbImage,
        preprocessing_config: &PreprocessingConfig,
        side: usize,
    ) -> Array4<f32> {
        let mean = preprocessing_config.normalization_mean;
        let std = preprocessing_config.normalization_std;

        Array4::from_shape_fn((1, 3, side, side), |(_, c, y, x)| {
            let pixel = canvas.get_pixel(x as u32, y as u32);
            let (value, m, s) = match c {
                0 => (pixel[0], mean[0], std[0]),
                1 => (pixel[1], mean[1], std[1]),
                _ => (pixel[2], mean[2], std[2]),
            };
            (f32::from(value) / 255.0 - m) / s
        })
    }
}
