//! Background removal processor
//!
//! Drives one inference backend through preprocessing, inference and mask
//! application. The backend and model are created lazily on first use.

use crate::{
    cache::ModelCache,
    config::{BackendType, RemovalConfig},
    error::{BgRemovalError, Result},
    inference::InferenceBackend,
    models::ModelManager,
    types::{ProcessingTimings, RemovalResult, SegmentationMask},
    utils::{ImagePreprocessor, LetterboxTransform},
};
use image::{DynamicImage, Rgba, RgbaImage};
use instant::Instant;
use log::{debug, info};
use ndarray::Array4;
use tracing::instrument;

/// Factory trait for creating inference backends
pub trait BackendFactory: Send + Sync {
    /// Create a backend instance of the specified type with the given model manager
    ///
    /// # Errors
    /// - Backend type not compiled into this build
    fn create_backend(
        &self,
        backend_type: BackendType,
        model_manager: ModelManager,
    ) -> Result<Box<dyn InferenceBackend>>;

    /// List available backend types
    fn available_backends(&self) -> Vec<BackendType>;
}

/// Creates the backends enabled through cargo features
#[derive(Debug, Default)]
pub struct DefaultBackendFactory;

impl BackendFactory for DefaultBackendFactory {
    fn create_backend(
        &self,
        backend_type: BackendType,
        model_manager: ModelManager,
    ) -> Result<Box<dyn InferenceBackend>> {
        match backend_type {
            #[cfg(feature = "onnx")]
            BackendType::Onnx => Ok(Box::new(crate::backends::OnnxBackend::with_model_manager(
                model_manager,
            ))),
            #[cfg(feature = "tract")]
            BackendType::Tract => Ok(Box::new(
                crate::backends::TractBackend::with_model_manager(model_manager),
            )),
            #[allow(unreachable_patterns)]
            other => {
                drop(model_manager);
                Err(BgRemovalError::invalid_config(format!(
                    "Backend '{other}' is not compiled into this build"
                )))
            },
        }
    }

    fn available_backends(&self) -> Vec<BackendType> {
        [
            (BackendType::Onnx, cfg!(feature = "onnx")),
            (BackendType::Tract, cfg!(feature = "tract")),
        ]
        .into_iter()
        .filter_map(|(backend, enabled)| enabled.then_some(backend))
        .collect()
    }
}

/// Background removal processor owning a lazily created backend
pub struct BackgroundRemovalProcessor {
    config: RemovalConfig,
    cache: ModelCache,
    backend_factory: Box<dyn BackendFactory>,
    backend: Option<Box<dyn InferenceBackend>>,
    model_load_ms: Option<u64>,
}

impl std::fmt::Debug for BackgroundRemovalProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundRemovalProcessor")
            .field("config", &self.config)
            .field("initialized", &self.is_initialized())
            .finish_non_exhaustive()
    }
}

impl BackgroundRemovalProcessor {
    /// Create a processor using the feature-enabled backends
    ///
    /// # Errors
    /// - Invalid removal configuration
    pub fn new(config: RemovalConfig, cache: ModelCache) -> Result<Self> {
        Self::with_factory(config, cache, Box::new(DefaultBackendFactory))
    }

    /// Create a processor with a custom backend factory
    ///
    /// # Errors
    /// - Invalid removal configuration
    pub fn with_factory(
        config: RemovalConfig,
        cache: ModelCache,
        backend_factory: Box<dyn BackendFactory>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            cache,
            backend_factory,
            backend: None,
            model_load_ms: None,
        })
    }

    /// Resolve the model and initialize the backend; a no-op once initialized
    ///
    /// A failed initialization leaves the processor uninitialized so the next
    /// call retries.
    ///
    /// # Errors
    /// - Model not cached or path missing
    /// - Backend initialization errors
    pub fn initialize(&mut self) -> Result<()> {
        if self.backend.is_some() {
            return Ok(());
        }

        info!("Initializing background removal processor");
        debug!("Model spec: {:?}", self.config.model_spec);
        debug!("Backend type: {}", self.config.backend_type);

        let model_manager = ModelManager::from_spec(&self.config.model_spec, &self.cache)?;
        let mut backend = self
            .backend_factory
            .create_backend(self.config.backend_type, model_manager)?;

        let load_time = backend.initialize(&self.config)?;
        self.model_load_ms = load_time.map(|d| d.as_millis() as u64);
        self.backend = Some(backend);

        info!("Background removal processor initialized successfully");
        Ok(())
    }

    /// Remove the background of an image
    ///
    /// # Errors
    /// - Model or backend initialization failures
    /// - Image preprocessing failures
    /// - Inference errors or unexpected output shapes
    #[instrument(
        skip(self, image),
        fields(
            backend = %self.config.backend_type,
            model = %self.config.model_spec.source.display_name(),
            dimensions = %format!("{}x{}", image.width(), image.height())
        )
    )]
    pub fn process_image(&mut self, image: &DynamicImage) -> Result<RemovalResult> {
        let total_start = Instant::now();
        self.initialize()?;

        let mut timings = ProcessingTimings {
            model_load_ms: self.model_load_ms.take().unwrap_or(0),
            ..ProcessingTimings::default()
        };

        let backend = self
            .backend
            .as_mut()
            .ok_or_else(|| BgRemovalError::internal("Backend not initialized"))?;

        let preprocess_start = Instant::now();
        let preprocessing_config = backend.get_preprocessing_config()?;
        let (input_tensor, transform) =
            ImagePreprocessor::preprocess_for_inference(image, &preprocessing_config)?;
        timings.preprocessing_ms = preprocess_start.elapsed().as_millis() as u64;

        let inference_start = Instant::now();
        let output_tensor = backend.infer(&input_tensor)?;
        timings.inference_ms = inference_start.elapsed().as_millis() as u64;

        let postprocess_start = Instant::now();
        let canvas_size = preprocessing_config.target_size[0];
        let mask = Self::tensor_to_mask(&output_tensor, &transform, canvas_size)?;
        let result_image = Self::apply_background_removal(image, &mask);
        timings.postprocessing_ms = postprocess_start.elapsed().as_millis() as u64;
        timings.total_ms = total_start.elapsed().as_millis() as u64;

        tracing::debug!(
            inference_ms = timings.inference_ms,
            total_ms = timings.total_ms,
            foreground = mask.foreground_ratio(),
            "background removed"
        );

        Ok(RemovalResult {
            image: result_image,
            mask,
            timings,
        })
    }

    #[must_use]
    pub fn config(&self) -> &RemovalConfig {
        &self.config
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.backend.is_some()
    }

    #[must_use]
    pub fn available_backends(&self) -> Vec<BackendType> {
        self.backend_factory.available_backends()
    }

    /// Map a `(1, 1, H, W)` output tensor back onto the original image
    ///
    /// Pixels whose canvas position falls outside the tensor get a mask
    /// value of 0.
    fn tensor_to_mask(
        tensor: &Array4<f32>,
        transform: &LetterboxTransform,
        canvas_size: u32,
    ) -> Result<SegmentationMask> {
        let &[batch, channels, mask_height, mask_width] = tensor.shape() else {
            return Err(BgRemovalError::processing("Invalid output tensor shape"));
        };
        if batch != 1 || channels != 1 || mask_height == 0 || mask_width == 0 {
            return Err(BgRemovalError::processing(format!(
                "Invalid output tensor shape {:?}, expected [1, 1, H, W]",
                tensor.shape()
            )));
        }

        // Output resolution may differ from the input canvas
        let ratio_x = mask_width as f32 / canvas_size as f32;
        let ratio_y = mask_height as f32 / canvas_size as f32;

        let (width, height) = (transform.original_width, transform.original_height);
        let mut mask_data = Vec::with_capacity(width as usize * height as usize);

        for y in 0..height {
            for x in 0..width {
                let scaled_x = (x as f32 * transform.scale).round() + transform.offset_x as f32;
                let scaled_y = (y as f32 * transform.scale).round() + transform.offset_y as f32;
                let tensor_x = (scaled_x * ratio_x) as usize;
                let tensor_y = (scaled_y * ratio_y) as usize;

                let value = tensor.get([0, 0, tensor_y, tensor_x]).copied().unwrap_or(0.0);
                mask_data.push((value.clamp(0.0, 1.0) * 255.0) as u8);
            }
        }

        Ok(SegmentationMask::new(mask_data, (width, height)))
    }

    /// Use the mask as alpha; fully transparent pixels are zeroed
    fn apply_background_removal(image: &DynamicImage, mask: &SegmentationMask) -> RgbaImage {
        let mut rgba_image = image.to_rgba8();
        let width = rgba_image.width();

        for (x, y, pixel) in rgba_image.enumerate_pixels_mut() {
            let pixel_index = (y * width + x) as usize;
            let alpha = mask.data.get(pixel_index).copied().unwrap_or(0);
            *pixel = if alpha > 0 {
                Rgba([pixel[0], pixel[1], pixel[2], alpha])
            } else {
                Rgba([0, 0, 0, 0])
            };
        }

        rgba_image
    }
}
