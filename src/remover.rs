//! The background removal seam used by the web layer

use crate::cache::ModelCache;
use crate::config::RemovalConfig;
use crate::error::{BgRemovalError, Result};
use crate::processor::BackgroundRemovalProcessor;
use async_trait::async_trait;
use image::{DynamicImage, RgbaImage};
use std::sync::{Arc, Mutex};

/// Image in, same-sized RGBA image with a transparent background out
#[async_trait]
pub trait BackgroundRemover: Send + Sync {
    /// Remove the background of `image`
    ///
    /// # Errors
    /// - Model unavailable or failed to load
    /// - Inference failure
    async fn remove_background(&self, image: DynamicImage) -> Result<RgbaImage>;

    /// Short identifier reported by the health endpoint
    fn name(&self) -> String;
}

/// Model-backed remover running the processor on tokio's blocking pool
#[derive(Debug, Clone)]
pub struct ModelRemover {
    processor: Arc<Mutex<BackgroundRemovalProcessor>>,
    name: String,
}

impl ModelRemover {
    /// Create a remover; the model is loaded on the first call
    ///
    /// # Errors
    /// - Invalid removal configuration
    pub fn new(config: RemovalConfig, cache: ModelCache) -> Result<Self> {
        Ok(Self::from_processor(BackgroundRemovalProcessor::new(
            config, cache,
        )?))
    }

    /// Wrap an existing processor
    #[must_use]
    pub fn from_processor(processor: BackgroundRemovalProcessor) -> Self {
        let name = format!(
            "{}:{}",
            processor.config().backend_type,
            processor.config().model_spec.source.display_name()
        );
        Self {
            processor: Arc::new(Mutex::new(processor)),
            name,
        }
    }
}

#[async_trait]
impl BackgroundRemover for ModelRemover {
    async fn remove_background(&self, image: DynamicImage) -> Result<RgbaImage> {
        let processor = Arc::clone(&self.processor);

        let result = tokio::task::spawn_blocking(move || {
            let mut processor = processor
                .lock()
                .map_err(|_| BgRemovalError::internal("Processor lock poisoned"))?;
            processor.process_image(&image)
        })
        .await
        .map_err(|e| BgRemovalError::internal(format!("Background removal task failed: {e}")))??;

        tracing::info!(
            model_load_ms = result.timings.model_load_ms,
            inference_ms = result.timings.inference_ms,
            total_ms = result.timings.total_ms,
            "🎯 Background removal complete"
        );
        Ok(result.image)
    }

    fn name(&self) -> String {
        self.name.clone()
    }
}
