//! ONNX Runtime backend
//!
//! Runs the segmentation model through ONNX Runtime, optionally on CUDA or
//! CoreML when the requested execution provider is available at runtime.

use crate::config::{ExecutionProvider, RemovalConfig};
use crate::error::{BgRemovalError, Result};
use crate::inference::InferenceBackend;
use crate::models::{ModelManager, PreprocessingConfig};
use instant::{Duration, Instant};
use ndarray::{Array4, Ix4};
use ort::execution_providers::{
    CUDAExecutionProvider, CoreMLExecutionProvider, ExecutionProvider as OrtExecutionProvider,
    ExecutionProviderDispatch,
};
use ort::session::{builder::GraphOptimizationLevel, builder::SessionBuilder, Session};
use ort::value::Value;

/// ONNX Runtime backend for running background removal models
#[derive(Debug)]
pub struct OnnxBackend {
    session: Option<Session>,
    model_manager: ModelManager,
}

impl OnnxBackend {
    /// List ONNX Runtime execution providers with their availability
    ///
    /// ```no_run
    /// use bgremove_server::backends::OnnxBackend;
    ///
    /// for (name, available) in OnnxBackend::list_providers() {
    ///     println!("{}: {}", name, if available { "✅" } else { "❌" });
    /// }
    /// ```
    #[must_use]
    pub fn list_providers() -> Vec<(String, bool)> {
        vec![
            ("CPU".to_string(), true),
            ("CUDA".to_string(), cuda_available()),
            ("CoreML".to_string(), coreml_available()),
        ]
    }

    #[must_use]
    pub fn with_model_manager(model_manager: ModelManager) -> Self {
        Self {
            session: None,
            model_manager,
        }
    }

    fn execution_providers(provider: ExecutionProvider) -> Vec<ExecutionProviderDispatch> {
        let mut providers = Vec::new();

        let want_cuda = matches!(provider, ExecutionProvider::Auto | ExecutionProvider::Cuda);
        let want_coreml = matches!(provider, ExecutionProvider::Auto | ExecutionProvider::CoreMl);

        if want_cuda {
            if cuda_available() {
                log::info!("🚀 CUDA execution provider is available and will be used");
                providers.push(CUDAExecutionProvider::default().build());
            } else if provider == ExecutionProvider::Cuda {
                log::warn!("CUDA execution provider requested but not available, falling back to CPU");
            }
        }

        if want_coreml {
            if coreml_available() {
                log::info!("🍎 CoreML execution provider is available and will be used");
                providers.push(CoreMLExecutionProvider::default().with_subgraphs(true).build());
            } else if provider == ExecutionProvider::CoreMl {
                log::warn!(
                    "CoreML execution provider requested but not available, falling back to CPU"
                );
            }
        }

        if providers.is_empty() {
            log::info!("Using CPU execution provider");
        }
        providers
    }

    fn configure(builder: SessionBuilder, config: &RemovalConfig) -> Result<(SessionBuilder, usize, usize)> {
        let cores = std::thread::available_parallelism()
            .map(std::num::NonZeroUsize::get)
            .unwrap_or(8);
        let intra_threads = if config.intra_threads > 0 {
            config.intra_threads
        } else {
            cores
        };
        let inter_threads = if config.inter_threads > 0 {
            config.inter_threads
        } else {
            (cores / 4).max(1)
        };

        let providers = Self::execution_providers(config.execution_provider);
        let builder = if providers.is_empty() {
            builder
        } else {
            builder.with_execution_providers(providers).map_err(|e| {
                BgRemovalError::inference(format!("Failed to set execution providers: {e}"))
            })?
        };

        let builder = builder
            .with_parallel_execution(true)
            .map_err(|e| BgRemovalError::inference(format!("Failed to enable parallel execution: {e}")))?
            .with_intra_threads(intra_threads)
            .map_err(|e| BgRemovalError::inference(format!("Failed to set intra threads: {e}")))?
            .with_inter_threads(inter_threads)
            .map_err(|e| BgRemovalError::inference(format!("Failed to set inter threads: {e}")))?;

        Ok((builder, intra_threads, inter_threads))
    }

    fn load_model(&mut self, config: &RemovalConfig) -> Result<Duration> {
        let model_load_start = Instant::now();
        let model_data = self.model_manager.load_model()?;

        let builder = Session::builder()
            .map_err(|e| BgRemovalError::inference(format!("Failed to create session builder: {e}")))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| BgRemovalError::inference(format!("Failed to set optimization level: {e}")))?;

        let (builder, intra_threads, inter_threads) = Self::configure(builder, config)?;

        let session = builder.commit_from_memory(&model_data).map_err(|e| {
            BgRemovalError::inference(format!("Failed to create session from model data: {e}"))
        })?;

        let model_info = self.model_manager.get_info()?;
        log::debug!("✅ ONNX Runtime session created successfully");
        log::debug!("  - Requested provider: {:?}", config.execution_provider);
        log::debug!(
            "  - Threading: {intra_threads} intra-op threads, {inter_threads} inter-op threads"
        );
        log::debug!("  - Model: {} ({})", model_info.name, model_info.precision);
        #[allow(clippy::cast_precision_loss)]
        let size_mb = model_info.size_bytes as f64 / (1024.0 * 1024.0);
        log::debug!("  - Model size: {size_mb:.2} MB");

        self.session = Some(session);

        let model_load_time = model_load_start.elapsed();
        log::info!(
            "📊 Model loading complete: {:.0}ms",
            model_load_time.as_secs_f64() * 1000.0
        );
        Ok(model_load_time)
    }
}

fn cuda_available() -> bool {
    OrtExecutionProvider::is_available(&CUDAExecutionProvider::default()).unwrap_or(false)
}

fn coreml_available() -> bool {
    OrtExecutionProvider::is_available(&CoreMLExecutionProvider::default()).unwrap_or(false)
}

impl InferenceBackend for OnnxBackend {
    fn initialize(&mut self, config: &RemovalConfig) -> Result<Option<Duration>> {
        if self.session.is_some() {
            return Ok(None);
        }
        self.load_model(config).map(Some)
    }

    fn infer(&mut self, input: &Array4<f32>) -> Result<Array4<f32>> {
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| BgRemovalError::internal("ONNX session not initialized"))?;

        let inference_start = Instant::now();
        log::debug!("🚀 Starting inference with input shape: {:?}", input.dim());

        let input_value = Value::from_array(input.clone())
            .map_err(|e| BgRemovalError::processing(format!("Failed to convert input tensor: {e}")))?;

        // Positional inputs and outputs; exported models disagree on tensor names
        let outputs = session
            .run(ort::inputs![input_value])
            .map_err(|e| BgRemovalError::inference(format!("ONNX inference failed: {e}")))?;

        let first_key = outputs
            .keys()
            .next()
            .map(str::to_string)
            .ok_or_else(|| BgRemovalError::processing("No output tensors found"))?;

        let output_tensor = outputs
            .get(first_key.as_str())
            .ok_or_else(|| BgRemovalError::processing("First output tensor not found"))?
            .try_extract_array::<f32>()
            .map_err(|e| BgRemovalError::processing(format!("Failed to extract output tensor: {e}")))?;

        let ndim = output_tensor.ndim();
        let result = output_tensor
            .to_owned()
            .into_dimensionality::<Ix4>()
            .map_err(|_| {
                BgRemovalError::processing(format!("Expected 4D output tensor, got {ndim}D"))
            })?;

        log::info!(
            "📊 Inference complete: {:.2}ms",
            inference_start.elapsed().as_secs_f64() * 1000.0
        );
        Ok(result)
    }

    fn input_shape(&self) -> (usize, usize, usize, usize) {
        let [height, width] = self.model_manager.preprocessing_config().target_size;
        (1, 3, height as usize, width as usize)
    }

    fn get_preprocessing_config(&self) -> Result<PreprocessingConfig> {
        Ok(self.model_manager.preprocessing_config().clone())
    }

    fn is_initialized(&self) -> bool {
        self.session.is_some()
    }
}
