//! Model specification and loading
//!
//! A model is either an external path (a single `.onnx` file or a directory in
//! `HuggingFace` layout) or a model id resolved through the [`ModelCache`].

use crate::cache::ModelCache;
use crate::error::{BgRemovalError, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Default input resolution for `ISNet` style models
pub const DEFAULT_TARGET_SIZE: u32 = 1024;

/// Model source specification
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum ModelSource {
    /// External model from filesystem path
    External(PathBuf),
    /// Downloaded model from cache by model ID
    Downloaded(String),
}

impl ModelSource {
    /// Get a display name for tracing and logging
    pub fn display_name(&self) -> String {
        match self {
            ModelSource::External(path) => {
                format!(
                    "external:{}",
                    path.file_name().unwrap_or_default().to_string_lossy()
                )
            },
            ModelSource::Downloaded(model_id) => {
                format!("cached:{}", model_id)
            },
        }
    }
}

/// Complete model specification including source and optional variant
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ModelSpec {
    pub source: ModelSource,
    pub variant: Option<String>,
}

impl Default for ModelSpec {
    fn default() -> Self {
        Self {
            source: ModelSource::Downloaded(ModelCache::url_to_model_id(
                crate::config::DEFAULT_MODEL_URL,
            )),
            variant: None,
        }
    }
}

/// Model information and metadata
#[derive(Debug, Clone)]
pub struct ModelInfo {
    pub name: String,
    pub precision: String,
    pub size_bytes: usize,
    pub input_shape: (usize, usize, usize, usize), // NCHW format
    pub output_shape: (usize, usize, usize, usize),
}

/// Preprocessing parameters the model was trained with
#[derive(Debug, Clone, PartialEq)]
pub struct PreprocessingConfig {
    /// Square input resolution `[height, width]`
    pub target_size: [u32; 2],
    /// Per-channel mean in 0-1 range
    pub normalization_mean: [f32; 3],
    /// Per-channel standard deviation in 0-1 range
    pub normalization_std: [f32; 3],
}

impl Default for PreprocessingConfig {
    fn default() -> Self {
        Self {
            target_size: [DEFAULT_TARGET_SIZE, DEFAULT_TARGET_SIZE],
            normalization_mean: [0.5, 0.5, 0.5],
            normalization_std: [1.0, 1.0, 1.0],
        }
    }
}

impl PreprocessingConfig {
    /// Parse a `HuggingFace` `preprocessor_config.json` document
    ///
    /// `image_mean` and `image_std` are stored in 0-255 range there.
    pub fn from_huggingface(preprocessor: &serde_json::Value) -> Result<Self> {
        let size = preprocessor.get("size").ok_or_else(|| {
            BgRemovalError::invalid_config("Missing size in preprocessor config")
        })?;

        let height = size
            .get("height")
            .and_then(serde_json::Value::as_u64)
            .ok_or_else(|| BgRemovalError::invalid_config("Missing height in size config"))?;
        let width = size
            .get("width")
            .and_then(serde_json::Value::as_u64)
            .ok_or_else(|| BgRemovalError::invalid_config("Missing width in size config"))?;

        let height = u32::try_from(height)
            .map_err(|_| BgRemovalError::invalid_config("Height too large for u32"))?;
        let width = u32::try_from(width)
            .map_err(|_| BgRemovalError::invalid_config("Width too large for u32"))?;

        Ok(Self {
            target_size: [height, width],
            normalization_mean: Self::parse_channels(preprocessor, "image_mean", 128.0)?,
            normalization_std: Self::parse_channels(preprocessor, "image_std", 256.0)?,
        })
    }

    fn parse_channels(
        preprocessor: &serde_json::Value,
        key: &str,
        fallback: f64,
    ) -> Result<[f32; 3]> {
        let values = preprocessor
            .get(key)
            .and_then(serde_json::Value::as_array)
            .ok_or_else(|| {
                BgRemovalError::invalid_config(format!("Missing {key} in preprocessor config"))
            })?;

        if values.len() < 3 {
            return Err(BgRemovalError::invalid_config(format!(
                "{key} must have at least 3 values"
            )));
        }

        let channel = |index: usize| {
            (values
                .get(index)
                .and_then(serde_json::Value::as_f64)
                .unwrap_or(fallback)
                / 255.0) as f32
        };

        Ok([channel(0), channel(1), channel(2)])
    }
}

/// Resolved model: where its weights live and how to feed it
#[derive(Debug, Clone)]
pub struct ModelManager {
    name: String,
    model_file: PathBuf,
    variant: String,
    preprocessing: PreprocessingConfig,
}

impl ModelManager {
    /// Resolve a model specification against the cache
    ///
    /// # Errors
    /// - Model not cached or path missing
    /// - Invalid `preprocessor_config.json`
    /// - Requested variant not available
    pub fn from_spec(spec: &ModelSpec, cache: &ModelCache) -> Result<Self> {
        match &spec.source {
            ModelSource::External(path) => Self::with_external_model(path, spec.variant.as_deref()),
            ModelSource::Downloaded(model_id) => {
                if !cache.is_model_cached(model_id) {
                    return Err(BgRemovalError::model(format!(
                        "Model '{}' not found in cache at {}",
                        model_id,
                        cache.cache_dir().display()
                    )));
                }
                let mut manager = Self::with_model_dir(
                    &cache.get_model_path(model_id),
                    spec.variant.as_deref(),
                )?;
                manager.name.clone_from(model_id);
                Ok(manager)
            },
        }
    }

    /// Use a model from an arbitrary filesystem path
    ///
    /// # Errors
    /// - Path does not exist
    /// - Directory contains no ONNX model for the requested variant
    pub fn with_external_model<P: AsRef<Path>>(path: P, variant: Option<&str>) -> Result<Self> {
        let path = path.as_ref();
        if path.is_file() {
            let name = path
                .file_stem()
                .map_or_else(|| "model".to_string(), |s| s.to_string_lossy().into_owned());
            return Ok(Self {
                name,
                model_file: path.to_path_buf(),
                variant: variant.unwrap_or("fp32").to_string(),
                preprocessing: PreprocessingConfig::default(),
            });
        }
        if path.is_dir() {
            return Self::with_model_dir(path, variant);
        }
        Err(BgRemovalError::model(format!(
            "Model path does not exist: {}",
            path.display()
        )))
    }

    fn with_model_dir(dir: &Path, variant: Option<&str>) -> Result<Self> {
        let (variant, model_file) = Self::resolve_variant(dir, variant)?;

        let preprocessor_path = dir.join("preprocessor_config.json");
        let preprocessing = if preprocessor_path.exists() {
            let content = fs::read_to_string(&preprocessor_path).map_err(|e| {
                BgRemovalError::file_io_error("read preprocessor_config.json", &preprocessor_path, &e)
            })?;
            let value: serde_json::Value = serde_json::from_str(&content).map_err(|e| {
                BgRemovalError::model(format!("Failed to parse preprocessor_config.json: {e}"))
            })?;
            PreprocessingConfig::from_huggingface(&value)?
        } else {
            log::debug!(
                "No preprocessor_config.json in {}, using defaults",
                dir.display()
            );
            PreprocessingConfig::default()
        };

        let name = dir
            .file_name()
            .map_or_else(|| "model".to_string(), |s| s.to_string_lossy().into_owned());

        Ok(Self {
            name,
            model_file,
            variant,
            preprocessing,
        })
    }

    /// Pick the model file for a variant; without a preference fp32 wins over fp16
    fn resolve_variant(dir: &Path, requested: Option<&str>) -> Result<(String, PathBuf)> {
        let candidates: [(&str, PathBuf); 3] = [
            ("fp32", dir.join("onnx").join("model.onnx")),
            ("fp16", dir.join("onnx").join("model_fp16.onnx")),
            ("fp32", dir.join("model.onnx")),
        ];

        let found = candidates.into_iter().find(|(variant, path)| {
            requested.map_or(true, |wanted| wanted == *variant) && path.exists()
        });

        found
            .map(|(variant, path)| (variant.to_string(), path))
            .ok_or_else(|| {
                BgRemovalError::model(format!(
                    "No ONNX model{} found in {}",
                    requested.map(|v| format!(" for variant '{v}'")).unwrap_or_default(),
                    dir.display()
                ))
            })
    }

    /// Read the model weights
    ///
    /// # Errors
    /// - File I/O errors when reading model data
    pub fn load_model(&self) -> Result<Vec<u8>> {
        fs::read(&self.model_file)
            .map_err(|e| BgRemovalError::file_io_error("read model file", &self.model_file, &e))
    }

    /// Model metadata derived from the file and preprocessing config
    ///
    /// # Errors
    /// - Model file metadata unavailable
    pub fn get_info(&self) -> Result<ModelInfo> {
        let size_bytes = fs::metadata(&self.model_file)
            .map_err(|e| BgRemovalError::file_io_error("stat model file", &self.model_file, &e))?
            .len() as usize;
        let [height, width] = self.preprocessing.target_size;

        Ok(ModelInfo {
            name: self.name.clone(),
            precision: self.variant.clone(),
            size_bytes,
            input_shape: (1, 3, height as usize, width as usize),
            output_shape: (1, 1, height as usize, width as usize),
        })
    }

    #[must_use]
    pub fn preprocessing_config(&self) -> &PreprocessingConfig {
        &self.preprocessing
    }

    #[must_use]
    pub fn model_path(&self) -> &Path {
        &self.model_file
    }

    #[must_use]
    pub fn variant(&self) -> &str {
        &self.variant
    }
}
