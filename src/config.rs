//! Configuration types for the removal pipeline and the web server

use crate::cache::ModelCache;
use crate::error::{BgRemovalError, Result};
use crate::models::{ModelSource, ModelSpec};
use serde::{Deserialize, Serialize};
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;

/// Model fetched when nothing else is configured
pub const DEFAULT_MODEL_URL: &str = "https://huggingface.co/imgly/isnet-general-onnx";

/// Extensions accepted by the upload handler unless overridden
pub const DEFAULT_ALLOWED_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif"];

pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:5000";
pub const DEFAULT_MAX_UPLOAD_MB: usize = 32;

/// Execution provider options for ONNX Runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ExecutionProvider {
    /// Auto-detect best available provider (CUDA > `CoreML` > CPU)
    #[default]
    Auto,
    Cpu,
    Cuda,
    CoreMl,
}

impl std::fmt::Display for ExecutionProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Cpu => write!(f, "cpu"),
            Self::Cuda => write!(f, "cuda"),
            Self::CoreMl => write!(f, "coreml"),
        }
    }
}

impl std::str::FromStr for ExecutionProvider {
    type Err = BgRemovalError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "cpu" => Ok(Self::Cpu),
            "cuda" => Ok(Self::Cuda),
            "coreml" => Ok(Self::CoreMl),
            other => Err(BgRemovalError::invalid_config(format!(
                "Unknown execution provider '{other}' (expected auto, cpu, cuda or coreml)"
            ))),
        }
    }
}

/// Inference engine used by the model-backed remover
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackendType {
    Onnx,
    Tract,
}

impl Default for BackendType {
    fn default() -> Self {
        #[cfg(feature = "onnx")]
        {
            Self::Onnx
        }
        #[cfg(not(feature = "onnx"))]
        {
            Self::Tract
        }
    }
}

impl std::fmt::Display for BackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Onnx => write!(f, "onnx"),
            Self::Tract => write!(f, "tract"),
        }
    }
}

impl std::str::FromStr for BackendType {
    type Err = BgRemovalError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "onnx" => Ok(Self::Onnx),
            "tract" => Ok(Self::Tract),
            other => Err(BgRemovalError::invalid_config(format!(
                "Unknown backend '{other}' (expected onnx or tract)"
            ))),
        }
    }
}

/// Configuration for background removal operations
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RemovalConfig {
    pub backend_type: BackendType,

    /// Execution provider for ONNX Runtime, ignored by Tract
    pub execution_provider: ExecutionProvider,

    /// Number of intra-op threads for inference (0 = auto)
    pub intra_threads: usize,

    /// Number of inter-op threads for inference (0 = auto)
    pub inter_threads: usize,

    pub model_spec: ModelSpec,
}

impl RemovalConfig {
    /// Create a new configuration builder
    ///
    /// ```rust
    /// use bgremove_server::config::{ExecutionProvider, RemovalConfig};
    ///
    /// let config = RemovalConfig::builder()
    ///     .execution_provider(ExecutionProvider::Cpu)
    ///     .num_threads(4)
    ///     .build()
    ///     .unwrap();
    /// assert_eq!(config.intra_threads, 4);
    /// assert_eq!(config.inter_threads, 2);
    /// ```
    #[must_use]
    pub fn builder() -> RemovalConfigBuilder {
        RemovalConfigBuilder::default()
    }

    /// Validate that the configuration can be served by this build
    ///
    /// # Errors
    /// - Backend type not compiled in
    /// - Execution provider other than CPU/auto requested for Tract
    pub fn validate(&self) -> Result<()> {
        match self.backend_type {
            BackendType::Onnx if !cfg!(feature = "onnx") => {
                return Err(BgRemovalError::invalid_config(
                    "ONNX backend requested but the 'onnx' feature is not enabled",
                ));
            },
            BackendType::Tract if !cfg!(feature = "tract") => {
                return Err(BgRemovalError::invalid_config(
                    "Tract backend requested but the 'tract' feature is not enabled",
                ));
            },
            _ => {},
        }

        if self.backend_type == BackendType::Tract
            && matches!(
                self.execution_provider,
                ExecutionProvider::Cuda | ExecutionProvider::CoreMl
            )
        {
            return Err(BgRemovalError::invalid_config(format!(
                "Execution provider '{}' is not supported by the Tract backend",
                self.execution_provider
            )));
        }

        Ok(())
    }
}

/// Builder for `RemovalConfig`
#[derive(Debug, Default)]
pub struct RemovalConfigBuilder {
    config: RemovalConfig,
}

impl RemovalConfigBuilder {
    #[must_use]
    pub fn backend_type(mut self, backend_type: BackendType) -> Self {
        self.config.backend_type = backend_type;
        self
    }

    #[must_use]
    pub fn execution_provider(mut self, provider: ExecutionProvider) -> Self {
        self.config.execution_provider = provider;
        self
    }

    #[must_use]
    pub fn intra_threads(mut self, threads: usize) -> Self {
        self.config.intra_threads = threads;
        self
    }

    #[must_use]
    pub fn inter_threads(mut self, threads: usize) -> Self {
        self.config.inter_threads = threads;
        self
    }

    /// Set both thread counts; inter-op gets half of `threads` (minimum 1)
    ///
    /// `0` leaves both on auto-detection.
    #[must_use]
    pub fn num_threads(mut self, threads: usize) -> Self {
        if threads == 0 {
            self.config.intra_threads = 0;
            self.config.inter_threads = 0;
        } else {
            self.config.intra_threads = threads;
            self.config.inter_threads = (threads / 2).max(1);
        }
        self
    }

    #[must_use]
    pub fn model_spec(mut self, model_spec: ModelSpec) -> Self {
        self.config.model_spec = model_spec;
        self
    }

    /// Build the configuration
    ///
    /// # Errors
    /// - Configuration fails [`RemovalConfig::validate`]
    pub fn build(self) -> Result<RemovalConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Resolve a `--model` argument into a model specification
///
/// Returns the download URL alongside the spec when `model` is a `HuggingFace`
/// URL. Existing filesystem paths become external models, anything else is
/// taken as a cached model id.
#[must_use]
pub fn resolve_model_argument(model: &str, variant: Option<String>) -> (ModelSpec, Option<String>) {
    if model.starts_with("https://") || model.starts_with("http://") {
        let spec = ModelSpec {
            source: ModelSource::Downloaded(ModelCache::url_to_model_id(model)),
            variant,
        };
        return (spec, Some(model.to_string()));
    }

    let path = PathBuf::from(model);
    let source = if path.exists() {
        ModelSource::External(path)
    } else {
        ModelSource::Downloaded(model.to_string())
    };
    (ModelSpec { source, variant }, None)
}

/// Web server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    /// Directory backing the incoming slot
    pub upload_dir: PathBuf,
    /// Directory backing the processed slot
    pub output_dir: PathBuf,
    /// Lowercase extensions accepted for upload
    pub allowed_extensions: Vec<String>,
    pub max_upload_bytes: usize,
    pub removal: RemovalConfig,
    /// Model cache root; `None` uses the XDG cache location
    pub cache_dir: Option<PathBuf>,
    /// Where to fetch the model from when it is not cached yet
    pub model_url: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 5000)),
            upload_dir: PathBuf::from("uploads"),
            output_dir: PathBuf::from("outputs"),
            allowed_extensions: DEFAULT_ALLOWED_EXTENSIONS
                .iter()
                .map(|ext| (*ext).to_string())
                .collect(),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_MB * 1024 * 1024,
            removal: RemovalConfig::default(),
            cache_dir: None,
            model_url: Some(DEFAULT_MODEL_URL.to_string()),
        }
    }
}

impl ServerConfig {
    #[must_use]
    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder::default()
    }

    /// Load configuration from `BGREMOVE_*` environment variables
    ///
    /// # Errors
    /// - Unparseable bind address, backend or size
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup
    ///
    /// # Errors
    /// - Unparseable bind address, backend or size
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut builder = Self::builder();

        if let Some(bind) = lookup("BGREMOVE_BIND") {
            let addr = bind.parse::<SocketAddr>().map_err(|e| {
                BgRemovalError::invalid_config(format!("Invalid BGREMOVE_BIND '{bind}': {e}"))
            })?;
            builder = builder.bind_addr(addr);
        }
        if let Some(dir) = lookup("BGREMOVE_UPLOAD_DIR") {
            builder = builder.upload_dir(dir);
        }
        if let Some(dir) = lookup("BGREMOVE_OUTPUT_DIR") {
            builder = builder.output_dir(dir);
        }
        if let Some(list) = lookup("BGREMOVE_ALLOWED_EXTENSIONS") {
            builder = builder.allowed_extensions(list.split(','));
        }
        if let Some(mb) = lookup("BGREMOVE_MAX_UPLOAD_MB") {
            let mb = mb.trim().parse::<usize>().map_err(|e| {
                BgRemovalError::invalid_config(format!("Invalid BGREMOVE_MAX_UPLOAD_MB '{mb}': {e}"))
            })?;
            builder = builder.max_upload_mb(mb);
        }
        if let Some(backend) = lookup("BGREMOVE_BACKEND") {
            builder = builder.backend_type(backend.parse()?);
        }
        if let Some(dir) = lookup(crate::cache::CACHE_DIR_ENV) {
            builder = builder.cache_dir(dir);
        }

        let variant = lookup("BGREMOVE_MODEL_VARIANT");
        let model = lookup("BGREMOVE_MODEL").unwrap_or_else(|| DEFAULT_MODEL_URL.to_string());
        builder = builder.model(&model, variant);

        builder.build()
    }

    /// Reopen this configuration for overrides
    #[must_use]
    pub fn into_builder(self) -> ServerConfigBuilder {
        ServerConfigBuilder { config: self }
    }

    /// Open the model cache this configuration points at
    ///
    /// # Errors
    /// - Cache directory cannot be determined or created
    pub fn model_cache(&self) -> Result<ModelCache> {
        match &self.cache_dir {
            Some(dir) => ModelCache::with_dir(dir.join("models")),
            None => ModelCache::new(),
        }
    }
}

/// Builder for `ServerConfig`
#[derive(Debug, Default)]
pub struct ServerConfigBuilder {
    config: ServerConfig,
}

impl ServerConfigBuilder {
    #[must_use]
    pub fn bind_addr(mut self, addr: SocketAddr) -> Self {
        self.config.bind_addr = addr;
        self
    }

    #[must_use]
    pub fn upload_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.config.upload_dir = dir.into();
        self
    }

    #[must_use]
    pub fn output_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.config.output_dir = dir.into();
        self
    }

    /// Replace the extension allow-list; entries are trimmed, lowercased and
    /// stripped of a leading dot
    #[must_use]
    pub fn allowed_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.config.allowed_extensions = extensions
            .into_iter()
            .map(|ext| ext.as_ref().trim().trim_start_matches('.').to_ascii_lowercase())
            .filter(|ext| !ext.is_empty())
            .collect();
        self
    }

    #[must_use]
    pub fn max_upload_mb(mut self, mb: usize) -> Self {
        self.config.max_upload_bytes = mb.saturating_mul(1024 * 1024);
        self
    }

    #[must_use]
    pub fn removal(mut self, removal: RemovalConfig) -> Self {
        self.config.removal = removal;
        self
    }

    #[must_use]
    pub fn backend_type(mut self, backend_type: BackendType) -> Self {
        self.config.removal.backend_type = backend_type;
        self
    }

    #[must_use]
    pub fn execution_provider(mut self, provider: ExecutionProvider) -> Self {
        self.config.removal.execution_provider = provider;
        self
    }

    /// See [`RemovalConfigBuilder::num_threads`]
    #[must_use]
    pub fn num_threads(mut self, threads: usize) -> Self {
        let removal = std::mem::take(&mut self.config.removal);
        self.config.removal = RemovalConfigBuilder { config: removal }
            .num_threads(threads)
            .config;
        self
    }

    #[must_use]
    pub fn cache_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.config.cache_dir = Some(dir.into());
        self
    }

    /// Set the model from an id, URL or path
    #[must_use]
    pub fn model(mut self, model: &str, variant: Option<String>) -> Self {
        let (spec, url) = resolve_model_argument(model, variant);
        self.config.removal.model_spec = spec;
        self.config.model_url = url;
        self
    }

    /// Build the configuration
    ///
    /// # Errors
    /// - Empty extension allow-list
    /// - Zero upload limit
    /// - Invalid removal configuration
    pub fn build(self) -> Result<ServerConfig> {
        if self.config.allowed_extensions.is_empty() {
            return Err(BgRemovalError::invalid_config(
                "At least one allowed extension is required",
            ));
        }
        if self.config.max_upload_bytes == 0 {
            return Err(BgRemovalError::invalid_config(
                "Maximum upload size must be greater than zero",
            ));
        }
        self.config.removal.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_server_defaults() {
        let config = ServerConfig::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(config.bind_addr.to_string(), DEFAULT_BIND_ADDR);
        assert_eq!(config.upload_dir, PathBuf::from("uploads"));
        assert_eq!(config.output_dir, PathBuf::from("outputs"));
        assert_eq!(config.allowed_extensions, vec!["png", "jpg", "jpeg", "gif"]);
        assert_eq!(config.max_upload_bytes, 32 * 1024 * 1024);
        assert_eq!(config.model_url.as_deref(), Some(DEFAULT_MODEL_URL));
        assert_eq!(
            config.removal.model_spec.source,
            ModelSource::Downloaded("imgly--isnet-general-onnx".to_string())
        );
    }

    #[test]
    fn test_env_overrides() {
        let config = ServerConfig::from_lookup(lookup_from(&[
            ("BGREMOVE_BIND", "0.0.0.0:8080"),
            ("BGREMOVE_UPLOAD_DIR", "/tmp/in"),
            ("BGREMOVE_ALLOWED_EXTENSIONS", " PNG, .webp ,,"),
            ("BGREMOVE_MAX_UPLOAD_MB", "4"),
            ("BGREMOVE_MODEL", "my-local-model"),
            ("BGREMOVE_MODEL_VARIANT", "fp16"),
        ]))
        .unwrap();

        assert_eq!(config.bind_addr.port(), 8080);
        assert_eq!(config.upload_dir, PathBuf::from("/tmp/in"));
        assert_eq!(config.allowed_extensions, vec!["png", "webp"]);
        assert_eq!(config.max_upload_bytes, 4 * 1024 * 1024);
        assert_eq!(config.model_url, None);
        assert_eq!(config.removal.model_spec.variant.as_deref(), Some("fp16"));
    }

    #[test]
    fn test_invalid_env_values() {
        assert!(ServerConfig::from_lookup(lookup_from(&[("BGREMOVE_BIND", "nope")])).is_err());
        assert!(ServerConfig::from_lookup(lookup_from(&[("BGREMOVE_BACKEND", "gpu")])).is_err());
        assert!(
            ServerConfig::from_lookup(lookup_from(&[("BGREMOVE_MAX_UPLOAD_MB", "0")])).is_err()
        );
        assert!(ServerConfig::from_lookup(lookup_from(&[(
            "BGREMOVE_ALLOWED_EXTENSIONS",
            " , "
        )]))
        .is_err());
    }

    #[test]
    fn test_thread_split() {
        let config = RemovalConfig::builder().num_threads(1).build().unwrap();
        assert_eq!((config.intra_threads, config.inter_threads), (1, 1));

        let config = RemovalConfig::builder().num_threads(0).build().unwrap();
        assert_eq!((config.intra_threads, config.inter_threads), (0, 0));
    }

    #[test]
    fn test_parse_enums() {
        assert_eq!("CoreML".parse::<ExecutionProvider>().unwrap(), ExecutionProvider::CoreMl);
        assert_eq!("tract".parse::<BackendType>().unwrap(), BackendType::Tract);
        assert!("metal".parse::<ExecutionProvider>().is_err());
    }

    #[cfg(feature = "tract")]
    #[test]
    fn test_tract_rejects_gpu_providers() {
        let result = RemovalConfig::builder()
            .backend_type(BackendType::Tract)
            .execution_provider(ExecutionProvider::Cuda)
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_resolve_model_argument() {
        let (spec, url) = resolve_model_argument("https://huggingface.co/imgly/isnet-general-onnx", None);
        assert_eq!(url.as_deref(), Some(DEFAULT_MODEL_URL));
        assert_eq!(
            spec.source,
            ModelSource::Downloaded("imgly--isnet-general-onnx".to_string())
        );

        let dir = tempfile::TempDir::new().unwrap();
        let (spec, url) =
            resolve_model_argument(dir.path().to_str().unwrap(), Some("fp32".to_string()));
        assert_eq!(url, None);
        assert_eq!(spec.source, ModelSource::External(dir.path().to_path_buf()));
    }
}
