#![allow(clippy::too_many_lines)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::unused_async)]

//! # bgremove-server
//!
//! A small web front-end for background removal: upload an image, strip its
//! background with a segmentation model, view and download the transparent PNG.
//!
//! The pipeline is single-user and single-slot. One directory holds the
//! uploaded image, another holds the processed result, and each holds at
//! most one meaningful file at a time.
//!
//! ## Layers
//!
//! - [`staging`]: the two slot directories (clear, write, look up)
//! - [`services`]: upload validation, processing and delivery on top of the slots
//! - [`remover`]: the [`BackgroundRemover`] seam and its model-backed implementation
//! - [`processor`], [`backends`], [`models`], [`cache`], [`download`]: segmentation
//!   inference with ONNX Runtime or Tract
//! - [`web`]: the axum router
//!
//! ## Embedding the router
//!
//! ```rust,no_run
//! use bgremove_server::{create_app, AppState, ModelRemover, ServerConfig, StagingArea};
//! use std::sync::Arc;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = ServerConfig::from_env()?;
//! let staging = StagingArea::new(&config.upload_dir, &config.output_dir);
//! staging.ensure_slots()?;
//!
//! let remover = ModelRemover::new(config.removal.clone(), config.model_cache()?)?;
//! let state = AppState::new(
//!     staging,
//!     Arc::new(remover),
//!     config.allowed_extensions.clone(),
//!     config.max_upload_bytes,
//! );
//!
//! let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
//! axum::serve(listener, create_app(state)).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ### Feature Flags
//!
//! - `onnx` (default): ONNX Runtime backend with GPU acceleration support
//! - `tract` (default): Pure Rust backend
//! - `cli` (default): the `bgremove-server` binary and tracing setup
//! - `tracing-json`: JSON log output for the binary

pub mod backends;
pub mod cache;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod download;
pub mod error;
pub mod inference;
pub mod models;
pub mod processor;
pub mod remover;
pub mod services;
pub mod session;
pub mod staging;
#[cfg(feature = "cli")]
pub mod tracing_config;
pub mod types;
pub mod utils;
pub mod web;

// Public API exports
pub use backends::*;
pub use cache::{CachedModelInfo, ModelCache};
pub use config::{BackendType, ExecutionProvider, RemovalConfig, ServerConfig};
pub use download::{validate_model_url, ModelDownloader};
pub use error::{BgRemovalError, Result};
pub use inference::InferenceBackend;
pub use models::{ModelManager, ModelSource, ModelSpec, PreprocessingConfig};
pub use processor::{BackendFactory, BackgroundRemovalProcessor, DefaultBackendFactory};
pub use remover::{BackgroundRemover, ModelRemover};
pub use services::{ImageIOService, ProcessingError, UploadRejection, UploadedFile};
pub use session::{Session, SessionState};
pub use staging::{CleanupReport, ProcessedArtifact, Slot, StagedFile, StagingArea};
pub use types::{ProcessingTimings, RemovalResult, SegmentationMask};
pub use web::{create_app, AppState};

#[cfg(feature = "cli")]
pub use tracing_config::{TracingConfig, TracingFormat};
