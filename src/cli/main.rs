//! Server entry point
//!
//! Precedence is CLI flag, then `BGREMOVE_*` environment (including `.env`),
//! then built-in defaults.

use crate::{
    config::{BackendType, ExecutionProvider, ServerConfig},
    download::ModelDownloader,
    remover::{BackgroundRemover, ModelRemover},
    staging::StagingArea,
    tracing_config::{TracingConfig, TracingFormat},
    web::{create_app, AppState},
};
use anyhow::{Context, Result};
use clap::Parser;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

/// Upload an image, strip its background, download the result
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(name = "bgremove-server")]
pub struct Cli {
    /// Interface to bind [default: 127.0.0.1]
    #[arg(long)]
    pub host: Option<IpAddr>,

    /// Port to listen on [default: 5000]
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Directory backing the incoming slot [default: uploads]
    #[arg(long, value_name = "PATH")]
    pub uploads_dir: Option<String>,

    /// Directory backing the processed slot [default: outputs]
    #[arg(long, value_name = "PATH")]
    pub outputs_dir: Option<String>,

    /// Model id, URL, or path to a model folder or .onnx file
    #[arg(short, long)]
    pub model: Option<String>,

    /// Model variant (fp16, fp32)
    #[arg(long)]
    pub variant: Option<String>,

    /// Inference backend (onnx, tract)
    #[arg(short, long)]
    pub backend: Option<BackendType>,

    /// Execution provider for the ONNX backend (auto, cpu, cuda, coreml)
    #[arg(short, long)]
    pub execution_provider: Option<ExecutionProvider>,

    /// Number of inference threads (0 = auto-detect)
    #[arg(short, long)]
    pub threads: Option<usize>,

    /// Maximum accepted request body in megabytes
    #[arg(long)]
    pub max_upload_mb: Option<usize>,

    /// Use custom cache directory
    #[arg(long, value_name = "PATH")]
    pub cache_dir: Option<String>,

    /// Download the model into the cache and exit
    #[arg(long)]
    pub only_download: bool,

    /// List cached models and exit
    #[arg(long)]
    pub list_models: bool,

    /// Show available backends and execution providers, then exit
    #[arg(long)]
    pub show_providers: bool,

    /// Enable verbose logging (-v: DEBUG, -vv: TRACE)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Log output format (console, compact, json)
    #[arg(long, default_value = "console")]
    pub log_format: TracingFormat,
}

impl Cli {
    /// Layer the flags over an environment-derived configuration
    ///
    /// # Errors
    /// - Resulting configuration fails validation
    pub fn apply(&self, base: ServerConfig) -> Result<ServerConfig> {
        let mut bind_addr = base.bind_addr;
        if let Some(host) = self.host {
            bind_addr.set_ip(host);
        }
        if let Some(port) = self.port {
            bind_addr.set_port(port);
        }

        let mut builder = base.into_builder().bind_addr(bind_addr);
        if let Some(dir) = &self.uploads_dir {
            builder = builder.upload_dir(dir);
        }
        if let Some(dir) = &self.outputs_dir {
            builder = builder.output_dir(dir);
        }
        if let Some(model) = &self.model {
            builder = builder.model(model, self.variant.clone());
        }
        if let Some(backend) = self.backend {
            builder = builder.backend_type(backend);
        }
        if let Some(provider) = self.execution_provider {
            builder = builder.execution_provider(provider);
        }
        if let Some(threads) = self.threads {
            builder = builder.num_threads(threads);
        }
        if let Some(mb) = self.max_upload_mb {
            builder = builder.max_upload_mb(mb);
        }
        if let Some(dir) = &self.cache_dir {
            builder = builder.cache_dir(dir);
        }

        builder.build().context("Invalid server configuration")
    }
}

pub async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    TracingConfig::new()
        .with_verbosity(cli.verbose)
        .with_format(cli.log_format)
        .init()
        .context("Failed to initialize tracing")?;

    if cli.show_providers {
        show_provider_diagnostics();
        return Ok(());
    }

    let config = cli.apply(ServerConfig::from_env().context("Failed to read environment")?)?;
    let cache = config.model_cache().context("Failed to open model cache")?;

    if cli.list_models {
        return list_cached_models(&config);
    }

    if let Some(url) = &config.model_url {
        let downloader = ModelDownloader::new(cache.clone())?;
        let model_id = downloader
            .download_model(url)
            .await
            .with_context(|| format!("Failed to download model from {url}"))?;
        info!(%model_id, "📦 Model available in cache");
    }
    if cli.only_download {
        return Ok(());
    }

    let staging = StagingArea::new(&config.upload_dir, &config.output_dir);
    staging
        .ensure_slots()
        .context("Failed to create slot directories")?;

    let remover = ModelRemover::new(config.removal.clone(), cache)
        .context("Failed to set up background remover")?;
    info!(remover = %remover.name(), "🧠 Background remover configured (model loads on first use)");

    let state = AppState::new(
        staging,
        Arc::new(remover),
        config.allowed_extensions.clone(),
        config.max_upload_bytes,
    );

    let app = create_app(state).layer(
        TraceLayer::new_for_http()
            .make_span_with(|request: &axum::http::Request<_>| {
                tracing::info_span!(
                    "http_request",
                    method = %request.method(),
                    uri = %request.uri(),
                )
            })
            .on_request(|request: &axum::http::Request<_>, _span: &tracing::Span| {
                info!("📥 {} {}", request.method(), request.uri());
            })
            .on_response(
                |response: &axum::http::Response<_>,
                 latency: std::time::Duration,
                 _span: &tracing::Span| {
                    info!(
                        "📤 Finished in {:?} with status {}",
                        latency,
                        response.status()
                    );
                },
            ),
    );

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_addr))?;
    let local: SocketAddr = listener.local_addr()?;
    info!("✅ Server ready at http://{}", local);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("🛑 Server shut down gracefully.");
    Ok(())
}

fn show_provider_diagnostics() {
    let cpu_count = std::thread::available_parallelism()
        .map(std::num::NonZeroUsize::get)
        .unwrap_or(1);
    println!("💻 System: {cpu_count} CPU cores detected");

    println!("\n🔧 Compiled backends:");
    #[cfg(feature = "onnx")]
    println!("  • onnx: ONNX Runtime backend");
    #[cfg(feature = "tract")]
    println!("  • tract: Pure Rust backend (CPU only)");

    #[cfg(feature = "onnx")]
    {
        println!("\n🚀 ONNX execution providers:");
        for (name, available) in crate::backends::OnnxBackend::list_providers() {
            let status = if available { "✅ Available" } else { "❌ Not Available" };
            println!("  • {name}: {status}");
        }
    }
}

fn list_cached_models(config: &ServerConfig) -> Result<()> {
    let cache = config.model_cache()?;
    let models = cache
        .scan_cached_models()
        .context("Failed to scan model cache")?;

    println!("Cache directory: {}", cache.cache_dir().display());
    if models.is_empty() {
        println!("No cached models. Run with --only-download to fetch one.");
        return Ok(());
    }
    for model in models {
        println!("  {} [{}]", model.model_id, model.variants.join(", "));
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            },
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("⌨️  Ctrl+C received, starting graceful shutdown...");
        },
        () = terminate => {
            info!("💤 SIGTERM received, starting graceful shutdown...");
        },
    }
}
