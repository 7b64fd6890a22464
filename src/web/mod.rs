//! HTTP surface
//!
//! Slot-mutating routes (`/`, `POST /upload`, `/process`) serialize on the
//! session lock; delivery and health are lock-free.

pub mod error;
pub mod handlers;
pub mod page;

use crate::remover::BackgroundRemover;
use crate::session::Session;
use crate::staging::StagingArea;
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Clone)]
pub struct AppState {
    pub staging: StagingArea,
    pub remover: Arc<dyn BackgroundRemover>,
    pub session: Arc<Mutex<Session>>,
    pub allowed_extensions: Arc<Vec<String>>,
    pub max_upload_bytes: usize,
}

impl AppState {
    pub fn new(
        staging: StagingArea,
        remover: Arc<dyn BackgroundRemover>,
        allowed_extensions: Vec<String>,
        max_upload_bytes: usize,
    ) -> Self {
        Self {
            staging,
            remover,
            session: Arc::new(Mutex::new(Session::default())),
            allowed_extensions: Arc::new(allowed_extensions),
            max_upload_bytes,
        }
    }
}

pub fn create_app(state: AppState) -> Router {
    let body_limit = state.max_upload_bytes;
    Router::new()
        .route("/", get(handlers::index))
        .route(
            "/upload",
            get(handlers::upload_form).post(handlers::upload_file),
        )
        .route("/uploads/:filename", get(handlers::uploaded_file))
        .route("/process", post(handlers::process_image))
        .route("/outputs/:filename", get(handlers::output_file))
        .route("/health", get(handlers::health_check))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}
