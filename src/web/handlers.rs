use super::{
    error::AppError,
    page::{output_url, upload_url, LandingPage},
    AppState,
};
use crate::services::{
    delivery,
    processing::{self, ProcessingError},
    upload::{self, UploadError, UploadedFile},
};
use crate::staging::Slot;
use axum::{
    extract::{multipart::MultipartRejection, Multipart, Path, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Redirect, Response},
    Json,
};
use serde::Serialize;
use tracing::{error, info, instrument, warn};

/// Where rejected uploads are sent back to
pub const UPLOAD_REDIRECT: &str = "/upload";

/// `GET /` starts a fresh session
#[instrument(skip_all)]
pub async fn index(State(state): State<AppState>) -> Html<String> {
    let mut session = state.session.lock().await;
    let report = state.staging.clear_all_slots();
    if !report.is_clean() {
        warn!(failures = report.failures.len(), "session reset left files behind");
    }
    session.reset();
    Html(LandingPage::default().render())
}

/// `GET /upload` renders the page without touching the slots
pub async fn upload_form() -> Html<String> {
    Html(LandingPage::default().render())
}

/// `POST /upload`
#[instrument(skip_all)]
pub async fn upload_file(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Response, AppError> {
    // Not a multipart submission at all: same as a form without a file
    let mut multipart = match multipart {
        Ok(multipart) => multipart,
        Err(rejection) => {
            info!(%rejection, "upload rejected");
            return Ok(Redirect::to(UPLOAD_REDIRECT).into_response());
        },
    };

    let mut file = None;
    while let Some(field) = multipart.next_field().await? {
        // Fields without a filename are plain form values, not files
        if field.name() != Some("file") || file.is_some() {
            continue;
        }
        let Some(filename) = field.file_name().map(str::to_string) else {
            continue;
        };
        let bytes = field.bytes().await?;
        file = Some(UploadedFile {
            filename,
            bytes: bytes.to_vec(),
        });
    }

    let mut session = state.session.lock().await;
    match upload::accept(&state.staging, file.as_ref(), &state.allowed_extensions) {
        Ok(staged) => {
            let page = LandingPage::with_original(upload_url(&staged.name));
            session.uploaded(staged);
            Ok(Html(page.render()).into_response())
        },
        Err(UploadError::Rejected(reason)) => {
            info!(%reason, "upload rejected");
            Ok(Redirect::to(UPLOAD_REDIRECT).into_response())
        },
        Err(UploadError::Storage(e)) => Err(AppError::Internal(e)),
    }
}

/// `POST /process`
#[instrument(skip_all)]
pub async fn process_image(State(state): State<AppState>) -> Response {
    let mut session = state.session.lock().await;
    match processing::process(&state.staging, state.remover.as_ref()).await {
        Ok(artifact) => {
            let page = LandingPage::with_output(output_url(&artifact.file.name));
            session.processed(artifact);
            Html(page.render()).into_response()
        },
        Err(ProcessingError::NoFileUploaded) => {
            Html(LandingPage::with_error("No file uploaded").render()).into_response()
        },
        Err(ProcessingError::Removal(e)) => {
            error!(error = %e, "background removal failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Html(LandingPage::with_error("Background removal failed").render()),
            )
                .into_response()
        },
    }
}

/// `GET /uploads/:filename`
pub async fn uploaded_file(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> Result<Response, AppError> {
    serve_from(&state, Slot::Incoming, filename).await
}

/// `GET /outputs/:filename`
pub async fn output_file(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> Result<Response, AppError> {
    serve_from(&state, Slot::Processed, filename).await
}

async fn serve_from(state: &AppState, slot: Slot, filename: String) -> Result<Response, AppError> {
    let Some(delivery) = delivery::fetch(&state.staging, slot, &filename).await? else {
        return Err(AppError::NotFound(filename));
    };

    Ok((
        [
            (header::CONTENT_TYPE, delivery.content_type),
            (header::CACHE_CONTROL, "no-store"),
        ],
        delivery.bytes,
    )
        .into_response())
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub backend: String,
    pub state: String,
}

/// `GET /health`
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    // Processing holds the session lock for the whole inference
    let session_state = match state.session.try_lock() {
        Ok(session) => session.state().as_str(),
        Err(_) => "busy",
    };

    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        backend: state.remover.name(),
        state: session_state.to_string(),
    })
}
