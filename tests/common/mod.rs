//! Shared fixtures for the HTTP integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, Response},
    Router,
};
use bgremove_server::{
    create_app, AppState, BackgroundRemover, BgRemovalError, Result, StagingArea,
};
use http_body_util::BodyExt;
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use std::io::Cursor;
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use tempfile::TempDir;
use tower::ServiceExt;

pub const BOUNDARY: &str = "---------------------------bgremovetestboundary";

/// Deterministic remover: the left half of the image becomes transparent
#[derive(Debug, Default)]
pub struct StubRemover {
    pub calls: AtomicUsize,
    pub fail: bool,
}

impl StubRemover {
    pub fn failing() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail: true,
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BackgroundRemover for StubRemover {
    async fn remove_background(&self, image: DynamicImage) -> Result<RgbaImage> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(BgRemovalError::inference("stub remover failure"));
        }

        let mut rgba = image.to_rgba8();
        let half = rgba.width() / 2;
        for (x, _, pixel) in rgba.enumerate_pixels_mut() {
            if x < half {
                *pixel = Rgba([0, 0, 0, 0]);
            }
        }
        Ok(rgba)
    }

    fn name(&self) -> String {
        "stub".to_string()
    }
}

/// A router over temporary slot directories
pub struct TestApp {
    pub router: Router,
    pub staging: StagingArea,
    pub remover: Arc<StubRemover>,
    _dir: TempDir,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_remover(StubRemover::default())
    }

    pub fn with_remover(remover: StubRemover) -> Self {
        let dir = TempDir::new().unwrap();
        let staging = StagingArea::new(dir.path().join("uploads"), dir.path().join("outputs"));
        staging.ensure_slots().unwrap();

        let remover = Arc::new(remover);
        let state = AppState::new(
            staging.clone(),
            remover.clone(),
            vec!["png".into(), "jpg".into(), "jpeg".into(), "gif".into()],
            1024 * 1024,
        );

        Self {
            router: create_app(state),
            staging,
            remover,
            _dir: dir,
        }
    }

    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.router.clone().oneshot(request).await.unwrap()
    }

    pub async fn get(&self, uri: &str) -> Response<Body> {
        self.send(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
    }

    pub async fn post_empty(&self, uri: &str) -> Response<Body> {
        self.send(
            Request::builder()
                .method("POST")
                .uri(uri)
                .body(Body::empty())
                .unwrap(),
        )
        .await
    }

    pub async fn upload(&self, filename: &str, bytes: &[u8]) -> Response<Body> {
        self.send(upload_request("file", Some(filename), bytes)).await
    }
}

/// Multipart `POST /upload` with a single part
pub fn upload_request(field: &str, filename: Option<&str>, bytes: &[u8]) -> Request<Body> {
    let disposition = match filename {
        Some(name) => format!("form-data; name=\"{field}\"; filename=\"{name}\""),
        None => format!("form-data; name=\"{field}\""),
    };

    let mut body = Vec::new();
    body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
    body.extend_from_slice(format!("Content-Disposition: {disposition}\r\n").as_bytes());
    body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
    body.extend_from_slice(bytes);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

    Request::builder()
        .method("POST")
        .uri("/upload")
        .header(
            "Content-Type",
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

/// Encoded test image with an opaque gradient
pub fn image_bytes(width: u32, height: u32, format: ImageFormat) -> Vec<u8> {
    let image = match format {
        ImageFormat::Jpeg => {
            let mut rgb = image::RgbImage::new(width, height);
            for (x, y, pixel) in rgb.enumerate_pixels_mut() {
                let intensity = ((x + y) % 200) as u8;
                *pixel = image::Rgb([intensity, 128, 255 - intensity]);
            }
            DynamicImage::ImageRgb8(rgb)
        },
        _ => {
            let mut rgba = RgbaImage::new(width, height);
            for (x, y, pixel) in rgba.enumerate_pixels_mut() {
                let intensity = ((x + y) % 200) as u8;
                *pixel = Rgba([intensity, 128, 255 - intensity, 255]);
            }
            DynamicImage::ImageRgba8(rgba)
        },
    };

    let mut buffer = Cursor::new(Vec::new());
    image.write_to(&mut buffer, format).unwrap();
    buffer.into_inner()
}

pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    response
        .into_body()
        .collect()
        .await
        .unwrap()
        .to_bytes()
        .to_vec()
}

pub async fn body_text(response: Response<Body>) -> String {
    String::from_utf8(body_bytes(response).await).unwrap()
}
