//! Serving slot contents by name

use crate::error::{BgRemovalError, Result};
use crate::staging::{Slot, StagingArea};
use std::path::Path;

/// File bytes ready to be sent
#[derive(Debug, Clone)]
pub struct Delivery {
    pub bytes: Vec<u8>,
    pub content_type: &'static str,
}

/// Content type inferred from a file name's extension
#[must_use]
pub fn content_type_for(name: &str) -> &'static str {
    let ext = Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);

    match ext.as_deref() {
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        _ => "application/octet-stream",
    }
}

/// Read a file out of a slot; `Ok(None)` when there is no such file
///
/// # Errors
/// - The file exists but cannot be read
pub async fn fetch(staging: &StagingArea, slot: Slot, name: &str) -> Result<Option<Delivery>> {
    let Some(path) = staging.locate(slot, name) else {
        return Ok(None);
    };

    match tokio::fs::read(&path).await {
        Ok(bytes) => Ok(Some(Delivery {
            bytes,
            content_type: content_type_for(name),
        })),
        // Removed between locate and read by a concurrent clear
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(BgRemovalError::file_io_error("read staged file", &path, &e)),
    }
}
