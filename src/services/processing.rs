//! Background removal of the staged upload

use crate::error::BgRemovalError;
use crate::remover::BackgroundRemover;
use crate::services::ImageIOService;
use crate::staging::{ProcessedArtifact, Slot, StagingArea};
use std::path::Path;
use thiserror::Error;
use tracing::{info, instrument};

#[derive(Debug, Error)]
pub enum ProcessingError {
    /// The incoming slot is empty
    #[error("No file uploaded")]
    NoFileUploaded,
    /// Decoding, removal, encoding or storage failed
    #[error("Background removal failed: {0}")]
    Removal(#[from] BgRemovalError),
}

/// Output name for an input file: `processed_<stem>.png`
///
/// The stem drops only the last extension, and a leading dot does not start one.
///
/// ```
/// use bgremove_server::services::processing::processed_name;
///
/// assert_eq!(processed_name("cat.jpg"), "processed_cat.png");
/// assert_eq!(processed_name("archive.tar.gif"), "processed_archive.tar.png");
/// ```
#[must_use]
pub fn processed_name(input: &str) -> String {
    let stem = Path::new(input)
        .file_stem()
        .map_or_else(|| input.to_string(), |s| s.to_string_lossy().into_owned());
    format!("processed_{stem}.png")
}

/// Remove the background of the incoming slot's occupant into the processed slot
///
/// The remover is not called when the incoming slot is empty.
///
/// # Errors
/// - [`ProcessingError::NoFileUploaded`] when there is nothing to process
/// - [`ProcessingError::Removal`] for any failure after that
#[instrument(skip_all, fields(remover = %remover.name()))]
pub async fn process(
    staging: &StagingArea,
    remover: &dyn BackgroundRemover,
) -> Result<ProcessedArtifact, ProcessingError> {
    let source = staging
        .first_occupant(Slot::Incoming)?
        .ok_or(ProcessingError::NoFileUploaded)?;

    let input_path = staging
        .locate(Slot::Incoming, &source)
        .ok_or_else(|| BgRemovalError::processing(format!("'{source}' is not a regular file")))?;

    let image = ImageIOService::load_image(&input_path)?;
    info!(source = %source, width = image.width(), height = image.height(), "🖼️  Processing upload");

    let output = remover.remove_background(image).await?;
    let png = ImageIOService::encode_png(&output)?;

    let file = staging.write(Slot::Processed, &processed_name(&source), &png)?;
    info!(output = %file.name, bytes = file.len, "✅ Processed image written");

    Ok(ProcessedArtifact { source, file })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_processed_name() {
        assert_eq!(processed_name("cat.jpg"), "processed_cat.png");
        assert_eq!(processed_name("dog.PNG"), "processed_dog.png");
        assert_eq!(processed_name("noext"), "processed_noext.png");
        assert_eq!(processed_name(".hidden"), "processed_.hidden.png");
        assert_eq!(processed_name("a.b.c.gif"), "processed_a.b.c.png");
    }
}
