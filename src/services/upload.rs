//! Upload validation and staging

use crate::error::BgRemovalError;
use crate::staging::{Slot, StagedFile, StagingArea};
use thiserror::Error;
use tracing::{info, instrument};

/// Device names Windows refuses to open as regular files
const WINDOWS_DEVICE_FILES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "LPT1", "LPT2", "LPT3",
];

/// A file field pulled out of the multipart form
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub filename: String,
    pub bytes: Vec<u8>,
}

/// Reasons an upload is turned away without touching the slots
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UploadRejection {
    #[error("no file field in the submission")]
    MissingFile,
    #[error("empty filename")]
    EmptyFilename,
    #[error("extension of '{0}' is not allowed")]
    DisallowedExtension(String),
    #[error("filename '{0}' has no safe characters left")]
    UnsafeFilename(String),
}

#[derive(Debug, Error)]
pub enum UploadError {
    #[error(transparent)]
    Rejected(#[from] UploadRejection),
    #[error("failed to store upload: {0}")]
    Storage(#[from] BgRemovalError),
}

/// `true` if the text after the last `.` is in `allowed`, ignoring case
#[must_use]
pub fn is_allowed_file(filename: &str, allowed: &[String]) -> bool {
    filename.rsplit_once('.').is_some_and(|(_, ext)| {
        let ext = ext.to_ascii_lowercase();
        allowed.iter().any(|a| *a == ext)
    })
}

/// Reduce a client-supplied filename to a safe bare file name
///
/// Path separators turn into word breaks, non-ASCII characters are dropped,
/// whitespace runs become `_`, anything outside `[A-Za-z0-9_.-]` is removed
/// and leading or trailing `.`/`_` are stripped. Windows device names get a
/// `_` prefix. The result may be empty.
///
/// Accented letters are not decomposed first, so `héllo.png` becomes
/// `hllo.png` rather than werkzeug's `hello.png`.
///
/// ```
/// use bgremove_server::services::upload::secure_filename;
///
/// assert_eq!(secure_filename("My cool movie.mov"), "My_cool_movie.mov");
/// assert_eq!(secure_filename("../../../etc/passwd"), "etc_passwd");
/// ```
#[must_use]
pub fn secure_filename(filename: &str) -> String {
    let ascii: String = filename
        .chars()
        .filter(char::is_ascii)
        .map(|c| if c == '/' || c == '\\' { ' ' } else { c })
        .collect();

    let joined = ascii.split_whitespace().collect::<Vec<_>>().join("_");
    let cleaned: String = joined
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
        .collect();
    let trimmed = cleaned.trim_matches(|c| c == '.' || c == '_');

    let stem = trimmed.split('.').next().unwrap_or_default();
    if !trimmed.is_empty()
        && WINDOWS_DEVICE_FILES
            .iter()
            .any(|device| device.eq_ignore_ascii_case(stem))
    {
        return format!("_{trimmed}");
    }
    trimmed.to_string()
}

/// Check a submission and return the name it will be stored under
///
/// # Errors
/// - Any [`UploadRejection`]
pub fn validate(upload: Option<&UploadedFile>, allowed: &[String]) -> Result<String, UploadRejection> {
    let upload = upload.ok_or(UploadRejection::MissingFile)?;
    if upload.filename.is_empty() {
        return Err(UploadRejection::EmptyFilename);
    }
    if !is_allowed_file(&upload.filename, allowed) {
        return Err(UploadRejection::DisallowedExtension(upload.filename.clone()));
    }

    let name = secure_filename(&upload.filename);
    if name.is_empty() {
        return Err(UploadRejection::UnsafeFilename(upload.filename.clone()));
    }
    Ok(name)
}

/// Validate, clear both slots, then store the file in the incoming slot
///
/// Nothing is cleared when validation fails.
///
/// # Errors
/// - [`UploadError::Rejected`] on validation failure
/// - [`UploadError::Storage`] if the write fails
#[instrument(skip_all, fields(filename = upload.map(|u| u.filename.as_str())))]
pub fn accept(
    staging: &StagingArea,
    upload: Option<&UploadedFile>,
    allowed: &[String],
) -> Result<StagedFile, UploadError> {
    let name = validate(upload, allowed)?;
    let bytes = upload.map(|u| u.bytes.as_slice()).unwrap_or_default();

    let report = staging.clear_all_slots();
    if !report.is_clean() {
        tracing::warn!(failures = report.failures.len(), "clearing slots before upload was incomplete");
    }

    let staged = staging.write(Slot::Incoming, &name, bytes)?;
    info!(name = %staged.name, bytes = staged.len, "📥 Upload staged");
    Ok(staged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_ALLOWED_EXTENSIONS;

    fn allowed() -> Vec<String> {
        DEFAULT_ALLOWED_EXTENSIONS.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn test_allowed_extensions_ignore_case() {
        let allowed = allowed();
        assert!(is_allowed_file("cat.PNG", &allowed));
        assert!(is_allowed_file("cat.Jpeg", &allowed));
        assert!(is_allowed_file("archive.tar.gif", &allowed));
        assert!(!is_allowed_file("cat.bmp", &allowed));
        assert!(!is_allowed_file("png", &allowed));
        assert!(!is_allowed_file("cat.", &allowed));
        assert!(!is_allowed_file("cat.png.exe", &allowed));
    }

    #[test]
    fn test_secure_filename() {
        assert_eq!(secure_filename("cat.jpg"), "cat.jpg");
        assert_eq!(secure_filename("My cool  photo.png"), "My_cool_photo.png");
        assert_eq!(secure_filename("../../../etc/passwd"), "etc_passwd");
        assert_eq!(secure_filename("C:\\Users\\me\\pic.gif"), "C_Users_me_pic.gif");
        assert_eq!(secure_filename("héllo wörld.png"), "hllo_wrld.png");
        assert_eq!(secure_filename("  .hidden.png"), "hidden.png");
        assert_eq!(secure_filename("a$b%c.jpeg"), "abc.jpeg");
        assert_eq!(secure_filename("con.png"), "_con.png");
        assert_eq!(secure_filename("日本.png"), "png");
        assert_eq!(secure_filename("..."), "");
    }

    #[test]
    fn test_validate_order() {
        let allowed = allowed();
        assert_eq!(validate(None, &allowed), Err(UploadRejection::MissingFile));

        let upload = |name: &str| UploadedFile {
            filename: name.to_string(),
            bytes: vec![1],
        };
        assert_eq!(
            validate(Some(&upload("")), &allowed),
            Err(UploadRejection::EmptyFilename)
        );
        assert_eq!(
            validate(Some(&upload("notes.txt")), &allowed),
            Err(UploadRejection::DisallowedExtension("notes.txt".to_string()))
        );
        assert_eq!(
            validate(Some(&upload("/.png")), &allowed),
            Ok("png".to_string())
        );
        assert_eq!(
            validate(Some(&upload("__.png")), &allowed),
            Ok("png".to_string())
        );
        assert_eq!(
            validate(Some(&upload("Cat Photo.JPG")), &allowed),
            Ok("Cat_Photo.JPG".to_string())
        );

        let accented = vec!["é".to_string()];
        assert_eq!(
            validate(Some(&upload("é.é")), &accented),
            Err(UploadRejection::UnsafeFilename("é.é".to_string()))
        );
    }
}
