//! Single-slot filesystem staging
//!
//! Two directories act as slots: `Incoming` holds the uploaded image and
//! `Processed` holds the background-removed result. Each slot is expected to
//! hold at most one file; the protocol clears both slots before every new
//! upload and on every landing visit.

use crate::error::{BgRemovalError, Result};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// A staging slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    Incoming,
    Processed,
}

impl Slot {
    pub const ALL: [Slot; 2] = [Slot::Incoming, Slot::Processed];
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Slot::Incoming => write!(f, "incoming"),
            Slot::Processed => write!(f, "processed"),
        }
    }
}

/// A file written into a slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedFile {
    pub name: String,
    pub len: u64,
    pub slot: Slot,
    pub path: PathBuf,
}

/// Background-removed output derived from one staged upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessedArtifact {
    /// Name of the incoming file it was produced from
    pub source: String,
    pub file: StagedFile,
}

/// One entry that could not be removed while clearing a slot
#[derive(Debug)]
pub struct CleanupFailure {
    pub path: PathBuf,
    pub error: std::io::Error,
}

impl fmt::Display for CleanupFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Failed to delete {}: {}", self.path.display(), self.error)
    }
}

/// Outcome of a best-effort clear
#[derive(Debug, Default)]
pub struct CleanupReport {
    pub removed: usize,
    pub failures: Vec<CleanupFailure>,
}

impl CleanupReport {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    fn merge(&mut self, other: CleanupReport) {
        self.removed += other.removed;
        self.failures.extend(other.failures);
    }
}

/// Owner of the two slot directories
#[derive(Debug, Clone)]
pub struct StagingArea {
    incoming_dir: PathBuf,
    processed_dir: PathBuf,
}

impl StagingArea {
    pub fn new<P: Into<PathBuf>, Q: Into<PathBuf>>(incoming_dir: P, processed_dir: Q) -> Self {
        Self {
            incoming_dir: incoming_dir.into(),
            processed_dir: processed_dir.into(),
        }
    }

    #[must_use]
    pub fn slot_dir(&self, slot: Slot) -> &Path {
        match slot {
            Slot::Incoming => &self.incoming_dir,
            Slot::Processed => &self.processed_dir,
        }
    }

    /// Create both slot directories if missing
    ///
    /// # Errors
    /// - A directory cannot be created
    pub fn ensure_slots(&self) -> Result<()> {
        for slot in Slot::ALL {
            let dir = self.slot_dir(slot);
            fs::create_dir_all(dir)
                .map_err(|e| BgRemovalError::file_io_error("create slot directory", dir, &e))?;
            debug!(%slot, dir = %dir.display(), "slot ready");
        }
        Ok(())
    }

    /// Remove every entry of a slot, continuing past individual failures
    pub fn clear_slot(&self, slot: Slot) -> CleanupReport {
        let dir = self.slot_dir(slot);
        let mut report = CleanupReport::default();

        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(error) => {
                warn!(%slot, dir = %dir.display(), %error, "cannot list slot for cleanup");
                report.failures.push(CleanupFailure {
                    path: dir.to_path_buf(),
                    error,
                });
                return report;
            },
        };

        for entry in entries {
            let path = match entry {
                Ok(entry) => entry.path(),
                Err(error) => {
                    warn!(%slot, %error, "cannot read slot entry");
                    report.failures.push(CleanupFailure {
                        path: dir.to_path_buf(),
                        error,
                    });
                    continue;
                },
            };

            match remove_entry(&path) {
                Ok(()) => report.removed += 1,
                Err(error) => {
                    let failure = CleanupFailure { path, error };
                    warn!(%slot, "{failure}");
                    report.failures.push(failure);
                },
            }
        }

        report
    }

    /// Clear both slots
    pub fn clear_all_slots(&self) -> CleanupReport {
        let mut report = CleanupReport::default();
        for slot in Slot::ALL {
            report.merge(self.clear_slot(slot));
        }
        debug!(
            removed = report.removed,
            failures = report.failures.len(),
            "slots cleared"
        );
        report
    }

    /// Entry names of a slot in sorted order
    ///
    /// # Errors
    /// - Slot directory cannot be listed
    pub fn occupants(&self, slot: Slot) -> Result<Vec<String>> {
        let dir = self.slot_dir(slot);
        let entries = fs::read_dir(dir)
            .map_err(|e| BgRemovalError::file_io_error("list slot directory", dir, &e))?;

        let mut names: Vec<String> = entries
            .filter_map(std::result::Result::ok)
            .filter_map(|entry| entry.file_name().into_string().ok())
            .collect();
        names.sort();
        Ok(names)
    }

    /// First entry of a slot in sorted order, `None` when empty
    ///
    /// # Errors
    /// - Slot directory cannot be listed
    pub fn first_occupant(&self, slot: Slot) -> Result<Option<String>> {
        Ok(self.occupants(slot)?.into_iter().next())
    }

    /// Path of a regular file named `name` inside the slot
    ///
    /// Anything that is not a bare file name resolves to `None`.
    #[must_use]
    pub fn locate(&self, slot: Slot, name: &str) -> Option<PathBuf> {
        if !is_bare_file_name(name) {
            return None;
        }
        let path = self.slot_dir(slot).join(name);
        path.is_file().then_some(path)
    }

    /// Write `bytes` into the slot under `name`
    ///
    /// # Errors
    /// - `name` is not a bare file name
    /// - Write failure
    pub fn write(&self, slot: Slot, name: &str, bytes: &[u8]) -> Result<StagedFile> {
        if !is_bare_file_name(name) {
            return Err(BgRemovalError::invalid_config(format!(
                "Refusing to stage file with unsafe name '{name}'"
            )));
        }

        let path = self.slot_dir(slot).join(name);
        fs::write(&path, bytes)
            .map_err(|e| BgRemovalError::file_io_error("write staged file", &path, &e))?;

        debug!(%slot, name, bytes = bytes.len(), "file staged");
        Ok(StagedFile {
            name: name.to_string(),
            len: bytes.len() as u64,
            slot,
            path,
        })
    }
}

fn remove_entry(path: &Path) -> std::io::Result<()> {
    // symlink_metadata so a link to a directory is unlinked, not followed
    let metadata = fs::symlink_metadata(path)?;
    if metadata.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
}

fn is_bare_file_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', '\0'])
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn staging() -> (TempDir, StagingArea) {
        let dir = TempDir::new().unwrap();
        let area = StagingArea::new(dir.path().join("uploads"), dir.path().join("outputs"));
        area.ensure_slots().unwrap();
        (dir, area)
    }

    #[test]
    fn test_ensure_slots_is_idempotent() {
        let (_dir, area) = staging();
        area.ensure_slots().unwrap();
        assert!(area.slot_dir(Slot::Incoming).is_dir());
        assert!(area.slot_dir(Slot::Processed).is_dir());
    }

    #[test]
    fn test_clear_removes_files_and_directories() {
        let (_dir, area) = staging();
        area.write(Slot::Incoming, "a.png", b"a").unwrap();
        area.write(Slot::Processed, "processed_a.png", b"b").unwrap();
        let nested = area.slot_dir(Slot::Incoming).join("nested");
        fs::create_dir_all(nested.join("deeper")).unwrap();
        fs::write(nested.join("deeper/file"), b"x").unwrap();

        let report = area.clear_all_slots();
        assert!(report.is_clean());
        assert_eq!(report.removed, 3);
        assert!(area.occupants(Slot::Incoming).unwrap().is_empty());
        assert!(area.occupants(Slot::Processed).unwrap().is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_clear_unlinks_symlinks_without_following() {
        let (dir, area) = staging();
        let outside = dir.path().join("keep");
        fs::create_dir_all(&outside).unwrap();
        fs::write(outside.join("precious"), b"x").unwrap();
        std::os::unix::fs::symlink(&outside, area.slot_dir(Slot::Incoming).join("link")).unwrap();

        let report = area.clear_slot(Slot::Incoming);
        assert!(report.is_clean());
        assert!(outside.join("precious").exists());
        assert!(area.first_occupant(Slot::Incoming).unwrap().is_none());
    }

    #[cfg(unix)]
    #[test]
    fn test_clear_continues_past_failing_entry() {
        use std::os::unix::fs::PermissionsExt;

        let (_dir, area) = staging();
        area.write(Slot::Incoming, "a.png", b"a").unwrap();
        area.write(Slot::Incoming, "z.png", b"z").unwrap();
        let locked = area.slot_dir(Slot::Incoming).join("locked");
        fs::create_dir_all(&locked).unwrap();
        fs::write(locked.join("inner"), b"x").unwrap();
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o555)).unwrap();

        // Permission bits do not bind root
        if fs::write(locked.join("writable"), b"x").is_ok() {
            fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();
            return;
        }

        let report = area.clear_slot(Slot::Incoming);
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();

        assert_eq!(report.removed, 2);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].path, locked);
        assert!(!report.is_clean());
        assert_eq!(area.occupants(Slot::Incoming).unwrap(), vec!["locked"]);
    }

    #[test]
    fn test_clear_missing_slot_reports_failure() {
        let dir = TempDir::new().unwrap();
        let area = StagingArea::new(dir.path().join("nope"), dir.path().join("outputs"));
        let report = area.clear_slot(Slot::Incoming);
        assert_eq!(report.removed, 0);
        assert_eq!(report.failures.len(), 1);
    }

    #[test]
    fn test_first_occupant_is_sorted() {
        let (_dir, area) = staging();
        assert_eq!(area.first_occupant(Slot::Incoming).unwrap(), None);

        area.write(Slot::Incoming, "zebra.png", b"z").unwrap();
        area.write(Slot::Incoming, "apple.png", b"a").unwrap();
        assert_eq!(
            area.first_occupant(Slot::Incoming).unwrap().as_deref(),
            Some("apple.png")
        );
        assert_eq!(
            area.occupants(Slot::Incoming).unwrap(),
            vec!["apple.png", "zebra.png"]
        );
    }

    #[test]
    fn test_locate_rejects_traversal() {
        let (_dir, area) = staging();
        area.write(Slot::Incoming, "cat.png", b"meow").unwrap();
        fs::create_dir_all(area.slot_dir(Slot::Incoming).join("sub")).unwrap();

        assert!(area.locate(Slot::Incoming, "cat.png").is_some());
        assert!(area.locate(Slot::Processed, "cat.png").is_none());
        assert!(area.locate(Slot::Incoming, "../uploads/cat.png").is_none());
        assert!(area.locate(Slot::Incoming, "..").is_none());
        assert!(area.locate(Slot::Incoming, "sub").is_none());
        assert!(area.locate(Slot::Incoming, "").is_none());
    }

    #[test]
    fn test_write_reports_staged_file() {
        let (_dir, area) = staging();
        let staged = area.write(Slot::Incoming, "cat.jpg", b"12345").unwrap();
        assert_eq!(staged.len, 5);
        assert_eq!(staged.slot, Slot::Incoming);
        assert_eq!(fs::read(&staged.path).unwrap(), b"12345");
        assert!(area.write(Slot::Incoming, "a/b.jpg", b"x").is_err());
    }
}
