//! Explicit session state for the single-user pipeline
//!
//! The slot directories stay the source of truth for processing; this value
//! records what the last successful request left behind so the landing page
//! and health endpoint can report it.

use crate::staging::{ProcessedArtifact, StagedFile};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    #[default]
    Empty,
    Uploaded,
    Processed,
}

impl SessionState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Empty => "empty",
            SessionState::Uploaded => "uploaded",
            SessionState::Processed => "processed",
        }
    }
}

#[derive(Debug, Default)]
pub struct Session {
    state: SessionState,
    staged: Option<StagedFile>,
    artifact: Option<ProcessedArtifact>,
}

impl Session {
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    #[must_use]
    pub fn staged(&self) -> Option<&StagedFile> {
        self.staged.as_ref()
    }

    #[must_use]
    pub fn artifact(&self) -> Option<&ProcessedArtifact> {
        self.artifact.as_ref()
    }

    /// Landing visit: both slots were cleared
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// A new upload replaced whatever was staged before
    pub fn uploaded(&mut self, staged: StagedFile) {
        self.state = SessionState::Uploaded;
        self.staged = Some(staged);
        self.artifact = None;
    }

    /// Processing wrote a new artifact
    pub fn processed(&mut self, artifact: ProcessedArtifact) {
        self.state = SessionState::Processed;
        self.artifact = Some(artifact);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::staging::Slot;
    use std::path::PathBuf;

    fn staged(name: &str, slot: Slot) -> StagedFile {
        StagedFile {
            name: name.to_string(),
            len: 1,
            slot,
            path: PathBuf::from(name),
        }
    }

    #[test]
    fn test_transitions() {
        let mut session = Session::default();
        assert_eq!(session.state(), SessionState::Empty);

        session.uploaded(staged("cat.jpg", Slot::Incoming));
        assert_eq!(session.state(), SessionState::Uploaded);

        let artifact = ProcessedArtifact {
            source: "cat.jpg".to_string(),
            file: staged("processed_cat.png", Slot::Processed),
        };
        session.processed(artifact.clone());
        session.processed(artifact);
        assert_eq!(session.state(), SessionState::Processed);
        assert!(session.artifact().is_some());

        session.uploaded(staged("dog.png", Slot::Incoming));
        assert_eq!(session.state(), SessionState::Uploaded);
        assert!(session.artifact().is_none());
        assert_eq!(session.staged().map(|s| s.name.as_str()), Some("dog.png"));

        session.reset();
        assert_eq!(session.state(), SessionState::Empty);
        assert!(session.staged().is_none());
    }

    #[test]
    fn test_state_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&SessionState::Uploaded).unwrap(),
            "\"uploaded\""
        );
    }
}
