//! Executable artifacts produced by the transform pipeline.

use sha2::{Digest, Sha256};

use super::source::LanguageTag;

/// Transformed, self-contained executable form of a source unit.
///
/// Ephemeral: a new artifact is built for every generation and dropped once
/// it has been handed to a sandbox instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    /// Tag the artifact was produced from.
    pub language_tag: LanguageTag,
    /// Complete HTML document executed inside the isolation boundary.
    pub executable_document: String,
}

impl Artifact {
    /// Lowercase SHA-256 hex digest of the executable document.
    #[must_use]
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.executable_document.as_bytes());
        hasher
            .finalize()
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect()
    }
}
