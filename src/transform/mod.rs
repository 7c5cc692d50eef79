//! Transform pipeline: source text to self-contained executable artifact.
//!
//! Transforms are pure and deterministic. Identical `(text, language_tag)`
//! input always yields a byte-identical [`Artifact`]; nothing time- or
//! randomness-dependent is ever embedded.

pub mod component;
pub mod document;
pub mod markup;
pub mod registry;
pub mod script;
pub mod typed;

use std::fmt::{Display, Formatter};
use std::sync::OnceLock;

use crate::config::TransformConfig;
use crate::models::artifact::Artifact;
use crate::models::diagnostic::Diagnostic;
use crate::models::source::LanguageTag;

pub use registry::TransformRegistry;

/// Per-call inputs shared by every transform.
#[derive(Debug, Clone, Copy)]
pub struct TransformContext<'a> {
    /// Pipeline limits and document-shell settings.
    pub config: &'a TransformConfig,
}

/// One language-specific transform.
pub trait Transform: Send + Sync {
    /// Short identifier used in logs.
    fn name(&self) -> &'static str;

    /// Produce an executable artifact from `text`.
    ///
    /// # Errors
    ///
    /// Returns a [`TransformFailure`] when the source cannot be prepared.
    fn transform(
        &self,
        text: &str,
        language_tag: &LanguageTag,
        ctx: &TransformContext<'_>,
    ) -> Result<Artifact, TransformFailure>;
}

/// Transform failure. Fatal to one generation only; never raised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformFailure {
    /// Tag that was being transformed.
    pub language_tag: LanguageTag,
    /// Transform-sourced diagnostics; never empty.
    pub diagnostics: Vec<Diagnostic>,
    /// The language has no in-sandbox runtime and may be handed to an
    /// external executor.
    pub delegate_external: bool,
}

impl TransformFailure {
    /// Failure carrying a single diagnostic.
    #[must_use]
    pub fn new(language_tag: &LanguageTag, diagnostic: Diagnostic) -> Self {
        Self {
            language_tag: language_tag.clone(),
            diagnostics: vec![diagnostic],
            delegate_external: false,
        }
    }

    /// Failure for a language that must run outside the sandbox.
    #[must_use]
    pub fn delegated(language_tag: &LanguageTag, message: &str) -> Self {
        Self {
            delegate_external: true,
            ..Self::new(language_tag, Diagnostic::transform(message))
        }
    }

    /// Message of the first diagnostic.
    #[must_use]
    pub fn message(&self) -> &str {
        self.diagnostics
            .first()
            .map_or("transform failed", |d| d.message.as_str())
    }
}

impl Display for TransformFailure {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.language_tag, self.message())
    }
}

impl std::error::Error for TransformFailure {}

/// Transform `text` with the built-in registry and default limits.
///
/// # Errors
///
/// Returns a [`TransformFailure`] for unsupported languages, oversize
/// sources, and sources a transform cannot prepare.
pub fn transform(text: &str, language_tag: &str) -> Result<Artifact, TransformFailure> {
    static DEFAULT: OnceLock<TransformRegistry> = OnceLock::new();
    DEFAULT
        .get_or_init(TransformRegistry::default)
        .transform(text, &LanguageTag::new(language_tag))
}
