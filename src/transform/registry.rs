//! Language dispatcher: routes a language tag to its transform.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::TransformConfig;
use crate::models::artifact::Artifact;
use crate::models::diagnostic::Diagnostic;
use crate::models::source::{LanguageFamily, LanguageTag};

use super::component::ComponentTransform;
use super::markup::{MarkupTransform, StyleTransform};
use super::script::ScriptTransform;
use super::typed::{TypedComponentTransform, TypedScriptTransform};
use super::{Transform, TransformContext, TransformFailure};

/// Failure message for known languages without an in-sandbox runtime.
pub const UNSUPPORTED_FOR_LIVE: &str = "unsupported for live execution";

/// Failure message for unrecognised tags.
pub const UNSUPPORTED_LANGUAGE: &str = "unsupported language";

/// Transform lookup keyed by normalized tag, falling back to the tag's
/// language family.
pub struct TransformRegistry {
    config: TransformConfig,
    by_tag: HashMap<String, Arc<dyn Transform>>,
    by_family: HashMap<LanguageFamily, Arc<dyn Transform>>,
}

impl std::fmt::Debug for TransformRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut tags: Vec<&String> = self.by_tag.keys().collect();
        tags.sort();
        f.debug_struct("TransformRegistry")
            .field("config", &self.config)
            .field("tags", &tags)
            .finish_non_exhaustive()
    }
}

impl Default for TransformRegistry {
    fn default() -> Self {
        Self::new(TransformConfig::default())
    }
}

impl TransformRegistry {
    /// Registry with the built-in transforms for every executable family.
    ///
    /// An invalid `root_element_id` is replaced by the default, since the
    /// component harness embeds it verbatim.
    #[must_use]
    pub fn new(mut config: TransformConfig) -> Self {
        if !config.root_element_id_is_valid() {
            warn!(
                root_element_id = %config.root_element_id,
                "registry: invalid root element id, using default"
            );
            config.root_element_id = TransformConfig::default().root_element_id;
        }
        let mut by_family: HashMap<LanguageFamily, Arc<dyn Transform>> = HashMap::new();
        by_family.insert(LanguageFamily::Script, Arc::new(ScriptTransform));
        by_family.insert(LanguageFamily::Markup, Arc::new(MarkupTransform));
        by_family.insert(LanguageFamily::Style, Arc::new(StyleTransform));
        by_family.insert(LanguageFamily::ComponentUi, Arc::new(ComponentTransform));
        by_family.insert(LanguageFamily::TypedScript, Arc::new(TypedScriptTransform));
        by_family.insert(
            LanguageFamily::TypedComponentUi,
            Arc::new(TypedComponentTransform),
        );
        Self {
            config,
            by_tag: HashMap::new(),
            by_family,
        }
    }

    /// Limits in effect.
    #[must_use]
    pub fn config(&self) -> &TransformConfig {
        &self.config
    }

    /// Register a transform for one tag, overriding any family default.
    pub fn register(&mut self, language_tag: &str, transform: Arc<dyn Transform>) {
        let tag = LanguageTag::new(language_tag);
        debug!(language = %tag, transform = transform.name(), "transform registry: registered");
        self.by_tag.insert(tag.as_str().to_owned(), transform);
    }

    /// Transform that would handle `language_tag`, if any.
    #[must_use]
    pub fn resolve(&self, language_tag: &LanguageTag) -> Option<Arc<dyn Transform>> {
        self.by_tag
            .get(language_tag.as_str())
            .or_else(|| self.by_family.get(&language_tag.family()))
            .cloned()
    }

    /// Dispatch `text` to the transform for `language_tag`.
    ///
    /// # Errors
    ///
    /// Returns a [`TransformFailure`] for unsupported languages, sources over
    /// `transform.max_source_bytes`, and transform failures. A panicking
    /// transform is reported as a failure rather than propagated.
    pub fn transform(
        &self,
        text: &str,
        language_tag: &LanguageTag,
    ) -> Result<Artifact, TransformFailure> {
        let Some(transform) = self.resolve(language_tag) else {
            return Err(match language_tag.family() {
                LanguageFamily::NoRuntime => {
                    TransformFailure::delegated(language_tag, UNSUPPORTED_FOR_LIVE)
                }
                LanguageFamily::Data => TransformFailure::new(
                    language_tag,
                    Diagnostic::transform(UNSUPPORTED_FOR_LIVE),
                ),
                _ => TransformFailure::new(
                    language_tag,
                    Diagnostic::transform(UNSUPPORTED_LANGUAGE),
                ),
            });
        };

        if text.len() > self.config.max_source_bytes {
            return Err(TransformFailure::new(
                language_tag,
                Diagnostic::transform(format!(
                    "source is {} bytes, over the {} byte transform limit",
                    text.len(),
                    self.config.max_source_bytes
                )),
            ));
        }

        let ctx = TransformContext {
            config: &self.config,
        };
        debug!(
            language = %language_tag,
            transform = transform.name(),
            bytes = text.len(),
            "transform registry: dispatching"
        );
        match catch_unwind(AssertUnwindSafe(|| {
            transform.transform(text, language_tag, &ctx)
        })) {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    language = %language_tag,
                    transform = transform.name(),
                    "transform registry: transform panicked"
                );
                Err(TransformFailure::new(
                    language_tag,
                    Diagnostic::transform("internal transform error"),
                ))
            }
        }
    }
}
