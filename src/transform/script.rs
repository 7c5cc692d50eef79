//! Plain script pass-through.

use crate::models::artifact::Artifact;
use crate::models::source::LanguageTag;

use super::document::{build_document, script_element};
use super::{Transform, TransformContext, TransformFailure};

/// Wraps script source in the document shell unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct ScriptTransform;

impl Transform for ScriptTransform {
    fn name(&self) -> &'static str {
        "script"
    }

    fn transform(
        &self,
        text: &str,
        language_tag: &LanguageTag,
        _ctx: &TransformContext<'_>,
    ) -> Result<Artifact, TransformFailure> {
        Ok(Artifact {
            language_tag: language_tag.clone(),
            executable_document: build_document("", &script_element(text)),
        })
    }
}
