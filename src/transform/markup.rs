//! Markup and stylesheet embedding.

use crate::models::artifact::Artifact;
use crate::models::source::LanguageTag;

use super::document::{build_document, style_element};
use super::{Transform, TransformContext, TransformFailure};

/// Embeds markup verbatim in the document body.
#[derive(Debug, Default, Clone, Copy)]
pub struct MarkupTransform;

impl Transform for MarkupTransform {
    fn name(&self) -> &'static str {
        "markup"
    }

    fn transform(
        &self,
        text: &str,
        language_tag: &LanguageTag,
        _ctx: &TransformContext<'_>,
    ) -> Result<Artifact, TransformFailure> {
        Ok(Artifact {
            language_tag: language_tag.clone(),
            executable_document: build_document("", text),
        })
    }
}

/// Places a stylesheet in a `<style>` element in the document head.
#[derive(Debug, Default, Clone, Copy)]
pub struct StyleTransform;

impl Transform for StyleTransform {
    fn name(&self) -> &'static str {
        "style"
    }

    fn transform(
        &self,
        text: &str,
        language_tag: &LanguageTag,
        _ctx: &TransformContext<'_>,
    ) -> Result<Artifact, TransformFailure> {
        Ok(Artifact {
            language_tag: language_tag.clone(),
            executable_document: build_document(&style_element(text), ""),
        })
    }
}
