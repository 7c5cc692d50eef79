//! Fast, best-effort, non-executing source diagnostics.
//!
//! Validation is pure and synchronous. It never compiles anything and never
//! fails: oversize sources are skipped with a warning, and an internal
//! failure of one of the checkers becomes a single diagnostic.

mod markup;
mod script;
mod style;

use std::panic::{catch_unwind, AssertUnwindSafe};

use serde::de::IgnoredAny;
use serde::Serialize;
use tracing::warn;

use crate::config::ValidatorConfig;
use crate::lexer::LexOptions;
use crate::models::diagnostic::Diagnostic;
use crate::models::source::{LanguageFamily, LanguageTag};

use script::Dialect;

/// Outcome of validating one source text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Validation {
    /// `false` iff at least one error-severity diagnostic exists.
    pub valid: bool,
    /// Diagnostics in source order per checker.
    pub diagnostics: Vec<Diagnostic>,
}

impl Validation {
    fn from_diagnostics(diagnostics: Vec<Diagnostic>) -> Self {
        Self {
            valid: !diagnostics.iter().any(Diagnostic::is_error),
            diagnostics,
        }
    }

    /// Error-severity diagnostics.
    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter().filter(|d| d.is_error())
    }
}

/// Validate `text` as `language_tag` with default limits.
#[must_use]
pub fn validate(text: &str, language_tag: &str) -> Validation {
    validate_with(text, &LanguageTag::new(language_tag), &ValidatorConfig::default())
}

/// Validate `text` as `language_tag` with explicit limits.
#[must_use]
pub fn validate_with(
    text: &str,
    language_tag: &LanguageTag,
    config: &ValidatorConfig,
) -> Validation {
    if text.len() > config.max_source_bytes {
        return Validation::from_diagnostics(vec![Diagnostic::warning(format!(
            "source is {} bytes; validation skipped above {} bytes",
            text.len(),
            config.max_source_bytes
        ))]);
    }

    let outcome = catch_unwind(AssertUnwindSafe(|| run_checks(text, language_tag, config)));
    match outcome {
        Ok(diagnostics) => Validation::from_diagnostics(diagnostics),
        Err(_) => {
            warn!(language = %language_tag, "validator: checker panicked");
            Validation::from_diagnostics(vec![Diagnostic::warning(
                "validator failed internally; diagnostics unavailable",
            )])
        }
    }
}

fn run_checks(text: &str, language_tag: &LanguageTag, config: &ValidatorConfig) -> Vec<Diagnostic> {
    let depth = config.max_nesting_depth;
    match language_tag.family() {
        LanguageFamily::Script => script::check(text, Dialect::default(), depth),
        LanguageFamily::TypedScript => script::check(
            text,
            Dialect {
                typed: true,
                ..Dialect::default()
            },
            depth,
        ),
        LanguageFamily::ComponentUi => script::check(
            text,
            Dialect {
                jsx: true,
                component: true,
                ..Dialect::default()
            },
            depth,
        ),
        LanguageFamily::TypedComponentUi => script::check(
            text,
            Dialect {
                jsx: true,
                component: true,
                typed: true,
                ..Dialect::default()
            },
            depth,
        ),
        LanguageFamily::Markup => markup::check(text, depth),
        LanguageFamily::Style => style::check(text, depth),
        LanguageFamily::Data => check_json(text),
        LanguageFamily::NoRuntime => match foreign_dialect(language_tag) {
            Some(options) => script::check(
                text,
                Dialect {
                    hash_comments: options.hash_comments,
                    ..Dialect::default()
                },
                depth,
            ),
            None => Vec::new(),
        },
        LanguageFamily::Unknown => Vec::new(),
    }
}

/// Lexer settings for languages checked for bracket balance only.
///
/// Languages whose syntax defeats a C-style or hash-comment tokenizer
/// (lifetimes, `--` comments, unbalanced `case` patterns) are skipped.
fn foreign_dialect(language_tag: &LanguageTag) -> Option<LexOptions> {
    match language_tag.as_str() {
        "rust" | "rs" | "sql" | "bash" | "sh" | "shell" => None,
        _ => Some(LexOptions {
            jsx: false,
            hash_comments: language_tag.uses_hash_comments(),
        }),
    }
}

fn check_json(text: &str) -> Vec<Diagnostic> {
    match serde_json::from_str::<IgnoredAny>(text) {
        Ok(_) => Vec::new(),
        Err(err) => {
            let full = err.to_string();
            let message = full
                .rsplit_once(" at line ")
                .map_or(full.as_str(), |(head, _)| head);
            let line = u32::try_from(err.line().max(1)).unwrap_or(u32::MAX);
            let column = u32::try_from(err.column().max(1)).unwrap_or(u32::MAX);
            vec![Diagnostic::error(message).at(line, column)]
        }
    }
}
