//! Source units and language tags.

use std::fmt::{Display, Formatter};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How a language tag is handled by the validator and transform pipeline.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum LanguageFamily {
    /// Plain scripts executed as-is behind the console-capture shim.
    Script,
    /// Markup documents embedded in the document shell.
    Markup,
    /// Stylesheets embedded in the document shell.
    Style,
    /// Component-style UI source mounted by the component harness.
    ComponentUi,
    /// Statically-typed superset of the scripting language.
    TypedScript,
    /// Statically-typed component UI source.
    TypedComponentUi,
    /// Structured data; validated but never executed.
    Data,
    /// Known language with no in-sandbox runtime.
    NoRuntime,
    /// Unrecognised tag.
    Unknown,
}

/// A normalized, case-insensitive language tag.
///
/// The canonical form is lowercase and trimmed; aliases such as `js` and
/// `javascript` keep their spelling but resolve to the same family.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LanguageTag(String);

impl LanguageTag {
    /// Normalize a raw tag.
    #[must_use]
    pub fn new(raw: &str) -> Self {
        Self(raw.trim().to_ascii_lowercase())
    }

    /// Normalized tag text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Resolve the family this tag belongs to.
    #[must_use]
    pub fn family(&self) -> LanguageFamily {
        match self.0.as_str() {
            "script" | "js" | "javascript" | "mjs" | "cjs" => LanguageFamily::Script,
            "markup" | "html" | "htm" | "xhtml" => LanguageFamily::Markup,
            "css" | "style" | "styling" => LanguageFamily::Style,
            "component-ui" | "component" | "jsx" | "react" => LanguageFamily::ComponentUi,
            "typed-script" | "ts" | "typescript" | "mts" => LanguageFamily::TypedScript,
            "typed-component-ui" | "tsx" => LanguageFamily::TypedComponentUi,
            "json" | "data" => LanguageFamily::Data,
            "python" | "py" | "rust" | "rs" | "go" | "java" | "c" | "cpp" | "c++" | "csharp"
            | "c#" | "ruby" | "rb" | "php" | "kotlin" | "swift" | "bash" | "sh" | "shell"
            | "sql" => LanguageFamily::NoRuntime,
            _ => LanguageFamily::Unknown,
        }
    }

    /// Whether the tag uses `#` line comments instead of C-style comments.
    #[must_use]
    pub fn uses_hash_comments(&self) -> bool {
        matches!(
            self.0.as_str(),
            "python" | "py" | "ruby" | "rb" | "bash" | "sh" | "shell"
        )
    }
}

impl Display for LanguageTag {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for LanguageTag {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

/// User-authored code under preview. Caller-owned; never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceUnit {
    /// Caller-visible identifier.
    pub id: String,
    /// Declared source language.
    pub language_tag: LanguageTag,
    /// Source text.
    pub text: String,
    /// Optional path the source was loaded from; informational only.
    pub path: Option<PathBuf>,
}

impl SourceUnit {
    /// Construct a source unit with a generated identifier.
    #[must_use]
    pub fn new(text: impl Into<String>, language_tag: impl Into<LanguageTag>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            language_tag: language_tag.into(),
            text: text.into(),
            path: None,
        }
    }

    /// Attach the path the source was read from.
    #[must_use]
    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }
}
