//! Component-style UI transform.
//!
//! The source is scanned for a top-level component definition, module
//! syntax is rewritten so the code runs as a classic script, and the result
//! is wrapped in a mounting harness that renders the entry component into
//! the root element.

use crate::lexer::{tokenize, LexOptions, Token, TokenKind};
use crate::models::artifact::Artifact;
use crate::models::diagnostic::Diagnostic;
use crate::models::source::LanguageTag;

use super::document::{build_document, escape_end_tag};
use super::{Transform, TransformContext, TransformFailure};

/// Failure message when no entry component can be found.
pub const NO_ENTRY: &str = "no component export found";

/// Binding introduced for anonymous default exports.
const ANONYMOUS_ENTRY: &str = "__PreviewEntry";

/// Mounting harness. `__ENTRY__` and `__ROOT__` are substituted.
const MOUNT_HARNESS: &str = r#"(function () {
  var source = document.getElementById("preview-source").textContent;
  var compile = globalThis.__previewCompileJsx;
  if (typeof compile !== "function" && globalThis.Babel) {
    compile = function (code) {
      return globalThis.Babel.transform(code, { presets: ["react"] }).code;
    };
  }
  if (typeof compile !== "function") {
    throw new Error("component runtime unavailable: no JSX compiler in sandbox");
  }
  var Entry = new Function(compile(source) + "\nreturn __ENTRY__;")();
  var mount = document.getElementById("__ROOT__");
  var element = React.createElement(Entry);
  if (globalThis.ReactDOM && typeof ReactDOM.createRoot === "function") {
    ReactDOM.createRoot(mount).render(element);
  } else if (globalThis.ReactDOM) {
    ReactDOM.render(element, mount);
  } else {
    throw new Error("component runtime unavailable: no renderer in sandbox");
  }
})();"#;

/// A discovered entry component and the edits that make its module a
/// classic script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentEntry {
    /// Binding the harness mounts.
    pub name: String,
    rewrites: Vec<Rewrite>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Rewrite {
    start: usize,
    end: usize,
    /// `None` blanks the span.
    replacement: Option<&'static str>,
}

impl ComponentEntry {
    /// Apply the module rewrites to `src`.
    #[must_use]
    pub fn rewrite(&self, src: &str) -> String {
        let mut out = String::with_capacity(src.len() + 32);
        let mut cursor = 0;
        for rw in &self.rewrites {
            if rw.start < cursor {
                continue;
            }
            out.push_str(&src[cursor..rw.start]);
            match rw.replacement {
                Some(text) => out.push_str(text),
                None => out.extend(
                    src[rw.start..rw.end]
                        .chars()
                        .map(|c| if c == '\n' { '\n' } else { ' ' }),
                ),
            }
            cursor = rw.end;
        }
        out.push_str(&src[cursor..]);
        out
    }
}

/// Locate the component to mount.
///
/// Preference order: a default export, then the first capitalized named
/// export, then a top-level capitalized definition named `App`, then the
/// last top-level capitalized definition.
#[must_use]
pub fn find_entry(src: &str) -> Option<ComponentEntry> {
    let lexed = tokenize(
        src,
        LexOptions {
            jsx: true,
            hash_comments: false,
        },
    );
    let toks = lexed.significant();

    let mut depth = 0i32;
    let mut rewrites = Vec::new();
    let mut default_entry = None;
    let mut exported = None;
    let mut declared: Vec<&str> = Vec::new();

    let mut i = 0;
    while i < toks.len() {
        let t = toks[i];
        if t.kind == TokenKind::Punct {
            match t.text {
                "(" | "[" | "{" => depth += 1,
                ")" | "]" | "}" => depth -= 1,
                _ => {}
            }
            i += 1;
            continue;
        }
        let member = i > 0 && (toks[i - 1].is_punct(".") || toks[i - 1].is_punct("?."));
        if depth != 0 || t.kind != TokenKind::Ident || member {
            i += 1;
            continue;
        }

        match t.text {
            "import" if !is_punct_at(&toks, i + 1, "(") && !is_punct_at(&toks, i + 1, ".") => {
                let end = clause_end(&toks, i);
                rewrites.push(blank(&toks, i, end));
                i = end + 1;
                continue;
            }
            "export" if toks.get(i + 1).is_some_and(|n| n.is_ident("default")) => {
                let after = i + 2;
                if let Some(name) = declared_name(&toks, after) {
                    default_entry = Some(name);
                    rewrites.push(blank(&toks, i, i + 1));
                } else if let Some(name) = bare_reference(&toks, after) {
                    default_entry = Some(name);
                    let end = if is_punct_at(&toks, after + 1, ";") { after + 1 } else { after };
                    rewrites.push(blank(&toks, i, end));
                    i = end + 1;
                    continue;
                } else {
                    default_entry = Some(ANONYMOUS_ENTRY);
                    rewrites.push(Rewrite {
                        start: t.start,
                        end: toks[i + 1].end(),
                        replacement: Some("const __PreviewEntry ="),
                    });
                }
                i += 2;
                continue;
            }
            "export" if is_punct_at(&toks, i + 1, "{") || is_punct_at(&toks, i + 1, "*") => {
                let end = clause_end(&toks, i);
                rewrites.push(blank(&toks, i, end));
                i = end + 1;
                continue;
            }
            "export" => {
                rewrites.push(blank(&toks, i, i));
                if let Some(name) = declared_name(&toks, i + 1).filter(|n| is_component_name(n)) {
                    exported.get_or_insert(name);
                }
            }
            _ => {
                if let Some(name) = declared_name(&toks, i).filter(|n| is_component_name(n)) {
                    declared.push(name);
                }
            }
        }
        i += 1;
    }

    rewrites.sort_by_key(|rw| rw.start);
    let name = default_entry
        .or(exported)
        .or_else(|| declared.iter().copied().find(|n| *n == "App"))
        .or_else(|| declared.last().copied())?;

    Some(ComponentEntry {
        name: name.to_owned(),
        rewrites,
    })
}

fn is_punct_at(toks: &[Token<'_>], i: usize, p: &str) -> bool {
    toks.get(i).is_some_and(|t| t.is_punct(p))
}

fn is_component_name(name: &str) -> bool {
    name.starts_with(|c: char| c.is_ascii_uppercase())
}

fn blank(toks: &[Token<'_>], from: usize, to: usize) -> Rewrite {
    let to = to.min(toks.len().saturating_sub(1));
    Rewrite {
        start: toks[from].start,
        end: toks[to].end(),
        replacement: None,
    }
}

/// Name bound by a declaration starting at `i`: `function Name`,
/// `async function Name`, `class Name`, or `const|let|var Name =`.
fn declared_name<'a>(toks: &[Token<'a>], mut i: usize) -> Option<&'a str> {
    if toks.get(i)?.is_ident("async") {
        i += 1;
    }
    let head = toks.get(i)?;
    let mut name_at = i + 1;
    if head.is_ident("function") && is_punct_at(toks, name_at, "*") {
        name_at += 1;
    }
    let name = toks
        .get(name_at)
        .filter(|t| t.kind == TokenKind::Ident && t.text != "extends")?;
    match head.text {
        "function" | "class" if head.kind == TokenKind::Ident => Some(name.text),
        "const" | "let" | "var" if is_punct_at(toks, name_at + 1, "=") => Some(name.text),
        _ => None,
    }
}

/// `export default Name;` where `Name` is a plain identifier.
fn bare_reference<'a>(toks: &[Token<'a>], i: usize) -> Option<&'a str> {
    let t = toks.get(i).filter(|t| t.kind == TokenKind::Ident)?;
    if matches!(t.text, "function" | "class" | "async" | "new" | "await") {
        return None;
    }
    let ends = match toks.get(i + 1) {
        None => true,
        Some(next) => next.is_punct(";") || next.line > t.line,
    };
    ends.then_some(t.text)
}

/// Last token index of an import/export clause starting at `i`.
fn clause_end(toks: &[Token<'_>], i: usize) -> usize {
    let mut depth = 0i32;
    let mut k = i + 1;
    while k < toks.len() {
        let t = &toks[k];
        match t.kind {
            TokenKind::Punct if t.text == "{" => depth += 1,
            TokenKind::Punct if t.text == "}" => {
                depth -= 1;
                let closes_list = depth == 0 && !toks.get(k + 1).is_some_and(|n| n.is_ident("from"));
                if closes_list && toks[i].is_ident("export") {
                    return if is_punct_at(toks, k + 1, ";") { k + 1 } else { k };
                }
            }
            TokenKind::Punct if t.text == ";" && depth == 0 => return k,
            TokenKind::Str if depth == 0 => {
                let prev = &toks[k - 1];
                if prev.is_ident("from") || prev.is_ident("import") {
                    return if is_punct_at(toks, k + 1, ";") { k + 1 } else { k };
                }
            }
            _ => {}
        }
        k += 1;
    }
    toks.len().saturating_sub(1)
}

/// Component harness transform.
#[derive(Debug, Default, Clone, Copy)]
pub struct ComponentTransform;

impl Transform for ComponentTransform {
    fn name(&self) -> &'static str {
        "component-ui"
    }

    fn transform(
        &self,
        text: &str,
        language_tag: &LanguageTag,
        ctx: &TransformContext<'_>,
    ) -> Result<Artifact, TransformFailure> {
        let entry = find_entry(text).ok_or_else(|| {
            TransformFailure::new(language_tag, Diagnostic::transform(NO_ENTRY))
        })?;
        let code = entry.rewrite(text);
        let root = &ctx.config.root_element_id;
        let mount = MOUNT_HARNESS
            .replace("__ENTRY__", &entry.name)
            .replace("__ROOT__", root);

        let body = format!(
            "<div id=\"{root}\"></div>\n\
             <script type=\"text/x-preview-component\" id=\"preview-source\">\n{}\n</script>\n\
             <script>\n{mount}\n</script>",
            escape_end_tag(&code, "script"),
        );
        Ok(Artifact {
            language_tag: language_tag.clone(),
            executable_document: build_document("", &body),
        })
    }
}
