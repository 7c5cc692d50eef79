//! Markup checks: tag structure and comments.

use std::sync::OnceLock;

use regex::Regex;

use crate::lexer::LineIndex;
use crate::models::diagnostic::Diagnostic;

/// Elements that never have content or an end tag.
const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source",
    "track", "wbr",
];

/// Elements whose end tag may be omitted.
const OPTIONAL_END: &[&str] = &[
    "html", "head", "body", "p", "li", "dt", "dd", "option", "optgroup", "tr", "td", "th",
    "thead", "tbody", "tfoot", "colgroup", "rt", "rp",
];

/// Elements whose body is raw text.
const RAW_TEXT: &[&str] = &["script", "style"];

fn tag_pattern() -> Option<&'static Regex> {
    static TAG: OnceLock<Option<Regex>> = OnceLock::new();
    TAG.get_or_init(|| Regex::new(r"^<(/?)([A-Za-z][A-Za-z0-9:-]*)").ok())
        .as_ref()
}

struct Open {
    name: String,
    at: usize,
}

pub(super) fn check(text: &str, max_depth: usize) -> Vec<Diagnostic> {
    let Some(pattern) = tag_pattern() else {
        return Vec::new();
    };
    let index = LineIndex::new(text);
    let at = |message: String, offset: usize| {
        let (line, column) = index.position(offset);
        (message, line, column)
    };
    let mut found = Vec::new();
    let mut stack: Vec<Open> = Vec::new();
    let mut pos = 0;

    while let Some(rel) = text[pos..].find('<') {
        let start = pos + rel;
        let rest = &text[start..];

        if rest.starts_with("<!--") {
            match rest[4..].find("-->") {
                Some(end) => pos = start + 4 + end + 3,
                None => {
                    found.push((true, at("unterminated comment".into(), start)));
                    break;
                }
            }
            continue;
        }
        if rest.starts_with("<!") || rest.starts_with("<?") {
            pos = rest.find('>').map_or(text.len(), |end| start + end + 1);
            continue;
        }

        let Some(caps) = pattern.captures(rest) else {
            pos = start + 1;
            continue;
        };
        let closing = !caps[1].is_empty();
        let name = caps[2].to_ascii_lowercase();
        let Some(end) = tag_end(text, start + caps[0].len()) else {
            found.push((false, at(format!("unterminated tag `<{name}`"), start)));
            break;
        };
        pos = end;

        if closing {
            match stack.iter().rposition(|open| open.name == name) {
                Some(idx) => {
                    for open in stack.drain(idx + 1..) {
                        if !OPTIONAL_END.contains(&open.name.as_str()) {
                            found.push((
                                false,
                                at(format!("`<{}>` is never closed", open.name), open.at),
                            ));
                        }
                    }
                    stack.pop();
                }
                None if VOID_ELEMENTS.contains(&name.as_str()) => {}
                None => found.push((false, at(format!("stray closing tag `</{name}>`"), start))),
            }
            continue;
        }

        let self_closing = text[..end].ends_with("/>");
        if self_closing || VOID_ELEMENTS.contains(&name.as_str()) {
            continue;
        }

        if OPTIONAL_END.contains(&name.as_str())
            && stack.last().is_some_and(|open| open.name == name)
        {
            stack.pop();
        }
        if stack.len() >= max_depth {
            found.push((true, at(format!("nesting deeper than {max_depth} levels"), start)));
            break;
        }

        if RAW_TEXT.contains(&name.as_str()) {
            let needle = format!("</{name}");
            match text[end..].to_ascii_lowercase().find(&needle) {
                Some(close) => pos = end + close,
                None => {
                    found.push((true, at(format!("`<{name}>` element is never closed"), start)));
                    break;
                }
            }
        }
        stack.push(Open { name, at: start });
    }

    for open in &stack {
        if !OPTIONAL_END.contains(&open.name.as_str()) {
            found.push((false, at(format!("`<{}>` is never closed", open.name), open.at)));
        }
    }

    found
        .into_iter()
        .map(|(is_error, (message, line, column))| {
            let diag = if is_error {
                Diagnostic::error(message)
            } else {
                Diagnostic::warning(message)
            };
            diag.at(line, column)
        })
        .collect()
}

/// Offset one past the `>` ending a tag whose name ends at `from`, skipping
/// quoted attribute values.
fn tag_end(text: &str, from: usize) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut quote = None;
    for (i, &b) in bytes.iter().enumerate().skip(from) {
        match (quote, b) {
            (Some(q), _) if b == q => quote = None,
            (Some(_), _) => {}
            (None, b'"' | b'\'') => quote = Some(b),
            (None, b'>') => return Some(i + 1),
            _ => {}
        }
    }
    None
}
