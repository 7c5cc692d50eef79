//! Stylesheet checks: brace balance, comments, strings.

use crate::lexer::LineIndex;
use crate::models::diagnostic::Diagnostic;

pub(super) fn check(text: &str, max_depth: usize) -> Vec<Diagnostic> {
    let index = LineIndex::new(text);
    let error = |message: String, offset: usize| {
        let (line, column) = index.position(offset);
        Diagnostic::error(message).at(line, column)
    };

    let bytes = text.as_bytes();
    let mut diagnostics = Vec::new();
    let mut opens: Vec<usize> = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'/' if bytes.get(i + 1) == Some(&b'*') => match text[i + 2..].find("*/") {
                Some(rel) => i += 2 + rel + 2,
                None => {
                    diagnostics.push(error("unterminated comment".into(), i));
                    return diagnostics;
                }
            },
            quote @ (b'"' | b'\'') => {
                let start = i;
                i += 1;
                loop {
                    match bytes.get(i) {
                        Some(b'\\') => i += 2,
                        Some(&b) if b == quote => {
                            i += 1;
                            break;
                        }
                        Some(b'\n') | None => {
                            diagnostics.push(error("unterminated string".into(), start));
                            break;
                        }
                        Some(_) => i += 1,
                    }
                }
            }
            b'{' => {
                if opens.len() >= max_depth {
                    diagnostics.push(error(format!("nesting deeper than {max_depth} levels"), i));
                    return diagnostics;
                }
                opens.push(i);
                i += 1;
            }
            b'}' => {
                if opens.pop().is_none() {
                    diagnostics.push(error("unmatched `}`".into(), i));
                    return diagnostics;
                }
                i += 1;
            }
            _ => i += 1,
        }
    }

    if let Some(&open) = opens.last() {
        diagnostics.push(error("unclosed `{`".into(), open));
    }
    diagnostics
}
