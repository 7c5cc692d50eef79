//! Script-family checks: literals, bracket balance, and family warnings.

use crate::lexer::{tokenize, LexOptions, Token, TokenKind};
use crate::models::diagnostic::Diagnostic;
use crate::transform::component::{find_entry, NO_ENTRY};

/// Which script dialect is being checked.
#[derive(Debug, Clone, Copy, Default)]
pub(super) struct Dialect {
    pub jsx: bool,
    pub typed: bool,
    pub component: bool,
    pub hash_comments: bool,
}

pub(super) fn check(text: &str, dialect: Dialect, max_depth: usize) -> Vec<Diagnostic> {
    let lexed = tokenize(
        text,
        LexOptions {
            jsx: dialect.jsx,
            hash_comments: dialect.hash_comments,
        },
    );
    let mut diagnostics: Vec<Diagnostic> = lexed
        .issues
        .iter()
        .map(|issue| Diagnostic::error(issue.message.clone()).at(issue.line, issue.column))
        .collect();

    let tokens = lexed.significant();
    // An unterminated literal swallows the brackets after it.
    if diagnostics.is_empty() {
        diagnostics.extend(check_brackets(&tokens, max_depth));
    }

    if dialect.typed {
        diagnostics.extend(enum_warnings(&tokens));
    }

    if dialect.component && diagnostics.iter().all(|d| !d.is_error()) && find_entry(text).is_none()
    {
        diagnostics.push(Diagnostic::warning(NO_ENTRY));
    }

    diagnostics
}

fn closer_for(open: &str) -> &'static str {
    match open {
        "(" => ")",
        "[" => "]",
        _ => "}",
    }
}

/// Report the first bracket problem: a mismatched or unmatched closer, the
/// innermost unclosed opener, or nesting past `max_depth`.
fn check_brackets(tokens: &[Token<'_>], max_depth: usize) -> Option<Diagnostic> {
    let mut stack: Vec<&Token<'_>> = Vec::new();
    for token in tokens.iter().filter(|t| t.kind == TokenKind::Punct) {
        match token.text {
            "(" | "[" | "{" => {
                if stack.len() >= max_depth {
                    return Some(
                        Diagnostic::error(format!("nesting deeper than {max_depth} levels"))
                            .at(token.line, token.column),
                    );
                }
                stack.push(token);
            }
            ")" | "]" | "}" => match stack.pop() {
                Some(open) if closer_for(open.text) == token.text => {}
                Some(open) => {
                    return Some(
                        Diagnostic::error(format!(
                            "mismatched `{}`: expected `{}` to close `{}` from line {}",
                            token.text,
                            closer_for(open.text),
                            open.text,
                            open.line
                        ))
                        .at(token.line, token.column),
                    );
                }
                None => {
                    return Some(
                        Diagnostic::error(format!("unmatched `{}`", token.text))
                            .at(token.line, token.column),
                    );
                }
            },
            _ => {}
        }
    }
    stack.last().map(|open| {
        Diagnostic::error(format!("unclosed `{}`", open.text)).at(open.line, open.column)
    })
}

fn enum_warnings(tokens: &[Token<'_>]) -> Vec<Diagnostic> {
    tokens
        .iter()
        .enumerate()
        .filter(|(i, t)| {
            t.is_ident("enum")
                && tokens.get(i + 1).is_some_and(|n| n.kind == TokenKind::Ident)
                && (*i == 0 || !tokens[i - 1].is_punct("."))
        })
        .map(|(_, t)| {
            Diagnostic::warning("enum declarations are not erased; use a const object instead")
                .at(t.line, t.column)
        })
        .collect()
}
