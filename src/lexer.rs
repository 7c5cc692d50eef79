//! Tokenizer shared by the source validator and the transform pipeline.
//!
//! Understands just enough script syntax to find brackets, declarations and
//! literals reliably without parsing: string, template and regex literals,
//! comments, and (optionally) JSX elements. Each lexeme is recognised by a
//! small chumsky parser; a mode stack picks which one applies, since whether
//! `/` starts a regex or `<` starts an element depends on the previous token.
//! It never fails; problems such as an unterminated string are recorded as
//! [`LexIssue`]s and lexing resumes at the next line.

use chumsky::prelude::*;
use chumsky::Boxed;

/// Multi-character punctuators, longest first. `?.` is matched separately.
const PUNCTUATORS: [&str; 32] = [
    ">>>=", "...", "===", "!==", "**=", "<<=", ">>=", ">>>", "&&=", "||=", "??=", "=>", "==",
    "!=", "<=", ">=", "&&", "||", "??", "++", "--", "+=", "-=", "*=", "/=", "%=", "&=",
    "|=", "^=", "**", "<<", ">>",
];

/// Keywords after which an expression (regex literal, JSX element) may start.
const EXPRESSION_KEYWORDS: &[&str] = &[
    "return",
    "typeof",
    "instanceof",
    "in",
    "of",
    "new",
    "delete",
    "void",
    "throw",
    "case",
    "do",
    "else",
    "yield",
    "await",
    "default",
];

/// Token classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// Identifier or keyword.
    Ident,
    /// Numeric literal.
    Number,
    /// Quoted string literal.
    Str,
    /// Template literal, including any `${...}` parts.
    Template,
    /// Regular-expression literal.
    Regex,
    /// Operator or bracket.
    Punct,
    /// `//` or `#` comment.
    LineComment,
    /// `/* ... */` comment.
    BlockComment,
    /// Raw text between JSX tags.
    JsxText,
}

/// One token borrowed from the source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token<'a> {
    /// Classification.
    pub kind: TokenKind,
    /// Source slice.
    pub text: &'a str,
    /// Byte offset of the first character.
    pub start: usize,
    /// 1-based line.
    pub line: u32,
    /// 1-based column, counted in characters.
    pub column: u32,
}

impl Token<'_> {
    /// Byte offset one past the last character.
    #[must_use]
    pub fn end(&self) -> usize {
        self.start + self.text.len()
    }

    /// Whether this is the punctuator `p`.
    #[must_use]
    pub fn is_punct(&self, p: &str) -> bool {
        self.kind == TokenKind::Punct && self.text == p
    }

    /// Whether this is the identifier or keyword `word`.
    #[must_use]
    pub fn is_ident(&self, word: &str) -> bool {
        self.kind == TokenKind::Ident && self.text == word
    }

    /// Comments carry no syntax.
    #[must_use]
    pub fn is_comment(&self) -> bool {
        matches!(self.kind, TokenKind::LineComment | TokenKind::BlockComment)
    }

    /// Whether an expression can end with this token, making a following `/`
    /// a division and a following `<` a comparison or type argument.
    #[must_use]
    pub fn ends_expression(&self) -> bool {
        match self.kind {
            TokenKind::Ident => !EXPRESSION_KEYWORDS.contains(&self.text),
            TokenKind::Number | TokenKind::Str | TokenKind::Template | TokenKind::Regex => true,
            TokenKind::Punct => matches!(self.text, ")" | "]"),
            TokenKind::LineComment | TokenKind::BlockComment | TokenKind::JsxText => false,
        }
    }
}

/// A lexical problem found while tokenizing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LexIssue {
    /// Description, e.g. `unterminated string literal`.
    pub message: String,
    /// 1-based line.
    pub line: u32,
    /// 1-based column.
    pub column: u32,
}

/// Dialect switches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LexOptions {
    /// Recognise JSX elements in expression position.
    pub jsx: bool,
    /// `#` starts a line comment, triple-quoted strings are allowed, and
    /// there are no template or regex literals.
    pub hash_comments: bool,
}

/// Tokenizer output.
#[derive(Debug, Clone, Default)]
pub struct Lexed<'a> {
    /// All tokens, comments included, in source order.
    pub tokens: Vec<Token<'a>>,
    /// Lexical problems in source order.
    pub issues: Vec<LexIssue>,
}

impl<'a> Lexed<'a> {
    /// Tokens with comments removed.
    #[must_use]
    pub fn significant(&self) -> Vec<Token<'a>> {
        self.tokens.iter().filter(|t| !t.is_comment()).copied().collect()
    }
}

/// Tokenize `src`.
#[must_use]
pub fn tokenize(src: &str, options: LexOptions) -> Lexed<'_> {
    let scanners = Scanners::new();
    let mut lexer = Lexer::new(src, options, &scanners);
    lexer.run();
    Lexed {
        tokens: lexer.tokens,
        issues: lexer.issues,
    }
}

/// Translate a byte offset into a 1-based `(line, column)` pair.
#[must_use]
pub fn position_of(src: &str, offset: usize) -> (u32, u32) {
    LineIndex::new(src).position(offset)
}

/// Precomputed line starts for repeated offset → position lookups.
#[derive(Debug, Clone)]
pub struct LineIndex<'a> {
    src: &'a str,
    starts: Vec<usize>,
}

impl<'a> LineIndex<'a> {
    /// Index the line starts of `src`.
    #[must_use]
    pub fn new(src: &'a str) -> Self {
        let mut starts = vec![0];
        starts.extend(
            src.bytes()
                .enumerate()
                .filter(|&(_, b)| b == b'\n')
                .map(|(i, _)| i + 1),
        );
        Self { src, starts }
    }

    /// 1-based `(line, column)` of a byte offset; columns count characters.
    #[must_use]
    pub fn position(&self, offset: usize) -> (u32, u32) {
        let offset = offset.min(self.src.len());
        let line_idx = match self.starts.binary_search(&offset) {
            Ok(idx) => idx,
            Err(idx) => idx.saturating_sub(1),
        };
        let line_start = self.starts[line_idx];
        let column = String::from_utf8_lossy(&self.src.as_bytes()[line_start..offset])
            .chars()
            .count()
            + 1;
        (to_u32(line_idx + 1), to_u32(column))
    }
}

fn to_u32(n: usize) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}

/// A lexeme recogniser; yields the number of bytes it consumed.
type Scanner<'a, O = usize> = Boxed<'a, 'a, &'a str, O, extra::Default>;

/// Run `scanner` at the start of `rest`, ignoring whatever follows the match.
fn scan<'a, O>(scanner: &Scanner<'a, O>, rest: &'a str) -> Option<O> {
    scanner.lazy().parse(rest).into_output()
}

fn whitespace<'a>() -> impl Parser<'a, &'a str, usize> + Clone {
    any()
        .filter(char::is_ascii_whitespace)
        .repeated()
        .at_least(1)
        .to_slice()
        .map(str::len)
}

fn line_comment<'a>(marker: &'static str) -> impl Parser<'a, &'a str, usize> + Clone {
    just(marker)
        .then(none_of('\n').repeated())
        .to_slice()
        .map(str::len)
}

fn block_comment<'a>() -> impl Parser<'a, &'a str, usize> + Clone {
    just("/*")
        .then(any().and_is(just("*/").not()).repeated())
        .then(just("*/"))
        .to_slice()
        .map(str::len)
}

/// Quoted string; yields the consumed length and whether it was closed.
/// An unclosed string ends at the line break unless `multiline`.
fn quoted<'a>(quote: char, multiline: bool) -> impl Parser<'a, &'a str, (usize, bool)> + Clone {
    let body = choice((
        just('\\').then(any().or_not()).ignored(),
        any()
            .filter(move |c: &char| *c != quote && *c != '\\' && (multiline || *c != '\n'))
            .ignored(),
    ));
    just(quote)
        .then(body.repeated())
        .to_slice()
        .then(just(quote).or_not())
        .map(|(open, close): (&str, Option<char>)| {
            (open.len() + close.map_or(0, char::len_utf8), close.is_some())
        })
}

fn triple_quoted<'a>(delimiter: &'static str) -> impl Parser<'a, &'a str, (usize, bool)> + Clone {
    just(delimiter)
        .then(any().and_is(just(delimiter).not()).repeated())
        .to_slice()
        .then(just(delimiter).or_not())
        .map(|(open, close): (&str, Option<&str>)| {
            (open.len() + close.map_or(0, str::len), close.is_some())
        })
}

/// Template literal with `${...}` parts, which may hold nested templates.
fn template<'a>() -> impl Parser<'a, &'a str, usize> + Clone {
    recursive(|template| {
        let expression = recursive(|expression| {
            choice((
                just('{').then(expression).then(just('}')).ignored(),
                quoted('"', false).ignored(),
                quoted('\'', false).ignored(),
                template.clone().ignored(),
                line_comment("//").ignored(),
                block_comment().ignored(),
                none_of("{}`").ignored(),
            ))
            .repeated()
        });

        just('`')
            .then(
                choice((
                    just('\\').then(any().or_not()).ignored(),
                    just("${").then(expression).then(just('}')).ignored(),
                    none_of('`').ignored(),
                ))
                .repeated(),
            )
            .then(just('`'))
            .to_slice()
            .map(str::len)
    })
}

fn identifier<'a>(jsx_name: bool) -> impl Parser<'a, &'a str, usize> + Clone {
    any()
        .filter(|c: &char| is_ident_start(*c))
        .then(
            any()
                .filter(move |c: &char| {
                    is_ident_continue(*c) || (jsx_name && matches!(c, '-' | '.' | ':'))
                })
                .repeated(),
        )
        .to_slice()
        .map(str::len)
}

fn number<'a>() -> impl Parser<'a, &'a str, usize> + Clone {
    let digit = any().filter(char::is_ascii_digit);
    let tail = any().filter(|c: &char| c.is_ascii_alphanumeric() || matches!(c, '_' | '.'));
    let hex = just("0x").then(tail.clone().repeated()).ignored();
    let decimal = choice((digit.clone().ignored(), just('.').then(digit).ignored()))
        .then(choice((one_of("eE").then(one_of("+-")).ignored(), tail.ignored())).repeated())
        .ignored();
    choice((hex, decimal)).to_slice().map(str::len)
}

fn regex<'a>() -> impl Parser<'a, &'a str, usize> + Clone {
    let escape = just('\\').then(any()).ignored();
    let class = just('[')
        .then(choice((escape.clone(), none_of("]\n").ignored())).repeated())
        .then(just(']').or_not())
        .ignored();
    let body = choice((escape, class, none_of("/\n").ignored())).repeated();
    just('/')
        .then(body)
        .then(just('/'))
        .then(any().filter(|c: &char| is_ident_continue(*c)).repeated())
        .to_slice()
        .map(str::len)
}

fn punctuator<'a>() -> impl Parser<'a, &'a str, usize> + Clone {
    choice((
        just("?.")
            .then_ignore(any().filter(char::is_ascii_digit).not())
            .to_slice(),
        choice(PUNCTUATORS.map(just)).to_slice(),
        any().to_slice(),
    ))
    .map(str::len)
}

fn jsx_text<'a>() -> impl Parser<'a, &'a str, usize> + Clone {
    none_of("<{").repeated().at_least(1).to_slice().map(str::len)
}

/// Every lexeme recogniser, built once per [`tokenize`] call.
struct Scanners<'a> {
    whitespace: Scanner<'a>,
    line_comment: Scanner<'a>,
    hash_comment: Scanner<'a>,
    block_comment: Scanner<'a>,
    double_quoted: Scanner<'a, (usize, bool)>,
    single_quoted: Scanner<'a, (usize, bool)>,
    double_quoted_multiline: Scanner<'a, (usize, bool)>,
    single_quoted_multiline: Scanner<'a, (usize, bool)>,
    triple_double: Scanner<'a, (usize, bool)>,
    triple_single: Scanner<'a, (usize, bool)>,
    template: Scanner<'a>,
    identifier: Scanner<'a>,
    jsx_name: Scanner<'a>,
    number: Scanner<'a>,
    regex: Scanner<'a>,
    punctuator: Scanner<'a>,
    jsx_text: Scanner<'a>,
}

impl<'a> Scanners<'a> {
    fn new() -> Self {
        Self {
            whitespace: whitespace().boxed(),
            line_comment: line_comment("//").boxed(),
            hash_comment: line_comment("#").boxed(),
            block_comment: block_comment().boxed(),
            double_quoted: quoted('"', false).boxed(),
            single_quoted: quoted('\'', false).boxed(),
            double_quoted_multiline: quoted('"', true).boxed(),
            single_quoted_multiline: quoted('\'', true).boxed(),
            triple_double: triple_quoted("\"\"\"").boxed(),
            triple_single: triple_quoted("'''").boxed(),
            template: template().boxed(),
            identifier: identifier(false).boxed(),
            jsx_name: identifier(true).boxed(),
            number: number().boxed(),
            regex: regex().boxed(),
            punctuator: punctuator().boxed(),
            jsx_text: jsx_text().boxed(),
        }
    }

    fn quoted(&self, quote: char, multiline: bool) -> &Scanner<'a, (usize, bool)> {
        match (quote, multiline) {
            ('"', false) => &self.double_quoted,
            ('"', true) => &self.double_quoted_multiline,
            (_, false) => &self.single_quoted,
            (_, true) => &self.single_quoted_multiline,
        }
    }

    fn triple_quoted(&self, quote: char) -> &Scanner<'a, (usize, bool)> {
        if quote == '"' {
            &self.triple_double
        } else {
            &self.triple_single
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// Ordinary code. `container` marks a JSX `{...}` expression whose
    /// closing brace returns to the enclosing JSX mode.
    Code { container: bool, depth: usize },
    /// Inside `<tag ...>` or `</tag>`.
    JsxTag { closing: bool, opened_at: usize },
    /// Between an opening and a closing JSX tag.
    JsxChildren { opened_at: usize },
}

struct Lexer<'a, 's> {
    src: &'a str,
    pos: usize,
    index: LineIndex<'a>,
    options: LexOptions,
    scanners: &'s Scanners<'a>,
    tokens: Vec<Token<'a>>,
    issues: Vec<LexIssue>,
    modes: Vec<Mode>,
}

impl<'a, 's> Lexer<'a, 's> {
    fn new(src: &'a str, options: LexOptions, scanners: &'s Scanners<'a>) -> Self {
        Self {
            src,
            pos: 0,
            index: LineIndex::new(src),
            options,
            scanners,
            tokens: Vec::new(),
            issues: Vec::new(),
            modes: vec![Mode::Code {
                container: false,
                depth: 0,
            }],
        }
    }

    fn run(&mut self) {
        while self.pos < self.src.len() {
            match self.modes.last().copied() {
                Some(Mode::JsxTag { closing, .. }) => self.lex_jsx_tag(closing),
                Some(Mode::JsxChildren { opened_at }) => self.lex_jsx_children(opened_at),
                _ => self.lex_code(),
            }
        }

        let unclosed = self.modes.iter().find_map(|m| match m {
            Mode::JsxTag { opened_at, .. } | Mode::JsxChildren { opened_at } => Some(*opened_at),
            Mode::Code { .. } => None,
        });
        if let Some(at) = unclosed {
            self.issue("unterminated JSX element", at);
        }
    }

    // ── Code mode ────────────────────────────────────────────────────────

    fn lex_code(&mut self) {
        let scanners = self.scanners;
        let rest = self.rest();
        let mut chars = rest.chars();
        let Some(c) = chars.next() else { return };
        let next = chars.next();
        let script = !self.options.hash_comments;

        if let Some(len) = scan(&scanners.whitespace, rest) {
            self.pos += len;
        } else if !script && c == '#' {
            self.emit(TokenKind::LineComment, scan(&scanners.hash_comment, rest));
        } else if script && rest.starts_with("//") {
            self.emit(TokenKind::LineComment, scan(&scanners.line_comment, rest));
        } else if script && rest.starts_with("/*") {
            self.lex_block_comment();
        } else if c == '"' || c == '\'' {
            self.lex_string(c, false);
        } else if script && c == '`' {
            self.lex_template();
        } else if is_ident_start(c) {
            self.emit(TokenKind::Ident, scan(&scanners.identifier, rest));
        } else if c.is_ascii_digit() || (c == '.' && next.is_some_and(|n| n.is_ascii_digit())) {
            self.emit(TokenKind::Number, scan(&scanners.number, rest));
        } else if script && c == '/' && self.expression_may_start() {
            match scan(&scanners.regex, rest) {
                Some(len) => self.emit(TokenKind::Regex, Some(len)),
                None => self.lex_punct(),
            }
        } else if c == '<'
            && self.options.jsx
            && self.expression_may_start()
            && next.is_some_and(|n| is_ident_start(n) || n == '>')
        {
            let start = self.pos;
            self.emit(TokenKind::Punct, Some(1));
            self.modes.push(Mode::JsxTag {
                closing: false,
                opened_at: start,
            });
        } else if c == '{' {
            self.lex_open_brace();
        } else if c == '}' {
            self.lex_close_brace();
        } else {
            self.lex_punct();
        }
    }

    fn expression_may_start(&self) -> bool {
        self.tokens
            .iter()
            .rev()
            .find(|t| !t.is_comment())
            .map_or(true, |t| !t.ends_expression())
    }

    fn lex_open_brace(&mut self) {
        self.emit(TokenKind::Punct, Some(1));
        if let Some(Mode::Code {
            container: true,
            depth,
        }) = self.modes.last_mut()
        {
            *depth += 1;
        }
    }

    fn lex_close_brace(&mut self) {
        self.emit(TokenKind::Punct, Some(1));
        let leaves_container = match self.modes.last_mut() {
            Some(Mode::Code {
                container: true,
                depth: 0,
            }) => true,
            Some(Mode::Code {
                container: true,
                depth,
            }) => {
                *depth -= 1;
                false
            }
            _ => false,
        };
        if leaves_container {
            self.modes.pop();
        }
    }

    fn lex_block_comment(&mut self) {
        let rest = self.rest();
        if let Some(len) = scan(&self.scanners.block_comment, rest) {
            self.emit(TokenKind::BlockComment, Some(len));
        } else {
            self.issue("unterminated block comment", self.pos);
            self.emit(TokenKind::BlockComment, Some(rest.len()));
        }
    }

    fn lex_string(&mut self, quote: char, multiline: bool) {
        let scanners = self.scanners;
        let rest = self.rest();
        let triple = if self.options.hash_comments {
            scan(scanners.triple_quoted(quote), rest)
        } else {
            None
        };
        let (len, closed) = triple
            .or_else(|| scan(scanners.quoted(quote, multiline), rest))
            .unwrap_or((rest.len(), false));
        if !closed {
            self.issue("unterminated string literal", self.pos);
        }
        self.emit(TokenKind::Str, Some(len));
    }

    fn lex_template(&mut self) {
        let rest = self.rest();
        if let Some(len) = scan(&self.scanners.template, rest) {
            self.emit(TokenKind::Template, Some(len));
        } else {
            self.issue("unterminated template literal", self.pos);
            self.emit(TokenKind::Template, Some(rest.len()));
        }
    }

    fn lex_punct(&mut self) {
        let len = scan(&self.scanners.punctuator, self.rest());
        self.emit(TokenKind::Punct, len);
    }

    // ── JSX modes ────────────────────────────────────────────────────────

    fn lex_jsx_tag(&mut self, closing: bool) {
        let scanners = self.scanners;
        let rest = self.rest();
        let Some(c) = rest.chars().next() else { return };
        let start = self.pos;

        if let Some(len) = scan(&scanners.whitespace, rest) {
            self.pos += len;
        } else if rest.starts_with("/>") {
            self.emit(TokenKind::Punct, Some(2));
            self.modes.pop();
        } else if c == '>' {
            self.emit(TokenKind::Punct, Some(1));
            let opened_at = match self.modes.pop() {
                Some(Mode::JsxTag { opened_at, .. }) => opened_at,
                _ => start,
            };
            if closing {
                if matches!(self.modes.last(), Some(Mode::JsxChildren { .. })) {
                    self.modes.pop();
                }
            } else {
                self.modes.push(Mode::JsxChildren { opened_at });
            }
        } else if c == '{' {
            self.emit(TokenKind::Punct, Some(1));
            self.modes.push(Mode::Code {
                container: true,
                depth: 0,
            });
        } else if c == '"' || c == '\'' {
            self.lex_string(c, true);
        } else if is_ident_start(c) {
            self.emit(TokenKind::Ident, scan(&scanners.jsx_name, rest));
        } else if rest.starts_with("//") {
            self.emit(TokenKind::LineComment, scan(&scanners.line_comment, rest));
        } else if rest.starts_with("/*") {
            self.lex_block_comment();
        } else {
            self.emit(TokenKind::Punct, None);
        }
    }

    fn lex_jsx_children(&mut self, opened_at: usize) {
        if let Some(len) = scan(&self.scanners.jsx_text, self.rest()) {
            self.emit(TokenKind::JsxText, Some(len));
        }
        let rest = self.rest();
        let start = self.pos;

        if rest.starts_with('{') {
            self.emit(TokenKind::Punct, Some(1));
            self.modes.push(Mode::Code {
                container: true,
                depth: 0,
            });
        } else if rest.starts_with("</") {
            self.emit(TokenKind::Punct, Some(2));
            self.modes.push(Mode::JsxTag {
                closing: true,
                opened_at,
            });
        } else if rest.starts_with('<') {
            self.emit(TokenKind::Punct, Some(1));
            self.modes.push(Mode::JsxTag {
                closing: false,
                opened_at: start,
            });
        }
    }

    // ── Helpers ──────────────────────────────────────────────────────────

    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    /// Push a token of `len` bytes at the cursor and move past it. A missing
    /// or empty match still consumes one character so lexing always advances.
    fn emit(&mut self, kind: TokenKind, len: Option<usize>) {
        let start = self.pos;
        let len = match len {
            Some(len) if len > 0 => len,
            _ => self.rest().chars().next().map_or(1, char::len_utf8),
        };
        let end = (start + len).min(self.src.len());
        let (line, column) = self.index.position(start);
        self.tokens.push(Token {
            kind,
            text: &self.src[start..end],
            start,
            line,
            column,
        });
        self.pos = end;
    }

    fn issue(&mut self, message: &str, at: usize) {
        let (line, column) = self.index.position(at);
        self.issues.push(LexIssue {
            message: message.to_owned(),
            line,
            column,
        });
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_' || c == '$' || !c.is_ascii()
}

fn is_ident_continue(c: char) -> bool {
    is_ident_start(c) || c.is_ascii_digit()
}
