//! Type erasure for the statically-typed script families.
//!
//! Erased spans are blanked with spaces rather than removed, so every
//! remaining character keeps its original line and column and runtime stack
//! traces still point at the user's source.

use crate::lexer::{tokenize, LexOptions, Token, TokenKind};
use crate::models::artifact::Artifact;
use crate::models::source::LanguageTag;

use super::component::ComponentTransform;
use super::document::{build_document, script_element};
use super::{Transform, TransformContext, TransformFailure};

/// Modifiers that only exist in the type system.
const MEMBER_MODIFIERS: &[&str] = &[
    "public",
    "private",
    "protected",
    "readonly",
    "override",
    "declare",
    "abstract",
];

/// Keywords that may follow `declare`.
const DECLARABLE: &[&str] = &[
    "const",
    "let",
    "var",
    "function",
    "class",
    "module",
    "namespace",
    "global",
    "enum",
    "type",
    "interface",
    "abstract",
    "async",
];

/// Prefix operators inside type expressions.
const TYPE_PREFIXES: &[&str] = &["keyof", "typeof", "readonly", "unique", "infer", "asserts"];

/// Tokens after which a line break cannot end a type alias.
const CONTINUATIONS: &[&str] = &["=", "|", "&", ",", "=>", ":", "?", "<", ".", "(", "[", "{"];

/// Erase type syntax from typed script source, preserving positions.
#[must_use]
pub fn erase_types(src: &str, jsx: bool) -> String {
    let lexed = tokenize(
        src,
        LexOptions {
            jsx,
            hash_comments: false,
        },
    );
    let tokens = lexed.significant();
    let mut eraser = Eraser::new(&tokens);
    eraser.run();
    blank_ranges(src, &eraser.blanks)
}

/// Replace the bytes of each range with spaces, keeping line breaks.
fn blank_ranges(src: &str, ranges: &[(usize, usize)]) -> String {
    if ranges.is_empty() {
        return src.to_owned();
    }
    let mut bytes = src.as_bytes().to_vec();
    for &(start, end) in ranges {
        for b in &mut bytes[start.min(src.len())..end.min(src.len())] {
            if *b != b'\n' && *b != b'\r' {
                *b = b' ';
            }
        }
    }
    // Every multi-byte sequence is either untouched or fully blanked.
    String::from_utf8(bytes).unwrap_or_else(|err| String::from_utf8_lossy(err.as_bytes()).into_owned())
}

/// Typed script transform: erase types, then wrap like a plain script.
#[derive(Debug, Default, Clone, Copy)]
pub struct TypedScriptTransform;

impl Transform for TypedScriptTransform {
    fn name(&self) -> &'static str {
        "typed-script"
    }

    fn transform(
        &self,
        text: &str,
        language_tag: &LanguageTag,
        _ctx: &TransformContext<'_>,
    ) -> Result<Artifact, TransformFailure> {
        let erased = erase_types(text, false);
        Ok(Artifact {
            language_tag: language_tag.clone(),
            executable_document: build_document("", &script_element(&erased)),
        })
    }
}

/// Typed component transform: erase types with JSX enabled, then mount.
#[derive(Debug, Default, Clone, Copy)]
pub struct TypedComponentTransform;

impl Transform for TypedComponentTransform {
    fn name(&self) -> &'static str {
        "typed-component-ui"
    }

    fn transform(
        &self,
        text: &str,
        language_tag: &LanguageTag,
        ctx: &TransformContext<'_>,
    ) -> Result<Artifact, TransformFailure> {
        let erased = erase_types(text, true);
        ComponentTransform.transform(&erased, language_tag, ctx)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameKind {
    Block,
    ClassBody,
    Object,
    Paren,
    Bracket,
}

#[derive(Debug, Clone, Copy)]
struct Frame {
    kind: FrameKind,
    /// Open `?` of conditional expressions awaiting their `:`.
    ternary: u32,
}

struct Eraser<'t, 'a> {
    toks: &'t [Token<'a>],
    blanks: Vec<(usize, usize)>,
    frames: Vec<Frame>,
    class_header: bool,
    block_follows: bool,
    module_clause: Option<usize>,
}

impl<'t, 'a> Eraser<'t, 'a> {
    fn new(toks: &'t [Token<'a>]) -> Self {
        Self {
            toks,
            blanks: Vec::new(),
            frames: vec![Frame {
                kind: FrameKind::Block,
                ternary: 0,
            }],
            class_header: false,
            block_follows: false,
            module_clause: None,
        }
    }

    fn tok(&self, i: usize) -> Option<&Token<'a>> {
        self.toks.get(i)
    }

    fn punct_at(&self, i: usize, p: &str) -> bool {
        self.tok(i).is_some_and(|t| t.is_punct(p))
    }

    fn ident_at(&self, i: usize, word: &str) -> bool {
        self.tok(i).is_some_and(|t| t.is_ident(word))
    }

    fn kind_at(&self, i: usize) -> Option<TokenKind> {
        self.tok(i).map(|t| t.kind)
    }

    fn frame(&mut self) -> &mut Frame {
        let last = self.frames.len() - 1;
        &mut self.frames[last]
    }

    fn frame_kind(&self) -> FrameKind {
        self.frames.last().map_or(FrameKind::Block, |f| f.kind)
    }

    /// Blank tokens `from..to` (exclusive end index).
    fn blank(&mut self, from: usize, to: usize) {
        if from >= to || from >= self.toks.len() {
            return;
        }
        let last = to.min(self.toks.len()) - 1;
        self.blanks.push((self.toks[from].start, self.toks[last].end()));
    }

    fn run(&mut self) {
        let mut i = 0;
        while i < self.toks.len() {
            if self.at_statement_start(i) {
                if let Some(end) = self.declaration_end(i) {
                    self.blank(i, end + 1);
                    i = end + 1;
                    continue;
                }
            }
            i = self.step(i);
        }
    }

    /// Handle the token at `i`; returns the index of the next token to visit.
    fn step(&mut self, i: usize) -> usize {
        let t = self.toks[i];
        match t.kind {
            TokenKind::Punct => self.step_punct(i, t.text),
            TokenKind::Ident => self.step_ident(i, t.text),
            TokenKind::Str => {
                if self.module_clause.is_some()
                    && i > 0
                    && (self.toks[i - 1].is_ident("from") || self.toks[i - 1].is_ident("import"))
                {
                    self.module_clause = None;
                }
                i + 1
            }
            _ => i + 1,
        }
    }

    fn step_punct(&mut self, i: usize, text: &str) -> usize {
        match text {
            "(" => {
                self.push(FrameKind::Paren);
                i + 1
            }
            "[" => {
                self.push(FrameKind::Bracket);
                i + 1
            }
            "{" => {
                let kind = self.classify_brace(i);
                self.push(kind);
                i + 1
            }
            ")" | "]" | "}" => {
                if self.frames.len() > 1 {
                    self.frames.pop();
                }
                if text == "}" && self.module_clause == Some(self.frames.len()) && !self.ident_at(i + 1, "from") {
                    self.module_clause = None;
                }
                i + 1
            }
            ";" | "=>" => {
                self.block_follows = false;
                if text == ";" && self.module_clause == Some(self.frames.len()) {
                    self.module_clause = None;
                }
                i + 1
            }
            "?" => self.question(i),
            ":" => self.colon(i),
            "!" => {
                let postfix = i > 0
                    && self.toks[i - 1].ends_expression()
                    && self.toks[i - 1].line == self.toks[i].line
                    && self.tok(i + 1).map_or(true, |n| {
                        n.line > self.toks[i].line
                            || (n.kind == TokenKind::Punct
                                && matches!(
                                    n.text,
                                    "." | "?." | ")" | "]" | "}" | "," | ";" | "=" | "[" | ":"
                                ))
                    });
                if postfix {
                    self.blank(i, i + 1);
                }
                i + 1
            }
            "<" if self.class_header && i > 0 && self.toks[i - 1].kind == TokenKind::Ident => {
                let Some(end) = self.skip_angle(i) else {
                    return i + 1;
                };
                self.blank(i, end);
                end
            }
            _ => i + 1,
        }
    }

    fn step_ident(&mut self, i: usize, text: &str) -> usize {
        let prev_is_member_access =
            i > 0 && (self.toks[i - 1].is_punct(".") || self.toks[i - 1].is_punct("?."));
        if prev_is_member_access {
            return self.generic_call(i).unwrap_or(i + 1);
        }

        match text {
            "as" | "satisfies" => {
                let cast = i > 0
                    && self.toks[i - 1].ends_expression()
                    && self.module_clause.is_none()
                    && self.tok(i + 1).is_some_and(|n| {
                        matches!(n.kind, TokenKind::Ident | TokenKind::Str | TokenKind::Number)
                            || n.is_punct("{")
                            || n.is_punct("[")
                            || n.is_punct("(")
                    });
                if cast {
                    let end = self.skip_type(i + 1);
                    self.blank(i, end);
                    return end;
                }
                i + 1
            }
            "implements" if self.class_header => {
                let mut end = i + 1;
                while end < self.toks.len() && !self.toks[end].is_punct("{") {
                    end += 1;
                }
                self.blank(i, end);
                end
            }
            "class" => {
                if self.kind_at(i + 1) == Some(TokenKind::Ident) || self.punct_at(i + 1, "{") {
                    self.class_header = true;
                }
                i + 1
            }
            "function" => {
                let name = if self.kind_at(i + 1) == Some(TokenKind::Ident) { i + 2 } else { i + 1 };
                if self.punct_at(name, "<") {
                    if let Some(end) = self.skip_angle(name) {
                        self.blank(name, end);
                        return end;
                    }
                }
                i + 1
            }
            "import" | "export" if self.at_statement_start(i) => {
                let opens_clause = text == "import"
                    || self.punct_at(i + 1, "{")
                    || self.punct_at(i + 1, "*");
                if opens_clause {
                    self.module_clause = Some(self.frames.len());
                }
                i + 1
            }
            _ if MEMBER_MODIFIERS.contains(&text) && self.modifier_position(i) => {
                self.blank(i, i + 1);
                i + 1
            }
            _ => self.generic_call(i).unwrap_or(i + 1),
        }
    }

    fn push(&mut self, kind: FrameKind) {
        self.frames.push(Frame { kind, ternary: 0 });
    }

    fn classify_brace(&mut self, i: usize) -> FrameKind {
        if self.class_header {
            self.class_header = false;
            self.block_follows = false;
            return FrameKind::ClassBody;
        }
        if self.block_follows {
            self.block_follows = false;
            return FrameKind::Block;
        }
        let Some(prev) = i.checked_sub(1).map(|p| self.toks[p]) else {
            return FrameKind::Block;
        };
        let block = match prev.kind {
            TokenKind::Punct => matches!(prev.text, ")" | ";" | "{" | "}" | "=>"),
            TokenKind::Ident => matches!(prev.text, "else" | "try" | "finally" | "do"),
            _ => false,
        };
        if block {
            FrameKind::Block
        } else {
            FrameKind::Object
        }
    }

    fn at_statement_start(&self, i: usize) -> bool {
        let Some(prev) = i.checked_sub(1).map(|p| self.toks[p]) else {
            return true;
        };
        if prev.is_punct(";") || prev.is_punct("{") || prev.is_punct("}") {
            return true;
        }
        prev.line < self.toks[i].line
            && !CONTINUATIONS.contains(&prev.text)
            && !prev.is_punct("?.")
            && !matches!(self.frame_kind(), FrameKind::Paren | FrameKind::Bracket)
    }

    /// Type-only declarations: `type`, `interface`, `declare ...`,
    /// `import type`, `export type {...}`, with an optional `export`.
    /// Returns the inclusive index of the last token of the declaration.
    fn declaration_end(&self, i: usize) -> Option<usize> {
        let first = self.tok(i)?;
        if (first.is_ident("import") || first.is_ident("export")) && self.ident_at(i + 1, "type") {
            let typed_clause = self.punct_at(i + 2, "{")
                || self.punct_at(i + 2, "*")
                || (self.kind_at(i + 2) == Some(TokenKind::Ident)
                    && (self.ident_at(i + 3, "from") || self.punct_at(i + 3, ",")));
            if typed_clause {
                return Some(self.module_statement_end(i + 2));
            }
        }

        let j = if first.is_ident("export") { i + 1 } else { i };
        let head = self.tok(j)?;
        let next = self.tok(j + 1);

        if head.is_ident("declare") && next.is_some_and(|n| DECLARABLE.contains(&n.text)) {
            return Some(self.statement_end(j + 1, true));
        }
        if head.is_ident("type")
            && next.is_some_and(|n| n.kind == TokenKind::Ident)
            && (self.punct_at(j + 2, "=") || self.punct_at(j + 2, "<"))
        {
            return Some(self.statement_end(j + 2, false));
        }
        if head.is_ident("interface") && next.is_some_and(|n| n.kind == TokenKind::Ident) {
            let mut k = j + 2;
            while k < self.toks.len() && !self.toks[k].is_punct("{") {
                k += 1;
            }
            return Some(self.skip_balanced(k).saturating_sub(1));
        }
        None
    }

    /// End of a `type X = ...` or `declare ...` statement starting at `from`.
    fn statement_end(&self, from: usize, block_ends: bool) -> usize {
        let mut depth = 0usize;
        let mut k = from;
        while k < self.toks.len() {
            let t = &self.toks[k];
            if t.kind == TokenKind::Punct {
                match t.text {
                    "(" | "[" | "{" => depth += 1,
                    ")" | "]" | "}" => {
                        depth = depth.saturating_sub(1);
                        if depth == 0 && block_ends && t.text == "}" {
                            return if self.punct_at(k + 1, ";") { k + 1 } else { k };
                        }
                    }
                    ";" if depth == 0 => return k,
                    _ => {}
                }
            }
            if depth == 0 && k > from {
                let prev = &self.toks[k - 1];
                let continues = CONTINUATIONS.contains(&prev.text)
                    || t.is_punct("|")
                    || t.is_punct("&")
                    || t.is_punct(".")
                    || t.is_punct("=>");
                if t.line > prev.line && !continues {
                    return k - 1;
                }
            }
            k += 1;
        }
        self.toks.len().saturating_sub(1)
    }

    /// End of an import/export clause: `;`, the module string, or the
    /// closing brace of a list without `from`.
    fn module_statement_end(&self, from: usize) -> usize {
        let mut k = from;
        while k < self.toks.len() {
            let t = &self.toks[k];
            if t.is_punct(";") {
                return k;
            }
            if t.kind == TokenKind::Str && k > 0 && self.toks[k - 1].is_ident("from") {
                return if self.punct_at(k + 1, ";") { k + 1 } else { k };
            }
            if t.is_punct("{") {
                let close = self.skip_balanced(k);
                if self.ident_at(close, "from") {
                    k = close;
                    continue;
                }
                return if self.punct_at(close, ";") { close } else { close.saturating_sub(1) };
            }
            k += 1;
        }
        self.toks.len().saturating_sub(1)
    }

    fn question(&mut self, i: usize) -> usize {
        let optional_marker = matches!(self.frame_kind(), FrameKind::Paren | FrameKind::ClassBody)
            && i > 0
            && matches!(self.toks[i - 1].kind, TokenKind::Ident)
            && self.tok(i + 1).is_some_and(|n| {
                n.is_punct(":") || n.is_punct(",") || n.is_punct(")") || n.is_punct("=") || n.is_punct(";")
            });
        if optional_marker {
            if self.punct_at(i + 1, ":") {
                let end = self.skip_type(i + 2);
                self.blank(i, end);
                self.after_annotation(i);
                return end;
            }
            self.blank(i, i + 1);
            return i + 1;
        }
        self.frame().ternary += 1;
        i + 1
    }

    fn colon(&mut self, i: usize) -> usize {
        if self.frame().ternary > 0 {
            self.frame().ternary -= 1;
            return i + 1;
        }
        let Some(prev) = i.checked_sub(1).map(|p| self.toks[p]) else {
            return i + 1;
        };
        let annotation = match self.frame_kind() {
            FrameKind::Paren => true,
            FrameKind::ClassBody => {
                matches!(prev.kind, TokenKind::Ident | TokenKind::Str)
                    || prev.is_punct(")")
                    || prev.is_punct("]")
            }
            FrameKind::Object => prev.is_punct(")"),
            FrameKind::Block => {
                prev.is_punct(")")
                    || (prev.kind == TokenKind::Ident
                        && i >= 2
                        && matches!(self.toks[i - 2].text, "let" | "const" | "var"))
                    || ((prev.is_punct("}") || prev.is_punct("]"))
                        && self.destructuring_declaration(i - 1))
            }
            FrameKind::Bracket => false,
        };
        if !annotation {
            return i + 1;
        }
        let end = self.skip_type(i + 1);
        self.blank(i, end);
        self.after_annotation(i);
        end
    }

    /// A return-type annotation means the next `{` opens a function body.
    fn after_annotation(&mut self, colon: usize) {
        let return_type = colon > 0 && self.toks[colon - 1].is_punct(")");
        if return_type {
            self.block_follows = true;
        }
    }

    /// Whether the closing bracket at `close` ends a `const {..}` or
    /// `let [..]` pattern.
    fn destructuring_declaration(&self, close: usize) -> bool {
        let (open, close_text) = if self.toks[close].is_punct("}") { ("{", "}") } else { ("[", "]") };
        let mut depth = 0usize;
        let mut k = close;
        loop {
            let t = &self.toks[k];
            if t.is_punct(close_text) {
                depth += 1;
            } else if t.is_punct(open) {
                depth -= 1;
                if depth == 0 {
                    return k > 0 && matches!(self.toks[k - 1].text, "let" | "const" | "var");
                }
            }
            if k == 0 {
                return false;
            }
            k -= 1;
        }
    }

    fn modifier_position(&self, i: usize) -> bool {
        let next_is_name = self
            .tok(i + 1)
            .is_some_and(|n| n.kind == TokenKind::Ident || n.is_punct("[") || n.is_punct("#"));
        match self.frame_kind() {
            FrameKind::ClassBody => next_is_name,
            FrameKind::Paren => {
                next_is_name
                    && i > 0
                    && (self.toks[i - 1].is_punct("(") || self.toks[i - 1].is_punct(","))
            }
            _ => self.toks[i].is_ident("abstract") && self.ident_at(i + 1, "class"),
        }
    }

    /// Explicit type arguments on a call, `new` expression, or generic
    /// method declaration: `name<T>(`. Returns the index after the `>`.
    fn generic_call(&mut self, i: usize) -> Option<usize> {
        if self.kind_at(i) != Some(TokenKind::Ident) || !self.punct_at(i + 1, "<") {
            return None;
        }
        let end = self.skip_angle(i + 1)?;
        if !self.punct_at(end, "(") {
            return None;
        }
        let mut depth = 0i32;
        let type_like = self.toks[i + 2..end - 1].iter().all(|t| match t.kind {
            TokenKind::Ident | TokenKind::Str | TokenKind::Number => true,
            TokenKind::Punct => {
                match t.text {
                    "(" | "[" | "{" => depth += 1,
                    ")" | "]" | "}" => depth -= 1,
                    _ => {}
                }
                depth >= 0
                    && matches!(
                        t.text,
                        "," | "." | "[" | "]" | "{" | "}" | "(" | ")" | "|" | "&" | ":" | ";" | "<"
                            | ">" | "=>" | "?"
                    )
            }
            _ => false,
        });
        if !type_like {
            return None;
        }
        self.blank(i + 1, end);
        Some(end)
    }

    /// Skip a type expression starting at `i`; returns the index after it.
    fn skip_type(&self, mut i: usize) -> usize {
        if self.punct_at(i, "|") || self.punct_at(i, "&") {
            i += 1;
        }
        loop {
            while self
                .tok(i)
                .is_some_and(|t| t.kind == TokenKind::Ident && TYPE_PREFIXES.contains(&t.text))
                && self.tok(i + 1).is_some_and(|n| !n.is_punct(",") && !n.is_punct(")"))
            {
                i += 1;
            }
            if self.ident_at(i, "new") {
                i += 1;
            }
            let Some(t) = self.tok(i) else {
                return i;
            };
            let mut grouped = false;
            match t.kind {
                TokenKind::Punct if matches!(t.text, "(" | "[" | "{") => {
                    grouped = t.text == "(";
                    i = self.skip_balanced(i);
                }
                TokenKind::Punct if t.text == "<" => {
                    let Some(end) = self.skip_angle(i) else {
                        return i;
                    };
                    i = end;
                    continue;
                }
                TokenKind::Punct if t.text == "-" && self.kind_at(i + 1) == Some(TokenKind::Number) => {
                    i += 2;
                }
                TokenKind::Ident | TokenKind::Str | TokenKind::Number | TokenKind::Template => {
                    i += 1;
                    while self.punct_at(i, ".") && self.kind_at(i + 1) == Some(TokenKind::Ident) {
                        i += 2;
                    }
                }
                _ => return i,
            }
            loop {
                let type_arguments =
                    self.punct_at(i, "<") && i > 0 && self.toks[i - 1].kind == TokenKind::Ident;
                if let Some(end) = type_arguments.then(|| self.skip_angle(i)).flatten() {
                    i = end;
                } else if self.punct_at(i, "[") {
                    i = self.skip_balanced(i);
                } else {
                    break;
                }
            }
            if self.ident_at(i, "is") {
                i += 1;
                continue;
            }
            if grouped && self.punct_at(i, "=>") {
                i += 1;
                continue;
            }
            if self.punct_at(i, "|") || self.punct_at(i, "&") {
                i += 1;
                continue;
            }
            return i;
        }
    }

    /// Skip a bracketed group opening at `i`; returns the index after the
    /// matching close, or the token count when unbalanced.
    fn skip_balanced(&self, i: usize) -> usize {
        let mut depth = 0usize;
        let mut k = i;
        while k < self.toks.len() {
            let t = &self.toks[k];
            if t.kind == TokenKind::Punct {
                match t.text {
                    "(" | "[" | "{" => depth += 1,
                    ")" | "]" | "}" => {
                        depth = depth.saturating_sub(1);
                        if depth == 0 {
                            return k + 1;
                        }
                    }
                    _ => {}
                }
            }
            k += 1;
        }
        self.toks.len()
    }

    /// Skip an angle-bracketed list opening at `i`; returns the index after
    /// the closing `>`, or `None` when the list never closes.
    fn skip_angle(&self, i: usize) -> Option<usize> {
        let mut depth = 0i32;
        let mut k = i;
        while k < self.toks.len() {
            let t = &self.toks[k];
            if t.kind == TokenKind::Punct {
                match t.text {
                    "<" => depth += 1,
                    ">" => depth -= 1,
                    ">>" => depth -= 2,
                    ">>>" => depth -= 3,
                    ";" => return None,
                    _ => {}
                }
                if depth <= 0 {
                    return Some(k + 1);
                }
            }
            k += 1;
        }
        None
    }
}
