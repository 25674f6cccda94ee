//! JavaScript and TypeScript parsing.
//!
//! Everything that needs to understand script syntax goes through here: the
//! define and script stages, the linker, the minifier and the validator.
//! Rewrites are expressed as [`Edits`] over byte spans of the parsed text,
//! so untouched code is copied through exactly.

use std::cmp::Reverse;
use std::fmt;
use std::path::Path;

use oxc_allocator::Allocator;
use oxc_ast::ast::{
    Argument, BindingPattern, BindingPatternKind, CallExpression, Expression, Program,
    StringLiteral,
};
use oxc_diagnostics::OxcDiagnostic;
use oxc_parser::Parser;
use oxc_span::{SourceType, Span};

/// A parse error at a 1-based position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntaxIssue {
    pub line: usize,
    pub column: usize,
    pub message: String,
}

impl fmt::Display for SyntaxIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}: {}", self.line, self.column, self.message)
    }
}

/// Source type for a module id or path. Anything without a script
/// extension is parsed as a JSX-capable ES module.
pub fn source_type_for(path: &Path) -> SourceType {
    SourceType::from_path(path).unwrap_or_else(|_| SourceType::mjs().with_jsx(true))
}

/// Parse `text` and hand the program to `f`. Any parse error fails the
/// whole parse; recovered programs are never handed out.
pub fn parse<R>(
    text: &str,
    source_type: SourceType,
    f: impl FnOnce(&Program<'_>) -> R,
) -> Result<R, Vec<SyntaxIssue>> {
    let allocator = Allocator::default();
    let ret = Parser::new(&allocator, text, source_type).parse();
    if !ret.errors.is_empty() {
        return Err(ret.errors.iter().map(|e| issue(text, e)).collect());
    }
    if ret.panicked {
        let message = "unrecoverable syntax error".to_string();
        return Err(vec![SyntaxIssue { line: 1, column: 1, message }]);
    }
    Ok(f(&ret.program))
}

/// Parse transformed output: an ES module, or failing that a classic
/// script (CommonJS files may rely on sloppy mode). JSX is accepted in
/// both. Errors are the module parse's.
pub fn parse_output<R>(text: &str, f: impl Fn(&Program<'_>) -> R) -> Result<R, Vec<SyntaxIssue>> {
    match parse(text, SourceType::mjs().with_jsx(true), &f) {
        Ok(value) => Ok(value),
        Err(errors) => {
            let script = SourceType::mjs().with_module(false).with_jsx(true);
            parse(text, script, &f).map_err(|_| errors)
        }
    }
}

fn issue(text: &str, error: &OxcDiagnostic) -> SyntaxIssue {
    let offset = error
        .labels
        .as_ref()
        .and_then(|labels| labels.first())
        .map(|label| label.offset())
        .unwrap_or(0);
    let (line, column) = line_col(text, offset);
    SyntaxIssue { line, column, message: error.to_string() }
}

/// 1-based line and column (in characters) of a byte offset.
pub fn line_col(text: &str, offset: usize) -> (usize, usize) {
    let before = text.get(..offset.min(text.len())).unwrap_or(text);
    let line = before.matches('\n').count() + 1;
    let column = before.rsplit('\n').next().map(|l| l.chars().count()).unwrap_or(0) + 1;
    (line, column)
}

/// Byte ranges of every comment in `program`, delimiters included.
pub fn comment_ranges(text: &str, program: &Program<'_>) -> Vec<(usize, usize)> {
    program
        .comments
        .iter()
        .map(|comment| {
            let (mut start, mut end) = (comment.span.start as usize, comment.span.end as usize);
            // Content-only spans are widened to take in the delimiters.
            let opener = start.checked_sub(2).and_then(|s| text.get(s..start));
            if matches!(opener, Some("//") | Some("/*")) {
                start -= 2;
                if opener == Some("/*") && text.get(end..end + 2) == Some("*/") {
                    end += 2;
                }
            }
            (start, end)
        })
        .collect()
}

/// Every name a binding pattern introduces, in source order.
pub fn binding_names(pattern: &BindingPattern<'_>, out: &mut Vec<String>) {
    match &pattern.kind {
        BindingPatternKind::BindingIdentifier(ident) => out.push(ident.name.to_string()),
        BindingPatternKind::ObjectPattern(object) => {
            for property in object.properties.iter() {
                binding_names(&property.value, out);
            }
            if let Some(rest) = &object.rest {
                binding_names(&rest.argument, out);
            }
        }
        BindingPatternKind::ArrayPattern(array) => {
            for element in array.elements.iter().flatten() {
                binding_names(element, out);
            }
            if let Some(rest) = &array.rest {
                binding_names(&rest.argument, out);
            }
        }
        BindingPatternKind::AssignmentPattern(assign) => binding_names(&assign.left, out),
    }
}

/// The literal argument of a `require("x")` call.
pub fn require_specifier<'b, 'a>(call: &'b CallExpression<'a>) -> Option<&'b StringLiteral<'a>> {
    let Expression::Identifier(callee) = &call.callee else {
        return None;
    };
    if callee.name.as_str() != "require" || call.arguments.len() != 1 {
        return None;
    }
    match call.arguments.first() {
        Some(Argument::StringLiteral(literal)) => Some(literal),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EditKind {
    Replace,
    /// Every character except line breaks becomes a space
    Blank,
    /// Replacement followed by the line breaks of the replaced text
    ReplaceKeepLines,
}

#[derive(Debug, Clone)]
struct Edit {
    start: usize,
    end: usize,
    kind: EditKind,
    text: String,
}

/// Pending rewrites of one source text.
///
/// Edits may be recorded in any order. When two overlap, the one starting
/// first (or, at the same start, the longer one) wins and the other is
/// dropped, so erasing a statement also swallows edits inside it.
#[derive(Debug, Clone, Default)]
pub struct Edits {
    edits: Vec<Edit>,
}

impl Edits {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, start: u32, end: u32, kind: EditKind, text: String) {
        self.edits.push(Edit { start: start as usize, end: end.max(start) as usize, kind, text });
    }

    pub fn replace(&mut self, span: Span, text: impl Into<String>) {
        self.push(span.start, span.end, EditKind::Replace, text.into());
    }

    /// Replace `span` keeping its line count: `text` goes on the first line
    /// and the rest are left empty.
    pub fn replace_keep_lines(&mut self, span: Span, text: impl Into<String>) {
        self.push(span.start, span.end, EditKind::ReplaceKeepLines, text.into());
    }

    /// Blank `span` with spaces, keeping line and column positions.
    pub fn blank(&mut self, span: Span) {
        self.push(span.start, span.end, EditKind::Blank, String::new());
    }

    /// Whether `span` lies inside an edit already recorded.
    pub fn covers(&self, span: Span) -> bool {
        let (start, end) = (span.start as usize, span.end as usize);
        self.edits.iter().any(|e| e.start <= start && end <= e.end && e.start < e.end)
    }

    pub fn is_empty(&self) -> bool {
        self.edits.is_empty()
    }

    pub fn len(&self) -> usize {
        self.edits.len()
    }

    pub fn apply(mut self, text: &str) -> String {
        self.edits.sort_by_key(|e| (e.start, Reverse(e.end)));

        let mut out = String::with_capacity(text.len());
        let mut last = 0;
        for edit in &self.edits {
            let (start, end) = (edit.start.min(text.len()), edit.end.min(text.len()));
            if start < last {
                continue;
            }
            let (Some(kept), Some(original)) = (text.get(last..start), text.get(start..end)) else {
                continue;
            };
            out.push_str(kept);
            match edit.kind {
                EditKind::Replace => out.push_str(&edit.text),
                EditKind::Blank => {
                    let blanked =
                        original.chars().map(|c| if c == '\n' || c == '\r' { c } else { ' ' });
                    out.extend(blanked)
                }
                EditKind::ReplaceKeepLines => {
                    out.push_str(&edit.text);
                    out.extend(original.chars().filter(|c| *c == '\n'));
                }
            }
            last = end;
        }
        out.push_str(text.get(last..).unwrap_or_default());
        out
    }
}
