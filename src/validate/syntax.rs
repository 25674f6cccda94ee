//! Syntax pass for script sources.
//!
//! Parses each report file once. Parse errors are the hard findings; a
//! clean parse also yields the facts the soft checks look at, so those never
//! see the inside of strings, comments or JSX text.

use std::path::Path;

use oxc_ast::ast::{Declaration, ExportDefaultDeclarationKind, Expression, Program, Statement};
use oxc_ast::{AstKind, Visit};
use oxc_span::{GetSpan, Span};

use crate::ast::{self, binding_names};

pub use crate::ast::SyntaxIssue;

/// A module specifier as written, at its 1-based position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecifierRef {
    pub specifier: String,
    pub line: usize,
    pub column: usize,
}

/// A top-level binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Declared {
    pub name: String,
    pub line: usize,
    pub column: usize,
    /// Type aliases live in their own namespace
    pub is_type: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileFacts {
    pub imports: Vec<SpecifierRef>,
    pub declarations: Vec<Declared>,
    /// Positions of `any` type keywords
    pub any_annotations: Vec<(usize, usize)>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Analysis {
    pub issues: Vec<SyntaxIssue>,
    pub facts: FileFacts,
}

/// Parse `text` as the file at `path` and collect what the checks need.
pub fn analyze(path: &Path, text: &str) -> Analysis {
    let parsed = ast::parse(text, ast::source_type_for(path), |program| {
        let mut collector = Collector { text, facts: FileFacts::default() };
        collector.top_level(program);
        collector.visit_program(program);
        collector.facts
    });
    match parsed {
        Ok(facts) => Analysis { issues: Vec::new(), facts },
        Err(issues) => Analysis { issues, facts: FileFacts::default() },
    }
}

struct Collector<'t> {
    text: &'t str,
    facts: FileFacts,
}

impl Collector<'_> {
    fn position(&self, span: Span) -> (usize, usize) {
        ast::line_col(self.text, span.start as usize)
    }

    fn import(&mut self, specifier: &str, span: Span) {
        // Skip the opening quote.
        let (line, column) = self.position(Span::new(span.start + 1, span.end));
        self.facts.imports.push(SpecifierRef { specifier: specifier.to_string(), line, column });
    }

    fn declare(&mut self, name: &str, span: Span, is_type: bool) {
        let (line, column) = self.position(span);
        self.facts.declarations.push(Declared { name: name.to_string(), line, column, is_type });
    }

    fn top_level(&mut self, program: &Program<'_>) {
        for statement in program.body.iter() {
            match statement {
                Statement::ExportNamedDeclaration(export) => {
                    if let Some(declaration) = &export.declaration {
                        self.declaration(declaration);
                    }
                }
                Statement::ExportDefaultDeclaration(export) => match &export.declaration {
                    ExportDefaultDeclarationKind::FunctionDeclaration(f) if f.body.is_some() => {
                        if let Some(id) = &f.id {
                            self.declare(&id.name, id.span, false);
                        }
                    }
                    ExportDefaultDeclarationKind::ClassDeclaration(c) => {
                        if let Some(id) = &c.id {
                            self.declare(&id.name, id.span, false);
                        }
                    }
                    _ => {}
                },
                _ => {
                    if let Some(declaration) = statement.as_declaration() {
                        self.declaration(declaration);
                    }
                }
            }
        }
    }

    fn declaration(&mut self, declaration: &Declaration<'_>) {
        match declaration {
            Declaration::VariableDeclaration(d) if !d.declare => {
                for declarator in d.declarations.iter() {
                    let mut names = Vec::new();
                    binding_names(&declarator.id, &mut names);
                    for name in names {
                        self.declare(&name, declarator.id.span(), false);
                    }
                }
            }
            // Overload signatures have no body.
            Declaration::FunctionDeclaration(f) if f.body.is_some() && !f.declare => {
                if let Some(id) = &f.id {
                    self.declare(&id.name, id.span, false);
                }
            }
            Declaration::ClassDeclaration(c) if !c.declare => {
                if let Some(id) = &c.id {
                    self.declare(&id.name, id.span, false);
                }
            }
            Declaration::TSEnumDeclaration(e) if !e.declare => {
                self.declare(&e.id.name, e.id.span, false)
            }
            Declaration::TSTypeAliasDeclaration(t) if !t.declare => {
                self.declare(&t.id.name, t.id.span, true)
            }
            _ => {}
        }
    }
}

impl<'a> Visit<'a> for Collector<'_> {
    fn enter_node(&mut self, kind: AstKind<'a>) {
        match kind {
            AstKind::ImportDeclaration(import) => {
                self.import(&import.source.value, import.source.span)
            }
            AstKind::ExportNamedDeclaration(export) => {
                if let Some(source) = &export.source {
                    self.import(&source.value, source.span);
                }
            }
            AstKind::ExportAllDeclaration(export) => {
                self.import(&export.source.value, export.source.span)
            }
            AstKind::ImportExpression(expr) => {
                if let Expression::StringLiteral(literal) = &expr.source {
                    self.import(&literal.value, literal.span);
                }
            }
            AstKind::CallExpression(call) => {
                if let Some(literal) = ast::require_specifier(call) {
                    self.import(&literal.value, literal.span);
                }
            }
            AstKind::TSAnyKeyword(keyword) => {
                let position = self.position(keyword.span);
                self.facts.any_annotations.push(position);
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(facts: &FileFacts) -> Vec<&str> {
        facts.declarations.iter().map(|d| d.name.as_str()).collect()
    }

    #[test]
    fn test_syntax_error_position() {
        let analysis = analyze(Path::new("a.ts"), "export function f() {\n  return 1;\n");
        assert!(!analysis.issues.is_empty());
        assert!(analysis.issues[0].line >= 2);
        assert!(analysis.facts.declarations.is_empty());
    }

    #[test]
    fn test_jsx_text_is_not_code() {
        let src = "export const Smile = () => <span>:) it's `fine</span>;\n";
        let analysis = analyze(Path::new("a.tsx"), src);
        assert!(analysis.issues.is_empty(), "{:?}", analysis.issues);
    }

    #[test]
    fn test_regex_and_template_literals() {
        let src = "const r = /[/'\"`]/g;\nconst t = `a ${ { b: '}' }.b } c`;\n";
        assert!(analyze(Path::new("a.js"), src).issues.is_empty());
    }

    #[test]
    fn test_imports_collected() {
        let src = "import a from './a';\nexport * from \"./b\";\nexport { c } from './c';\n\
                   const d = require('./d');\nconst e = () => import('./e');\n\
                   const s = \"import './no'\";\n";
        let facts = analyze(Path::new("a.ts"), src).facts;
        let found: Vec<(&str, usize, usize)> =
            facts.imports.iter().map(|i| (i.specifier.as_str(), i.line, i.column)).collect();
        assert_eq!(
            found,
            vec![("./a", 1, 16), ("./b", 2, 16), ("./c", 3, 20), ("./d", 4, 20), ("./e", 5, 25)]
        );
    }

    #[test]
    fn test_top_level_declarations() {
        let src = "export const { a, b } = o;\nfunction f(x: string): void;\n\
                   function f(x: unknown) {}\nexport default class C {}\ntype T = string;\n\
                   interface I {}\n{ const inner = 1; }\n";
        let facts = analyze(Path::new("a.ts"), src).facts;
        assert_eq!(names(&facts), vec!["a", "b", "f", "C", "T"]);
        assert!(facts.declarations[4].is_type);
    }

    #[test]
    fn test_any_keywords() {
        let src = "let a: any = 1;\nconst b = a as any;\n// any\n\
                   const c: Array<any> = [];\nconst many = 1;\n";
        let facts = analyze(Path::new("a.ts"), src).facts;
        assert_eq!(facts.any_annotations, vec![(1, 8), (2, 16), (4, 16)]);
    }
}
