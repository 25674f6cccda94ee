//! TypeScript source stage.
//!
//! Transpile-only: everything that exists purely at the type level is
//! blanked out with spaces, everything else passes through. Blanking keeps
//! every remaining token on its original line and column, so source maps
//! need no adjustment. Constructs that need code generation (enums,
//! namespaces with runtime code, parameter properties) are rejected. Full
//! type checking happens on the validation side-channel, not here.

use std::path::Path;

use oxc_ast::ast::{
    Declaration, ExportDefaultDeclarationKind, ImportDeclarationSpecifier, MethodDefinitionType,
    PropertyDefinitionType, TSIndexSignature, TSModuleDeclaration,
};
use oxc_ast::{visit::walk, AstKind, Visit};
use oxc_span::{GetSpan, Span};

use super::{StageInput, Transform, TransformOutput};
use crate::ast::{self, Edits};

#[derive(Debug, Default)]
pub struct ScriptTransform;

impl ScriptTransform {
    pub fn new() -> Self {
        Self
    }
}

impl Transform for ScriptTransform {
    fn name(&self) -> &'static str {
        "script"
    }

    fn apply(&self, input: &StageInput) -> Result<TransformOutput, String> {
        let source = input.text()?;
        erase_types(source, Path::new(&input.id)).map(TransformOutput::code)
    }
}

/// Blank the type-level parts of `source`.
pub fn erase_types(source: &str, path: &Path) -> Result<String, String> {
    let source_type = ast::source_type_for(path).with_typescript(true);
    let (edits, unsupported) = ast::parse(source, source_type, |program| {
        let mut eraser = Eraser { text: source, edits: Edits::new(), unsupported: None };
        eraser.visit_program(program);
        (eraser.edits, eraser.unsupported)
    })
    .map_err(|issues| issues.first().map(ToString::to_string).unwrap_or_default())?;

    if let Some((offset, message)) = unsupported {
        let (line, column) = ast::line_col(source, offset as usize);
        return Err(format!("{}:{}: {}", line, column, message));
    }
    Ok(edits.apply(source))
}

/// Keywords that only mean something to the type checker when they prefix
/// a class member.
const MEMBER_MODIFIERS: [&str; 6] =
    ["public", "private", "protected", "readonly", "override", "declare"];

struct Eraser<'t> {
    text: &'t str,
    edits: Edits,
    /// First construct that cannot be erased
    unsupported: Option<(u32, &'static str)>,
}

impl Eraser<'_> {
    fn reject(&mut self, at: u32, message: &'static str) {
        self.unsupported.get_or_insert((at, message));
    }

    fn blank(&mut self, start: u32, end: u32) {
        if start < end {
            self.edits.blank(Span::new(start, end));
        }
    }

    /// Blank the first `marker` character in `start..end` (`?` or `!`).
    fn blank_marker(&mut self, start: u32, end: u32, marker: char) {
        let Some(slice) = self.text.get(start as usize..end as usize) else { return };
        if let Some(idx) = slice.find(marker) {
            let at = start + idx as u32;
            self.blank(at, at + 1);
        }
    }

    /// Blank the span and a comma following it, for list elements.
    fn blank_list_item(&mut self, span: Span) {
        let rest = self.text.get(span.end as usize..).unwrap_or_default();
        let trimmed = rest.trim_start();
        let end = if trimmed.starts_with(',') {
            span.end + (rest.len() - trimmed.len()) as u32 + 1
        } else {
            span.end
        };
        self.blank(span.start, end);
    }

    /// Blank modifier keywords appearing as whole words in `start..end`.
    fn blank_modifiers(&mut self, start: u32, end: u32) {
        let Some(slice) = self.text.get(start as usize..end as usize) else { return };
        let mut offset = 0;
        for word in slice.split(|c: char| !(c.is_alphanumeric() || c == '_' || c == '$')) {
            if MEMBER_MODIFIERS.contains(&word) {
                let at = start + offset as u32;
                self.blank(at, at + word.len() as u32);
            }
            offset += word.len() + 1;
        }
    }

    fn namespace(&mut self, module: &TSModuleDeclaration<'_>) {
        if module.declare {
            self.blank(module.span.start, module.span.end);
        } else {
            self.reject(module.span.start, "namespaces need code generation and are not supported");
        }
    }
}

/// Span of an inline `type` import specifier.
fn type_specifier(specifier: &ImportDeclarationSpecifier<'_>) -> Option<Span> {
    match specifier {
        ImportDeclarationSpecifier::ImportSpecifier(s) if s.import_kind.is_type() => Some(s.span),
        _ => None,
    }
}

/// Declarations with no runtime meaning.
fn is_type_only(declaration: &Declaration<'_>) -> bool {
    match declaration {
        Declaration::TSInterfaceDeclaration(_) | Declaration::TSTypeAliasDeclaration(_) => true,
        Declaration::VariableDeclaration(d) => d.declare,
        Declaration::FunctionDeclaration(f) => f.declare || f.body.is_none(),
        Declaration::ClassDeclaration(c) => c.declare,
        Declaration::TSEnumDeclaration(e) => e.declare,
        Declaration::TSModuleDeclaration(m) => m.declare,
        _ => false,
    }
}

impl<'a> Visit<'a> for Eraser<'_> {
    // Index signatures have no `AstKind` variant, so they are handled here.
    fn visit_ts_index_signature(&mut self, it: &TSIndexSignature<'a>) {
        if !self.edits.covers(it.span) {
            self.blank(it.span.start, it.span.end);
        }
        walk::walk_ts_index_signature(self, it);
    }

    fn enter_node(&mut self, kind: AstKind<'a>) {
        if self.edits.covers(kind.span()) {
            return;
        }
        match kind {
            AstKind::ImportDeclaration(import) => {
                let specifiers = import.specifiers.as_ref();
                let all_types = specifiers.is_some_and(|list| {
                    !list.is_empty() && list.iter().all(|s| type_specifier(s).is_some())
                });
                if import.import_kind.is_type() || all_types {
                    self.blank(import.span.start, import.span.end);
                } else if let Some(list) = specifiers {
                    for span in list.iter().filter_map(type_specifier) {
                        self.blank_list_item(span);
                    }
                }
            }
            AstKind::ExportNamedDeclaration(export) => {
                let type_declaration = export.declaration.as_ref().is_some_and(is_type_only);
                let all_types = !export.specifiers.is_empty()
                    && export.specifiers.iter().all(|s| s.export_kind.is_type());
                if export.export_kind.is_type() || type_declaration || all_types {
                    self.blank(export.span.start, export.span.end);
                } else {
                    for specifier in export.specifiers.iter().filter(|s| s.export_kind.is_type()) {
                        self.blank_list_item(specifier.span);
                    }
                }
            }
            AstKind::ExportDefaultDeclaration(export) => {
                let declaration = &export.declaration;
                if matches!(declaration, ExportDefaultDeclarationKind::TSInterfaceDeclaration(_)) {
                    self.blank(export.span.start, export.span.end);
                }
            }
            AstKind::ExportAllDeclaration(export) if export.export_kind.is_type() => {
                self.blank(export.span.start, export.span.end);
            }
            AstKind::TSInterfaceDeclaration(d) => self.blank(d.span.start, d.span.end),
            AstKind::TSTypeAliasDeclaration(d) => self.blank(d.span.start, d.span.end),
            AstKind::TSModuleDeclaration(d) => self.namespace(d),
            AstKind::TSEnumDeclaration(d) => {
                if d.declare {
                    self.blank(d.span.start, d.span.end);
                } else {
                    self.reject(d.span.start, "enums need code generation and are not supported");
                }
            }
            AstKind::TSImportEqualsDeclaration(d) => {
                if d.import_kind.is_type() {
                    self.blank(d.span.start, d.span.end);
                } else {
                    let message = "`import x = require()` is not supported; use an ES import";
                    self.reject(d.span.start, message);
                }
            }
            AstKind::TSExportAssignment(d) => {
                self.reject(d.span.start, "`export =` is not supported; use `export default`")
            }
            AstKind::VariableDeclaration(d) if d.declare => self.blank(d.span.start, d.span.end),
            AstKind::VariableDeclarator(d) if d.definite => {
                let limit = d.id.type_annotation.as_ref().map_or(d.span.end, |t| t.span.start);
                self.blank_marker(d.id.kind.span().end, limit, '!');
            }
            AstKind::Function(f) => {
                if f.declare || f.body.is_none() {
                    // Ambient declarations and overload signatures
                    self.blank(f.span.start, f.span.end);
                } else if let Some(this_param) = &f.this_param {
                    self.blank_list_item(this_param.span);
                }
            }
            AstKind::Class(c) => {
                if c.declare {
                    self.blank(c.span.start, c.span.end);
                    return;
                }
                if c.r#abstract {
                    // The class span may or may not start at the modifier.
                    let head_end = c.span.start as usize + "abstract".len();
                    let head = self.text.get(..head_end).unwrap_or_default();
                    if let Some(at) = head.rfind("abstract") {
                        self.blank(at as u32, (at + "abstract".len()) as u32);
                    }
                }
                if let Some(first) = c.implements.as_ref().and_then(|list| list.first()) {
                    let head = self.text.get(..first.span.start as usize).unwrap_or_default();
                    let last = c.implements.as_ref().and_then(|list| list.last());
                    if let (Some(keyword), Some(last)) = (head.rfind("implements"), last) {
                        self.blank(keyword as u32, last.span.end);
                    }
                }
            }
            AstKind::PropertyDefinition(p) => {
                let abstract_member =
                    p.r#type == PropertyDefinitionType::TSAbstractPropertyDefinition;
                if p.declare || abstract_member {
                    self.blank(p.span.start, p.span.end);
                    return;
                }
                self.blank_modifiers(p.span.start, p.key.span().start);
                if p.optional || p.definite {
                    let limit = p
                        .type_annotation
                        .as_ref()
                        .map(|t| t.span.start)
                        .or_else(|| p.value.as_ref().map(|v| v.span().start))
                        .unwrap_or(p.span.end);
                    self.blank_marker(p.key.span().end, limit, if p.optional { '?' } else { '!' });
                }
            }
            AstKind::MethodDefinition(m) => {
                let abstract_member = m.r#type == MethodDefinitionType::TSAbstractMethodDefinition;
                if abstract_member || m.value.body.is_none() {
                    self.blank(m.span.start, m.span.end);
                    return;
                }
                self.blank_modifiers(m.span.start, m.key.span().start);
            }
            AstKind::FormalParameter(p) => {
                if p.accessibility.is_some() || p.readonly || p.r#override {
                    let message = "parameter properties need code generation and are not supported";
                    self.reject(p.span.start, message);
                    return;
                }
                if p.pattern.optional {
                    let annotation = p.pattern.type_annotation.as_ref();
                    let limit = annotation.map_or(p.span.end, |t| t.span.start);
                    self.blank_marker(p.pattern.kind.span().end, limit, '?');
                }
            }
            AstKind::TSTypeAnnotation(t) => self.blank(t.span.start, t.span.end),
            AstKind::TSTypeParameterDeclaration(t) => self.blank(t.span.start, t.span.end),
            AstKind::TSTypeParameterInstantiation(t) => self.blank(t.span.start, t.span.end),
            AstKind::TSAsExpression(e) => self.blank(e.expression.span().end, e.span.end),
            AstKind::TSSatisfiesExpression(e) => self.blank(e.expression.span().end, e.span.end),
            AstKind::TSNonNullExpression(e) => self.blank(e.expression.span().end, e.span.end),
            AstKind::TSTypeAssertion(e) => self.blank(e.span.start, e.expression.span().start),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oxc_span::SourceType;

    fn run(source: &str) -> String {
        let input = StageInput::new("src/a.ts", "src/a.ts", source.as_bytes().to_vec());
        String::from_utf8(ScriptTransform::new().apply(&input).unwrap().content).unwrap()
    }

    /// Output with all whitespace removed.
    fn compact(source: &str) -> String {
        run(source).chars().filter(|c| !c.is_whitespace()).collect()
    }

    /// Erase `source` and check the result is plain JavaScript.
    fn run_plain(source: &str) -> String {
        let out = run(source);
        let parsed = ast::parse(&out, SourceType::mjs(), |_| ());
        assert!(parsed.is_ok(), "not plain JavaScript:\n{}", out);
        out
    }

    fn rejected(source: &str) -> String {
        let input = StageInput::new("src/a.ts", "src/a.ts", source.as_bytes().to_vec());
        ScriptTransform::new().apply(&input).unwrap_err()
    }

    #[test]
    fn test_plain_code_unchanged() {
        let src = "const a = 1;\nexport function f() { return a; }\n";
        assert_eq!(run(src), src);
    }

    #[test]
    fn test_erases_interface_and_keeps_line_count() {
        let src = "export interface Props {\n  name: string;\n}\nconst x = 1;\n";
        let out = run_plain(src);
        assert_eq!(out.lines().count(), src.lines().count());
        assert!(!out.contains("interface"));
        assert_eq!(out.lines().nth(3), Some("const x = 1;"));
    }

    #[test]
    fn test_erases_type_alias_union() {
        let src = "type Kind =\n  | 'a'\n  | 'b';\nlet k = 'a';\n";
        let out = run_plain(src);
        assert!(!out.contains("Kind"));
        assert!(out.contains("let k = 'a';"));
    }

    #[test]
    fn test_erases_import_type() {
        let src = "import type { Foo } from './foo';\nimport { bar } from './bar';\n";
        let out = run_plain(src);
        assert!(!out.contains("Foo"));
        assert!(out.contains("import { bar } from './bar';"));
    }

    #[test]
    fn test_strips_inline_type_specifiers() {
        assert_eq!(compact("import { type Foo, bar } from './m';\n"), "import{bar}from'./m';");
        assert_eq!(compact("import { type Only } from './m';\n"), "");
        assert_eq!(compact("const a = 1;\nexport { type T, a };\n"), "consta=1;export{a};");
    }

    #[test]
    fn test_erases_declare_block() {
        let src = "declare global {\n  interface Window { x: number }\n}\nwindow.x = 1;\n";
        let out = run_plain(src);
        assert!(!out.contains("declare"));
        assert!(out.contains("window.x = 1;"));
    }

    #[test]
    fn test_erases_annotations_and_keeps_columns() {
        let src = "function f(a: string, b?: number): void {}\n";
        let out = run_plain(src);
        assert_eq!(compact(src), "functionf(a,b){}");
        assert_eq!(out.len(), src.len());
        assert_eq!(out.find('b'), src.find('b'));
    }

    #[test]
    fn test_erases_generics_and_assertions() {
        let src =
            "const m = new Map<string, number>();\nconst n = (m as any)!.size satisfies number;\n";
        run_plain(src);
        assert_eq!(compact(src), "constm=newMap();constn=(m).size;");
        assert_eq!(compact("function id<T>(x: T): T { return x; }\n"), "functionid(x){returnx;}");
    }

    #[test]
    fn test_erases_class_members() {
        let src = "abstract class A implements B, C {\n  private readonly x: number = 1;\n  \
                   declare y: string;\n  z!: number;\n  abstract run(): void;\n  \
                   static go(this: A, n: number) {}\n}\n";
        let out = run_plain(src);
        let gone_words =
            ["abstract", "implements", "private", "readonly", "declare", "y:", "run", "this", "!"];
        for gone in gone_words {
            assert!(!out.contains(gone), "{} left in:\n{}", gone, out);
        }
        let out: String = out.chars().filter(|c| !c.is_whitespace()).collect();
        assert!(out.starts_with("classA{x=1;z"));
        assert!(out.contains("staticgo(n){}"));
    }

    #[test]
    fn test_erases_overloads_and_ambient_declarations() {
        let src = "export function f(a: string): void;\nexport function f(a: unknown) {}\n\
                   declare const g: number;\nexport declare function h(): void;\n";
        let out = run_plain(src);
        assert_eq!(out.matches("function").count(), 1);
        assert!(out.contains("export function f(a"));
        assert!(!out.contains("declare"));
    }

    #[test]
    fn test_tsx_keeps_jsx() {
        let input = StageInput::new(
            "src/a.tsx",
            "src/a.tsx",
            b"export const Smile = (p: { n: number }) => <span>:) {p.n}</span>;\n".to_vec(),
        );
        let out = String::from_utf8(ScriptTransform::new().apply(&input).unwrap().content).unwrap();
        assert!(out.contains(&format!("(p{}) => <span>:) {{p.n}}</span>;", " ".repeat(15))));
    }

    #[test]
    fn test_rejects_code_generating_constructs() {
        assert!(rejected("enum E { A }\n").contains("enums"));
        assert!(rejected("namespace N { export const a = 1; }\n").contains("namespaces"));
        let message = rejected("class A { constructor(private x: number) {} }\n");
        assert!(message.contains("parameter properties"));
        assert!(rejected("const a = 1;\nenum E { A }\n").starts_with("2:1:"));
    }

    #[test]
    fn test_unterminated_interface_fails() {
        let source = b"interface A {\n  x: number;\n".to_vec();
        let input = StageInput::new("src/a.ts", "src/a.ts", source);
        assert!(ScriptTransform::new().apply(&input).is_err());
    }
}
