//! Module linking.
//!
//! Lowers ES module syntax in transformed output into the bundle's registry
//! form: each module becomes a factory `(module, exports, require, __import)`
//! and its import and export statements become calls on those parameters.
//! Specifiers are kept verbatim; the emitter writes each module's specifier
//! to module-id map next to its factory.
//!
//! Line count is preserved: a statement spanning several lines is replaced on
//! its first line and the remaining lines are left empty, so source-map line
//! mappings stay one to one.

use oxc_ast::ast::{
    Declaration, ExportAllDeclaration, ExportDefaultDeclaration, ExportDefaultDeclarationKind,
    ExportNamedDeclaration, Expression, ImportDeclaration, ImportDeclarationSpecifier, Program,
    Statement,
};
use oxc_ast::{AstKind, Visit};
use oxc_span::{GetSpan, Span};
use thiserror::Error;

use crate::ast::{self, binding_names, Edits};

/// An import found while lowering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportRef {
    pub specifier: String,
    /// Loaded through `import()` rather than at evaluation time
    pub dynamic: bool,
    /// 1-based source line
    pub line: usize,
}

/// A module in registry form.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LinkedModule {
    /// Export bindings, written on the factory's opening line
    pub header: String,
    /// Lowered body; same line count as the input
    pub body: String,
    pub imports: Vec<ImportRef>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("line {line}: {message}")]
pub struct LinkError {
    pub line: usize,
    pub message: String,
}

/// Lower an ES module (or a CommonJS script) into registry form.
pub fn lower(source: &str) -> Result<LinkedModule, LinkError> {
    let lowering = ast::parse_output(source, |program| {
        let mut lowering = Lowering::new(source);
        lowering.module_syntax(program);
        lowering.visit_program(program);
        lowering
    })
    .map_err(|issues| match issues.into_iter().next() {
        Some(issue) => LinkError { line: issue.line, message: issue.message },
        None => LinkError { line: 1, message: "cannot parse module".to_string() },
    })?;

    let Lowering { exports, mut imports, edits, .. } = lowering;
    imports.sort_by_key(|(offset, _)| *offset);
    let imports = imports
        .into_iter()
        .map(|(offset, (specifier, dynamic))| ImportRef {
            specifier,
            dynamic,
            line: ast::line_col(source, offset as usize).0,
        })
        .collect();

    let header = if exports.is_empty() {
        String::new()
    } else {
        let getters: Vec<String> = exports
            .iter()
            .map(|(name, expr)| format!("{}: () => {}", js_key(name), expr))
            .collect();
        format!("__rp_export(exports, {{ {} }});", getters.join(", "))
    };

    Ok(LinkedModule { header, body: edits.apply(source), imports })
}

struct Lowering<'t> {
    text: &'t str,
    /// (exported name, expression producing the value)
    exports: Vec<(String, String)>,
    /// (source offset, (specifier, dynamic))
    imports: Vec<(u32, (String, bool))>,
    edits: Edits,
    temp: usize,
}

impl<'t> Lowering<'t> {
    fn new(text: &'t str) -> Self {
        Self { text, exports: Vec::new(), imports: Vec::new(), edits: Edits::new(), temp: 0 }
    }

    fn temp(&mut self) -> String {
        self.temp += 1;
        format!("__rp_m{}", self.temp)
    }

    fn import(&mut self, at: u32, specifier: &str, dynamic: bool) {
        self.imports.push((at, (specifier.to_string(), dynamic)));
    }

    fn export(&mut self, name: impl Into<String>, expr: impl Into<String>) {
        self.exports.push((name.into(), expr.into()));
    }

    /// Rewrite the top-level import and export statements.
    fn module_syntax(&mut self, program: &Program<'_>) {
        for statement in program.body.iter() {
            match statement {
                Statement::ImportDeclaration(import) => self.import_declaration(import),
                Statement::ExportNamedDeclaration(export) => self.export_named(export),
                Statement::ExportDefaultDeclaration(export) => self.export_default(export),
                Statement::ExportAllDeclaration(export) => self.export_all(export),
                _ => {}
            }
        }
    }

    fn import_declaration(&mut self, import: &ImportDeclaration<'_>) {
        if import.import_kind.is_type() {
            self.edits.replace_keep_lines(import.span, "");
            return;
        }
        let specifier = import.source.value.as_str();
        self.import(import.span.start, specifier, false);
        let required = format!("require({})", quote(specifier));

        let mut default = None;
        let mut namespace = None;
        let mut named = Vec::new();
        for spec in import.specifiers.iter().flat_map(|list| list.iter()) {
            match spec {
                ImportDeclarationSpecifier::ImportDefaultSpecifier(s) => {
                    default = Some(s.local.name.to_string())
                }
                ImportDeclarationSpecifier::ImportNamespaceSpecifier(s) => {
                    namespace = Some(s.local.name.to_string())
                }
                ImportDeclarationSpecifier::ImportSpecifier(s) if !s.import_kind.is_type() => {
                    named.push((s.imported.name().to_string(), s.local.name.to_string()));
                }
                ImportDeclarationSpecifier::ImportSpecifier(_) => {}
            }
        }

        let mut parts = Vec::new();
        let needs_temp = default.is_some() && (namespace.is_some() || !named.is_empty());
        let source = if needs_temp {
            let temp = self.temp();
            parts.push(format!("const {} = {};", temp, required));
            temp
        } else {
            required
        };
        if let Some(name) = default {
            parts.push(format!("const {} = __rp_default({});", name, source));
        }
        if let Some(name) = namespace {
            parts.push(format!("const {} = {};", name, source));
        }
        if !named.is_empty() {
            let bindings: Vec<String> = named
                .into_iter()
                .map(|(imported, local)| {
                    if imported == local {
                        local
                    } else {
                        format!("{}: {}", js_key(&imported), local)
                    }
                })
                .collect();
            parts.push(format!("const {{ {} }} = {};", bindings.join(", "), source));
        }
        if parts.is_empty() {
            parts.push(format!("{};", source));
        }
        self.edits.replace_keep_lines(import.span, parts.join(" "));
    }

    fn export_named(&mut self, export: &ExportNamedDeclaration<'_>) {
        if export.export_kind.is_type() {
            self.edits.replace_keep_lines(export.span, "");
            return;
        }

        if let Some(declaration) = &export.declaration {
            let mut names = Vec::new();
            match declaration {
                Declaration::VariableDeclaration(d) => {
                    for declarator in d.declarations.iter() {
                        binding_names(&declarator.id, &mut names);
                    }
                }
                Declaration::FunctionDeclaration(f) => {
                    names.extend(f.id.as_ref().map(|id| id.name.to_string()))
                }
                Declaration::ClassDeclaration(c) => {
                    names.extend(c.id.as_ref().map(|id| id.name.to_string()))
                }
                // Type-level declarations left by a chain without a script stage
                _ => {
                    self.edits.replace_keep_lines(export.span, "");
                    return;
                }
            }
            for name in names {
                self.export(name.clone(), name);
            }
            // Drop the `export` keyword, keep the declaration.
            self.edits.replace(Span::new(export.span.start, declaration.span().start), "");
            return;
        }

        let specifiers: Vec<(String, String)> = export
            .specifiers
            .iter()
            .filter(|s| !s.export_kind.is_type())
            .map(|s| (s.local.name().to_string(), s.exported.name().to_string()))
            .collect();

        match &export.source {
            Some(source) => {
                let specifier = source.value.as_str();
                self.import(export.span.start, specifier, false);
                let temp = self.temp();
                for (local, exported) in specifiers {
                    self.export(exported, member(&temp, &local));
                }
                let text = format!("const {} = require({});", temp, quote(specifier));
                self.edits.replace_keep_lines(export.span, text);
            }
            None => {
                for (local, exported) in specifiers {
                    self.export(exported, local);
                }
                self.edits.replace_keep_lines(export.span, "");
            }
        }
    }

    fn export_default(&mut self, export: &ExportDefaultDeclaration<'_>) {
        let named = match &export.declaration {
            ExportDefaultDeclarationKind::FunctionDeclaration(f) => {
                f.id.as_ref().map(|id| id.name.to_string())
            }
            ExportDefaultDeclarationKind::ClassDeclaration(c) => {
                c.id.as_ref().map(|id| id.name.to_string())
            }
            ExportDefaultDeclarationKind::TSInterfaceDeclaration(_) => {
                self.edits.replace_keep_lines(export.span, "");
                return;
            }
            _ => None,
        };
        let prefix = Span::new(export.span.start, export.declaration.span().start);
        match named {
            Some(name) => {
                self.export("default", name);
                self.edits.replace(prefix, "");
            }
            None => {
                self.export("default", "__rp_default_export");
                self.edits.replace(prefix, "const __rp_default_export = ");
            }
        }
    }

    fn export_all(&mut self, export: &ExportAllDeclaration<'_>) {
        if export.export_kind.is_type() {
            self.edits.replace_keep_lines(export.span, "");
            return;
        }
        let specifier = export.source.value.as_str();
        self.import(export.span.start, specifier, false);
        let text = match &export.exported {
            Some(name) => {
                let temp = self.temp();
                self.export(name.name().to_string(), temp.clone());
                format!("const {} = require({});", temp, quote(specifier))
            }
            None => format!("__rp_star(exports, require({}));", quote(specifier)),
        };
        self.edits.replace_keep_lines(export.span, text);
    }
}

/// Records `require('x')` calls and turns `import(...)` into `__import(...)`.
impl<'a> Visit<'a> for Lowering<'_> {
    fn enter_node(&mut self, kind: AstKind<'a>) {
        match kind {
            AstKind::ImportExpression(expr) => {
                if let Expression::StringLiteral(literal) = &expr.source {
                    self.import(expr.span.start, literal.value.as_str(), true);
                }
                // `import` may be followed by whitespace or comments before `(`
                let start = expr.span.start;
                if self.text.get(start as usize..).is_some_and(|t| t.starts_with("import")) {
                    let keyword = Span::new(start, start + "import".len() as u32);
                    self.edits.replace(keyword, "__import");
                }
            }
            AstKind::CallExpression(call) => {
                if let Some(literal) = ast::require_specifier(call) {
                    self.import(call.span.start, literal.value.as_str(), false);
                }
            }
            _ => {}
        }
    }
}

fn is_plain_identifier(name: &str) -> bool {
    name.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '$')
        && !name.starts_with(|c: char| c.is_ascii_digit())
        && !name.is_empty()
}

fn js_key(name: &str) -> String {
    if is_plain_identifier(name) {
        name.to_string()
    } else {
        quote(name)
    }
}

/// `object.name`, or `object["name"]` for names that are not identifiers.
fn member(object: &str, name: &str) -> String {
    if is_plain_identifier(name) {
        format!("{}.{}", object, name)
    } else {
        format!("{}[{}]", object, quote(name))
    }
}

fn quote(specifier: &str) -> String {
    serde_json::to_string(specifier).unwrap_or_else(|_| format!("\"{}\"", specifier))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn specifiers(m: &LinkedModule) -> Vec<(&str, bool)> {
        m.imports.iter().map(|i| (i.specifier.as_str(), i.dynamic)).collect()
    }

    #[test]
    fn test_plain_script_unchanged() {
        let src = "const a = 1;\nmodule.exports = a;\n";
        let m = lower(src).unwrap();
        assert_eq!(m.body, src);
        assert!(m.header.is_empty());
        assert!(m.imports.is_empty());
    }

    #[test]
    fn test_import_forms() {
        let src = "import A from './a';\nimport * as NS from \"./ns\";\n\
                   import { x, y as z } from './xy';\nimport D, { e } from './de';\n\
                   import './side.css';\n";
        let m = lower(src).unwrap();
        let lines: Vec<&str> = m.body.lines().collect();
        assert_eq!(lines[0], "const A = __rp_default(require(\"./a\"));");
        assert_eq!(lines[1], "const NS = require(\"./ns\");");
        assert_eq!(lines[2], "const { x, y: z } = require(\"./xy\");");
        assert_eq!(
            lines[3],
            "const __rp_m1 = require(\"./de\"); const D = __rp_default(__rp_m1); \
             const { e } = __rp_m1;"
        );
        assert_eq!(lines[4], "require(\"./side.css\");");
        assert_eq!(
            specifiers(&m),
            vec![
                ("./a", false),
                ("./ns", false),
                ("./xy", false),
                ("./de", false),
                ("./side.css", false)
            ]
        );
    }

    #[test]
    fn test_multiline_import_keeps_line_count() {
        let src = "import {\n  a,\n  b,\n} from './ab';\nconsole.log(a, b);\n";
        let m = lower(src).unwrap();
        assert_eq!(m.body.lines().count(), src.lines().count());
        assert_eq!(m.body.lines().next().unwrap(), "const { a, b } = require(\"./ab\");");
        assert_eq!(m.body.lines().nth(4).unwrap(), "console.log(a, b);");
    }

    #[test]
    fn test_export_forms() {
        let src = "export const a = 1;\nexport function f() {}\nexport default class App {}\n\
                   const b = 2;\nexport { b as c };\nexport * from './all';\n\
                   export { g } from './g';\n";
        let m = lower(src).unwrap();
        let lines: Vec<&str> = m.body.lines().collect();
        assert_eq!(lines[0], "const a = 1;");
        assert_eq!(lines[1], "function f() {}");
        assert_eq!(lines[2], "class App {}");
        assert_eq!(lines[4], "");
        assert_eq!(lines[5], "__rp_star(exports, require(\"./all\"));");
        assert_eq!(lines[6], "const __rp_m1 = require(\"./g\");");
        assert_eq!(
            m.header,
            "__rp_export(exports, { a: () => a, f: () => f, default: () => App, c: () => b, \
             g: () => __rp_m1.g });"
        );
    }

    #[test]
    fn test_export_default_expression() {
        let m = lower("export default {\n  name: 'x',\n};\n").unwrap();
        assert!(m.body.starts_with("const __rp_default_export = {"));
        assert!(m.header.contains("default: () => __rp_default_export"));
    }

    #[test]
    fn test_dynamic_import_and_require() {
        let src = "const lazy = () => import('./lazy');\nconst fs = require('fs');\n\
                   const u = import.meta.url;\n";
        let m = lower(src).unwrap();
        assert!(m.body.contains("() => __import('./lazy')"));
        assert!(m.body.contains("require('fs')"));
        assert!(m.body.contains("import.meta.url"));
        assert_eq!(specifiers(&m), vec![("./lazy", true), ("fs", false)]);
        assert_eq!(m.imports[1].line, 2);
    }

    #[test]
    fn test_strings_and_comments_untouched() {
        let src = "const s = \"import x from './x'\";\n// import('./y')\n\
                   const t = `export const z = 1`;\n";
        let m = lower(src).unwrap();
        assert_eq!(m.body, src);
        assert!(m.imports.is_empty());
    }

    #[test]
    fn test_destructuring_export() {
        let m = lower("export const { a, b: [c, ...d] } = obj;\n").unwrap();
        assert_eq!(m.body, "const { a, b: [c, ...d] } = obj;\n");
        assert_eq!(m.header, "__rp_export(exports, { a: () => a, c: () => c, d: () => d });");
    }

    #[test]
    fn test_jsx_body_and_string_export_names() {
        let src = "export const Smile = () => <span>:) import('x')</span>;\n\
                   export { Smile as \"a-b\" };\n";
        let m = lower(src).unwrap();
        assert!(m.body.contains("<span>:) import('x')</span>"));
        assert!(m.imports.is_empty());
        assert!(m.header.contains("\"a-b\": () => Smile"));
    }

    #[test]
    fn test_syntax_error_has_line() {
        let err = lower("const a = 1;\nconst = 2;\n").unwrap_err();
        assert_eq!(err.line, 2);
    }
}
