//! Bundle emission.
//!
//! Each entry point becomes one primary artifact (an ES module holding the
//! registry runtime and every statically reachable module) and, when the
//! entry has dynamic imports, one secondary chunk holding the modules only
//! those imports reach. Source maps follow [`SourceMapStyle`]: production
//! writes full line mappings to a separate `.map` file, development embeds
//! module-level mappings in the primary artifact.

pub mod runtime;
pub mod source_map;

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use oxc_ast::{AstKind, Visit};
use oxc_span::Span;
use rayon::prelude::*;
use thiserror::Error;
use tracing::debug;

use crate::ast::{self, Edits};
use crate::graph::{failed_stub, DepTarget, ModuleBody, ModuleGraph, ModuleRecord};
use crate::mode::SourceMapStyle;
use crate::transforms::js_string;

pub use source_map::SourceMapBuilder;

/// Placeholder replaced by the entry name in output file templates.
pub const NAME_PLACEHOLDER: &str = "[name]";

#[derive(Debug, Error)]
pub enum EmitError {
    #[error("failed to write {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("entry '{name}' points at module '{id}', which is not in the graph")]
    MissingEntry { name: String, id: String },
}

/// Emission settings for one run.
#[derive(Debug, Clone)]
pub struct EmitOptions {
    pub out_dir: PathBuf,
    /// Primary artifact template, e.g. `[name].js`
    pub filename: String,
    /// Secondary chunk template, e.g. `[name].bundle.js`
    pub chunk_filename: String,
    pub minify: bool,
    pub source_maps: SourceMapStyle,
    /// Written as the maps' `sourceRoot`, relative to the output directory
    pub source_root: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Primary,
    Chunk,
    SourceMap,
    Asset,
}

/// One written file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    /// Entry the file belongs to; `None` for shared assets
    pub entry: Option<String>,
    pub kind: ArtifactKind,
    /// Path relative to the output directory
    pub path: PathBuf,
    pub bytes: usize,
}

/// Everything one emission wrote.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutputArtifacts {
    pub out_dir: PathBuf,
    pub artifacts: Vec<Artifact>,
}

impl OutputArtifacts {
    pub fn of_kind(&self, kind: ArtifactKind) -> impl Iterator<Item = &Artifact> {
        self.artifacts.iter().filter(move |a| a.kind == kind)
    }

    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }

    pub fn total_bytes(&self) -> usize {
        self.artifacts.iter().map(|a| a.bytes).sum()
    }
}

/// Expand an output template for `name`.
pub fn expand_template(template: &str, name: &str) -> String {
    template.replace(NAME_PLACEHOLDER, name)
}

/// `sourceRoot` pointing from `out_dir` back at `root`.
pub fn source_root_for(out_dir: &Path, root: &Path) -> String {
    match out_dir.strip_prefix(root) {
        Ok(rel) => {
            let depth = rel.components().filter(|c| matches!(c, Component::Normal(_))).count();
            vec![".."; depth].join("/")
        }
        Err(_) => root.to_string_lossy().replace('\\', "/"),
    }
}

/// A file rendered in memory, before it is written.
struct Rendered {
    entry: Option<String>,
    kind: ArtifactKind,
    name: String,
    contents: Vec<u8>,
}

/// Write every entry's artifacts and the graph's assets.
pub fn emit(graph: &ModuleGraph, options: &EmitOptions) -> Result<OutputArtifacts, EmitError> {
    let rendered: Vec<Vec<Rendered>> = graph
        .entries()
        .par_iter()
        .map(|(name, id)| render_entry(graph, options, name, id))
        .collect::<Result<_, _>>()?;

    fs::create_dir_all(&options.out_dir)
        .map_err(|source| EmitError::Io { path: options.out_dir.clone(), source })?;

    let mut files: Vec<Rendered> = rendered.into_iter().flatten().collect();
    files.extend(graph.assets().iter().map(|(name, bytes)| Rendered {
        entry: None,
        kind: ArtifactKind::Asset,
        name: name.clone(),
        contents: bytes.clone(),
    }));

    let artifacts = files
        .par_iter()
        .map(|file| {
            let path = options.out_dir.join(&file.name);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)
                    .map_err(|source| EmitError::Io { path: parent.to_path_buf(), source })?;
            }
            fs::write(&path, &file.contents)
                .map_err(|source| EmitError::Io { path: path.clone(), source })?;
            Ok(Artifact {
                entry: file.entry.clone(),
                kind: file.kind,
                path: PathBuf::from(&file.name),
                bytes: file.contents.len(),
            })
        })
        .collect::<Result<Vec<_>, EmitError>>()?;

    remove_stale_chunks(graph, options, &artifacts)?;

    debug!(count = artifacts.len(), out_dir = %options.out_dir.display(), "artifacts written");
    Ok(OutputArtifacts { out_dir: options.out_dir.clone(), artifacts })
}

/// A rebuild that no longer has dynamic imports must not leave the previous
/// chunk behind.
fn remove_stale_chunks(
    graph: &ModuleGraph,
    options: &EmitOptions,
    written: &[Artifact],
) -> Result<(), EmitError> {
    let written: BTreeSet<&Path> = written.iter().map(|a| a.path.as_path()).collect();
    for name in graph.entries().keys() {
        let chunk = expand_template(&options.chunk_filename, name);
        for stale in [chunk.clone(), format!("{}.map", chunk)] {
            if written.contains(Path::new(&stale)) {
                continue;
            }
            let path = options.out_dir.join(&stale);
            match fs::remove_file(&path) {
                Ok(()) => debug!(path = %path.display(), "removed stale chunk"),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(source) => return Err(EmitError::Io { path, source }),
            }
        }
    }
    Ok(())
}

fn render_entry(
    graph: &ModuleGraph,
    options: &EmitOptions,
    name: &str,
    id: &str,
) -> Result<Vec<Rendered>, EmitError> {
    if !graph.contains(id) {
        return Err(EmitError::MissingEntry { name: name.to_string(), id: id.to_string() });
    }
    let plan = graph.plan(id);
    let primary_name = expand_template(&options.filename, name);
    let chunk_name =
        (!plan.secondary.is_empty()).then(|| expand_template(&options.chunk_filename, name));

    let mut out = Vec::new();

    let mut primary = ChunkWriter::new(&primary_name, options);
    primary.push_text(&runtime::runtime_source(chunk_name.as_deref()));
    primary.push_line("__rp_define({".to_string());
    for module_id in &plan.primary {
        if let Some(record) = graph.get(module_id) {
            primary.push_module(record);
        }
    }
    primary.push_line("});".to_string());
    primary.push_line(format!("export default __rp_load({});", js_string(id)));
    out.extend(primary.finish(name, ArtifactKind::Primary));

    if let Some(chunk_name) = chunk_name {
        let mut chunk = ChunkWriter::new(&chunk_name, options);
        chunk.push_line("export default function (__rp_define) {".to_string());
        chunk.push_line("__rp_define({".to_string());
        for module_id in &plan.secondary {
            if let Some(record) = graph.get(module_id) {
                chunk.push_module(record);
            }
        }
        chunk.push_line("});".to_string());
        chunk.push_line("}".to_string());
        out.extend(chunk.finish(name, ArtifactKind::Chunk));
    }

    debug!(
        entry = name,
        primary = plan.primary.len(),
        secondary = plan.secondary.len(),
        "entry rendered"
    );
    Ok(out)
}

/// Accumulates one generated file and its line mappings.
struct ChunkWriter<'a> {
    file: String,
    options: &'a EmitOptions,
    lines: Vec<String>,
    map: SourceMapBuilder,
}

impl<'a> ChunkWriter<'a> {
    fn new(file: &str, options: &'a EmitOptions) -> Self {
        let mut map = SourceMapBuilder::new(file, options.source_root.clone());
        if options.source_maps == SourceMapStyle::Separate {
            map = map.with_contents();
        }
        Self { file: file.to_string(), options, lines: Vec::new(), map }
    }

    fn push_line(&mut self, line: String) {
        self.lines.push(line);
    }

    fn push_text(&mut self, text: &str) {
        self.lines.extend(text.lines().map(str::to_string));
    }

    fn push_module(&mut self, record: &ModuleRecord) {
        let source = self.map.add_source(&record.id, record.source.as_deref());
        let source_lines = record.source.as_deref().map(|s| s.lines().count()).unwrap_or(0);

        let header = match &record.body {
            ModuleBody::Linked(linked) => linked.header.as_str(),
            ModuleBody::Failed { .. } => "",
        };
        if self.options.source_maps == SourceMapStyle::Inline {
            self.map.map_line(self.lines.len(), source, 0);
        }
        self.push_line(format!(
            "{}: [function (module, exports, require, __import) {{{}",
            js_string(&record.id),
            header
        ));

        match &record.body {
            ModuleBody::Linked(linked) => {
                let body_lines = if self.options.minify {
                    minify_lines(&linked.body)
                } else {
                    linked.body.split('\n').map(str::to_string).enumerate().collect()
                };
                for (source_line, text) in body_lines {
                    let separate = self.options.source_maps == SourceMapStyle::Separate;
                    if separate && source_line < source_lines {
                        self.map.map_line(self.lines.len(), source, source_line);
                    }
                    self.push_line(text);
                }
            }
            ModuleBody::Failed { message } => self.push_line(failed_stub(&record.id, message)),
        }

        self.push_line(format!("}}, {}],", deps_object(record)));
    }

    fn finish(mut self, entry: &str, kind: ArtifactKind) -> Vec<Rendered> {
        let mut out = Vec::with_capacity(2);
        match self.options.source_maps {
            SourceMapStyle::Inline => {
                let comment = self.map.to_inline_comment();
                self.push_line(comment);
            }
            SourceMapStyle::Separate => {
                let map_name = format!("{}.map", self.file);
                let map_file = map_name.rsplit('/').next().unwrap_or(&map_name).to_string();
                self.push_line(format!("//# sourceMappingURL={}", map_file));
                out.push(Rendered {
                    entry: Some(entry.to_string()),
                    kind: ArtifactKind::SourceMap,
                    name: map_name,
                    contents: self.map.to_json().into_bytes(),
                });
            }
        }

        let mut text = self.lines.join("\n");
        text.push('\n');
        out.insert(
            0,
            Rendered {
                entry: Some(entry.to_string()),
                kind,
                name: self.file,
                contents: text.into_bytes(),
            },
        );
        out
    }
}

/// `{"specifier": "module id" | null, ...}` for a module's factory.
fn deps_object(record: &ModuleRecord) -> String {
    let deps: BTreeMap<&str, Option<&str>> = record
        .deps
        .iter()
        .map(|(specifier, dep)| {
            let target = match &dep.target {
                DepTarget::Module(id) => Some(id.as_str()),
                DepTarget::Unavailable => None,
            };
            (specifier.as_str(), target)
        })
        .collect();
    serde_json::to_string(&deps).unwrap_or_else(|_| "{}".to_string())
}

/// Drop blank and comment-only lines and strip indentation, keeping each
/// kept line's zero-based index in the input. Lines that begin inside a
/// string, template literal or block comment are kept verbatim. A body that
/// does not parse is passed through unchanged.
fn minify_lines(body: &str) -> Vec<(usize, String)> {
    let lines: Vec<&str> = body.split('\n').collect();
    let Ok((literals, comments)) = ast::parse_output(body, |program| {
        let mut literals = Literals(Vec::new());
        literals.visit_program(program);
        (literals.0, ast::comment_ranges(body, program))
    }) else {
        return lines.into_iter().map(str::to_string).enumerate().collect();
    };

    let mut edits = Edits::new();
    for &(start, end) in &comments {
        edits.blank(Span::new(start as u32, end as u32));
    }
    let masked = edits.apply(body);
    let mask: Vec<&str> = masked.split('\n').collect();

    let is_block = |start: usize| body.get(start..).is_some_and(|t| t.starts_with("/*"));
    let block_comments = comments.iter().copied().filter(|&(start, _)| is_block(start));
    let spans: Vec<(usize, usize)> = literals.into_iter().chain(block_comments).collect();
    let mut starts = Vec::with_capacity(lines.len());
    let mut offset = 0;
    for line in &lines {
        starts.push(offset);
        offset += line.len() + 1;
    }
    let in_literal = |i: usize| {
        starts.get(i).is_some_and(|&at| spans.iter().any(|&(start, end)| start < at && at < end))
    };

    let mut out = Vec::with_capacity(lines.len());
    for (i, line) in lines.iter().enumerate() {
        if in_literal(i) {
            out.push((i, line.to_string()));
            continue;
        }
        let continues = in_literal(i + 1);
        if !continues && mask.get(i).is_some_and(|m| m.trim().is_empty()) {
            continue;
        }
        let kept = if continues { line.trim_start() } else { line.trim() };
        out.push((i, kept.to_string()));
    }
    out
}

/// Spans of string and template literals, which may cross lines.
struct Literals(Vec<(usize, usize)>);

impl<'a> Visit<'a> for Literals {
    fn enter_node(&mut self, kind: AstKind<'a>) {
        let span = match kind {
            AstKind::StringLiteral(literal) => literal.span,
            AstKind::TemplateLiteral(template) => template.span,
            _ => return,
        };
        self.0.push((span.start as usize, span.end as usize));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Dependency, ModuleRecord};
    use crate::link::lower;
    use tempfile::TempDir;

    fn options(out_dir: &Path, style: SourceMapStyle) -> EmitOptions {
        EmitOptions {
            out_dir: out_dir.to_path_buf(),
            filename: "[name].js".to_string(),
            chunk_filename: "[name].bundle.js".to_string(),
            minify: style == SourceMapStyle::Separate,
            source_maps: style,
            source_root: String::new(),
        }
    }

    fn module(id: &str, source: &str, deps: &[(&str, Option<&str>, bool)]) -> ModuleRecord {
        let mut record = ModuleRecord::linked(id, id, lower(source).unwrap())
            .with_source(Some(source.to_string()));
        for (specifier, target, dynamic) in deps {
            let target = match target {
                Some(t) => DepTarget::Module(t.to_string()),
                None => DepTarget::Unavailable,
            };
            record.deps.insert(specifier.to_string(), Dependency { target, dynamic: *dynamic });
        }
        record
    }

    fn sample_graph(dynamic: bool) -> ModuleGraph {
        let mut graph = ModuleGraph::new();
        let entry = if dynamic {
            "import icon from './b.svg';\nexport const lazy = () => import('./lazy');\n"
        } else {
            "import icon from './b.svg';\nexport const shown = icon;\n"
        };
        let mut deps = vec![("./b.svg", Some("src/b.svg"), false)];
        if dynamic {
            deps.push(("./lazy", Some("src/lazy.ts"), true));
        }
        graph.insert(module("src/a.ts", entry, &deps));
        graph.insert(module("src/b.svg", "export default \"<svg/>\";\n", &[]));
        graph.insert(module("src/lazy.ts", "export const x = 1;\n", &[]));
        graph.add_entry("renderers", "src/a.ts");
        graph
    }

    #[test]
    fn test_development_single_artifact_inline_map() {
        let dir = TempDir::new().unwrap();
        let out = emit(&sample_graph(false), &options(dir.path(), SourceMapStyle::Inline)).unwrap();

        assert_eq!(out.of_kind(ArtifactKind::Primary).count(), 1);
        assert_eq!(out.of_kind(ArtifactKind::Chunk).count(), 0);
        assert_eq!(out.of_kind(ArtifactKind::SourceMap).count(), 0);

        let text = fs::read_to_string(dir.path().join("renderers.js")).unwrap();
        assert!(text.contains("\"src/a.ts\": [function (module, exports, require, __import) {"));
        assert!(text.contains("\"src/b.svg\""));
        assert!(!text.contains("src/lazy.ts"));
        assert!(text.contains("export default __rp_load(\"src/a.ts\");"));
        let last = text.trim_end().lines().last().unwrap();
        assert!(last.starts_with("//# sourceMappingURL=data:application/json"));
        assert!(!dir.path().join("renderers.bundle.js").exists());
    }

    #[test]
    fn test_dynamic_import_produces_chunk() {
        let dir = TempDir::new().unwrap();
        let out = emit(&sample_graph(true), &options(dir.path(), SourceMapStyle::Inline)).unwrap();
        assert_eq!(out.of_kind(ArtifactKind::Chunk).count(), 1);

        let primary = fs::read_to_string(dir.path().join("renderers.js")).unwrap();
        let chunk = fs::read_to_string(dir.path().join("renderers.bundle.js")).unwrap();
        assert!(primary.contains("\"./renderers.bundle.js\""));
        assert!(!primary.contains("\"src/lazy.ts\": ["));
        assert!(chunk.starts_with("export default function (__rp_define) {"));
        assert!(chunk.contains("\"src/lazy.ts\": ["));
    }

    #[test]
    fn test_stale_chunk_removed() {
        let dir = TempDir::new().unwrap();
        emit(&sample_graph(true), &options(dir.path(), SourceMapStyle::Inline)).unwrap();
        assert!(dir.path().join("renderers.bundle.js").exists());
        emit(&sample_graph(false), &options(dir.path(), SourceMapStyle::Inline)).unwrap();
        assert!(!dir.path().join("renderers.bundle.js").exists());
    }

    #[test]
    fn test_production_separate_map() {
        let dir = TempDir::new().unwrap();
        let options = options(dir.path(), SourceMapStyle::Separate);
        let out = emit(&sample_graph(false), &options).unwrap();
        assert_eq!(out.of_kind(ArtifactKind::SourceMap).count(), 1);

        let text = fs::read_to_string(dir.path().join("renderers.js")).unwrap();
        assert!(text.trim_end().ends_with("//# sourceMappingURL=renderers.js.map"));

        let map: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(dir.path().join("renderers.js.map")).unwrap())
                .unwrap();
        assert_eq!(map["file"], "renderers.js");
        assert!(map["sources"].as_array().unwrap().iter().any(|s| s == "src/a.ts"));
        assert!(map["sourcesContent"].is_array());
    }

    #[test]
    fn test_unavailable_dependency_is_null() {
        let record = module("src/a.ts", "import fs from 'fs';\n", &[("fs", None, false)]);
        assert_eq!(deps_object(&record), r#"{"fs":null}"#);
    }

    #[test]
    fn test_failed_module_stub() {
        let dir = TempDir::new().unwrap();
        let mut graph = ModuleGraph::new();
        graph.insert(ModuleRecord::failed("src/x.ts", "src/x.ts", "stage 'script' failed"));
        graph.add_entry("renderers", "src/x.ts");
        emit(&graph, &options(dir.path(), SourceMapStyle::Inline)).unwrap();

        let text = fs::read_to_string(dir.path().join("renderers.js")).unwrap();
        assert!(text.contains("throw new Error(\"src/x.ts: stage 'script' failed\");"));
    }

    #[test]
    fn test_assets_written_verbatim() {
        let dir = TempDir::new().unwrap();
        let mut graph = sample_graph(false);
        let bytes = vec![0u8, 1, 2, 255];
        graph.add_asset(crate::transforms::EmittedAsset {
            name: "assets/blob.1234.bin".into(),
            bytes: bytes.clone(),
        });
        emit(&graph, &options(dir.path(), SourceMapStyle::Inline)).unwrap();
        assert_eq!(fs::read(dir.path().join("assets/blob.1234.bin")).unwrap(), bytes);
    }

    #[test]
    fn test_missing_entry() {
        let dir = TempDir::new().unwrap();
        let mut graph = ModuleGraph::new();
        graph.add_entry("renderers", "src/none.ts");
        let err = emit(&graph, &options(dir.path(), SourceMapStyle::Inline)).unwrap_err();
        assert!(matches!(err, EmitError::MissingEntry { .. }));
    }

    #[test]
    fn test_minify_lines() {
        let body = "// lead\nfunction f() {\n    /* note */\n    return `a\n    b`;\n\n}\n";
        let lines = minify_lines(body);
        assert_eq!(
            lines,
            vec![
                (1, "function f() {".to_string()),
                (3, "return `a".to_string()),
                (4, "    b`;".to_string()),
                (6, "}".to_string()),
            ]
        );
    }

    #[test]
    fn test_minify_keeps_multiline_strings_and_jsx() {
        let body = "const s = 'a\\\n  b';\nconst e = <p>\n  :) /* not a comment */\n</p>;\n";
        let lines = minify_lines(body);
        assert_eq!(lines[0], (0, "const s = 'a\\".to_string()));
        assert_eq!(lines[1], (1, "  b';".to_string()));
        assert_eq!(lines[3], (3, ":) /* not a comment */".to_string()));
    }

    #[test]
    fn test_source_root_for() {
        assert_eq!(source_root_for(Path::new("/p/out/client"), Path::new("/p")), "../..");
        assert_eq!(source_root_for(Path::new("/p"), Path::new("/p")), "");
        assert_eq!(source_root_for(Path::new("/elsewhere"), Path::new("/p")), "/p");
    }

    #[test]
    fn test_expand_template() {
        assert_eq!(expand_template("[name].bundle.js", "renderers"), "renderers.bundle.js");
    }
}
