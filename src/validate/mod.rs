//! Type-validation side-channel.
//!
//! Runs on its own thread over the files selected by `report_files`,
//! independently of the transform pipeline, and reports diagnostics to a
//! [`DiagnosticSink`]. The only thing it hands back to the pipeline is the
//! verdict of the hard syntax pass, which production runs wait on before
//! emitting.

pub mod diagnostics;
pub mod syntax;

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};

use crossbeam_channel::Receiver;
use thiserror::Error;

use crate::build::discovery::discover_report_files;
use crate::resolve::Resolver;
use syntax::FileFacts;

pub use diagnostics::{
    ChannelSink, CollectingSink, Diagnostic, DiagnosticSink, Location, Severity, TracingSink,
};

/// The side-channel exceeded its memory budget; only validation fails.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("validation exceeded its memory budget ({used} bytes used, limit {limit} bytes)")]
pub struct ValidationResourceError {
    pub used: u64,
    pub limit: u64,
}

/// Ways the validation thread can end without a summary.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error(transparent)]
    Resource(#[from] ValidationResourceError),
    #[error("invalid report_files pattern: {0}")]
    Discovery(String),
    #[error("validation thread panicked")]
    Panicked,
}

#[derive(Debug, Clone)]
pub struct ValidatorOptions {
    /// Globs relative to the project root
    pub report_files: Vec<String>,
    pub memory_limit_bytes: u64,
    pub check_syntax: bool,
    /// Lowest severity forwarded to the sink
    pub min_severity: Severity,
}

/// Outcome of the hard syntax pass, sent once per validation run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyntaxVerdict {
    pub errors: Vec<Diagnostic>,
}

impl SyntaxVerdict {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Counts reported by a finished validation run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationSummary {
    pub files_checked: usize,
    pub errors: usize,
    pub warnings: usize,
    pub infos: usize,
}

impl ValidationSummary {
    fn count(&mut self, severity: Severity) {
        match severity {
            Severity::Error => self.errors += 1,
            Severity::Warning => self.warnings += 1,
            Severity::Info => self.infos += 1,
        }
    }
}

/// Running validation thread.
#[derive(Debug)]
pub struct ValidationHandle {
    syntax: Receiver<SyntaxVerdict>,
    join: JoinHandle<Result<ValidationSummary, ValidationError>>,
}

impl ValidationHandle {
    /// Block until the syntax pass finishes. `None` if validation ended
    /// without producing a verdict (resource failure, syntax pass disabled).
    pub fn syntax_verdict(&self) -> Option<SyntaxVerdict> {
        self.syntax.recv().ok()
    }

    pub fn join(self) -> Result<ValidationSummary, ValidationError> {
        self.join.join().unwrap_or(Err(ValidationError::Panicked))
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}

/// Side-channel validator over one project tree.
#[derive(Debug, Clone)]
pub struct Validator {
    resolver: Resolver,
    options: ValidatorOptions,
}

impl Validator {
    pub fn new(resolver: Resolver, options: ValidatorOptions) -> Self {
        Self { resolver, options }
    }

    /// Start validation on its own thread.
    pub fn spawn(self, sink: Box<dyn DiagnosticSink>) -> std::io::Result<ValidationHandle> {
        let (tx, rx) = crossbeam_channel::bounded(1);
        let join = thread::Builder::new().name("renderpack-validate".to_string()).spawn(move || {
            self.run(sink, |verdict| {
                let _ = tx.send(verdict);
            })
        })?;
        Ok(ValidationHandle { syntax: rx, join })
    }

    /// Run validation on the calling thread. With the syntax pass disabled
    /// `on_syntax` is dropped before any file is read.
    pub fn run(
        &self,
        mut sink: Box<dyn DiagnosticSink>,
        on_syntax: impl FnOnce(SyntaxVerdict),
    ) -> Result<ValidationSummary, ValidationError> {
        let on_syntax = self.options.check_syntax.then_some(on_syntax);
        let root = self.resolver.root().to_path_buf();
        let files = discover_report_files(&root, &self.options.report_files)
            .map_err(|e| ValidationError::Discovery(e.to_string()))?;
        let sources = self.load(&files)?;
        tracing::debug!(files = sources.len(), "validation started");

        let mut summary = ValidationSummary { files_checked: sources.len(), ..Default::default() };
        let mut forward = |d: Diagnostic, summary: &mut ValidationSummary| {
            if d.severity >= self.options.min_severity {
                summary.count(d.severity);
                sink.report(d);
            }
        };

        let mut facts = Vec::with_capacity(sources.len());
        let mut verdict = SyntaxVerdict::default();
        for (path, text) in &sources {
            let analysis = syntax::analyze(path, text);
            for issue in analysis.issues {
                let file = self.display_path(path);
                let location = Location { file, line: issue.line, column: issue.column };
                verdict.errors.push(Diagnostic::new(Severity::Error, location, issue.message));
            }
            facts.push(analysis.facts);
        }

        if let Some(on_syntax) = on_syntax {
            for d in &verdict.errors {
                forward(d.clone(), &mut summary);
            }
            on_syntax(verdict);
        }

        for ((path, _), facts) in sources.iter().zip(&facts) {
            let file = self.display_path(path);
            for d in self.unresolved_imports(path, &file, facts) {
                forward(d, &mut summary);
            }
            for d in duplicate_declarations(&file, facts) {
                forward(d, &mut summary);
            }
            for d in explicit_any(&file, facts) {
                forward(d, &mut summary);
            }
        }

        tracing::debug!(
            errors = summary.errors,
            warnings = summary.warnings,
            infos = summary.infos,
            "validation finished"
        );
        Ok(summary)
    }

    /// Read every report file, enforcing the memory budget.
    fn load(&self, files: &[PathBuf]) -> Result<Vec<(PathBuf, String)>, ValidationResourceError> {
        let limit = self.options.memory_limit_bytes;
        let mut used = 0u64;
        let mut sources = Vec::with_capacity(files.len());
        for path in files {
            let text = match fs::read_to_string(path) {
                Ok(text) => text,
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "skipping unreadable report file"
                    );
                    continue;
                }
            };
            // Source text plus roughly as much again for the parse arena.
            used += 2 * text.len() as u64;
            if used > limit {
                return Err(ValidationResourceError { used, limit });
            }
            sources.push((path.clone(), text));
        }
        Ok(sources)
    }

    fn display_path(&self, path: &Path) -> PathBuf {
        PathBuf::from(self.resolver.module_id(path))
    }

    fn unresolved_imports(&self, path: &Path, file: &Path, facts: &FileFacts) -> Vec<Diagnostic> {
        facts
            .imports
            .iter()
            .filter(|i| i.specifier.starts_with("./") || i.specifier.starts_with("../"))
            .filter(|i| self.resolver.resolve(&i.specifier, Some(path)).is_err())
            .map(|i| {
                Diagnostic::new(
                    Severity::Warning,
                    Location { file: file.to_path_buf(), line: i.line, column: i.column },
                    format!("cannot find module '{}'", i.specifier),
                )
            })
            .collect()
    }
}

/// Top-level names declared more than once in the same namespace.
fn duplicate_declarations(file: &Path, facts: &FileFacts) -> Vec<Diagnostic> {
    let mut seen: HashMap<(&str, bool), usize> = HashMap::new();
    let mut out = Vec::new();
    for declared in &facts.declarations {
        match seen.get(&(declared.name.as_str(), declared.is_type)) {
            Some(first) => out.push(Diagnostic::new(
                Severity::Warning,
                Location { file: file.to_path_buf(), line: declared.line, column: declared.column },
                format!(
                    "duplicate declaration '{}' (first declared on line {})",
                    declared.name, first
                ),
            )),
            None => {
                seen.insert((declared.name.as_str(), declared.is_type), declared.line);
            }
        }
    }
    out
}

fn explicit_any(file: &Path, facts: &FileFacts) -> Vec<Diagnostic> {
    facts
        .any_annotations
        .iter()
        .map(|&(line, column)| {
            Diagnostic::new(
                Severity::Info,
                Location { file: file.to_path_buf(), line, column },
                "explicit 'any' annotation",
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolve::ResolverOptions;
    use std::fs::File;
    use std::io::Write;
    use tempfile::TempDir;

    fn create_test_file(dir: &Path, name: &str, content: &str) {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        File::create(path).unwrap().write_all(content.as_bytes()).unwrap();
    }

    fn validator(root: &Path, min_severity: Severity, limit: u64) -> Validator {
        Validator::new(
            Resolver::new(root, ResolverOptions::default()),
            ValidatorOptions {
                report_files: vec!["src/**/*.ts".to_string(), "src/**/*.tsx".to_string()],
                memory_limit_bytes: limit,
                check_syntax: true,
                min_severity,
            },
        )
    }

    type RunResult =
        (Result<ValidationSummary, ValidationError>, Vec<Diagnostic>, Option<SyntaxVerdict>);

    fn run(v: &Validator) -> RunResult {
        let sink = CollectingSink::new();
        let mut verdict = None;
        let result = v.run(Box::new(sink.clone()), |v| verdict = Some(v));
        (result, sink.diagnostics(), verdict)
    }

    #[test]
    fn test_clean_tree() {
        let temp = TempDir::new().unwrap();
        let a = "import { b } from './b';\nexport const a = b + 1;\n";
        create_test_file(temp.path(), "src/a.ts", a);
        create_test_file(temp.path(), "src/b.ts", "export const b = 1;\n");

        let (result, diagnostics, verdict) = run(&validator(temp.path(), Severity::Info, u64::MAX));
        assert_eq!(result.unwrap().files_checked, 2);
        assert!(diagnostics.is_empty(), "{:?}", diagnostics);
        assert!(verdict.unwrap().is_clean());
    }

    #[test]
    fn test_syntax_error_reported_in_verdict() {
        let temp = TempDir::new().unwrap();
        create_test_file(temp.path(), "src/x.ts", "export function f() {\n  return 1;\n");

        let (result, diagnostics, verdict) = run(&validator(temp.path(), Severity::Info, u64::MAX));
        let verdict = verdict.unwrap();
        assert!(!verdict.is_clean());
        assert_eq!(result.unwrap().errors, verdict.errors.len());
        assert_eq!(verdict.errors[0].location.file, PathBuf::from("src/x.ts"));
        assert!(diagnostics[0].is_error());
    }

    #[test]
    fn test_soft_checks() {
        let temp = TempDir::new().unwrap();
        create_test_file(
            temp.path(),
            "src/a.ts",
            "import { x } from './missing';\nconst v = 1;\nconst v = 2;\nfunction f(a: any) {}\n",
        );

        let (_, diagnostics, _) = run(&validator(temp.path(), Severity::Info, u64::MAX));
        let messages: Vec<_> =
            diagnostics.iter().map(|d| (d.severity, d.message.clone())).collect();
        let missing = "cannot find module './missing'".to_string();
        assert!(messages.contains(&(Severity::Warning, missing)));
        assert!(messages
            .iter()
            .any(|(s, m)| *s == Severity::Warning && m.starts_with("duplicate declaration 'v'")));
        assert!(messages.contains(&(Severity::Info, "explicit 'any' annotation".to_string())));
    }

    #[test]
    fn test_min_severity_filters() {
        let temp = TempDir::new().unwrap();
        create_test_file(temp.path(), "src/a.ts", "let a: any = 1;\n");

        let (result, diagnostics, _) = run(&validator(temp.path(), Severity::Warning, u64::MAX));
        assert!(diagnostics.is_empty());
        assert_eq!(result.unwrap().infos, 0);
    }

    #[test]
    fn test_overloads_are_not_duplicates() {
        let file = PathBuf::from("a.ts");
        let facts = |src: &str| syntax::analyze(&file, src).facts;
        let src = "function f(a: string): void;\nfunction f(a: number): void;\n\
                   function f(a: unknown) {}\n";
        assert!(duplicate_declarations(&file, &facts(src)).is_empty());
        let blocks = facts("{ const a = 1; }\n{ const a = 2; }\n");
        assert!(duplicate_declarations(&file, &blocks).is_empty());
        assert!(duplicate_declarations(&file, &facts("type A = 1;\nconst A = 1;\n")).is_empty());
    }

    #[test]
    fn test_literals_and_jsx_text_are_not_checked() {
        let temp = TempDir::new().unwrap();
        create_test_file(
            temp.path(),
            "src/a.tsx",
            "const s = \"import './missing'\";\n// const s = 2; any\n\
             export const Smile = () => <span>:) as any</span>;\n",
        );

        let (result, diagnostics, verdict) = run(&validator(temp.path(), Severity::Info, u64::MAX));
        assert!(verdict.unwrap().is_clean());
        assert!(diagnostics.is_empty(), "{:?}", diagnostics);
        assert_eq!(result.unwrap().files_checked, 1);
    }

    #[test]
    fn test_without_syntax_pass_no_verdict_is_sent() {
        let temp = TempDir::new().unwrap();
        create_test_file(temp.path(), "src/a.ts", "import { x } from './missing';\n");
        let mut v = validator(temp.path(), Severity::Info, u64::MAX);
        v.options.check_syntax = false;

        let (blocked_tx, blocked_rx) = crossbeam_channel::bounded::<Diagnostic>(0);
        let handle = v.spawn(Box::new(ChannelSink(blocked_tx))).unwrap();
        // The thread is parked on the sink; the verdict channel is already closed.
        assert!(handle.syntax_verdict().is_none());
        assert!(!handle.is_finished());
        drop(blocked_rx);
        let summary = handle.join().unwrap();
        assert_eq!((summary.errors, summary.warnings), (0, 1));
    }

    #[test]
    fn test_memory_budget() {
        let temp = TempDir::new().unwrap();
        create_test_file(temp.path(), "src/a.ts", &"x;\n".repeat(100));

        let (result, _, verdict) = run(&validator(temp.path(), Severity::Info, 16));
        match result {
            Err(ValidationError::Resource(e)) => assert_eq!(e.limit, 16),
            other => panic!("expected resource error, got {:?}", other),
        }
        assert!(verdict.is_none());
    }

    #[test]
    fn test_spawned_thread() {
        let temp = TempDir::new().unwrap();
        create_test_file(temp.path(), "src/a.tsx", "export const e = <p>it's (fine)</p>;\n");

        let handle = validator(temp.path(), Severity::Info, u64::MAX)
            .spawn(Box::new(CollectingSink::new()))
            .unwrap();
        assert!(handle.syntax_verdict().unwrap().is_clean());
        assert_eq!(handle.join().unwrap().files_checked, 1);
    }
}
