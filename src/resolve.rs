//! Import specifier resolution.
//!
//! Maps an import specifier to a concrete input on disk. Resolution order:
//!
//! 1. Specifiers the substitute table marks as `false` are unavailable
//! 2. The literal input tree (relative paths, then `node_modules` lookup)
//! 3. The substitute table's replacement module
//!
//! Extensionless specifiers try the configured suffixes in order.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default suffixes tried for extensionless specifiers, in priority order.
pub const DEFAULT_EXTENSIONS: [&str; 5] = [".ts", ".tsx", ".js", ".json", ".svg"];

/// An entry in the substitute table.
///
/// In `renderpack.toml` this is either `false` or a module path:
///
/// ```toml
/// [resolve.fallback]
/// fs = false
/// path = "node_modules/path-browserify/index.js"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Fallback {
    /// `false` marks the capability as unavailable; `true` is rejected by validation
    Flag(bool),
    /// Replacement module, relative to the project root
    Module(PathBuf),
}

impl Fallback {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Fallback::Flag(false))
    }
}

/// Failure to map a specifier to any input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolutionError {
    #[error("{importer}: cannot resolve '{specifier}'")]
    NotFound { specifier: String, importer: String },
    #[error("{importer}: substitute for '{specifier}' is missing ({})", path.display())]
    MissingSubstitute { specifier: String, importer: String, path: PathBuf },
    #[error("{input}: cannot read input: {message}")]
    Unreadable { input: String, message: String },
}

impl ResolutionError {
    /// Identity of the input this failure is attributed to.
    pub fn input(&self) -> &str {
        match self {
            ResolutionError::NotFound { importer, .. } => importer,
            ResolutionError::MissingSubstitute { importer, .. } => importer,
            ResolutionError::Unreadable { input, .. } => input,
        }
    }
}

/// A specifier mapped to a file.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResolvedInput {
    /// Stable module identifier (project-relative, forward slashes)
    pub id: String,
    /// Absolute path on disk
    pub path: PathBuf,
    /// Whether the file came from the substitute table
    pub substituted: bool,
}

/// Outcome of resolving a specifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Resolved(ResolvedInput),
    /// The capability does not exist in the target environment
    Unavailable { specifier: String },
}

/// Resolver settings, taken from the `[resolve]` config section.
#[derive(Debug, Clone)]
pub struct ResolverOptions {
    pub extensions: Vec<String>,
    pub fallback: BTreeMap<String, Fallback>,
    pub modules_dir: String,
}

impl Default for ResolverOptions {
    fn default() -> Self {
        Self {
            extensions: DEFAULT_EXTENSIONS.iter().map(|s| s.to_string()).collect(),
            fallback: BTreeMap::new(),
            modules_dir: "node_modules".to_string(),
        }
    }
}

/// Immutable specifier resolver. Cheap to clone; holds no mutable state.
#[derive(Debug, Clone)]
pub struct Resolver {
    root: PathBuf,
    options: ResolverOptions,
}

impl Resolver {
    pub fn new(root: impl Into<PathBuf>, options: ResolverOptions) -> Self {
        Self { root: root.into(), options }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve `specifier` as imported from `importer` (a file path).
    ///
    /// With no importer, relative specifiers resolve against the project root.
    pub fn resolve(
        &self,
        specifier: &str,
        importer: Option<&Path>,
    ) -> Result<Resolution, ResolutionError> {
        let fallback = self.options.fallback.get(specifier);
        if fallback.is_some_and(Fallback::is_unavailable) {
            return Ok(Resolution::Unavailable { specifier: specifier.to_string() });
        }

        let base_dir = importer.and_then(Path::parent).unwrap_or(&self.root);

        if let Some(path) = self.resolve_literal(specifier, base_dir) {
            return Ok(Resolution::Resolved(self.input_for(path, false)));
        }

        let importer_id = importer.map(|p| self.module_id(p)).unwrap_or_else(|| "<root>".into());

        if let Some(Fallback::Module(substitute)) = fallback {
            let candidate = self.root.join(substitute);
            return match self.resolve_file_or_dir(&candidate) {
                Some(path) => Ok(Resolution::Resolved(self.input_for(path, true))),
                None => Err(ResolutionError::MissingSubstitute {
                    specifier: specifier.to_string(),
                    importer: importer_id,
                    path: candidate,
                }),
            };
        }

        Err(ResolutionError::NotFound { specifier: specifier.to_string(), importer: importer_id })
    }

    /// Resolve an entry point path given relative to the project root.
    pub fn resolve_entry(&self, path: &Path) -> Result<ResolvedInput, ResolutionError> {
        let joined = if path.is_absolute() { path.to_path_buf() } else { self.root.join(path) };
        let candidate = normalize(&joined);
        self.resolve_file_or_dir(&candidate).map(|p| self.input_for(p, false)).ok_or_else(|| {
            ResolutionError::NotFound {
                specifier: path.display().to_string(),
                importer: "<entry>".to_string(),
            }
        })
    }

    /// Project-relative identifier for a path, using forward slashes.
    pub fn module_id(&self, path: &Path) -> String {
        let rel = path.strip_prefix(&self.root).unwrap_or(path);
        rel.components()
            .filter_map(|c| match c {
                Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("/")
    }

    fn input_for(&self, path: PathBuf, substituted: bool) -> ResolvedInput {
        ResolvedInput { id: self.module_id(&path), path, substituted }
    }

    fn resolve_literal(&self, specifier: &str, base_dir: &Path) -> Option<PathBuf> {
        if is_relative(specifier) {
            return self.resolve_file_or_dir(&normalize(&base_dir.join(specifier)));
        }
        if Path::new(specifier).is_absolute() {
            return self.resolve_file_or_dir(Path::new(specifier));
        }

        // Bare specifier: walk up from the importer looking for a modules dir,
        // stopping at the project root.
        let mut dir = Some(base_dir);
        while let Some(current) = dir {
            let candidate = current.join(&self.options.modules_dir).join(specifier);
            if let Some(found) = self.resolve_file_or_dir(&candidate) {
                return Some(found);
            }
            if current == self.root {
                break;
            }
            dir = current.parent();
        }
        None
    }

    fn resolve_file_or_dir(&self, candidate: &Path) -> Option<PathBuf> {
        self.resolve_file(candidate).or_else(|| self.resolve_dir(candidate))
    }

    fn resolve_file(&self, candidate: &Path) -> Option<PathBuf> {
        if candidate.is_file() {
            return Some(candidate.to_path_buf());
        }
        let raw = candidate.as_os_str().to_string_lossy();
        self.options
            .extensions
            .iter()
            .map(|ext| PathBuf::from(format!("{}{}", raw, ext)))
            .find(|p| p.is_file())
    }

    fn resolve_dir(&self, candidate: &Path) -> Option<PathBuf> {
        if !candidate.is_dir() {
            return None;
        }
        if let Some(main) = package_main(candidate) {
            if let Some(found) = self.resolve_file(&normalize(&candidate.join(main))) {
                return Some(found);
            }
        }
        self.resolve_file(&candidate.join("index"))
    }
}

fn is_relative(specifier: &str) -> bool {
    specifier == "."
        || specifier == ".."
        || specifier.starts_with("./")
        || specifier.starts_with("../")
}

/// Read the `main` field of a package directory's `package.json`.
fn package_main(dir: &Path) -> Option<String> {
    let contents = fs::read_to_string(dir.join("package.json")).ok()?;
    let manifest: serde_json::Value = serde_json::from_str(&contents).ok()?;
    manifest.get("main")?.as_str().map(str::to_string)
}

/// Lexically collapse `.` and `..` components. A `..` with nothing left to
/// pop is kept on relative paths and dropped at the filesystem root.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.components().next_back() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => out.push(".."),
            },
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// The project root with `.`, `..` and symlinks resolved, so module ids
/// derived from it are the same however the root was spelled. Roots that do
/// not exist yet are normalized lexically.
pub fn canonical_root(root: &Path) -> PathBuf {
    fs::canonicalize(root).unwrap_or_else(|_| normalize(root))
}
