//! Configuration schema types for `renderpack.toml`
//!
//! Defines the structure and validation rules for a bundling project.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::resolve::{Fallback, DEFAULT_EXTENSIONS};
use crate::transforms::TransformKind;

/// Project metadata section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// Project name (required)
    pub name: String,
    /// Project version
    #[serde(default = "default_version")]
    pub version: String,
    /// Project root, relative to the config file (defaults to its directory)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<PathBuf>,
}

fn default_version() -> String {
    "0.1.0".to_string()
}

pub(crate) fn default_entries() -> BTreeMap<String, PathBuf> {
    BTreeMap::from([("renderers".to_string(), PathBuf::from("src/client/index.tsx"))])
}

/// Output target: directory and naming templates
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Output directory, relative to the project root
    #[serde(default = "default_out_dir")]
    pub dir: PathBuf,
    /// Primary artifact name; `[name]` is the entry name
    #[serde(default = "default_filename")]
    pub filename: String,
    /// Secondary chunk name; `[name]` is the entry name
    #[serde(default = "default_chunk_filename")]
    pub chunk_filename: String,
}

fn default_out_dir() -> PathBuf {
    PathBuf::from("out/client_renderer")
}

fn default_filename() -> String {
    "[name].js".to_string()
}

fn default_chunk_filename() -> String {
    "[name].bundle.js".to_string()
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: default_out_dir(),
            filename: default_filename(),
            chunk_filename: default_chunk_filename(),
        }
    }
}

/// Specifier resolution settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolveConfig {
    /// Suffixes tried for extensionless specifiers, in order
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
    /// Substitute table: name -> `false` or replacement module path
    #[serde(default = "default_fallback")]
    pub fallback: BTreeMap<String, Fallback>,
    /// Directory searched for bare specifiers
    #[serde(default = "default_modules_dir")]
    pub modules_dir: String,
}

fn default_extensions() -> Vec<String> {
    DEFAULT_EXTENSIONS.iter().map(|s| s.to_string()).collect()
}

fn default_fallback() -> BTreeMap<String, Fallback> {
    BTreeMap::from([
        ("fs".to_string(), Fallback::Flag(false)),
        ("path".to_string(), Fallback::Module(PathBuf::from("node_modules/path-browserify"))),
        ("util".to_string(), Fallback::Module(PathBuf::from("node_modules/util"))),
    ])
}

fn default_modules_dir() -> String {
    "node_modules".to_string()
}

impl Default for ResolveConfig {
    fn default() -> Self {
        Self {
            extensions: default_extensions(),
            fallback: default_fallback(),
            modules_dir: default_modules_dir(),
        }
    }
}

pub(crate) fn default_defines() -> BTreeMap<String, String> {
    BTreeMap::from([("scriptUrl".to_string(), "import.meta.url".to_string())])
}

/// Type-validation side-channel settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidateConfig {
    /// Run the side-channel at all
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Globs selecting the files diagnostics are reported for
    #[serde(default = "default_report_files")]
    pub report_files: Vec<String>,
    /// Memory budget for the side-channel in megabytes
    #[serde(default = "default_memory_limit_mb")]
    pub memory_limit_mb: u64,
    /// Run the hard syntax pass
    #[serde(default = "default_true")]
    pub check_syntax: bool,
}

fn default_true() -> bool {
    true
}

fn default_report_files() -> Vec<String> {
    vec!["src/client/**/*.ts".to_string(), "src/client/**/*.tsx".to_string()]
}

fn default_memory_limit_mb() -> u64 {
    9096
}

impl Default for ValidateConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            report_files: default_report_files(),
            memory_limit_mb: default_memory_limit_mb(),
            check_syntax: true,
        }
    }
}

/// Worker pool settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Worker count override (defaults to available parallelism minus one)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workers: Option<usize>,
    /// Idle timeout for production builds, in milliseconds
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,
}

fn default_idle_timeout_ms() -> u64 {
    1000
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self { workers: None, idle_timeout_ms: default_idle_timeout_ms() }
    }
}

/// Binary asset settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetsConfig {
    /// Assets up to this many bytes are inlined as data URLs
    #[serde(default = "default_inline_limit")]
    pub inline_limit: u64,
}

fn default_inline_limit() -> u64 {
    100_000
}

impl Default for AssetsConfig {
    fn default() -> Self {
        Self { inline_limit: default_inline_limit() }
    }
}

/// Watch mode configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchConfig {
    /// Debounce delay in milliseconds
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u32,
    /// Clear terminal between rebuilds
    #[serde(default = "default_true")]
    pub clear_screen: bool,
}

fn default_debounce_ms() -> u32 {
    100
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self { debounce_ms: 100, clear_screen: true }
    }
}

/// One entry of a custom rule table
///
/// ```toml
/// [[rules]]
/// extensions = ["md"]
/// use = ["json"]
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RuleConfig {
    /// Regex over the module identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test: Option<String>,
    /// File extensions, without the dot
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extensions: Vec<String>,
    /// Regex the identifier must also match (directory scope)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include: Option<String>,
    /// Stages, left to right
    #[serde(rename = "use")]
    pub stages: Vec<TransformKind>,
    /// Run the chain on the worker pool
    #[serde(default)]
    pub pooled: bool,
    /// Consult the transform cache
    #[serde(default)]
    pub cache: bool,
}

/// A named text patch applied to matching third-party sources
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CompatPatchConfig {
    pub name: String,
    /// Regex over the module identifier
    pub test: String,
    /// Regex to replace
    pub pattern: String,
    /// Literal replacement text
    pub replacement: String,
}

pub(crate) fn default_compat_patches() -> Vec<CompatPatchConfig> {
    vec![CompatPatchConfig {
        name: "plotly-d3-global".to_string(),
        test: r"plotly\.js$".to_string(),
        pattern: r"module.exports = d3; else this.d3 = d3;\n}\(\);".to_string(),
        replacement: "module.exports = d3; else this.d3 = d3;\n}.apply(self);".to_string(),
    }]
}

/// Complete renderpack.toml configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderpackConfig {
    /// Project metadata (required)
    pub project: ProjectConfig,
    /// Entry points: logical bundle name -> input path
    #[serde(default = "default_entries")]
    pub entries: BTreeMap<String, PathBuf>,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub resolve: ResolveConfig,
    /// Identifier substitutions
    #[serde(default = "default_defines")]
    pub define: BTreeMap<String, String>,
    #[serde(default)]
    pub validate: ValidateConfig,
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub assets: AssetsConfig,
    #[serde(default)]
    pub watch: WatchConfig,
    /// Custom rule table; replaces the default table when present
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rules: Option<Vec<RuleConfig>>,
    #[serde(default = "default_compat_patches")]
    pub compat_patches: Vec<CompatPatchConfig>,
}

/// Configuration validation error
#[derive(Debug, Clone)]
pub struct ConfigValidationError {
    /// Path to the invalid field (e.g., "output.filename")
    pub field: String,
    /// Error message
    pub message: String,
}

impl std::fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "renderpack.toml: '{}' {}", self.field, self.message)
    }
}

impl RenderpackConfig {
    /// Validate the configuration and return any errors
    pub fn validate(&self) -> Vec<ConfigValidationError> {
        let mut errors = Vec::new();
        let mut push = |field: String, message: &str| {
            errors.push(ConfigValidationError { field, message: message.to_string() });
        };

        if self.project.name.is_empty() {
            push("project.name".to_string(), "must be a non-empty string");
        }

        if self.entries.is_empty() {
            push("entries".to_string(), "must name at least one entry point");
        }
        for name in self.entries.keys() {
            if name.is_empty() || name.contains(['/', '\\']) {
                push(format!("entries.{}", name), "entry names must be plain file stems");
            }
        }

        for (field, template) in
            [
                ("output.filename", &self.output.filename),
                ("output.chunk_filename", &self.output.chunk_filename),
            ]
        {
            if !template.contains("[name]") {
                push(field.to_string(), "must contain the [name] placeholder");
            }
        }
        if self.output.filename == self.output.chunk_filename {
            push("output.chunk_filename".to_string(), "must differ from output.filename");
        }

        for ext in &self.resolve.extensions {
            if !ext.starts_with('.') || ext.len() < 2 {
                push("resolve.extensions".to_string(), "entries must look like '.ext'");
            }
        }
        for (name, entry) in &self.resolve.fallback {
            if matches!(entry, Fallback::Flag(true)) {
                push(format!("resolve.fallback.{}", name), "must be false or a module path");
            }
        }

        for name in self.define.keys() {
            let valid = name
                .chars()
                .next()
                .is_some_and(|c| c.is_alphabetic() || c == '_' || c == '$')
                && name.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '$');
            if !valid {
                push(format!("define.{}", name), "must be a valid identifier");
            }
        }

        if self.validate.memory_limit_mb == 0 {
            push("validate.memory_limit_mb".to_string(), "must be a positive integer");
        }
        for pattern in &self.validate.report_files {
            if glob::Pattern::new(pattern).is_err() {
                push("validate.report_files".to_string(), "contains an invalid glob pattern");
            }
        }

        if self.pool.workers == Some(0) {
            push("pool.workers".to_string(), "must be a positive integer");
        }

        if let Some(rules) = &self.rules {
            for (i, rule) in rules.iter().enumerate() {
                match (&rule.test, rule.extensions.is_empty()) {
                    (Some(_), false) => {
                        push(format!("rules[{}]", i), "set either test or extensions, not both")
                    }
                    (None, true) => push(format!("rules[{}]", i), "needs a test or extensions"),
                    _ => {}
                }
                for (key, source) in [("test", &rule.test), ("include", &rule.include)] {
                    if let Some(source) = source {
                        if regex::Regex::new(source).is_err() {
                            push(format!("rules[{}].{}", i, key), "is not a valid regex");
                        }
                    }
                }
                if rule.stages.is_empty() {
                    push(format!("rules[{}].use", i), "must list at least one stage");
                }
            }
        }

        for (i, patch) in self.compat_patches.iter().enumerate() {
            if patch.name.is_empty() {
                push(format!("compat_patches[{}].name", i), "must be a non-empty string");
            }
            for (key, source) in [("test", &patch.test), ("pattern", &patch.pattern)] {
                if regex::Regex::new(source).is_err() {
                    push(format!("compat_patches[{}].{}", i, key), "is not a valid regex");
                }
            }
        }

        errors
    }

    /// Check if validation passed
    pub fn is_valid(&self) -> bool {
        self.validate().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_parse() {
        let toml = r#"
[project]
name = "viewer"
"#;
        let config: RenderpackConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.project.name, "viewer");
        assert_eq!(config.project.version, "0.1.0");
        assert_eq!(config.entries.get("renderers"), Some(&PathBuf::from("src/client/index.tsx")));
        assert_eq!(config.output.dir, PathBuf::from("out/client_renderer"));
        assert_eq!(config.output.chunk_filename, "[name].bundle.js");
        assert_eq!(config.resolve.fallback.get("fs"), Some(&Fallback::Flag(false)));
        assert_eq!(config.define.get("scriptUrl").map(String::as_str), Some("import.meta.url"));
        assert_eq!(config.validate.memory_limit_mb, 9096);
        assert_eq!(config.pool.idle_timeout_ms, 1000);
        assert_eq!(config.assets.inline_limit, 100_000);
        assert_eq!(config.compat_patches.len(), 1);
        assert_eq!(config.compat_patches[0].name, "plotly-d3-global");
        assert!(config.rules.is_none());
        assert!(config.is_valid());
    }

    #[test]
    fn test_full_config_parse() {
        let toml = r#"
[project]
name = "full"
version = "1.2.0"
root = "web"

[entries]
main = "src/main.ts"
worker = "src/worker.ts"

[output]
dir = "dist"

[resolve]
extensions = [".ts", ".js"]
modules_dir = "vendor"

[resolve.fallback]
fs = false
path = "shims/path.js"

[define]
BUILD_ID = "\"abc\""

[validate]
enabled = false
report_files = ["src/**/*.ts"]

[pool]
workers = 3
idle_timeout_ms = 250

[[rules]]
extensions = ["md"]
use = ["json"]
cache = true

[[rules]]
test = "\\.txt$"
include = "docs/"
use = ["svg-inline"]
pooled = true

[[compat_patches]]
name = "x"
test = "x\\.js$"
pattern = "a"
replacement = "b"
"#;
        let config: RenderpackConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.project.root, Some(PathBuf::from("web")));
        assert_eq!(config.entries.len(), 2);
        assert_eq!(config.output.dir, PathBuf::from("dist"));
        assert_eq!(config.output.filename, "[name].js");
        assert_eq!(config.resolve.modules_dir, "vendor");
        assert_eq!(
            config.resolve.fallback.get("path"),
            Some(&Fallback::Module(PathBuf::from("shims/path.js")))
        );
        assert!(!config.validate.enabled);
        assert_eq!(config.pool.workers, Some(3));

        let rules = config.rules.as_ref().unwrap();
        assert_eq!(rules[0].stages, vec![TransformKind::Json]);
        assert!(rules[0].cache);
        assert_eq!(rules[1].include.as_deref(), Some("docs/"));
        assert!(rules[1].pooled);

        // A configured list replaces the built-in patch.
        assert_eq!(config.compat_patches.len(), 1);
        assert_eq!(config.compat_patches[0].name, "x");
        assert!(config.is_valid(), "{:?}", config.validate());
    }

    #[test]
    fn test_validation_empty_name() {
        let config: RenderpackConfig = toml::from_str("[project]\nname = \"\"\n").unwrap();
        assert!(config.validate().iter().any(|e| e.field == "project.name"));
    }

    #[test]
    fn test_validation_fallback_true_rejected() {
        let toml = r#"
[project]
name = "t"

[resolve.fallback]
fs = true
"#;
        let config: RenderpackConfig = toml::from_str(toml).unwrap();
        assert!(config.validate().iter().any(|e| e.field == "resolve.fallback.fs"));
    }

    #[test]
    fn test_validation_templates() {
        let toml = r#"
[project]
name = "t"

[output]
filename = "bundle.js"
chunk_filename = "bundle.js"
"#;
        let config: RenderpackConfig = toml::from_str(toml).unwrap();
        let fields: Vec<_> = config.validate().into_iter().map(|e| e.field).collect();
        assert!(fields.contains(&"output.filename".to_string()));
        assert!(fields.contains(&"output.chunk_filename".to_string()));
    }

    #[test]
    fn test_validation_rules() {
        let toml = r#"
[project]
name = "t"

[[rules]]
use = ["css"]

[[rules]]
test = "("
use = []
"#;
        let config: RenderpackConfig = toml::from_str(toml).unwrap();
        let fields: Vec<_> = config.validate().into_iter().map(|e| e.field).collect();
        assert!(fields.contains(&"rules[0]".to_string()));
        assert!(fields.contains(&"rules[1].test".to_string()));
        assert!(fields.contains(&"rules[1].use".to_string()));
    }

    #[test]
    fn test_unknown_stage_is_parse_error() {
        let toml = r#"
[project]
name = "t"

[[rules]]
extensions = ["x"]
use = ["babel"]
"#;
        assert!(toml::from_str::<RenderpackConfig>(toml).is_err());
    }

    #[test]
    fn test_validation_bad_define_and_pool() {
        let toml = r#"
[project]
name = "t"

[define]
"not-an-ident" = "1"

[pool]
workers = 0
"#;
        let config: RenderpackConfig = toml::from_str(toml).unwrap();
        let fields: Vec<_> = config.validate().into_iter().map(|e| e.field).collect();
        assert!(fields.contains(&"define.not-an-ident".to_string()));
        assert!(fields.contains(&"pool.workers".to_string()));
    }
}
