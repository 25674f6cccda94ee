//! Configuration loading and discovery for `renderpack.toml`
//!
//! Provides functions to find, load, and merge configuration.

use super::schema::{
    default_compat_patches, default_defines, default_entries, AssetsConfig, OutputConfig,
    PoolConfig,
    ProjectConfig, RenderpackConfig, ResolveConfig, ValidateConfig, WatchConfig,
};
use crate::resolve::canonical_root;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Name of the project configuration file.
pub const CONFIG_FILE_NAME: &str = "renderpack.toml";

/// Configuration loading error
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// File I/O error
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),
    /// TOML parsing error
    #[error("Failed to parse renderpack.toml: {0}")]
    Parse(#[from] toml::de::Error),
    /// Validation error
    #[error(
        "Config validation failed:\n{}",
        .0.iter().map(|e| format!("  - {}", e)).collect::<Vec<_>>().join("\n")
    )]
    Validation(Vec<String>),
}

/// CLI arguments that can override config values
#[derive(Debug, Default, Clone)]
pub struct CliOverrides {
    /// Override output directory
    pub out: Option<PathBuf>,
    /// Add or replace entry points (`name=path`)
    pub entries: Vec<(String, PathBuf)>,
    /// Number of pooled workers
    pub jobs: Option<usize>,
    /// Disable the validation side-channel
    pub no_validate: bool,
}

/// Find renderpack.toml by walking up from the current working directory.
///
/// Search order:
/// 1. Walk up from current directory looking for renderpack.toml
/// 2. Check XDG_CONFIG_HOME/renderpack/renderpack.toml (or ~/.config/renderpack/renderpack.toml)
pub fn find_config() -> Option<PathBuf> {
    if let Ok(cwd) = env::current_dir() {
        if let Some(path) = find_config_from(cwd) {
            return Some(path);
        }
    }

    find_xdg_config()
}

/// Find renderpack.toml in the XDG config directory.
pub fn find_xdg_config() -> Option<PathBuf> {
    let xdg_config = env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|_| env::var("HOME").map(|h| PathBuf::from(h).join(".config")))
        .ok()?;

    let config_path = xdg_config.join("renderpack").join(CONFIG_FILE_NAME);
    if config_path.exists() {
        Some(config_path)
    } else {
        None
    }
}

/// Find renderpack.toml by walking up from a specific directory.
pub fn find_config_from(start: PathBuf) -> Option<PathBuf> {
    let mut current = start;

    loop {
        let config_path = current.join(CONFIG_FILE_NAME);
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            return None;
        }
    }
}

/// Load configuration from a renderpack.toml file.
///
/// If a path is provided, loads from that file. Otherwise, uses `find_config()`
/// to locate the config file. If no config file is found, returns a default
/// configuration.
///
/// Returns the config together with the path it was read from, if any.
pub fn load_config(
    path: Option<&Path>,
) -> Result<(RenderpackConfig, Option<PathBuf>), ConfigError> {
    let config_path = match path {
        Some(p) => Some(p.to_path_buf()),
        None => find_config(),
    };

    match config_path {
        Some(p) => Ok((load_config_file(&p)?, Some(p))),
        None => Ok((default_config(), None)),
    }
}

/// Load configuration from a specific file path.
pub fn load_config_file(path: &Path) -> Result<RenderpackConfig, ConfigError> {
    let contents = fs::read_to_string(path)?;
    parse_config(&contents)
}

/// Parse and validate configuration text.
pub fn parse_config(contents: &str) -> Result<RenderpackConfig, ConfigError> {
    let config: RenderpackConfig = toml::from_str(contents)?;

    let errors = config.validate();
    if !errors.is_empty() {
        return Err(ConfigError::Validation(errors.into_iter().map(|e| e.to_string()).collect()));
    }

    Ok(config)
}

/// Create a default configuration when no renderpack.toml is found.
///
/// The project name is taken from the current directory name.
pub fn default_config() -> RenderpackConfig {
    let project_name = env::current_dir()
        .ok()
        .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
        .unwrap_or_else(|| "unnamed".to_string());

    RenderpackConfig {
        project: ProjectConfig { name: project_name, version: "0.1.0".to_string(), root: None },
        entries: default_entries(),
        output: OutputConfig::default(),
        resolve: ResolveConfig::default(),
        define: default_defines(),
        validate: ValidateConfig::default(),
        pool: PoolConfig::default(),
        assets: AssetsConfig::default(),
        watch: WatchConfig::default(),
        rules: None,
        compat_patches: default_compat_patches(),
    }
}

/// Merge CLI overrides into a configuration.
///
/// CLI arguments take precedence over config file values.
pub fn merge_cli_overrides(config: &mut RenderpackConfig, overrides: &CliOverrides) {
    if let Some(ref out) = overrides.out {
        config.output.dir = out.clone();
    }

    for (name, path) in &overrides.entries {
        config.entries.insert(name.clone(), path.clone());
    }

    if let Some(jobs) = overrides.jobs {
        config.pool.workers = Some(jobs.max(1));
    }

    if overrides.no_validate {
        config.validate.enabled = false;
    }
}

/// Parse a `name=path` entry override.
pub fn parse_entry_override(raw: &str) -> Result<(String, PathBuf), String> {
    match raw.split_once('=') {
        Some((name, path)) if !name.trim().is_empty() && !path.trim().is_empty() => {
            Ok((name.trim().to_string(), PathBuf::from(path.trim())))
        }
        _ => Err(format!("expected NAME=PATH, got '{}'", raw)),
    }
}

/// Get the project root directory for a loaded configuration.
///
/// `[project].root` is resolved against the config file's directory; with no
/// config file the working directory is used.
pub fn project_root(config: &RenderpackConfig, config_path: Option<&Path>) -> PathBuf {
    let base = config_path
        .and_then(Path::parent)
        .filter(|dir| !dir.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .or_else(|| env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."));
    let root = match &config.project.root {
        Some(root) => resolve_path(&base, root),
        None => base,
    };
    canonical_root(&root)
}

/// Resolve a path relative to the project root.
///
/// If the path is absolute, returns it unchanged.
/// If relative, joins it with the project root.
pub fn resolve_path(project_root: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        project_root.join(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_config(dir: &Path, contents: &[u8]) -> PathBuf {
        let config_path = dir.join(CONFIG_FILE_NAME);
        File::create(&config_path)
            .expect("should create config file")
            .write_all(contents)
            .expect("should write config content");
        config_path
    }

    #[test]
    fn test_find_config_in_current_dir() {
        let temp = TempDir::new().expect("should create temp dir");
        let config_path = write_config(temp.path(), b"[project]\nname = \"test\"");

        let found = find_config_from(temp.path().to_path_buf());
        assert_eq!(found, Some(config_path));
    }

    #[test]
    fn test_find_config_in_parent_dir() {
        let temp = TempDir::new().expect("should create temp dir");
        let config_path = write_config(temp.path(), b"[project]\nname = \"test\"");

        let subdir = temp.path().join("src").join("client");
        fs::create_dir_all(&subdir).expect("should create subdirectories");

        let found = find_config_from(subdir);
        assert_eq!(found, Some(config_path));
    }

    #[test]
    fn test_find_config_not_found() {
        let temp = TempDir::new().expect("should create temp dir");
        let found = find_config_from(temp.path().to_path_buf());
        assert_eq!(found, None);
    }

    #[test]
    fn test_load_config_from_file() {
        let temp = TempDir::new().expect("should create temp dir");
        let config_path = write_config(
            temp.path(),
            br#"
[project]
name = "test-project"
version = "2.0.0"

[entries]
app = "src/app.ts"
"#,
        );

        let (config, path) = load_config(Some(&config_path)).expect("should load valid config");
        assert_eq!(config.project.name, "test-project");
        assert_eq!(config.project.version, "2.0.0");
        assert_eq!(config.entries.get("app"), Some(&PathBuf::from("src/app.ts")));
        assert_eq!(path, Some(config_path));
    }

    #[test]
    fn test_load_config_missing_file_errors() {
        let temp = TempDir::new().expect("should create temp dir");
        let result = load_config(Some(&temp.path().join("nonexistent.toml")));
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }

    #[test]
    fn test_load_config_invalid_toml() {
        let temp = TempDir::new().expect("should create temp dir");
        let config_path = write_config(temp.path(), b"this is not valid toml {{{");

        let result = load_config(Some(&config_path));
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_load_config_validation_error() {
        let temp = TempDir::new().expect("should create temp dir");
        let config_path = write_config(
            temp.path(),
            br#"
[project]
name = ""

[output]
filename = "static.js"
"#,
        );

        let result = load_config(Some(&config_path));
        match result {
            Err(ConfigError::Validation(errors)) => assert_eq!(errors.len(), 2),
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_merge_cli_overrides() {
        let mut config = default_config();
        let overrides = CliOverrides {
            out: Some(PathBuf::from("dist")),
            entries: vec![("extra".to_string(), PathBuf::from("src/extra.ts"))],
            jobs: Some(0),
            no_validate: true,
        };

        merge_cli_overrides(&mut config, &overrides);
        assert_eq!(config.output.dir, PathBuf::from("dist"));
        assert_eq!(config.entries.len(), 2);
        assert_eq!(config.pool.workers, Some(1));
        assert!(!config.validate.enabled);
    }

    #[test]
    fn test_merge_cli_overrides_empty_keeps_config() {
        let mut config = default_config();
        merge_cli_overrides(&mut config, &CliOverrides::default());
        assert_eq!(config.output.dir, PathBuf::from("out/client_renderer"));
        assert!(config.validate.enabled);
        assert_eq!(config.pool.workers, None);
    }

    #[test]
    fn test_parse_entry_override() {
        assert_eq!(
            parse_entry_override("main=src/main.ts").unwrap(),
            ("main".to_string(), PathBuf::from("src/main.ts"))
        );
        assert!(parse_entry_override("main").is_err());
        assert!(parse_entry_override("=x").is_err());
    }

    #[test]
    fn test_project_root_from_config() {
        let mut config = default_config();
        let path = Path::new("/project/renderpack.toml");
        assert_eq!(project_root(&config, Some(path)), PathBuf::from("/project"));

        config.project.root = Some(PathBuf::from("web"));
        assert_eq!(project_root(&config, Some(path)), PathBuf::from("/project/web"));
    }

    #[test]
    fn test_project_root_is_canonical() {
        let temp = TempDir::new().expect("should create temp dir");
        fs::create_dir_all(temp.path().join("sub")).unwrap();
        fs::create_dir_all(temp.path().join("app")).unwrap();

        let config = default_config();
        let path = temp.path().join("sub/../app").join(CONFIG_FILE_NAME);
        let root = project_root(&config, Some(&path));
        assert_eq!(root, fs::canonicalize(temp.path().join("app")).unwrap());
        assert!(!root.components().any(|c| c == std::path::Component::ParentDir));
    }

    #[test]
    fn test_resolve_path() {
        let root = Path::new("/project");
        assert_eq!(resolve_path(root, Path::new("/other/path")), PathBuf::from("/other/path"));
        assert_eq!(resolve_path(root, Path::new("src")), PathBuf::from("/project/src"));
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = default_config();
        assert!(!config.project.name.is_empty());
        assert!(config.is_valid());
    }
}
