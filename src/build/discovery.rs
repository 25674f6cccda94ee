//! Source file discovery.
//!
//! Finds the files the validation side-channel reports on, from the
//! `report_files` glob patterns in the configuration.

use glob::glob;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// Error during source discovery.
#[derive(Debug)]
pub enum DiscoveryError {
    /// Invalid glob pattern
    InvalidPattern(String, glob::PatternError),
}

impl std::fmt::Display for DiscoveryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DiscoveryError::InvalidPattern(pattern, err) => {
                write!(f, "Invalid glob pattern '{}': {}", pattern, err)
            }
        }
    }
}

impl std::error::Error for DiscoveryError {}

/// Discover files matching a glob pattern relative to `base_dir`.
///
/// Files under the modules directory are skipped; third-party sources are
/// never reported on.
pub fn discover_files(base_dir: &Path, pattern: &str) -> Result<Vec<PathBuf>, DiscoveryError> {
    let full_pattern = base_dir.join(pattern);
    let pattern_str = full_pattern.to_string_lossy();

    let paths =
        glob(&pattern_str).map_err(|e| DiscoveryError::InvalidPattern(pattern.to_string(), e))?;

    let mut files = Vec::new();
    for entry in paths {
        match entry {
            Ok(path) => {
                if path.is_file() && !is_vendored(base_dir, &path) {
                    files.push(path);
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "error reading path during discovery");
            }
        }
    }

    files.sort();
    Ok(files)
}

fn is_vendored(base_dir: &Path, path: &Path) -> bool {
    path.strip_prefix(base_dir)
        .unwrap_or(path)
        .components()
        .any(|c| c.as_os_str() == "node_modules")
}

/// Discover all files matched by any of `patterns`, deduplicated and sorted.
pub fn discover_report_files(
    base_dir: &Path,
    patterns: &[String],
) -> Result<Vec<PathBuf>, DiscoveryError> {
    let mut all_files = BTreeSet::new();
    for pattern in patterns {
        all_files.extend(discover_files(base_dir, pattern)?);
    }
    Ok(all_files.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::{self, File};
    use std::io::Write;
    use tempfile::TempDir;

    fn create_test_file(dir: &Path, name: &str) {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        File::create(path).unwrap().write_all(b"export {};\n").unwrap();
    }

    #[test]
    fn test_discover_files() {
        let temp = TempDir::new().unwrap();
        create_test_file(temp.path(), "src/client/a.ts");
        create_test_file(temp.path(), "src/client/deep/b.tsx");
        create_test_file(temp.path(), "src/client/c.css");

        let files = discover_files(temp.path(), "src/client/**/*.ts").unwrap();
        assert_eq!(files.len(), 1);
        assert!(files[0].ends_with("a.ts"));
    }

    #[test]
    fn test_discover_report_files_dedups() {
        let temp = TempDir::new().unwrap();
        create_test_file(temp.path(), "src/a.ts");
        create_test_file(temp.path(), "src/b.tsx");

        let patterns =
            vec!["src/**/*.ts".to_string(), "src/**/*.tsx".to_string(), "src/a.ts".to_string()];
        let files = discover_report_files(temp.path(), &patterns).unwrap();
        assert_eq!(files.len(), 2);
    }

    #[test]
    fn test_vendored_files_skipped() {
        let temp = TempDir::new().unwrap();
        create_test_file(temp.path(), "node_modules/lib/index.ts");
        create_test_file(temp.path(), "src/a.ts");

        let files = discover_files(temp.path(), "**/*.ts").unwrap();
        assert_eq!(files.len(), 1);
    }

    #[test]
    fn test_invalid_pattern() {
        let temp = TempDir::new().unwrap();
        assert!(matches!(
            discover_files(temp.path(), "src/[.ts"),
            Err(DiscoveryError::InvalidPattern(_, _))
        ));
    }
}
