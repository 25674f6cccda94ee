//! Run result types.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::emit::{ArtifactKind, OutputArtifacts};
use crate::mode::Mode;
use crate::resolve::ResolutionError;
use crate::transforms::TransformError;
use crate::validate::ValidationSummary;

/// A failure attributed to one input. Collected during the run and reported
/// as a batch once every independent input has finished.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InputError {
    #[error(transparent)]
    Resolution(#[from] ResolutionError),
    #[error(transparent)]
    Transform(#[from] TransformError),
}

impl InputError {
    /// Identity of the input the failure belongs to.
    pub fn input(&self) -> &str {
        match self {
            InputError::Resolution(e) => e.input(),
            InputError::Transform(e) => &e.input,
        }
    }
}

/// What the validation side-channel ended with. Never affects the run's status.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ValidationStatus {
    #[default]
    Disabled,
    Completed(ValidationSummary),
    Failed(String),
}

impl fmt::Display for ValidationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationStatus::Disabled => write!(f, "validation disabled"),
            ValidationStatus::Completed(s) => write!(
                f,
                "{} files checked, {} errors, {} warnings, {} notes",
                s.files_checked, s.errors, s.warnings, s.infos
            ),
            ValidationStatus::Failed(message) => write!(f, "validation failed: {}", message),
        }
    }
}

/// Outcome of one pipeline run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub mode: Mode,
    pub artifacts: OutputArtifacts,
    /// Batched per-input failures
    pub errors: Vec<InputError>,
    /// Modules in the graph, failed ones included
    pub modules: usize,
    pub cache_hits: usize,
    pub validation: ValidationStatus,
    pub duration: Duration,
}

impl RunReport {
    /// No input failed.
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }

    /// Errors attributed to `input`.
    pub fn errors_for<'a>(&'a self, input: &'a str) -> impl Iterator<Item = &'a InputError> + 'a {
        self.errors.iter().filter(move |e| e.input() == input)
    }

    /// One-line summary for the CLI.
    pub fn summary(&self) -> String {
        let primaries = self.artifacts.of_kind(ArtifactKind::Primary).count();
        let chunks = self.artifacts.of_kind(ArtifactKind::Chunk).count();
        let status = if self.is_success() {
            "Build complete".to_string()
        } else {
            format!("Build finished with {} error(s)", self.errors.len())
        };
        format!(
            "{} ({}): {} modules, {} bundle(s), {} chunk(s), {} bytes in {:.2}s",
            status,
            self.mode,
            self.modules,
            primaries,
            chunks,
            self.artifacts.total_bytes(),
            self.duration.as_secs_f64()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emit::Artifact;
    use std::path::PathBuf;

    fn report(errors: Vec<InputError>) -> RunReport {
        RunReport {
            mode: Mode::Development,
            artifacts: OutputArtifacts {
                out_dir: PathBuf::from("out"),
                artifacts: vec![Artifact {
                    entry: Some("renderers".to_string()),
                    kind: ArtifactKind::Primary,
                    path: PathBuf::from("renderers.js"),
                    bytes: 120,
                }],
            },
            errors,
            modules: 3,
            cache_hits: 0,
            validation: ValidationStatus::Disabled,
            duration: Duration::from_millis(1500),
        }
    }

    #[test]
    fn test_summary_success() {
        let r = report(vec![]);
        assert!(r.is_success());
        assert_eq!(
            r.summary(),
            "Build complete (development): 3 modules, 1 bundle(s), 0 chunk(s), 120 bytes in 1.50s"
        );
    }

    #[test]
    fn test_summary_with_errors() {
        let error = TransformError::new("src/x.ts", "script", "boom");
        let r = report(vec![InputError::Transform(error)]);
        assert!(!r.is_success());
        assert!(r.summary().starts_with("Build finished with 1 error(s)"));
        assert_eq!(r.errors_for("src/x.ts").count(), 1);
        assert_eq!(r.errors_for("src/y.ts").count(), 0);
    }

    #[test]
    fn test_input_error_identity() {
        let e = InputError::from(ResolutionError::NotFound {
            specifier: "./missing".to_string(),
            importer: "src/a.ts".to_string(),
        });
        assert_eq!(e.input(), "src/a.ts");
        assert_eq!(e.to_string(), "src/a.ts: cannot resolve './missing'");
    }

    #[test]
    fn test_validation_status_display() {
        let summary = ValidationSummary { files_checked: 2, errors: 0, warnings: 1, infos: 3 };
        let status = ValidationStatus::Completed(summary);
        assert_eq!(status.to_string(), "2 files checked, 0 errors, 1 warnings, 3 notes");
    }
}
