//! Build mode resolution.
//!
//! The mode is decided once, before anything else is constructed, and is then
//! fanned out into a [`ModeSettings`] value that every other component reads
//! from. Nothing downstream inspects the environment or argv again.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::pool::PoolLifecyclePolicy;
use crate::validate::Severity;

/// The single mode active for a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Fast local iteration: inline maps, retained workers, permissive checks
    #[default]
    Development,
    /// One-shot builds: minified output, separate maps, syntax gate
    Production,
}

impl Mode {
    pub fn is_production(self) -> bool {
        matches!(self, Mode::Production)
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Development => write!(f, "development"),
            Mode::Production => write!(f, "production"),
        }
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Mode::Development),
            "production" | "prod" => Ok(Mode::Production),
            other => Err(format!("unknown mode '{}', expected development or production", other)),
        }
    }
}

/// Resolve the build mode from the CI indicator and the raw argument list.
///
/// Production is selected when `ci_flag` is set, when a single token names
/// both the mode flag and the production value (`--mode=production`), or
/// when a mode flag token is directly followed by a `production` token.
/// Anything else resolves to development.
pub fn resolve_mode<S: AsRef<str>>(ci_flag: bool, argv: &[S]) -> Mode {
    if ci_flag {
        return Mode::Production;
    }

    let tokens: Vec<&str> = argv.iter().map(|a| a.as_ref()).collect();
    for (i, token) in tokens.iter().enumerate() {
        if !token.contains("mode") {
            continue;
        }
        if token.contains("production") {
            return Mode::Production;
        }
        if is_mode_flag(token) && tokens.get(i + 1).is_some_and(|next| *next == "production") {
            return Mode::Production;
        }
    }

    Mode::Development
}

fn is_mode_flag(token: &str) -> bool {
    token.starts_with('-') && token.trim_start_matches('-') == "mode"
}

/// How source maps accompany the emitted bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceMapStyle {
    /// Full line mappings written to a separate `.map` artifact
    Separate,
    /// Module-level mappings embedded as a data URL in the primary artifact
    Inline,
}

/// Every mode-dependent decision, computed once per run.
#[derive(Debug, Clone, PartialEq)]
pub struct ModeSettings {
    pub mode: Mode,
    /// Compact script and stylesheet output
    pub minify: bool,
    pub source_maps: SourceMapStyle,
    /// Worker reclamation policy handed to the dispatcher
    pub pool_policy: PoolLifecyclePolicy,
    /// Hard syntax errors abort emission
    pub enforce_syntax: bool,
    /// Lowest diagnostic severity forwarded to the sink
    pub min_severity: Severity,
}

impl ModeSettings {
    /// Default idle timeout for pooled workers in production builds.
    pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_millis(1000);

    pub fn for_mode(mode: Mode, idle_timeout: Duration) -> Self {
        match mode {
            Mode::Production => Self {
                mode,
                minify: true,
                source_maps: SourceMapStyle::Separate,
                pool_policy: PoolLifecyclePolicy::reclaim_after(idle_timeout),
                enforce_syntax: true,
                min_severity: Severity::Warning,
            },
            Mode::Development => Self {
                mode,
                minify: false,
                source_maps: SourceMapStyle::Inline,
                pool_policy: PoolLifecyclePolicy::retain(),
                enforce_syntax: false,
                min_severity: Severity::Info,
            },
        }
    }
}

impl From<Mode> for ModeSettings {
    fn from(mode: Mode) -> Self {
        Self::for_mode(mode, Self::DEFAULT_IDLE_TIMEOUT)
    }
}
