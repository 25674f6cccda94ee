//! Command-line interface implementation
//!
//! This module provides the CLI entry point and dispatches to submodules
//! for specific command implementations. It is the only part of the crate
//! that reads the process environment.

mod build;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use crate::mode::{resolve_mode, Mode};

/// Exit codes
pub(crate) const EXIT_SUCCESS: u8 = 0;
pub(crate) const EXIT_ERROR: u8 = 1;
pub(crate) const EXIT_INVALID_ARGS: u8 = 2;

/// Environment variable holding the log filter.
pub const LOG_ENV: &str = "RENDERPACK_LOG";

/// Environment variables whose presence marks a CI build.
const CI_VARS: [&str; 3] = ["CI", "TF_BUILD", "GITHUB_ACTIONS"];

/// renderpack - bundle a client renderer for the browser
#[derive(Parser)]
#[command(name = "rpack")]
#[command(about = "renderpack - transform, link and bundle client renderer sources")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Build the configured entry points
    Build {
        /// Build mode (CI environments always build for production)
        #[arg(long, value_parser = ["development", "production"])]
        mode: Option<String>,

        /// Path to renderpack.toml (default: search upward from the current directory)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Override output directory
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Add or replace an entry point (name=path)
        #[arg(short, long = "entry", value_name = "NAME=PATH")]
        entries: Vec<String>,

        /// Number of pooled workers (default: available parallelism minus one)
        #[arg(short, long)]
        jobs: Option<usize>,

        /// Watch for changes and rebuild automatically
        #[arg(short, long)]
        watch: bool,

        /// Skip the type-validation side-channel
        #[arg(long)]
        no_validate: bool,

        /// Verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Run the type-validation side-channel only
    Check {
        /// Path to renderpack.toml
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Print the resolved rule table in match order
    Rules {
        /// Path to renderpack.toml
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

/// Whether the environment marks this as a CI build.
pub fn ci_indicator() -> bool {
    CI_VARS.iter().any(|name| {
        std::env::var(name).is_ok_and(|value| {
            let value = value.trim().to_ascii_lowercase();
            !value.is_empty() && value != "false" && value != "0"
        })
    })
}

/// The mode for this process: CI indicator first, then the raw argv scan.
pub fn process_mode() -> Mode {
    let argv: Vec<String> = std::env::args().collect();
    resolve_mode(ci_indicator(), &argv)
}

/// Install the tracing subscriber. `RENDERPACK_LOG` wins over `verbose`.
fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Run the CLI application
pub fn run() -> ExitCode {
    let cli = Cli::parse();

    match cli.command {
        Commands::Build { mode: _, config, out, entries, jobs, watch, no_validate, verbose } => {
            init_logging(verbose);
            // `--mode` is validated by clap; the mode itself comes from the
            // argv scan so every way of spelling it agrees.
            let args = build::BuildArgs { config, out, entries, jobs, watch, no_validate, verbose };
            build::run_build(args, process_mode())
        }
        Commands::Check { config, verbose } => {
            init_logging(verbose);
            build::run_check(config.as_deref(), process_mode())
        }
        Commands::Rules { config } => {
            init_logging(false);
            build::run_rules(config.as_deref(), process_mode())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_ci() {
        for name in CI_VARS {
            std::env::remove_var(name);
        }
    }

    #[test]
    #[serial]
    fn test_ci_indicator_unset() {
        clear_ci();
        assert!(!ci_indicator());
    }

    #[test]
    #[serial]
    fn test_ci_indicator_set() {
        clear_ci();
        std::env::set_var("GITHUB_ACTIONS", "true");
        assert!(ci_indicator());
        clear_ci();
    }

    #[test]
    #[serial]
    fn test_ci_indicator_false_values() {
        clear_ci();
        std::env::set_var("CI", "false");
        assert!(!ci_indicator());
        std::env::set_var("CI", "0");
        assert!(!ci_indicator());
        clear_ci();
    }

    #[test]
    fn test_cli_parses_build() {
        let cli = Cli::try_parse_from([
            "rpack",
            "build",
            "--mode",
            "production",
            "--entry",
            "main=src/main.ts",
            "--jobs",
            "2",
            "--no-validate",
        ])
        .unwrap();
        match cli.command {
            Commands::Build { mode, entries, jobs, no_validate, .. } => {
                assert_eq!(mode.as_deref(), Some("production"));
                assert_eq!(entries, vec!["main=src/main.ts".to_string()]);
                assert_eq!(jobs, Some(2));
                assert!(no_validate);
            }
            _ => panic!("expected build"),
        }
    }

    #[test]
    fn test_cli_rejects_unknown_mode() {
        assert!(Cli::try_parse_from(["rpack", "build", "--mode", "staging"]).is_err());
    }
}
