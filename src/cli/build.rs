//! Command implementations (build, check, rules)

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use super::{EXIT_ERROR, EXIT_INVALID_ARGS, EXIT_SUCCESS};
use crate::build::{Pipeline, PipelineConfig, PipelineError, RunReport};
use crate::config::{
    load_config, merge_cli_overrides, parse_entry_override, project_root, CliOverrides,
    RenderpackConfig,
};
use crate::mode::Mode;
use crate::validate::{CollectingSink, Severity, TracingSink, Validator};

/// Arguments of `rpack build`, minus the mode.
#[derive(Debug, Clone, Default)]
pub struct BuildArgs {
    pub config: Option<PathBuf>,
    pub out: Option<PathBuf>,
    pub entries: Vec<String>,
    pub jobs: Option<usize>,
    pub watch: bool,
    pub no_validate: bool,
    pub verbose: bool,
}

/// Load the config and work out the project root, printing any error.
fn load_project(
    config_path: Option<&Path>,
    overrides: &CliOverrides,
    verbose: bool,
) -> Result<(RenderpackConfig, PathBuf), ExitCode> {
    let (mut config, found) = load_config(config_path).map_err(|e| {
        eprintln!("Error loading config: {}", e);
        ExitCode::from(EXIT_INVALID_ARGS)
    })?;

    if verbose {
        match &found {
            Some(path) => println!("Using config: {}", path.display()),
            None => println!("No renderpack.toml found, using defaults"),
        }
    }

    merge_cli_overrides(&mut config, overrides);
    let root = project_root(&config, found.as_deref());
    Ok((config, root))
}

/// Run the build command
pub fn run_build(args: BuildArgs, mode: Mode) -> ExitCode {
    let mut entries = Vec::with_capacity(args.entries.len());
    for raw in &args.entries {
        match parse_entry_override(raw) {
            Ok(entry) => entries.push(entry),
            Err(e) => {
                eprintln!("Error: {}", e);
                return ExitCode::from(EXIT_INVALID_ARGS);
            }
        }
    }
    let overrides = CliOverrides {
        out: args.out.clone(),
        entries,
        jobs: args.jobs,
        no_validate: args.no_validate,
    };

    let (config, root) = match load_project(args.config.as_deref(), &overrides, args.verbose) {
        Ok(project) => project,
        Err(code) => return code,
    };

    let pipeline = match Pipeline::new(PipelineConfig::new(&config, root, mode)) {
        Ok(pipeline) => pipeline,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::from(EXIT_INVALID_ARGS);
        }
    };

    if args.verbose {
        println!("Mode: {}", mode);
        println!("Output: {}", pipeline.config().out_dir().display());
        println!("Workers: {}", pipeline.config().workers());
    }

    if args.watch {
        let options = crate::watch::WatchOptions::for_pipeline(&pipeline);
        println!("Starting watch mode...");
        println!("Press Ctrl+C to stop");
        println!();

        return match crate::watch::watch_and_rebuild(Arc::new(pipeline), options) {
            Ok(()) => ExitCode::from(EXIT_SUCCESS),
            Err(e) => {
                eprintln!("Watch error: {}", e);
                ExitCode::from(EXIT_ERROR)
            }
        };
    }

    println!("Building ({})...", mode);
    report_build(pipeline.run(Box::new(TracingSink)), args.verbose)
}

/// Print a build outcome and pick the exit code.
fn report_build(result: Result<RunReport, PipelineError>, verbose: bool) -> ExitCode {
    match result {
        Ok(report) => {
            if verbose {
                for artifact in &report.artifacts.artifacts {
                    println!("  {} ({} bytes)", artifact.path.display(), artifact.bytes);
                }
                println!("  {}", report.validation);
            }
            if report.is_success() {
                println!("{}", report.summary());
                ExitCode::from(EXIT_SUCCESS)
            } else {
                for error in &report.errors {
                    eprintln!("Error: {}", error);
                }
                eprintln!("{}", report.summary());
                ExitCode::from(EXIT_ERROR)
            }
        }
        Err(PipelineError::Syntax { errors }) => {
            for d in &errors {
                eprintln!("{}", d);
            }
            eprintln!("Build error: {} syntax error(s); nothing was emitted", errors.len());
            ExitCode::from(EXIT_ERROR)
        }
        Err(e) => {
            eprintln!("Build error: {}", e);
            ExitCode::from(EXIT_ERROR)
        }
    }
}

/// Run the check command: validation only, on the calling thread.
pub fn run_check(config_path: Option<&Path>, mode: Mode) -> ExitCode {
    let (config, root) = match load_project(config_path, &CliOverrides::default(), false) {
        Ok(project) => project,
        Err(code) => return code,
    };
    let context = PipelineConfig::new(&config, root, mode);
    let validator = Validator::new(context.resolver(), context.validator_options());

    let sink = CollectingSink::default();
    match validator.run(Box::new(sink.clone()), |_| {}) {
        Ok(summary) => {
            for d in sink.diagnostics() {
                eprintln!("{}", d);
            }
            println!(
                "Checked {} files: {} errors, {} warnings, {} notes",
                summary.files_checked, summary.errors, summary.warnings, summary.infos
            );
            let has_errors = sink.diagnostics().iter().any(|d| d.severity == Severity::Error);
            ExitCode::from(if has_errors { EXIT_ERROR } else { EXIT_SUCCESS })
        }
        Err(e) => {
            eprintln!("Validation error: {}", e);
            ExitCode::from(EXIT_ERROR)
        }
    }
}

/// Run the rules command
pub fn run_rules(config_path: Option<&Path>, mode: Mode) -> ExitCode {
    let (config, root) = match load_project(config_path, &CliOverrides::default(), false) {
        Ok(project) => project,
        Err(code) => return code,
    };
    let context = PipelineConfig::new(&config, root, mode);
    let table = match context.rule_table() {
        Ok(table) => table,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::from(EXIT_INVALID_ARGS);
        }
    };

    println!("Rules ({}):", mode);
    for line in describe_rules(&table) {
        println!("{}", line);
    }
    ExitCode::from(EXIT_SUCCESS)
}

/// The table in match order, followed by the pass-through behavior.
fn describe_rules(table: &crate::rules::RuleTable) -> Vec<String> {
    let mut lines: Vec<String> =
        table.rules().iter().enumerate().map(|(i, rule)| format!("  {:>2}  {}", i, rule)).collect();
    lines.push("   -  unmatched .js .mjs .cjs .json -> linked as modules".to_string());
    lines.push("   -  anything else -> copied unchanged to assets/".to_string());
    lines
}
