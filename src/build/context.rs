//! Immutable run configuration.
//!
//! A [`PipelineConfig`] is built once from the loaded config file, CLI
//! overrides and the resolved [`Mode`], and is then passed explicitly to
//! every component. Nothing below this point reads the environment.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::{CompatPatchConfig, RenderpackConfig, RuleConfig, ValidateConfig};
use crate::emit::{source_root_for, EmitOptions};
use crate::mode::{Mode, ModeSettings};
use crate::pool::{default_pool_size, Dispatcher};
use crate::resolve::{canonical_root, Resolver, ResolverOptions};
use crate::rules::{build_rules, RuleTable, RuleTableError};
use crate::transforms::BindContext;
use crate::validate::ValidatorOptions;

/// Everything a pipeline run needs, fixed before the run starts.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    settings: ModeSettings,
    /// Project root; module ids are relative to it
    project_root: PathBuf,
    /// Entry name to path, relative to the project root
    entries: BTreeMap<String, PathBuf>,
    out_dir: PathBuf,
    filename: String,
    chunk_filename: String,
    resolver_options: ResolverOptions,
    defines: BTreeMap<String, String>,
    inline_limit: u64,
    compat_patches: Vec<CompatPatchConfig>,
    rules: Option<Vec<RuleConfig>>,
    validate: ValidateConfig,
    workers: usize,
    debounce: Duration,
    clear_screen: bool,
}

impl PipelineConfig {
    /// Build the run configuration.
    ///
    /// # Arguments
    /// - `config` - Loaded configuration with CLI overrides already merged
    /// - `project_root` - Directory module ids and relative paths are based on
    /// - `mode` - The mode resolved for this run
    pub fn new(config: &RenderpackConfig, project_root: PathBuf, mode: Mode) -> Self {
        let project_root = canonical_root(&project_root);
        let idle_timeout = Duration::from_millis(config.pool.idle_timeout_ms);
        let settings = ModeSettings::for_mode(mode, idle_timeout);
        let resolve_path =
            |p: &Path| if p.is_absolute() { p.to_path_buf() } else { project_root.join(p) };

        Self {
            settings,
            out_dir: resolve_path(&config.output.dir),
            entries: config.entries.clone(),
            filename: config.output.filename.clone(),
            chunk_filename: config.output.chunk_filename.clone(),
            resolver_options: ResolverOptions {
                extensions: config.resolve.extensions.clone(),
                fallback: config.resolve.fallback.clone(),
                modules_dir: config.resolve.modules_dir.clone(),
            },
            defines: config.define.clone(),
            inline_limit: config.assets.inline_limit,
            compat_patches: config.compat_patches.clone(),
            rules: config.rules.clone(),
            validate: config.validate.clone(),
            workers: config.pool.workers.unwrap_or_else(default_pool_size),
            debounce: Duration::from_millis(u64::from(config.watch.debounce_ms)),
            clear_screen: config.watch.clear_screen,
            project_root,
        }
    }

    pub fn settings(&self) -> &ModeSettings {
        &self.settings
    }

    pub fn mode(&self) -> Mode {
        self.settings.mode
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    pub fn entries(&self) -> &BTreeMap<String, PathBuf> {
        &self.entries
    }

    pub fn out_dir(&self) -> &Path {
        &self.out_dir
    }

    /// Number of pooled workers.
    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn validation_enabled(&self) -> bool {
        self.validate.enabled
    }

    pub fn debounce(&self) -> Duration {
        self.debounce
    }

    pub fn clear_screen(&self) -> bool {
        self.clear_screen
    }

    /// Turn the validation side-channel on or off.
    pub fn with_validation(mut self, enabled: bool) -> Self {
        self.validate.enabled = enabled;
        self
    }

    /// Replace the output directory.
    pub fn with_out_dir(mut self, out_dir: PathBuf) -> Self {
        self.out_dir = out_dir;
        self
    }

    pub fn resolver(&self) -> Resolver {
        Resolver::new(self.project_root.clone(), self.resolver_options.clone())
    }

    /// Build the rule table, binding mode and defines into stage options.
    pub fn rule_table(&self) -> Result<RuleTable, RuleTableError> {
        let ctx = BindContext {
            settings: &self.settings,
            defines: &self.defines,
            inline_limit: self.inline_limit,
            compat_patches: &self.compat_patches,
        };
        build_rules(self.rules.as_deref(), &ctx)
    }

    /// A dispatcher sized and reclaimed according to this configuration.
    pub fn dispatcher(&self) -> Dispatcher {
        Dispatcher::new(self.workers, self.settings.pool_policy)
    }

    pub fn emit_options(&self) -> EmitOptions {
        EmitOptions {
            out_dir: self.out_dir.clone(),
            filename: self.filename.clone(),
            chunk_filename: self.chunk_filename.clone(),
            minify: self.settings.minify,
            source_maps: self.settings.source_maps,
            source_root: source_root_for(&self.out_dir, &self.project_root),
        }
    }

    pub fn validator_options(&self) -> ValidatorOptions {
        ValidatorOptions {
            report_files: self.validate.report_files.clone(),
            memory_limit_bytes: self.validate.memory_limit_mb.saturating_mul(1024 * 1024),
            check_syntax: self.validate.check_syntax,
            min_severity: self.settings.min_severity,
        }
    }
}
