//! The pipeline coordinator.
//!
//! One coordinating thread walks the module graph from the entry points:
//! it classifies each input against the rule table, runs inline stages
//! itself, hands pooled stages to the [`Dispatcher`] and resumes an input's
//! chain when its completion arrives. Finished output is linked, its imports
//! are resolved and queued, and once nothing is ready or in flight the graph
//! goes to the emitter.
//!
//! The validation side-channel runs next to all of this on its own thread.
//! Only production runs wait on it, and only for the syntax verdict.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::fs;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::context::PipelineConfig;
use super::result::{InputError, RunReport, ValidationStatus};
use crate::emit::{emit, EmitError};
use crate::graph::{
    json_module_source, opaque_module_source, DepTarget, Dependency, ModuleGraph, ModuleRecord,
};
use crate::link::lower;
use crate::pool::{run_stage, CancellationToken, Dispatcher, StageCompletion};
use crate::resolve::{Resolution, ResolutionError, ResolvedInput, Resolver};
use crate::rules::{extension_of, Disposition, ExecutionPolicy, RuleTable, RuleTableError};
use crate::transforms::{EmittedAsset, StageInput, TransformCache, TransformError, TransformOutput};
use crate::validate::{Diagnostic, DiagnosticSink, ValidationHandle, Validator};

/// How often a coordinator blocked on the pool re-checks cancellation.
const CANCEL_POLL: Duration = Duration::from_millis(50);

/// Failures that end a run without emitting.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid rule table: {0}")]
    RuleTable(#[from] RuleTableError),
    #[error("no entry points configured")]
    NoEntries,
    #[error("{} syntax error(s); emission aborted", errors.len())]
    Syntax { errors: Vec<Diagnostic> },
    #[error("run cancelled")]
    Cancelled,
    #[error(transparent)]
    Emit(#[from] EmitError),
}

/// A configured pipeline. Holds the rule table, the worker pool and the
/// transform cache, all of which outlive a single run.
#[derive(Debug)]
pub struct Pipeline {
    config: PipelineConfig,
    rules: RuleTable,
    resolver: Resolver,
    dispatcher: Arc<Dispatcher>,
    cache: Arc<TransformCache>,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Result<Self, PipelineError> {
        let dispatcher = Arc::new(config.dispatcher());
        Self::with_pool(config, dispatcher, Arc::new(TransformCache::new()))
    }

    /// Build a pipeline on an existing pool and cache.
    pub fn with_pool(
        config: PipelineConfig,
        dispatcher: Arc<Dispatcher>,
        cache: Arc<TransformCache>,
    ) -> Result<Self, PipelineError> {
        if config.entries().is_empty() {
            return Err(PipelineError::NoEntries);
        }
        let rules = config.rule_table()?;
        let resolver = config.resolver();
        Ok(Self { config, rules, resolver, dispatcher, cache })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn rules(&self) -> &RuleTable {
        &self.rules
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn cache(&self) -> &TransformCache {
        &self.cache
    }

    /// Run once to completion.
    pub fn run(&self, sink: Box<dyn DiagnosticSink>) -> Result<RunReport, PipelineError> {
        self.run_with(&CancellationToken::new(), sink)
    }

    /// Run until finished or until `cancel` fires.
    pub fn run_with(
        &self,
        cancel: &CancellationToken,
        sink: Box<dyn DiagnosticSink>,
    ) -> Result<RunReport, PipelineError> {
        let started = Instant::now();
        let _finish = FinishRun(&self.dispatcher);
        let hits_before = self.cache.hits();
        info!(mode = %self.config.mode(), entries = self.config.entries().len(), "build started");

        let validation = self.start_validation(sink);

        let mut walk = Walk::new(self, cancel.clone());
        for (name, path) in self.config.entries() {
            match self.resolver.resolve_entry(path) {
                Ok(resolved) => {
                    walk.graph.add_entry(name.clone(), resolved.id.clone());
                    walk.enqueue(resolved);
                }
                Err(e) => {
                    warn!(entry = %name, error = %e, "entry point not found");
                    walk.errors.push(e.into());
                }
            }
        }
        walk.drive()?;

        // Entries that failed to resolve are not in the graph and produce
        // no artifact.
        let Walk { graph, errors, .. } = walk;

        // Without a syntax pass there is no verdict to wait for.
        let gate =
            self.config.settings().enforce_syntax && self.config.validator_options().check_syntax;
        if gate {
            if let Some(handle) = &validation {
                match handle.syntax_verdict() {
                    Some(verdict) if !verdict.is_clean() => {
                        warn!(errors = verdict.errors.len(), "syntax errors; emission aborted");
                        return Err(PipelineError::Syntax { errors: verdict.errors });
                    }
                    Some(_) => debug!("syntax verdict clean"),
                    None => debug!("no syntax verdict; emitting without it"),
                }
            }
        }

        let artifacts = emit(&graph, &self.config.emit_options())?;

        let validation = match validation {
            Some(handle) => match handle.join() {
                Ok(summary) => ValidationStatus::Completed(summary),
                Err(e) => {
                    warn!(error = %e, "validation did not complete");
                    ValidationStatus::Failed(e.to_string())
                }
            },
            None => ValidationStatus::Disabled,
        };

        for error in &errors {
            warn!(input = error.input(), "{}", error);
        }

        let report = RunReport {
            mode: self.config.mode(),
            artifacts,
            errors,
            modules: graph.len(),
            cache_hits: self.cache.hits() - hits_before,
            validation,
            duration: started.elapsed(),
        };
        info!(
            modules = report.modules,
            errors = report.errors.len(),
            cache_hits = report.cache_hits,
            elapsed_ms = report.duration.as_millis() as u64,
            "build finished"
        );
        Ok(report)
    }

    fn start_validation(&self, sink: Box<dyn DiagnosticSink>) -> Option<ValidationHandle> {
        if !self.config.validation_enabled() {
            return None;
        }
        let validator = Validator::new(self.resolver.clone(), self.config.validator_options());
        match validator.spawn(sink) {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!(error = %e, "could not start validation");
                None
            }
        }
    }
}

/// Hands the pool back to its lifecycle policy however the run ends.
struct FinishRun<'a>(&'a Dispatcher);

impl Drop for FinishRun<'_> {
    fn drop(&mut self) {
        self.0.finish_run();
    }
}

/// How an input is processed, fixed when it is queued.
#[derive(Debug, Clone, Copy)]
enum Handling {
    /// Run the chain of the rule at this index
    Chain(usize),
    Native,
    Opaque,
}

/// One input moving through its chain.
struct Job {
    input: ResolvedInput,
    /// Content as read from disk
    original: Vec<u8>,
    /// Content after the stages run so far
    content: Vec<u8>,
    handling: Handling,
    next_stage: usize,
    cache_key: Option<String>,
    assets: Vec<EmittedAsset>,
}

impl Job {
    fn stage_input(&self) -> StageInput {
        StageInput::new(&self.input.id, &self.input.path, self.content.clone())
    }
}

/// State of one graph walk.
struct Walk<'p> {
    pipeline: &'p Pipeline,
    cancel: CancellationToken,
    graph: ModuleGraph,
    errors: Vec<InputError>,
    seen: HashSet<String>,
    jobs: Vec<Option<Job>>,
    ready: VecDeque<usize>,
    in_flight: usize,
    done_tx: Sender<StageCompletion<usize>>,
    done_rx: Receiver<StageCompletion<usize>>,
}

impl<'p> Walk<'p> {
    fn new(pipeline: &'p Pipeline, cancel: CancellationToken) -> Self {
        let (done_tx, done_rx) = crossbeam_channel::unbounded();
        Self {
            pipeline,
            cancel,
            graph: ModuleGraph::new(),
            errors: Vec::new(),
            seen: HashSet::new(),
            jobs: Vec::new(),
            ready: VecDeque::new(),
            in_flight: 0,
            done_tx,
            done_rx,
        }
    }

    /// Queue `input` unless it is already part of the walk.
    fn enqueue(&mut self, input: ResolvedInput) {
        if !self.seen.insert(input.id.clone()) {
            return;
        }
        let content = match fs::read(&input.path) {
            Ok(content) => content,
            Err(e) => {
                let message = e.to_string();
                let reason = format!("cannot read input: {}", message);
                self.graph.insert(ModuleRecord::failed(&input.id, &input.path, reason));
                let error = ResolutionError::Unreadable { input: input.id.clone(), message };
                self.errors.push(error.into());
                return;
            }
        };

        let rules = &self.pipeline.rules;
        let (handling, cache_key) = match rules.classify(&input.id) {
            Disposition::Chain(index, rule) => {
                (Handling::Chain(index), rule.cache.then(|| rule.cache_key(&content)))
            }
            Disposition::NativeModule => (Handling::Native, None),
            Disposition::Opaque => (Handling::Opaque, None),
        };
        debug!(
            input = %input.id,
            handling = ?handling,
            substituted = input.substituted,
            "input queued"
        );

        self.jobs.push(Some(Job {
            input,
            original: content.clone(),
            content,
            handling,
            next_stage: 0,
            cache_key,
            assets: Vec::new(),
        }));
        self.ready.push_back(self.jobs.len() - 1);
    }

    /// Coordinator loop. Blocks only when nothing is ready and pooled stages
    /// are in flight.
    fn drive(&mut self) -> Result<(), PipelineError> {
        loop {
            if self.cancel.is_cancelled() {
                info!(in_flight = self.in_flight, "run cancelled");
                return Err(PipelineError::Cancelled);
            }
            if let Some(slot) = self.ready.pop_front() {
                self.advance(slot);
                continue;
            }
            if self.in_flight == 0 {
                return Ok(());
            }
            match self.done_rx.recv_timeout(CANCEL_POLL) {
                Ok(StageCompletion { tag, result }) => {
                    self.in_flight -= 1;
                    match result {
                        Ok(output) => {
                            if let Some(job) = self.jobs.get_mut(tag).and_then(Option::as_mut) {
                                job.content = output.content;
                                job.assets.extend(output.assets);
                                job.next_stage += 1;
                                self.ready.push_back(tag);
                            }
                        }
                        Err(e) => self.fail(tag, e),
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                // Both ends live in this struct.
                Err(RecvTimeoutError::Disconnected) => return Ok(()),
            }
        }
    }

    /// Run inline stages until the chain finishes or a pooled stage is handed off.
    fn advance(&mut self, slot: usize) {
        let pipeline = self.pipeline;
        let Some(job) = self.jobs.get_mut(slot).and_then(Option::as_mut) else { return };

        let Handling::Chain(rule_index) = job.handling else {
            self.finish(slot);
            return;
        };
        let rule = &pipeline.rules.rules()[rule_index];

        if job.next_stage == 0 {
            if let Some(cached) = job.cache_key.as_deref().and_then(|key| pipeline.cache.get(key)) {
                debug!(input = %job.input.id, "transform cache hit");
                job.content = cached.content;
                job.assets = cached.assets;
                job.cache_key = None;
                job.next_stage = rule.chain.len();
            }
        }

        while let Some(stage) = rule.chain.get(job.next_stage) {
            match stage.policy {
                ExecutionPolicy::Pooled => {
                    pipeline.dispatcher.dispatch_to(
                        Arc::clone(&stage.transform),
                        job.stage_input(),
                        slot,
                        self.cancel.clone(),
                        self.done_tx.clone(),
                    );
                    self.in_flight += 1;
                    return;
                }
                ExecutionPolicy::Inline => match run_stage(
                    stage.transform.as_ref(),
                    &job.stage_input(),
                ) {
                    Ok(output) => {
                        job.content = output.content;
                        job.assets.extend(output.assets);
                        job.next_stage += 1;
                    }
                    Err(e) => {
                        self.fail(slot, e);
                        return;
                    }
                },
            }
        }

        if let Some(key) = job.cache_key.take() {
            pipeline
                .cache
                .insert(key, TransformOutput {
                    content: job.content.clone(),
                    assets: job.assets.clone(),
                });
        }
        self.finish(slot);
    }

    /// Link a finished input, resolve its imports and queue them.
    fn finish(&mut self, slot: usize) {
        let Some(mut job) = self.jobs.get_mut(slot).and_then(Option::take) else { return };
        let id = job.input.id.clone();

        match pass_through(&job.input, job.handling, &job.content) {
            Ok(PassThrough::Script) => {}
            Ok(PassThrough::Json(source)) => job.content = source.into_bytes(),
            Ok(PassThrough::Opaque(source, asset)) => {
                job.content = source.into_bytes();
                job.assets.push(asset);
            }
            Err(message) => {
                self.fail_job(job, TransformError::new(&id, "link", message));
                return;
            }
        }

        let text = match String::from_utf8(std::mem::take(&mut job.content)) {
            Ok(text) => text,
            Err(_) => {
                let error = TransformError::new(&id, "link", "chain output is not UTF-8 text");
                self.fail_job(job, error);
                return;
            }
        };
        let linked = match lower(&text) {
            Ok(linked) => linked,
            Err(e) => {
                self.fail_job(job, TransformError::new(&id, "link", e.to_string()));
                return;
            }
        };

        // A specifier imported both ways is static.
        let mut specifiers: BTreeMap<String, bool> = BTreeMap::new();
        for import in &linked.imports {
            let dynamic = specifiers.entry(import.specifier.clone()).or_insert(true);
            *dynamic &= import.dynamic;
        }

        let mut deps = BTreeMap::new();
        let mut queued = Vec::new();
        for (specifier, dynamic) in specifiers {
            match self.pipeline.resolver.resolve(&specifier, Some(&job.input.path)) {
                Ok(Resolution::Resolved(resolved)) => {
                    let target = DepTarget::Module(resolved.id.clone());
                    deps.insert(specifier, Dependency { target, dynamic });
                    queued.push(resolved);
                }
                Ok(Resolution::Unavailable { .. }) => {
                    deps.insert(specifier, Dependency { target: DepTarget::Unavailable, dynamic });
                }
                Err(e) => self.errors.push(e.into()),
            }
        }

        let source = String::from_utf8(job.original).ok();
        let mut record = ModuleRecord::linked(&id, &job.input.path, linked).with_source(source);
        record.deps = deps;
        self.graph.insert(record);
        for asset in job.assets {
            self.graph.add_asset(asset);
        }
        debug!(input = %id, imports = queued.len(), "module linked");

        for target in queued {
            self.enqueue(target);
        }
    }

    fn fail(&mut self, slot: usize, error: TransformError) {
        if let Some(job) = self.jobs.get_mut(slot).and_then(Option::take) {
            self.fail_job(job, error);
        }
    }

    fn fail_job(&mut self, job: Job, error: TransformError) {
        debug!(input = %job.input.id, stage = %error.stage, "stage failed");
        let message = format!("stage '{}' failed: {}", error.stage, error.message);
        self.graph.insert(ModuleRecord::failed(&job.input.id, &job.input.path, message));
        self.errors.push(error.into());
    }
}

/// What a pass-through input links as.
enum PassThrough {
    /// Script source linked as it is
    Script,
    Json(String),
    /// Module source exporting the asset's URL, and the asset
    Opaque(String, EmittedAsset),
}

fn pass_through(
    input: &ResolvedInput,
    handling: Handling,
    content: &[u8],
) -> Result<PassThrough, String> {
    match handling {
        Handling::Native if extension_of(&input.id).as_deref() == Some("json") => {
            let text = std::str::from_utf8(content)
                .map_err(|e| format!("input is not valid UTF-8: {}", e))?;
            json_module_source(text).map(PassThrough::Json)
        }
        Handling::Native | Handling::Chain(_) => Ok(PassThrough::Script),
        Handling::Opaque => {
            let file_name = input
                .path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| input.id.clone());
            let (source, asset) = opaque_module_source(&file_name, content.to_vec());
            Ok(PassThrough::Opaque(source, asset))
        }
    }
}
