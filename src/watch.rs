//! Watch mode for automatic rebuilds on file changes
//!
//! Provides file system watching with debouncing for `rpack build --watch`.
//! Each build runs on its own thread so a change arriving mid-build can
//! cancel it; the next build reuses the same pipeline, which keeps its worker
//! pool and transform cache between runs.

use notify::RecursiveMode;
use notify_debouncer_mini::{new_debouncer, DebouncedEventKind};
use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};
use std::sync::mpsc::{channel, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::build::{Pipeline, PipelineError, RunReport};
use crate::pool::CancellationToken;
use crate::validate::TracingSink;

/// How often the watch loop checks whether the running build finished.
const BUILD_POLL: Duration = Duration::from_millis(100);

/// Error during watch mode
#[derive(Debug, Error)]
pub enum WatchError {
    #[error("failed to initialize file watcher: {0}")]
    WatcherInit(#[source] notify::Error),
    #[error("failed to watch path: {0}")]
    WatchPath(#[source] notify::Error),
    #[error("watch channel error: {0}")]
    ChannelError(String),
    #[error("failed to start build thread: {0}")]
    Spawn(#[source] std::io::Error),
}

/// Tracks inputs with errors across build iterations for recovery detection
#[derive(Debug, Default)]
pub struct ErrorTracker {
    inputs_with_errors: HashSet<String>,
}

impl ErrorTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Update tracker with a new report, returns the inputs that were fixed
    pub fn update(&mut self, report: &RunReport) -> Vec<String> {
        let current: HashSet<String> =
            report.errors.iter().map(|e| e.input().to_string()).collect();
        let mut fixed: Vec<String> =
            self.inputs_with_errors.difference(&current).cloned().collect();
        fixed.sort();
        self.inputs_with_errors = current;
        fixed
    }

    pub fn has_errors(&self) -> bool {
        !self.inputs_with_errors.is_empty()
    }

    pub fn error_count(&self) -> usize {
        self.inputs_with_errors.len()
    }
}

/// Options for watch mode
#[derive(Debug, Clone)]
pub struct WatchOptions {
    /// Directory watched recursively
    pub root: PathBuf,
    /// Output directory; changes under it never trigger a rebuild
    pub out_dir: PathBuf,
    pub debounce: Duration,
    pub clear_screen: bool,
}

impl WatchOptions {
    /// Options for watching the project a pipeline builds.
    pub fn for_pipeline(pipeline: &Pipeline) -> Self {
        let config = pipeline.config();
        Self {
            root: config.project_root().to_path_buf(),
            out_dir: config.out_dir().to_path_buf(),
            debounce: config.debounce(),
            clear_screen: config.clear_screen(),
        }
    }
}

/// Clear the terminal screen
fn clear_screen() {
    // ANSI escape code to clear screen and move cursor to top-left
    print!("\x1B[2J\x1B[1;1H");
}

/// Format duration for display
fn format_duration(duration: Duration) -> String {
    let millis = duration.as_millis();
    if millis < 1000 {
        format!("{}ms", millis)
    } else {
        format!("{:.2}s", duration.as_secs_f64())
    }
}

/// Get current timestamp for logging
fn timestamp() -> String {
    use std::time::SystemTime;
    let now = SystemTime::now().duration_since(SystemTime::UNIX_EPOCH).unwrap_or_default();
    let secs = now.as_secs() % 86400; // seconds since midnight
    let hours = (secs / 3600) % 24;
    let minutes = (secs / 60) % 60;
    let seconds = secs % 60;
    format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
}

/// A build running on its own thread.
struct RunningBuild {
    cancel: CancellationToken,
    join: JoinHandle<Result<RunReport, PipelineError>>,
}

impl RunningBuild {
    fn start(pipeline: &Arc<Pipeline>) -> Result<Self, WatchError> {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let pipeline = Arc::clone(pipeline);
        let join = thread::Builder::new()
            .name("renderpack-build".to_string())
            .spawn(move || pipeline.run_with(&token, Box::new(TracingSink)))
            .map_err(WatchError::Spawn)?;
        Ok(Self { cancel, join })
    }

    fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    fn wait(self) -> Result<RunReport, PipelineError> {
        self.join.join().unwrap_or(Err(PipelineError::Cancelled))
    }
}

/// Watch for file changes and rebuild automatically.
///
/// This function blocks and runs until interrupted (Ctrl+C). A change that
/// arrives while a build is running cancels that build and starts a new one.
pub fn watch_and_rebuild(pipeline: Arc<Pipeline>, options: WatchOptions) -> Result<(), WatchError> {
    let (tx, rx) = channel();
    let mut debouncer = new_debouncer(options.debounce, tx).map_err(WatchError::WatcherInit)?;
    debouncer
        .watcher()
        .watch(&options.root, RecursiveMode::Recursive)
        .map_err(WatchError::WatchPath)?;

    let mut error_tracker = ErrorTracker::new();

    if options.clear_screen {
        clear_screen();
    }
    println!("[{}] Building...", timestamp());
    let mut running = Some(RunningBuild::start(&pipeline)?);

    loop {
        match rx.recv_timeout(BUILD_POLL) {
            Ok(Ok(events)) => {
                let changed: Vec<&Path> = events
                    .iter()
                    .filter(|e| matches!(e.kind, DebouncedEventKind::Any))
                    .filter(|e| is_relevant_file(&e.path, &options))
                    .map(|e| e.path.as_path())
                    .collect();
                if changed.is_empty() {
                    continue;
                }

                if let Some(build) = running.take() {
                    debug!("cancelling in-flight build");
                    build.cancel.cancel();
                    if let Ok(report) = build.wait() {
                        // Finished before the cancel was seen.
                        error_tracker.update(&report);
                    }
                }

                for path in &changed {
                    if let Some(name) = path.file_name() {
                        println!("[{}] Changed: {}", timestamp(), name.to_string_lossy());
                    }
                }
                if options.clear_screen {
                    clear_screen();
                }
                println!("[{}] Building...", timestamp());
                running = Some(RunningBuild::start(&pipeline)?);
            }
            Ok(Err(error)) => {
                // Watch error (non-fatal) - log but continue watching
                warn!(error = ?error, "watch error");
                eprintln!("[{}] Watch error: {:?}", timestamp(), error);
            }
            Err(RecvTimeoutError::Timeout) => {
                if running.as_ref().is_some_and(RunningBuild::is_finished) {
                    if let Some(build) = running.take() {
                        print_build_result(build.wait(), &mut error_tracker);
                        let root = options.root.display();
                        println!("[{}] Watching {} for changes...", timestamp(), root);
                    }
                }
            }
            Err(RecvTimeoutError::Disconnected) => {
                return Err(WatchError::ChannelError("file watcher stopped".to_string()));
            }
        }
    }
}

/// Check if a changed path should trigger a rebuild
fn is_relevant_file(path: &Path, options: &WatchOptions) -> bool {
    if path.starts_with(&options.out_dir) {
        return false;
    }
    let rel = path.strip_prefix(&options.root).unwrap_or(path);
    !rel.components().any(|c| match c {
        Component::Normal(name) => name.to_string_lossy().starts_with('.'),
        _ => false,
    })
}

/// Print build result to console with fixed input notifications
fn print_build_result(result: Result<RunReport, PipelineError>, tracker: &mut ErrorTracker) {
    let report = match result {
        Ok(report) => report,
        Err(PipelineError::Cancelled) => return,
        Err(e) => {
            eprintln!("[{}] Build failed: {}", timestamp(), e);
            if let PipelineError::Syntax { errors } = &e {
                for d in errors {
                    eprintln!("[{}] {}", timestamp(), d);
                }
            }
            return;
        }
    };

    for fixed in tracker.update(&report) {
        println!("[{}] Fixed: {}", timestamp(), fixed);
    }

    if report.is_success() {
        println!(
            "[{}] Build complete ({}) - Modules: {} | Files: {}",
            timestamp(),
            format_duration(report.duration),
            report.modules,
            report.artifacts.len()
        );
    } else {
        let error_count = report.errors.len();
        println!(
            "[{}] Build failed ({}) - {} error{}",
            timestamp(),
            format_duration(report.duration),
            error_count,
            if error_count == 1 { "" } else { "s" }
        );
        for error in &report.errors {
            eprintln!("[{}] Error: {}", timestamp(), error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::{InputError, ValidationStatus};
    use crate::emit::OutputArtifacts;
    use crate::mode::Mode;
    use crate::transforms::TransformError;

    fn options() -> WatchOptions {
        WatchOptions {
            root: PathBuf::from("/project"),
            out_dir: PathBuf::from("/project/out/client_renderer"),
            debounce: Duration::from_millis(100),
            clear_screen: false,
        }
    }

    fn report(failing: &[&str]) -> RunReport {
        RunReport {
            mode: Mode::Development,
            artifacts: OutputArtifacts::default(),
            errors: failing
                .iter()
                .map(|id| InputError::Transform(TransformError::new(*id, "script", "boom")))
                .collect(),
            modules: 1,
            cache_hits: 0,
            validation: ValidationStatus::Disabled,
            duration: Duration::from_millis(10),
        }
    }

    #[test]
    fn test_is_relevant_file() {
        let options = options();
        assert!(is_relevant_file(Path::new("/project/src/client/index.tsx"), &options));
        assert!(is_relevant_file(Path::new("/project/node_modules/x/index.js"), &options));
        let bundle = Path::new("/project/out/client_renderer/renderers.js");
        assert!(!is_relevant_file(bundle, &options));
        assert!(!is_relevant_file(Path::new("/project/.git/index"), &options));
    }

    #[test]
    fn test_error_tracker_reports_fixed() {
        let mut tracker = ErrorTracker::new();
        assert!(tracker.update(&report(&["src/a.ts", "src/b.ts"])).is_empty());
        assert_eq!(tracker.error_count(), 2);

        let fixed = tracker.update(&report(&["src/b.ts"]));
        assert_eq!(fixed, vec!["src/a.ts".to_string()]);
        assert!(tracker.has_errors());

        let fixed = tracker.update(&report(&[]));
        assert_eq!(fixed, vec!["src/b.ts".to_string()]);
        assert!(!tracker.has_errors());
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_millis(50)), "50ms");
        assert_eq!(format_duration(Duration::from_millis(999)), "999ms");
        assert_eq!(format_duration(Duration::from_millis(1000)), "1.00s");
        assert_eq!(format_duration(Duration::from_millis(1500)), "1.50s");
    }

    #[test]
    fn test_timestamp_format() {
        let ts = timestamp();
        assert_eq!(ts.len(), 8);
        assert_eq!(&ts[2..3], ":");
        assert_eq!(&ts[5..6], ":");
    }
}
