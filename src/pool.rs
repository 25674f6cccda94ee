//! Worker pool dispatcher.
//!
//! Expensive stages are offloaded to a bounded set of worker threads fed from
//! one shared queue; an idle worker takes the next job, which gives
//! least-loaded assignment without per-worker queues. Workers are spawned
//! lazily up to the pool size and reclaimed according to a
//! [`PoolLifecyclePolicy`].
//!
//! The pool is only reachable through [`Dispatcher`]; nothing else holds a
//! worker handle.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};

use crate::transforms::{StageInput, Transform, TransformError, TransformOutput};

/// When idle workers are reclaimed and whether the pool outlives a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolLifecyclePolicy {
    idle_timeout: Option<Duration>,
    teardown_after_run: bool,
}

impl PoolLifecyclePolicy {
    /// Reclaim a worker after it sits idle for `timeout`; tear the pool down
    /// when the run completes.
    pub fn reclaim_after(timeout: Duration) -> Self {
        Self { idle_timeout: Some(timeout), teardown_after_run: true }
    }

    /// Keep idle workers alive indefinitely and across runs.
    pub fn retain() -> Self {
        Self { idle_timeout: None, teardown_after_run: false }
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout
    }

    pub fn tears_down_after_run(&self) -> bool {
        self.teardown_after_run
    }
}

/// Pool size for `available` hardware threads: one is left for the
/// validation side-channel, and there is always at least one worker.
pub fn pool_size(available: usize) -> usize {
    available.saturating_sub(1).max(1)
}

/// Pool size for this machine.
pub fn default_pool_size() -> usize {
    pool_size(thread::available_parallelism().map(|n| n.get()).unwrap_or(1))
}

/// Shared cancellation flag for one pipeline run.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Run one stage, turning a failure or a panic into a [`TransformError`]
/// tagged with the input identity.
pub fn run_stage(
    stage: &dyn Transform,
    input: &StageInput,
) -> Result<TransformOutput, TransformError> {
    match panic::catch_unwind(AssertUnwindSafe(|| stage.apply(input))) {
        Ok(Ok(output)) => Ok(output),
        Ok(Err(message)) => Err(TransformError::new(&input.id, stage.name(), message)),
        Err(payload) => Err(TransformError::new(
            &input.id,
            stage.name(),
            format!("stage panicked: {}", panic_message(payload.as_ref())),
        )),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Result of a pooled stage, delivered to the coordinator's completion
/// channel together with the caller's tag.
#[derive(Debug)]
pub struct StageCompletion<T> {
    pub tag: T,
    pub result: Result<TransformOutput, TransformError>,
}

/// Handle to a stage running on the pool.
#[derive(Debug)]
pub struct StageHandle {
    input: String,
    stage: &'static str,
    rx: Receiver<Result<TransformOutput, TransformError>>,
}

impl StageHandle {
    /// Block until the stage finishes.
    pub fn wait(self) -> Result<TransformOutput, TransformError> {
        self.rx.recv().unwrap_or_else(|_| Err(self.abandoned()))
    }

    /// Non-blocking poll; `None` while the stage is still running.
    pub fn try_wait(&self) -> Option<Result<TransformOutput, TransformError>> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(self.abandoned())),
        }
    }

    fn abandoned(&self) -> TransformError {
        TransformError::new(&self.input, self.stage, "stage was abandoned before completing")
    }
}

type Job = Box<dyn FnOnce() + Send + 'static>;

#[derive(Debug)]
struct PoolState {
    generation: u64,
    live: usize,
    idle: usize,
    queued: usize,
    tx: Sender<Job>,
    rx: Receiver<Job>,
}

#[derive(Debug)]
struct Shared {
    state: Mutex<PoolState>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, PoolState> {
        // A poisoned lock only means a worker panicked between two counter
        // updates; the counters are still usable.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Bounded worker pool reached through a shared job queue.
#[derive(Debug)]
pub struct Dispatcher {
    size: usize,
    policy: PoolLifecyclePolicy,
    shared: Arc<Shared>,
}

impl Dispatcher {
    pub fn new(size: usize, policy: PoolLifecyclePolicy) -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        let state = PoolState { generation: 0, live: 0, idle: 0, queued: 0, tx, rx };
        Self { size: size.max(1), policy, shared: Arc::new(Shared { state: Mutex::new(state) }) }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn policy(&self) -> PoolLifecyclePolicy {
        self.policy
    }

    /// Workers currently alive in the active generation.
    pub fn live_workers(&self) -> usize {
        self.shared.lock().live
    }

    /// Jobs submitted but not yet picked up by a worker.
    pub fn queued_jobs(&self) -> usize {
        self.shared.lock().queued
    }

    /// Run `stage` on `input` in the pool.
    pub fn dispatch(&self, stage: Arc<dyn Transform>, input: StageInput) -> StageHandle {
        let (tx, rx) = crossbeam_channel::bounded(1);
        let handle = StageHandle { input: input.id.clone(), stage: stage.name(), rx };
        self.submit(Box::new(move || {
            let _ = tx.send(run_stage(stage.as_ref(), &input));
        }));
        handle
    }

    /// Run `stage` on `input` in the pool and report to `done`.
    ///
    /// Jobs still queued when `cancel` fires are dropped without running.
    pub fn dispatch_to<T: Send + 'static>(
        &self,
        stage: Arc<dyn Transform>,
        input: StageInput,
        tag: T,
        cancel: CancellationToken,
        done: Sender<StageCompletion<T>>,
    ) {
        self.submit(Box::new(move || {
            if cancel.is_cancelled() {
                return;
            }
            let result = run_stage(stage.as_ref(), &input);
            let _ = done.send(StageCompletion { tag, result });
        }));
    }

    fn submit(&self, job: Job) {
        let mut state = self.shared.lock();
        state.queued += 1;
        if state.tx.send(job).is_err() {
            // The pool owns both ends of the queue, so this cannot happen
            // while `state` is held.
            state.queued -= 1;
            return;
        }
        if state.queued > state.idle && state.live < self.size {
            state.live += 1;
            state.idle += 1;
            let worker = Worker {
                generation: state.generation,
                rx: state.rx.clone(),
                idle_timeout: self.policy.idle_timeout,
                shared: Arc::clone(&self.shared),
            };
            let spawned = thread::Builder::new()
                .name(format!("renderpack-worker-{}", state.live))
                .spawn(move || worker.run());
            if let Err(e) = spawned {
                tracing::warn!(error = %e, "failed to spawn pool worker");
                state.live -= 1;
                state.idle -= 1;
            }
        }
    }

    /// Called when a run completes; tears the pool down if the policy says so.
    pub fn finish_run(&self) {
        if self.policy.teardown_after_run {
            self.shutdown();
        }
    }

    /// Retire every worker. Jobs already queued still run; the dispatcher
    /// stays usable and spawns fresh workers on the next dispatch.
    pub fn shutdown(&self) {
        let mut state = self.shared.lock();
        let (tx, rx) = crossbeam_channel::unbounded();
        state.tx = tx;
        state.rx = rx;
        state.generation += 1;
        state.live = 0;
        state.idle = 0;
        state.queued = 0;
        tracing::debug!(generation = state.generation, "worker pool shut down");
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct Worker {
    generation: u64,
    rx: Receiver<Job>,
    idle_timeout: Option<Duration>,
    shared: Arc<Shared>,
}

impl Worker {
    fn run(self) {
        loop {
            let next = match self.idle_timeout {
                Some(timeout) => self.rx.recv_timeout(timeout),
                None => self.rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
            };
            match next {
                Ok(job) => {
                    self.update(|state| {
                        state.queued = state.queued.saturating_sub(1);
                        state.idle = state.idle.saturating_sub(1);
                    });
                    job();
                    self.update(|state| state.idle += 1);
                }
                Err(RecvTimeoutError::Timeout) => {
                    let mut state = self.shared.lock();
                    // Re-check under the lock so a job submitted during the
                    // timeout is not stranded.
                    if self.rx.is_empty() {
                        if state.generation == self.generation {
                            state.live = state.live.saturating_sub(1);
                            state.idle = state.idle.saturating_sub(1);
                        }
                        tracing::trace!("idle pool worker reclaimed");
                        return;
                    }
                }
                Err(RecvTimeoutError::Disconnected) => return,
            }
        }
    }

    fn update(&self, f: impl FnOnce(&mut PoolState)) {
        let mut state = self.shared.lock();
        if state.generation == self.generation {
            f(&mut state);
        }
    }
}
