//! The stage worker engine shared by every stage variant (spec component B).
//!
//! Ports the state machine of the original `PipelineStageBase` (see
//! `src/parallel/PipelineStageBase.hpp` in the retrieved original source):
//! an unbounded input queue, two independently-locked lifecycle flags, and
//! a worker loop that pops-or-sleeps until told to stop or to drain and
//! quiesce.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use tracing::{debug, trace, warn};

use crate::config::EngineConfig;
use crate::error::StageError;
use crate::sink::StageId;

/// An error-handler callback: `(stage_id, opaque error payload) -> ()`.
pub(crate) type ErrorHandler = Arc<dyn Fn(StageId, StageError) + Send + Sync>;

/// The per-item action a concrete stage variant performs. `TransformStage`
/// computes the output and fans it out; `TerminalStage` calls the user
/// sink. Either way, a `Result::Err` (or a caught panic) is routed to the
/// error handler and the loop continues with the next item.
pub(crate) type ProcessFn<I> = Box<dyn Fn(I) -> Result<(), StageError> + Send + Sync>;

#[derive(Debug, Default, Clone, Copy)]
struct LifecycleState {
    should_run: bool,
    is_running: bool,
}

struct StageCoreInner<I> {
    stage_id: StageId,
    tx: flume::Sender<I>,
    rx: flume::Receiver<I>,
    lifecycle: RwLock<LifecycleState>,
    flushing: RwLock<bool>,
    task: Mutex<Option<Shared<BoxFuture<'static, ()>>>>,
    poll_interval: Duration,
    queue_warn_len: usize,
    error_handler: Option<ErrorHandler>,
    process: ProcessFn<I>,
}

/// The worker engine shared by [`crate::transform::TransformStage`] and
/// [`crate::terminal::TerminalStage`].
///
/// Cheap to clone (an `Arc` handle); the worker task itself only ever holds
/// a [`Weak`] reference, so the engine quiesces rather than leaks when the
/// owning stage is dropped (spec.md §3, "ownership").
pub struct StageCore<I> {
    inner: Arc<StageCoreInner<I>>,
}

impl<I> Clone for StageCore<I> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<I: Send + 'static> StageCore<I> {
    pub(crate) fn new(
        stage_id: StageId,
        config: EngineConfig,
        error_handler: Option<ErrorHandler>,
        process: ProcessFn<I>,
    ) -> Self {
        let (tx, rx) = flume::unbounded();
        Self {
            inner: Arc::new(StageCoreInner {
                stage_id,
                tx,
                rx,
                lifecycle: RwLock::new(LifecycleState::default()),
                flushing: RwLock::new(false),
                task: Mutex::new(None),
                poll_interval: config.poll_interval(),
                queue_warn_len: config.queue_warn_len,
                error_handler,
                process,
            }),
        }
    }

    pub fn stage_id(&self) -> StageId {
        self.inner.stage_id
    }

    pub fn is_active(&self) -> bool {
        let state = self.inner.lifecycle.read().unwrap();
        state.is_running || state.should_run
    }

    pub fn is_flushing(&self) -> bool {
        *self.inner.flushing.read().unwrap()
    }

    pub fn has_inputs(&self) -> bool {
        !self.inner.rx.is_empty()
    }

    /// Enqueues `input` unless the stage is currently flushing. Never
    /// blocks: the channel is unbounded.
    pub fn add_input(&self, input: I) {
        if self.is_flushing() {
            return;
        }
        if self.inner.rx.len() >= self.inner.queue_warn_len {
            warn!(
                stage_id = self.inner.stage_id,
                len = self.inner.rx.len(),
                "stage input queue backlog"
            );
        }
        // An unbounded flume channel only errs when every receiver has been
        // dropped; `self.inner` keeps `rx` alive for as long as `tx` is
        // reachable, so this can't happen here.
        let _ = self.inner.tx.send(input);
    }

    /// Requests the worker to start. Idempotent.
    pub fn activate(&self) {
        let mut state = self.inner.lifecycle.write().unwrap();
        if state.is_running || state.should_run {
            return;
        }
        state.should_run = true;
        drop(state);

        debug!(stage_id = self.inner.stage_id, "stage activated");
        let weak = Arc::downgrade(&self.inner);
        let handle = tokio::spawn(worker_loop(weak));
        let task: BoxFuture<'static, ()> = Box::pin(async move {
            let _ = handle.await;
        });
        *self.inner.task.lock().unwrap() = Some(task.shared());
    }

    /// Requests the worker to stop, then waits for it to exit.
    pub async fn deactivate(&self) {
        {
            let mut state = self.inner.lifecycle.write().unwrap();
            state.should_run = false;
        }
        debug!(stage_id = self.inner.stage_id, "stage deactivation requested");
        self.wait_until_idle().await;
    }

    /// Marks the stage as flushing (new `add_input` calls become no-ops
    /// immediately), then waits for the worker to drain and exit.
    pub async fn flush_one(&self) {
        {
            let mut flushing = self.inner.flushing.write().unwrap();
            *flushing = true;
        }
        debug!(stage_id = self.inner.stage_id, "stage flush requested");
        self.wait_until_idle().await;
    }

    /// Awaits the spawned worker's actual completion via its `JoinHandle`
    /// (see `worker_loop`), not by polling `is_running`: that flag reads
    /// false both before the worker's first iteration and after it exits,
    /// so it can't tell "not started yet" from "done". If no worker was
    /// ever spawned, nothing will clear `is_flushing`, so clear it here
    /// instead of leaving callers of `add_input` permanently locked out.
    async fn wait_until_idle(&self) {
        let task = self.inner.task.lock().unwrap().clone();
        match task {
            Some(task) => task.await,
            None => {
                let mut flushing = self.inner.flushing.write().unwrap();
                *flushing = false;
            }
        }
    }
}

async fn worker_loop<I: Send + 'static>(weak: Weak<StageCoreInner<I>>) {
    match weak.upgrade() {
        Some(inner) => {
            let mut state = inner.lifecycle.write().unwrap();
            state.is_running = true;
        }
        None => return,
    }

    loop {
        let Some(inner) = weak.upgrade() else {
            break;
        };

        if !inner.lifecycle.read().unwrap().should_run {
            break;
        }

        match inner.rx.try_recv() {
            Ok(item) => run_process(&inner, item),
            Err(flume::TryRecvError::Empty) => {
                let should_exit = *inner.flushing.read().unwrap() && inner.rx.is_empty();
                if should_exit {
                    break;
                }
                let poll_interval = inner.poll_interval;
                drop(inner);
                tokio::time::sleep(poll_interval).await;
            }
            Err(flume::TryRecvError::Disconnected) => break,
        }
    }

    if let Some(inner) = weak.upgrade() {
        {
            let mut state = inner.lifecycle.write().unwrap();
            state.is_running = false;
            state.should_run = false;
        }
        {
            let mut flushing = inner.flushing.write().unwrap();
            *flushing = false;
        }
        trace!(stage_id = inner.stage_id, "stage worker exited");
    }
}

fn run_process<I>(inner: &Arc<StageCoreInner<I>>, item: I) {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| (inner.process)(item)));
    let error = match outcome {
        Ok(Ok(())) => return,
        Ok(Err(error)) => error,
        Err(panic_payload) => anyhow::anyhow!(describe_panic(panic_payload)),
    };

    let Some(handler) = &inner.error_handler else {
        trace!(stage_id = inner.stage_id, %error, "stage error dropped, no handler registered");
        return;
    };

    let stage_id = inner.stage_id;
    // A handler that itself panics is swallowed (spec.md §4.2, §7): it
    // never gets another chance to misbehave for this item, and the loop
    // continues.
    if panic::catch_unwind(AssertUnwindSafe(|| handler(stage_id, error))).is_err() {
        warn!(stage_id, "stage error handler panicked, swallowed");
    }
}

fn describe_panic(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "stage processing panicked with a non-string payload".to_string()
    }
}
