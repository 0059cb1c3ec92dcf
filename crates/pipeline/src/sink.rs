//! The [`ConsumerSink`] capability (spec component A).
//!
//! This is the abstract input endpoint every stage exposes to whatever
//! feeds it, either an external producer calling [`ConsumerSink::add_input`]
//! directly, or an upstream [`crate::transform::TransformStage`] fanning a
//! produced item out to its registry. Test doubles can implement this trait
//! directly to stand in for a real stage.

use async_trait::async_trait;

/// Stable identity of a stage, assigned at construction.
///
/// Unique within one upstream stage's consumer registry, not globally.
pub type StageId = u64;

/// The capability a pipeline stage exposes to its upstream.
///
/// All status/identity methods are plain synchronous predicates;
/// `add_input` itself never blocks. `deactivate`, `flush_one`, and
/// `flush_all` are the only operations that suspend: each resolves once the
/// underlying worker (and, for `flush_all`, the transitively connected
/// subgraph) has actually quiesced.
#[async_trait]
pub trait ConsumerSink<I>: Send + Sync {
    /// This stage's stable identity.
    fn stage_id(&self) -> StageId;

    /// `true` iff the worker is running or has been asked to run
    /// (`is_running || should_run`).
    fn is_active(&self) -> bool;

    /// `true` iff a flush is in progress. While true, `add_input` is a
    /// no-op.
    fn is_flushing(&self) -> bool;

    /// Requests the worker to start. Idempotent: a no-op if already active.
    fn activate(&self);

    /// Requests the worker to stop. Resolves once the worker has exited.
    /// Idempotent: resolves immediately if already idle.
    async fn deactivate(&self);

    /// Drains this stage's queue and quiesces it. `add_input` becomes a
    /// no-op as soon as this is called, not when it resolves.
    async fn flush_one(&self);

    /// Flushes this stage, then transitively every consumer connected to it
    /// at the moment the self-drain completes. For a stage with no
    /// downstream consumers this is identical to `flush_one`.
    async fn flush_all(&self);

    /// `true` iff the input queue is non-empty at the instant of the call.
    /// Advisory: races with the worker.
    fn has_inputs(&self) -> bool;

    /// Enqueues an item unless the stage is currently flushing, in which
    /// case this is silently a no-op. Never blocks.
    fn add_input(&self, input: I);
}
