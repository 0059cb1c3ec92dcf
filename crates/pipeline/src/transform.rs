//! [`TransformStage`]: a stage with an output type (spec component C).
//!
//! Ports `PipelineStage<Input, Output>` from the original C++
//! (`src/parallel/PipelineStage.h`/`.hpp`): a [`crate::core::StageCore`]
//! plus a user transform and a downstream [`ConsumerRegistry`] that every
//! produced item fans out to.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::config::EngineConfig;
use crate::core::{ErrorHandler, StageCore};
use crate::error::StageError;
use crate::registry::ConsumerRegistry;
use crate::sink::{ConsumerSink, StageId};

/// The capability to wire downstream consumers onto a stage, mirroring the
/// original's `IConnectable<T>` interface.
pub trait Connectable<O>: Send + Sync {
    /// Registers `consumer` unless an entry for its id already exists.
    fn connect(&self, consumer: Arc<dyn ConsumerSink<O>>);
    /// Removes `consumer`'s entry, if any.
    fn disconnect(&self, consumer: &Arc<dyn ConsumerSink<O>>);
    /// Clears every registered consumer.
    fn disconnect_all(&self);
    /// Replaces `current` with `replacement` per the rules in spec.md §4.3.
    fn swap(&self, current: &Arc<dyn ConsumerSink<O>>, replacement: Arc<dyn ConsumerSink<O>>);
}

/// A stage that consumes `I`, produces `O`, and forwards each produced
/// value to every connected downstream consumer.
///
/// `O: Clone` is required because a single produced value is handed to
/// every connected consumer (spec.md §3, §4.3 "SUPPLEMENT" in
/// SPEC_FULL.md); Rust cannot move one value to N places.
pub struct TransformStage<I, O> {
    core: StageCore<I>,
    registry: ConsumerRegistry<O>,
}

impl<I, O> TransformStage<I, O>
where
    I: Send + 'static,
    O: Clone + Send + Sync + 'static,
{
    /// Builds a stage with no error handler; transform failures are
    /// dropped (spec.md §4.2, §7).
    pub fn new<F, E>(stage_id: StageId, transform: F) -> Arc<Self>
    where
        F: Fn(I) -> Result<O, E> + Send + Sync + 'static,
        E: Into<StageError>,
    {
        Self::build(stage_id, EngineConfig::default(), transform, None)
    }

    /// Builds a stage whose transform failures are forwarded to
    /// `error_handler`.
    pub fn with_error_handler<F, E, H>(stage_id: StageId, transform: F, error_handler: H) -> Arc<Self>
    where
        F: Fn(I) -> Result<O, E> + Send + Sync + 'static,
        E: Into<StageError>,
        H: Fn(StageId, StageError) + Send + Sync + 'static,
    {
        Self::build(
            stage_id,
            EngineConfig::default(),
            transform,
            Some(Arc::new(error_handler)),
        )
    }

    /// As [`TransformStage::with_error_handler`], but with an explicit
    /// [`EngineConfig`] (poll interval, backlog warning threshold) instead
    /// of the default.
    pub fn with_config<F, E, H>(
        stage_id: StageId,
        config: EngineConfig,
        transform: F,
        error_handler: Option<H>,
    ) -> Arc<Self>
    where
        F: Fn(I) -> Result<O, E> + Send + Sync + 'static,
        E: Into<StageError>,
        H: Fn(StageId, StageError) + Send + Sync + 'static,
    {
        let handler: Option<ErrorHandler> = error_handler.map(|h| Arc::new(h) as ErrorHandler);
        Self::build(stage_id, config, transform, handler)
    }

    fn build<F, E>(
        stage_id: StageId,
        config: EngineConfig,
        transform: F,
        error_handler: Option<ErrorHandler>,
    ) -> Arc<Self>
    where
        F: Fn(I) -> Result<O, E> + Send + Sync + 'static,
        E: Into<StageError>,
    {
        let registry = ConsumerRegistry::new();
        let fan_out_registry = registry.clone();

        let process: Box<dyn Fn(I) -> Result<(), StageError> + Send + Sync> =
            Box::new(move |input: I| -> Result<(), StageError> {
                let output = transform(input).map_err(Into::into)?;
                fan_out_registry.fan_out(output);
                Ok(())
            });

        let core = StageCore::new(stage_id, config, error_handler, process);
        Arc::new(Self { core, registry })
    }

    /// The number of consumers currently registered.
    pub fn consumer_count(&self) -> usize {
        self.registry.len()
    }
}

impl<I, O> Connectable<O> for TransformStage<I, O>
where
    I: Send + 'static,
    O: Clone + Send + Sync + 'static,
{
    fn connect(&self, consumer: Arc<dyn ConsumerSink<O>>) {
        debug!(
            stage_id = self.core.stage_id(),
            consumer_id = consumer.stage_id(),
            "connecting consumer"
        );
        self.registry.connect(consumer);
    }

    fn disconnect(&self, consumer: &Arc<dyn ConsumerSink<O>>) {
        debug!(
            stage_id = self.core.stage_id(),
            consumer_id = consumer.stage_id(),
            "disconnecting consumer"
        );
        self.registry.disconnect(consumer);
    }

    fn disconnect_all(&self) {
        debug!(stage_id = self.core.stage_id(), "disconnecting all consumers");
        self.registry.disconnect_all();
    }

    fn swap(&self, current: &Arc<dyn ConsumerSink<O>>, replacement: Arc<dyn ConsumerSink<O>>) {
        debug!(
            stage_id = self.core.stage_id(),
            current_id = current.stage_id(),
            replacement_id = replacement.stage_id(),
            "swapping consumer"
        );
        self.registry.swap(current, replacement);
    }
}

#[async_trait]
impl<I, O> ConsumerSink<I> for TransformStage<I, O>
where
    I: Send + 'static,
    O: Clone + Send + Sync + 'static,
{
    fn stage_id(&self) -> StageId {
        self.core.stage_id()
    }

    fn is_active(&self) -> bool {
        self.core.is_active()
    }

    fn is_flushing(&self) -> bool {
        self.core.is_flushing()
    }

    fn activate(&self) {
        self.core.activate();
    }

    async fn deactivate(&self) {
        self.core.deactivate().await;
    }

    async fn flush_one(&self) {
        self.core.flush_one().await;
    }

    /// Flushes this stage, then, once it has drained, every consumer
    /// registered at that moment, awaiting them all in parallel. Consumers
    /// connected after the snapshot or disconnected mid-flush are handled
    /// per spec.md §4.3 / §9.
    async fn flush_all(&self) {
        self.core.flush_one().await;
        let snapshot = self.registry.snapshot();
        futures::future::join_all(snapshot.iter().map(|consumer| consumer.flush_all())).await;
    }

    fn has_inputs(&self) -> bool {
        self.core.has_inputs()
    }

    fn add_input(&self, input: I) {
        self.core.add_input(input);
    }
}
