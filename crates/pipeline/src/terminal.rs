//! [`TerminalStage`]: a stage with no output (spec component D).
//!
//! Ports `FinalPipelineStage<Input>` from the original C++
//! (`src/parallel/FinalPipelineStage.hpp`): a [`crate::core::StageCore`]
//! around a user sink with nothing downstream, so `flush_all` has no
//! subgraph to recurse into and degenerates to `flush_one`.

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::EngineConfig;
use crate::core::{ErrorHandler, StageCore};
use crate::error::StageError;
use crate::sink::{ConsumerSink, StageId};

/// A stage that consumes `I` and produces nothing, the end of a pipeline
/// branch.
pub struct TerminalStage<I> {
    core: StageCore<I>,
}

impl<I> TerminalStage<I>
where
    I: Send + 'static,
{
    /// Builds a stage with no error handler; sink failures are dropped
    /// (spec.md §4.2, §7).
    pub fn new<F, E>(stage_id: StageId, sink: F) -> Arc<Self>
    where
        F: Fn(I) -> Result<(), E> + Send + Sync + 'static,
        E: Into<StageError>,
    {
        Self::build(stage_id, EngineConfig::default(), sink, None)
    }

    /// Builds a stage whose sink failures are forwarded to `error_handler`.
    pub fn with_error_handler<F, E, H>(stage_id: StageId, sink: F, error_handler: H) -> Arc<Self>
    where
        F: Fn(I) -> Result<(), E> + Send + Sync + 'static,
        E: Into<StageError>,
        H: Fn(StageId, StageError) + Send + Sync + 'static,
    {
        Self::build(
            stage_id,
            EngineConfig::default(),
            sink,
            Some(Arc::new(error_handler)),
        )
    }

    /// As [`TerminalStage::with_error_handler`], but with an explicit
    /// [`EngineConfig`] instead of the default.
    pub fn with_config<F, E, H>(
        stage_id: StageId,
        config: EngineConfig,
        sink: F,
        error_handler: Option<H>,
    ) -> Arc<Self>
    where
        F: Fn(I) -> Result<(), E> + Send + Sync + 'static,
        E: Into<StageError>,
        H: Fn(StageId, StageError) + Send + Sync + 'static,
    {
        let handler: Option<ErrorHandler> = error_handler.map(|h| Arc::new(h) as ErrorHandler);
        Self::build(stage_id, config, sink, handler)
    }

    fn build<F, E>(
        stage_id: StageId,
        config: EngineConfig,
        sink: F,
        error_handler: Option<ErrorHandler>,
    ) -> Arc<Self>
    where
        F: Fn(I) -> Result<(), E> + Send + Sync + 'static,
        E: Into<StageError>,
    {
        let process: Box<dyn Fn(I) -> Result<(), StageError> + Send + Sync> =
            Box::new(move |input: I| -> Result<(), StageError> { sink(input).map_err(Into::into) });

        let core = StageCore::new(stage_id, config, error_handler, process);
        Arc::new(Self { core })
    }
}

#[async_trait]
impl<I> ConsumerSink<I> for TerminalStage<I>
where
    I: Send + 'static,
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

    /// No downstream to recurse into, so this is identical to `flush_one`
    /// (spec.md §4.4).
    async fn flush_all(&self) {
        self.core.flush_one().await;
    }

    fn has_inputs(&self) -> bool {
        self.core.has_inputs()
    }

    fn add_input(&self, input: I) {
        self.core.add_input(input);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[tokio::test]
    async fn flush_all_drains_and_is_equivalent_to_flush_one() {
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = received.clone();
        let stage = TerminalStage::new(1, move |item: u32| -> Result<(), StageError> {
            sink.lock().unwrap().push(item);
            Ok(())
        });
        stage.activate();
        for i in 0..100 {
            stage.add_input(i);
        }
        stage.flush_all().await;

        assert!(!stage.is_active());
        assert!(!stage.is_flushing());
        assert!(!stage.has_inputs());
        assert_eq!(received.lock().unwrap().len(), 100);
    }

    #[tokio::test]
    async fn sink_errors_reach_the_handler() {
        let handled = Arc::new(AtomicUsize::new(0));
        let sink = handled.clone();
        let stage = TerminalStage::with_error_handler(
            3,
            |_: u32| -> Result<(), StageError> { Err(anyhow::anyhow!("sink failed")) },
            move |stage_id, _error| {
                assert_eq!(stage_id, 3);
                sink.fetch_add(1, Ordering::SeqCst);
            },
        );
        stage.activate();
        stage.add_input(0);
        stage.flush_one().await;
        assert_eq!(handled.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn add_input_while_flushing_is_dropped() {
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = received.clone();
        let stage = TerminalStage::new(2, move |item: u32| -> Result<(), StageError> {
            sink.lock().unwrap().push(item);
            Ok(())
        });
        stage.activate();
        stage.add_input(1);
        let flush = stage.flush_one();
        stage.add_input(2);
        flush.await;
        assert!(received.lock().unwrap().len() <= 1);
    }
}
