//! Concurrent staged pipeline engine.
//!
//! A pipeline is a directed graph of *stages*. Each stage owns an unbounded
//! input queue and a worker task; the worker pulls items one at a time,
//! applies a user-supplied transformation, and, for a [`TransformStage`],
//! forwards the result to every connected downstream consumer. Stages are
//! activated, deactivated, and flushed independently and run concurrently
//! with one another.
//!
//! The core building blocks:
//!
//! - [`ConsumerSink`]: the capability every stage exposes to its upstream,
//!   identity, status, lifecycle control, and `add_input`.
//! - [`StageCore`]: the worker loop, queue, and lifecycle flags shared by
//!   every stage variant.
//! - [`TransformStage`]: a stage with an output type; fans out each
//!   produced item to its registered consumers.
//! - [`TerminalStage`]: a stage with no output, a graph sink.

pub mod config;
pub mod core;
pub mod error;
pub mod registry;
pub mod sink;
pub mod terminal;
pub mod transform;


pub use config::EngineConfig;
pub use core::StageCore;
pub use error::{PipelineError, PipelineResult, StageError};
pub use registry::ConsumerRegistry;
pub use sink::{ConsumerSink, StageId};
pub use terminal::TerminalStage;
pub use transform::{Connectable, TransformStage};
