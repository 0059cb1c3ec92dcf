//! Error types for the pipeline engine.
//!
//! The hot path (a user transform or sink failing on a particular item)
//! never surfaces a typed error to the engine itself. It is carried as an
//! opaque [`StageError`] payload to the stage's error-handler callback and
//! goes no further (see [`crate::core::StageCore`]). [`PipelineError`] covers
//! the ambient failure modes that remain around the edges of the engine,
//! such as a malformed [`crate::config::EngineConfig`].

use thiserror::Error;

/// The opaque error payload handed to a stage's error-handler callback.
///
/// Carries both ordinary transform failures (`Err` returned by the user
/// callback) and panics caught at the stage boundary.
pub type StageError = anyhow::Error;

/// Errors from the ambient parts of the engine (configuration, wiring).
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("invalid engine configuration: {message}")]
    InvalidConfiguration { message: String },

    #[error("environment variable {var} could not be parsed: {source}")]
    InvalidEnvVar {
        var: String,
        #[source]
        source: std::num::ParseIntError,
    },
}

/// Result type for the ambient, non-hot-path parts of the engine.
pub type PipelineResult<T> = Result<T, PipelineError>;
