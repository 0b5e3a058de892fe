//! Crate-level error type and `Result` alias for stable, structured error handling.
//! Covers configuration validation, graph wiring, region propagation, and the
//! per-worker compute/evaluation failures surfaced by a pipeline update.
use thiserror::Error;

use crate::core::region::Region;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid configuration: {param}={value}")]
    Configuration { param: &'static str, value: String },

    #[error("Missing input {input} on stage '{stage}'")]
    MissingInput { stage: String, input: usize },

    #[error("Unknown or removed stage handle (index {index}, generation {generation})")]
    UnknownStage { index: u32, generation: u32 },

    #[error("Pipeline graph contains a cycle through stage '{stage}'")]
    Cycle { stage: String },

    #[error("Requested region {requested} cannot be satisfied within {available} on stage '{stage}'")]
    Region {
        stage: String,
        requested: Region,
        available: Region,
    },

    #[error("Compute failed on {failures} of {workers} workers of stage '{stage}': {first}")]
    Compute {
        stage: String,
        workers: usize,
        failures: usize,
        first: ComputeError,
    },

    #[error("Update aborted while executing stage '{stage}'")]
    Aborted { stage: String },

    #[error("External error: {0}")]
    External(String),
}

impl Error {
    pub fn external<E: std::fmt::Display>(e: E) -> Self {
        Error::External(e.to_string())
    }
}

/// Failure raised inside a single worker's per-tile compute call.
///
/// Captured per worker and aggregated into [`Error::Compute`] after all
/// workers have joined; never allowed to unwind across the worker boundary.
#[derive(Debug, Clone, Error)]
pub enum ComputeError {
    #[error("Evaluation failed: {0}")]
    Eval(#[from] EvalError),

    #[error("Kernel error: {0}")]
    Kernel(String),

    #[error("Worker cancelled before dispatch")]
    Cancelled,
}

/// Failure inside a leaf expression evaluation.
#[derive(Debug, Clone, Error)]
pub enum EvalError {
    #[error("Arity mismatch: evaluator expects {expected} inputs, got {got}")]
    Arity { expected: usize, got: usize },

    #[error("Non-finite result for inputs {inputs:?}")]
    NonFinite { inputs: Vec<f64> },

    #[error("Unknown evaluator '{name}'")]
    Unknown { name: String },
}
