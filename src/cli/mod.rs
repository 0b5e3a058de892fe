//! Command Line Interface (CLI) layer for RASTERFLOW.
//!
//! This module defines argument parsing (`args`), error types (`errors`),
//! and the orchestration logic (`runner`) for the demo detection flow: a
//! synthetic scene is generated, pushed through the bright-target detector
//! pipeline, and summarized on the log (optionally as a JSON report).
//!
//! If you are embedding RASTERFLOW into another application, prefer using
//! the high-level `rasterflow::api` module instead of calling the CLI code.
pub mod args;
pub mod errors;
pub mod runner;

pub use args::CliArgs;
pub use runner::run;
