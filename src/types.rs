//! Shared types and enums used across RASTERFLOW.
//! Includes the synthetic test `Pattern` and the two-band `IndexOp` algebra
//! exposed by the built-in evaluator registry.
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// Two-band radiometric index operations. Each maps to a registered
/// [`Evaluator`](crate::eval::Evaluator) under its display name.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum, Debug, Serialize, Deserialize)]
pub enum IndexOp {
    Sum,
    Diff,
    Ratio,
    NDiff,
    LogRatio,
}

impl IndexOp {
    /// Registry key for this operation.
    pub fn key(self) -> &'static str {
        match self {
            IndexOp::Sum => "sum",
            IndexOp::Diff => "diff",
            IndexOp::Ratio => "ratio",
            IndexOp::NDiff => "ndiff",
            IndexOp::LogRatio => "log-ratio",
        }
    }
}

impl std::fmt::Display for IndexOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            IndexOp::Sum => "Sum",
            IndexOp::Diff => "Diff",
            IndexOp::Ratio => "Ratio",
            IndexOp::NDiff => "NDiff",
            IndexOp::LogRatio => "LogRatio",
        };
        write!(f, "{}", s)
    }
}

/// Synthetic scene patterns produced by
/// [`SyntheticSource`](crate::stages::SyntheticSource).
#[derive(Copy, Clone, PartialEq, Debug, ValueEnum, Serialize, Deserialize)]
pub enum Pattern {
    /// Every pixel holds the configured constant.
    Constant,
    /// Value equals the absolute column index.
    RampX,
    /// Value equals the absolute row index.
    RampY,
    /// Alternating 0/1 blocks of the configured period.
    Checkerboard,
}

impl std::fmt::Display for Pattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Pattern::Constant => write!(f, "Constant"),
            Pattern::RampX => write!(f, "RampX"),
            Pattern::RampY => write!(f, "RampY"),
            Pattern::Checkerboard => write!(f, "Checkerboard"),
        }
    }
}
