//! The expression-evaluator contract and the built-in index algebra.
//!
//! Expression-driven stages hold an [`Evaluator`] as a bound auxiliary
//! object: its modification stamp participates in cache invalidation, and
//! the scheduler clones it once per worker thread before dispatch
//! (evaluators may carry mutable scratch such as bound pixel variables, so
//! clones are never shared across threads).
use once_cell::sync::Lazy;
use std::any::Any;
use std::sync::RwLock;

use crate::core::registry::Registry;
use crate::core::stamp::{Param, Stamp};
use crate::error::{EvalError, Result};
use crate::types::IndexOp;

/// A per-pixel formula over a tuple of input values.
pub trait Evaluator: Send + Sync {
    /// Number of input values consumed per evaluation.
    fn arity(&self) -> usize;

    /// Evaluate the formula. Failures are returned, never thrown across the
    /// worker boundary.
    fn evaluate(&mut self, inputs: &[f64]) -> std::result::Result<f64, EvalError>;

    /// Modification stamp of the evaluator's own configuration.
    fn modified(&self) -> Stamp;

    /// The clone-for-thread step: an independent copy for one worker.
    fn clone_boxed(&self) -> Box<dyn Evaluator>;

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Built-in two-band evaluator covering the [`IndexOp`] algebra.
#[derive(Clone)]
pub struct IndexEvaluator {
    op: Param<IndexOp>,
}

impl IndexEvaluator {
    pub fn new(op: IndexOp) -> Self {
        Self { op: Param::new(op) }
    }

    pub fn op(&self) -> IndexOp {
        self.op.value()
    }

    pub fn set_op(&mut self, op: IndexOp) {
        self.op.set(op);
    }
}

impl Evaluator for IndexEvaluator {
    fn arity(&self) -> usize {
        2
    }

    fn evaluate(&mut self, inputs: &[f64]) -> std::result::Result<f64, EvalError> {
        if inputs.len() != 2 {
            return Err(EvalError::Arity {
                expected: 2,
                got: inputs.len(),
            });
        }
        let (a, b) = (inputs[0], inputs[1]);
        let value = match self.op.value() {
            IndexOp::Sum => a + b,
            IndexOp::Diff => a - b,
            IndexOp::Ratio => a / b,
            IndexOp::NDiff => (a - b) / (a + b),
            IndexOp::LogRatio => 10.0 * (a / b).log10(),
        };
        if !value.is_finite() {
            return Err(EvalError::NonFinite {
                inputs: inputs.to_vec(),
            });
        }
        Ok(value)
    }

    fn modified(&self) -> Stamp {
        self.op.stamp()
    }

    fn clone_boxed(&self) -> Box<dyn Evaluator> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

static EVALUATORS: Lazy<RwLock<Registry<dyn Evaluator>>> = Lazy::new(|| {
    let mut registry: Registry<dyn Evaluator> = Registry::new();
    for op in [
        IndexOp::Sum,
        IndexOp::Diff,
        IndexOp::Ratio,
        IndexOp::NDiff,
        IndexOp::LogRatio,
    ] {
        registry.register(op.key(), move || Box::new(IndexEvaluator::new(op)));
    }
    RwLock::new(registry)
});

/// Instantiate a registered evaluator by name.
pub fn create_evaluator(name: &str) -> Result<Box<dyn Evaluator>> {
    EVALUATORS
        .read()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .create(name)
}

/// Register a custom evaluator factory under `name` (process-wide).
pub fn register_evaluator<F>(name: &'static str, factory: F)
where
    F: Fn() -> Box<dyn Evaluator> + Send + Sync + 'static,
{
    EVALUATORS
        .write()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .register(name, factory);
}

/// Names of all registered evaluators.
pub fn evaluator_names() -> Vec<&'static str> {
    EVALUATORS
        .read()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .names()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_algebra() {
        let mut e = IndexEvaluator::new(IndexOp::Sum);
        assert_eq!(e.evaluate(&[3.0, 4.0]).unwrap(), 7.0);
        e.set_op(IndexOp::NDiff);
        assert!((e.evaluate(&[3.0, 1.0]).unwrap() - 0.5).abs() < 1e-12);
        e.set_op(IndexOp::LogRatio);
        assert!((e.evaluate(&[100.0, 10.0]).unwrap() - 10.0).abs() < 1e-9);
    }

    #[test]
    fn failures_are_values_not_panics() {
        let mut e = IndexEvaluator::new(IndexOp::Ratio);
        assert!(matches!(
            e.evaluate(&[1.0, 0.0]),
            Err(EvalError::NonFinite { .. })
        ));
        assert!(matches!(
            e.evaluate(&[1.0]),
            Err(EvalError::Arity { expected: 2, got: 1 })
        ));
    }

    #[test]
    fn set_op_bumps_stamp() {
        let mut e = IndexEvaluator::new(IndexOp::Sum);
        let before = e.modified();
        e.set_op(IndexOp::Diff);
        assert!(e.modified() > before);
    }

    #[test]
    fn registry_has_all_builtins() {
        for name in ["sum", "diff", "ratio", "ndiff", "log-ratio"] {
            let e = create_evaluator(name).unwrap();
            assert_eq!(e.arity(), 2);
        }
        assert!(create_evaluator("nope").is_err());
    }
}
