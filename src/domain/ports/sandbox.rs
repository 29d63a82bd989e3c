use serde_json::Value;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SandboxError {
    #[error("invalid predicate expression: {0}")]
    InvalidExpression(String),
    #[error("predicate evaluation failed: {0}")]
    EvaluationFailed(String),
}

/// Sandboxed predicate evaluator for `eval:` filter expressions.
///
/// Implementations evaluate a single boolean expression over the candidate
/// value bound to the name `value`. Pure: no side effects, no host access.
/// Any error counts as no-match at the filter layer.
pub trait PredicateSandbox: Send + Sync {
    fn eval(&self, expression: &str, value: &Value) -> Result<bool, SandboxError>;
}
