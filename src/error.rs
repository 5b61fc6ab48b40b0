use thiserror::Error;

use crate::eval::EvalError;

/// Convenience alias used across the engine.
pub type Result<T, E = GranaryError> = std::result::Result<T, E>;

/// Fatal conditions raised by `step`, `settle` and the stack helpers.
///
/// A cause that simply does not match is not an error; it only excludes the
/// rule for that round. Everything here aborts the current call.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GranaryError {
    /// A `$variable` was found stored on a stack.
    #[error("variable `${name}` found on stack `{stack}`")]
    VariableOnStack { stack: String, name: String },

    /// An unevaluated `{expression}` was found stored on (or pushed to) a stack.
    #[error("unevaluated expression `{{{expression}}}` found on stack `{stack}`")]
    ExpressionOnStack { stack: String, expression: String },

    /// An effect referenced a variable that no cause bound.
    #[error("variable `${name}` is unbound in effect on stack `{stack}`")]
    UnboundVariable { stack: String, name: String },

    /// A matched cause's stack was missing or too short when consuming.
    #[error("stack `{stack}` holds {available} entries but {needed} must be consumed")]
    MissingStack { stack: String, needed: usize, available: usize },

    /// Causes are matched against stored values; expressions cannot be.
    #[error("expression `{{{expression}}}` cannot be matched in a cause on stack `{stack}`")]
    ExpressionInCause { stack: String, expression: String },

    /// `settle` hit the iteration ceiling while rules kept firing.
    #[error("program did not settle within {limit} steps")]
    NonTermination { limit: usize },

    /// The embedded expression evaluator rejected an effect's expression.
    #[error("evaluating `{{{expression}}}` for stack `{stack}` failed: {error}")]
    Evaluation { stack: String, expression: String, error: EvalError },

    /// The state faulted earlier and has not been recovered.
    #[error("execution state is faulted: {0}")]
    Faulted(String),

    /// A host-side listener refused a command it drained from the stacks.
    #[error("host command failed: {0}")]
    Host(String),
}
