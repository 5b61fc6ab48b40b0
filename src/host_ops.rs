//! `@host step` commands: arithmetic performed by the host on behalf of rules.
//!
//! A rule requests an operation by pushing four symbols:
//!
//! ```text
//! :@host step: add 5 to counter
//!              ^   ^ ^  ^ stack whose top is the left operand
//!              |   | preposition (ignored)
//!              |   right operand
//!              operation: add | subtract | multiply | divide | mod
//! ```
//!
//! After every fired step the listener drains all pending commands, replacing
//! the top of the named stack with the result as a literal.

use granary::{ExecutionState, GranaryError, Host, HostValue, Pattern, Result, Symbol, sym};
use std::str::FromStr;

const COMMAND_STACK: &str = "@host step";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operation {
    Add,
    Subtract,
    Multiply,
    Divide,
    Mod,
}

impl FromStr for Operation {
    type Err = GranaryError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "add" => Ok(Operation::Add),
            "subtract" => Ok(Operation::Subtract),
            "multiply" => Ok(Operation::Multiply),
            "divide" => Ok(Operation::Divide),
            "mod" => Ok(Operation::Mod),
            other => Err(GranaryError::Host(format!("unknown operation `{other}`"))),
        }
    }
}

impl Operation {
    fn apply(self, lhs: f64, rhs: f64) -> f64 {
        match self {
            Operation::Add => lhs + rhs,
            Operation::Subtract => lhs - rhs,
            Operation::Multiply => lhs * rhs,
            Operation::Divide => lhs / rhs,
            Operation::Mod => lhs % rhs,
        }
    }
}

fn command_cause() -> Pattern {
    let symbols = ["operation", "n", "preposition", "stackName"].map(|name| Symbol::Variable(name.to_string()));
    Pattern::new(COMMAND_STACK, symbols.to_vec())
}

/// Register the drain as a stepped listener.
pub fn install(host: &mut Host) {
    let cause = command_cause();
    host.on_stepped(Box::new(move |state| drain(state, &cause)));
}

fn drain(state: &mut ExecutionState, cause: &Pattern) -> Result<()> {
    state.clear_bindings();
    while state.pop_matching_cause(cause)? {
        let bindings = state.bindings();
        let operation: Operation = text(bindings.get("operation"))?.parse()?;
        let rhs = number(bindings.get("n"))?;
        let target = text(bindings.get("stackName"))?.to_string();
        state.clear_bindings();

        let top = state.pop(&target).ok_or_else(|| GranaryError::Host(format!("stack `{target}` is empty")))?;
        let lhs = number(Some(&top))?;
        let result = HostValue::Number(operation.apply(lhs, rhs));
        tracing::debug!(?operation, lhs, rhs, stack = %target, result = %result, "host step");
        state.push(&target, sym(result.to_string()))?;
    }
    Ok(())
}

fn text(symbol: Option<&Symbol>) -> Result<&str> {
    match symbol {
        Some(Symbol::Literal(text)) => Ok(text),
        Some(other) => Err(GranaryError::Host(format!("expected a word, found `{other}`"))),
        None => Err(GranaryError::Host("incomplete command".to_string())),
    }
}

fn number(symbol: Option<&Symbol>) -> Result<f64> {
    let value = match symbol {
        Some(Symbol::Literal(text)) => HostValue::Text(text.clone()),
        Some(Symbol::Host(value)) => value.clone(),
        _ => return Err(GranaryError::Host("incomplete command".to_string())),
    };
    value.as_number().ok_or_else(|| GranaryError::Host(format!("`{value}` is not a number")))
}
