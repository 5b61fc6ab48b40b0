#[macro_use]
mod macros;
mod api;
mod engine;
mod error;
mod eval;

use std::collections::HashMap;
use std::fmt;

pub use api::{Host, Listener, Options, parse, parse_rule, pretty_stack, pretty_stacks, sym};
pub use engine::{DEFAULT_MAX_ITERATIONS, ExecutionState, Overlay, OverlayScope, Phase, SettleReport, Stacks};
pub use error::{GranaryError, Result};
pub use eval::{EvalError, ExprEvaluator, HostEvaluator, HostValue};

// --- Symbols ----------------------------------------------------------------

/// A single value in a pattern or on a stack.
///
/// Only `Literal` and `Host` may ever be stored on a stack. `Variable` and
/// `Expression` exist in parsed patterns and are resolved away before anything
/// is pushed.
#[derive(Debug, Clone, PartialEq)]
pub enum Symbol {
    /// Immutable text, possibly containing whitespace (`[multi word]`).
    Literal(String),
    /// `$name` in source; binds on first use inside a rule's causes.
    Variable(String),
    /// Raw `{...}` source, evaluated when the effect is applied.
    Expression(String),
    /// Value produced by the expression evaluator.
    Host(HostValue),
}

impl Symbol {
    /// Literal text, if this is a `Literal`.
    pub fn as_literal(&self) -> Option<&str> {
        match self {
            Symbol::Literal(text) => Some(text),
            _ => None,
        }
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Symbol::Literal(text) if text.is_empty() || text.contains(char::is_whitespace) => write!(f, "[{text}]"),
            Symbol::Literal(text) => f.write_str(text),
            Symbol::Variable(name) => write!(f, "${name}"),
            Symbol::Expression(source) => write!(f, "{{{source}}}"),
            Symbol::Host(value) => write!(f, "{value}"),
        }
    }
}

/// Variable name -> bound stack value, rebuilt for every candidate rule.
pub type Bindings = HashMap<String, Symbol>;

// --- Rules ------------------------------------------------------------------

/// A named-stack target plus the symbols expected on (or pushed to) its top.
#[derive(Debug, Clone, PartialEq)]
pub struct Pattern {
    pub stack: String,
    /// Never empty when produced by the parser.
    pub symbols: Vec<Symbol>,
    /// Verify without consuming. Only meaningful on causes.
    pub keep: bool,
}

impl Pattern {
    pub fn new(stack: impl Into<String>, symbols: Vec<Symbol>) -> Self {
        Pattern { stack: stack.into(), symbols, keep: false }
    }
}

/// A production rule: when every cause holds, consume them and push the effects.
///
/// A rule without causes is an *initializer*; it fires exactly once when the
/// execution state starts and is ignored by normal matching.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Rule {
    pub causes: Vec<Pattern>,
    pub effects: Vec<Pattern>,
}

impl Rule {
    pub fn is_initializer(&self) -> bool {
        self.causes.is_empty()
    }
}

/// Parsed rules in declaration order. Order is priority.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Program {
    pub rules: Vec<Rule>,
}

impl Program {
    pub fn new(rules: Vec<Rule>) -> Self {
        Program { rules }
    }

    pub fn initializers(&self) -> impl Iterator<Item = &Rule> {
        self.rules.iter().filter(|r| r.is_initializer())
    }
}
