//! Cause matching and rule selection.
//!
//! A pattern is compared against the *top* of its stack, back to front:
//!
//! ```text
//! stack   [ a  b  c  d ]
//! pattern       [ $x d ]      i=1: d == d
//!                             i=2: $x binds to c
//! ```
//!
//! Variables bind on first sight and must agree on every later sight, across
//! all causes of the rule under test. Selection scans rules in priority order
//! and returns the first whose causes all hold; there is no backtracking.

use super::stacks::ensure_value;
use crate::{Bindings, GranaryError, Pattern, Result, Rule, Stacks, Symbol};

/// Does `pattern` hold against `stacks`?
///
/// On success `bindings` is extended with any new variables. On failure it is
/// left exactly as it was.
pub(crate) fn match_pattern(stacks: &Stacks, pattern: &Pattern, bindings: &mut Bindings) -> Result<bool> {
    let Some(entries) = stacks.get(&pattern.stack) else {
        return Ok(false);
    };
    if entries.len() < pattern.symbols.len() {
        return Ok(false);
    }

    let mut bound_here: Vec<&str> = Vec::new();
    let outcome = compare_top(entries, pattern, bindings, &mut bound_here);
    if !matches!(outcome, Ok(true)) {
        for name in bound_here {
            bindings.remove(name);
        }
    }
    outcome
}

fn compare_top<'p>(
    entries: &[Symbol],
    pattern: &'p Pattern,
    bindings: &mut Bindings,
    bound_here: &mut Vec<&'p str>,
) -> Result<bool> {
    for (expected, entry) in pattern.symbols.iter().rev().zip(entries.iter().rev()) {
        ensure_value(&pattern.stack, entry)?;

        let holds = match expected {
            Symbol::Literal(text) => entry.as_literal() == Some(text.as_str()),
            Symbol::Host(value) => matches!(entry, Symbol::Host(stored) if stored == value),
            Symbol::Variable(name) => match bindings.get(name) {
                Some(bound) => bound == entry,
                None => {
                    bindings.insert(name.clone(), entry.clone());
                    bound_here.push(name);
                    true
                }
            },
            Symbol::Expression(source) => {
                return Err(GranaryError::ExpressionInCause {
                    stack: pattern.stack.clone(),
                    expression: source.clone(),
                });
            }
        };
        if !holds {
            return Ok(false);
        }
    }
    Ok(true)
}

/// First rule (in iteration order) whose causes all hold, with its position.
///
/// `bindings` is cleared before each candidate; on success it holds the
/// winning rule's bindings, otherwise it is left empty.
pub(crate) fn select<'r>(
    rules: impl IntoIterator<Item = &'r Rule>,
    stacks: &Stacks,
    bindings: &mut Bindings,
) -> Result<Option<(usize, &'r Rule)>> {
    for (index, rule) in rules.into_iter().enumerate() {
        if rule.is_initializer() {
            continue;
        }
        bindings.clear();
        if causes_hold(rule, stacks, bindings)? {
            return Ok(Some((index, rule)));
        }
        tracing::trace!(rule = index, "rule rejected");
    }
    bindings.clear();
    Ok(None)
}

fn causes_hold(rule: &Rule, stacks: &Stacks, bindings: &mut Bindings) -> Result<bool> {
    for cause in &rule.causes {
        if !match_pattern(stacks, cause, bindings)? {
            return Ok(false);
        }
    }
    Ok(true)
}
