//! Applying a selected rule.
//!
//! Firing is split so that nothing is mutated until everything that can fail
//! has been checked:
//!
//! ```text
//! resolve effects (variables, expressions)   may fail, read-only
//! check consumption (per-stack counts)       may fail, read-only
//! drop consumed entries                      infallible after the check
//! push resolved symbols                      infallible (values only)
//! ```

use crate::{Bindings, GranaryError, HostEvaluator, Pattern, Result, Rule, Stacks, Symbol};
use std::collections::HashMap;

/// Effect pattern with every symbol resolved to a stack value.
#[derive(Debug)]
pub(crate) struct Production<'r> {
    stack: &'r str,
    symbols: Vec<Symbol>,
}

/// Resolve every symbol of `effects` against `bindings`.
pub(crate) fn resolve_effects<'r>(
    effects: &'r [Pattern],
    bindings: &Bindings,
    evaluator: &dyn HostEvaluator,
) -> Result<Vec<Production<'r>>> {
    effects
        .iter()
        .map(|effect| {
            let symbols = effect
                .symbols
                .iter()
                .map(|symbol| resolve_symbol(&effect.stack, symbol, bindings, evaluator))
                .collect::<Result<Vec<_>>>()?;
            Ok(Production { stack: &effect.stack, symbols })
        })
        .collect()
}

fn resolve_symbol(
    stack: &str,
    symbol: &Symbol,
    bindings: &Bindings,
    evaluator: &dyn HostEvaluator,
) -> Result<Symbol> {
    match symbol {
        Symbol::Literal(_) | Symbol::Host(_) => Ok(symbol.clone()),
        Symbol::Variable(name) => bindings
            .get(name)
            .cloned()
            .ok_or_else(|| GranaryError::UnboundVariable { stack: stack.to_string(), name: name.clone() }),
        Symbol::Expression(source) => evaluator.evaluate(source, bindings).map(Symbol::Host).map_err(|error| {
            GranaryError::Evaluation { stack: stack.to_string(), expression: source.clone(), error }
        }),
    }
}

/// Verify every consuming cause can be popped, summing causes that share a stack.
fn check_consumption(causes: &[Pattern], stacks: &Stacks) -> Result<()> {
    let mut needed: HashMap<&str, usize> = HashMap::new();
    for cause in causes.iter().filter(|c| !c.keep) {
        *needed.entry(cause.stack.as_str()).or_default() += cause.symbols.len();
    }
    for (stack, count) in needed {
        let available = stacks.depth(stack);
        if available < count {
            return Err(GranaryError::MissingStack { stack: stack.to_string(), needed: count, available });
        }
    }
    Ok(())
}

/// Push resolved productions in order, creating stacks as needed.
pub(crate) fn produce(productions: Vec<Production<'_>>, stacks: &mut Stacks) -> Result<()> {
    for production in productions {
        for symbol in production.symbols {
            stacks.push(production.stack, symbol)?;
        }
    }
    Ok(())
}

/// Consume `rule`'s non-`keep` causes and push its effects.
///
/// The caller must have matched `rule` against `stacks`, leaving its bindings
/// in `bindings`.
pub(crate) fn fire(
    rule: &Rule,
    stacks: &mut Stacks,
    bindings: &Bindings,
    evaluator: &dyn HostEvaluator,
) -> Result<()> {
    let productions = resolve_effects(&rule.effects, bindings, evaluator)?;
    check_consumption(&rule.causes, stacks)?;
    for cause in rule.causes.iter().filter(|c| !c.keep) {
        stacks.drop_top(&cause.stack, cause.symbols.len())?;
    }
    produce(productions, stacks)
}

/// Pop the entries matched by a single cause unless it is `keep`.
pub(crate) fn consume(cause: &Pattern, stacks: &mut Stacks) -> Result<()> {
    if cause.keep {
        return Ok(());
    }
    stacks.drop_top(&cause.stack, cause.symbols.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::matcher::select;
    use crate::engine::parser::parse_program;
    use crate::{ExprEvaluator, HostValue};

    fn lit(s: &str) -> Symbol {
        Symbol::Literal(s.to_string())
    }

    fn run_once(source: &str, stacks: &mut Stacks) -> Result<bool> {
        let program = parse_program(source);
        let mut bindings = Bindings::new();
        match select(&program.rules, stacks, &mut bindings)? {
            Some((_, rule)) => fire(rule, stacks, &bindings, &ExprEvaluator).map(|_| true),
            None => Ok(false),
        }
    }

    #[test]
    fn consumes_causes_and_pushes_effects() {
        let mut stacks = Stacks::new();
        stacks.push("in", lit("keep me")).unwrap();
        stacks.push("in", lit("a")).unwrap();
        stacks.push("in", lit("b")).unwrap();
        assert!(run_once("|:in: $x $y| :out: $y $x done|", &mut stacks).unwrap());
        assert_eq!(stacks.get("in"), Some(&[lit("keep me")][..]));
        assert_eq!(stacks.get("out"), Some(&[lit("b"), lit("a"), lit("done")][..]));
    }

    #[test]
    fn keep_causes_are_not_consumed() {
        let mut stacks = Stacks::new();
        stacks.push("flag", lit("on")).unwrap();
        stacks.push("n", lit("1")).unwrap();
        assert!(run_once("|:flag: on? :n: $v| :m: $v|", &mut stacks).unwrap());
        assert_eq!(stacks.get("flag"), Some(&[lit("on")][..]));
        assert!(!stacks.contains("n"));
        assert_eq!(stacks.get("m"), Some(&[lit("1")][..]));
    }

    #[test]
    fn expressions_see_the_rule_bindings() {
        let mut stacks = Stacks::new();
        stacks.push("nambers", lit("5")).unwrap();
        assert!(run_once("|:nambers: $n| :unswers: {$n * 32}|", &mut stacks).unwrap());
        assert_eq!(stacks.get("unswers"), Some(&[Symbol::Host(HostValue::Number(160.0))][..]));
    }

    #[test]
    fn unbound_variables_fail_without_mutation() {
        let mut stacks = Stacks::new();
        stacks.push("a", lit("x")).unwrap();
        let err = run_once("|:a: x| :b: $ghost|", &mut stacks).unwrap_err();
        assert_eq!(err, GranaryError::UnboundVariable { stack: "b".into(), name: "ghost".into() });
        assert_eq!(stacks.get("a"), Some(&[lit("x")][..]));
        assert!(!stacks.contains("b"));
    }

    #[test]
    fn evaluator_failures_carry_the_source() {
        let mut stacks = Stacks::new();
        stacks.push("a", lit("x")).unwrap();
        let err = run_once("|:a: $v| :b: {$v * 2}|", &mut stacks).unwrap_err();
        match err {
            GranaryError::Evaluation { stack, expression, .. } => {
                assert_eq!(stack, "b");
                assert_eq!(expression, "$v * 2");
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(stacks.get("a"), Some(&[lit("x")][..]));
    }

    #[test]
    fn overlapping_causes_on_one_stack_must_fit() {
        // Both causes look at the same top entry, but two must be consumed.
        let mut stacks = Stacks::new();
        stacks.push("s", lit("x")).unwrap();
        let err = run_once("|:s: x :s: x| :t: y|", &mut stacks).unwrap_err();
        assert_eq!(err, GranaryError::MissingStack { stack: "s".into(), needed: 2, available: 1 });
        assert_eq!(stacks.get("s"), Some(&[lit("x")][..]));
        assert!(!stacks.contains("t"));
    }

    #[test]
    fn consume_respects_keep() {
        let mut stacks = Stacks::new();
        stacks.push("s", lit("x")).unwrap();
        let mut kept = Pattern::new("s", vec![lit("x")]);
        kept.keep = true;
        consume(&kept, &mut stacks).unwrap();
        assert_eq!(stacks.depth("s"), 1);
        consume(&Pattern::new("s", vec![lit("x")]), &mut stacks).unwrap();
        assert!(stacks.is_empty());
    }
}
