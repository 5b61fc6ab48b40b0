//! Execution state and the step/settle loop.
//!
//! ```text
//!                 step (fires initializers)
//! Uninitialized ─────────────────────────────▶ Running ◀─┐ step: a rule fired
//!                                               │  └──────┘
//!                              step: no rule    ▼
//!                                            Settled ── step: a rule fired ──▶ Running
//!
//! settle: step until no rule fires; after `max_iterations` steps that all
//! fired, the state becomes Faulted and stays so until `recover`.
//! ```
//!
//! Temporary rules are layered on top of the immutable base program through
//! [`OverlayScope`]; dropping the scope removes them, whatever happened while
//! it was alive.

use super::effects::{consume, fire, produce, resolve_effects};
use super::matcher::{match_pattern, select};
use super::metrics::SettleReport;
use crate::{
    Bindings, ExprEvaluator, GranaryError, HostEvaluator, Options, Pattern, Program, Result, Rule, Stacks, Symbol,
};
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::time::Instant;

/// Default `settle` ceiling.
pub const DEFAULT_MAX_ITERATIONS: usize = 10_000;

/// Lifecycle of an [`ExecutionState`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Phase {
    Uninitialized,
    Running,
    Settled,
    /// Non-termination was detected; carries the reason.
    Faulted(String),
}

/// Rules consulted around the base program for the lifetime of one scope.
///
/// Priority is `prepend` > base program > `append`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Overlay {
    pub prepend: Vec<Rule>,
    pub append: Vec<Rule>,
}

impl Overlay {
    pub fn prepend(rules: Vec<Rule>) -> Self {
        Overlay { prepend: rules, append: Vec::new() }
    }

    pub fn append(rules: Vec<Rule>) -> Self {
        Overlay { prepend: Vec::new(), append: rules }
    }

    fn initializers(&self) -> impl Iterator<Item = &Rule> {
        self.prepend.iter().chain(self.append.iter()).filter(|r| r.is_initializer())
    }
}

/// A program plus the stacks it rewrites.
pub struct ExecutionState {
    program: Program,
    /// Innermost scope last.
    overlays: Vec<Overlay>,
    stacks: Stacks,
    bindings: Bindings,
    phase: Phase,
    options: Options,
    evaluator: Box<dyn HostEvaluator>,
}

impl fmt::Debug for ExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionState")
            .field("rules", &self.program.rules.len())
            .field("overlays", &self.overlays.len())
            .field("stacks", &self.stacks)
            .field("bindings", &self.bindings)
            .field("phase", &self.phase)
            .field("options", &self.options)
            .field("evaluator", &"<evaluator>")
            .finish()
    }
}

/// Base rules wrapped by the overlays, highest priority first.
fn rule_chain<'a>(program: &'a Program, overlays: &'a [Overlay]) -> impl Iterator<Item = &'a Rule> + 'a {
    overlays
        .iter()
        .rev()
        .flat_map(|o| o.prepend.iter())
        .chain(program.rules.iter())
        .chain(overlays.iter().flat_map(|o| o.append.iter()))
}

/// Fire causeless rules in order, applying only their effects.
///
/// All effects are resolved before any is pushed, so a failing initializer
/// leaves the stacks untouched.
fn initialize<'r>(
    rules: impl Iterator<Item = &'r Rule>,
    stacks: &mut Stacks,
    evaluator: &dyn HostEvaluator,
) -> Result<usize> {
    let empty = Bindings::new();
    let mut productions = Vec::new();
    let mut count = 0;
    for rule in rules {
        productions.extend(resolve_effects(&rule.effects, &empty, evaluator)?);
        count += 1;
    }
    produce(productions, stacks)?;
    Ok(count)
}

impl ExecutionState {
    /// State over `program` with default options and the bundled evaluator.
    pub fn new(program: Program) -> Self {
        Self::with_options(program, Options::default())
    }

    pub fn with_options(program: Program, options: Options) -> Self {
        Self::with_evaluator(program, options, Box::new(ExprEvaluator))
    }

    pub fn with_evaluator(program: Program, options: Options, evaluator: Box<dyn HostEvaluator>) -> Self {
        ExecutionState {
            program,
            overlays: Vec::new(),
            stacks: Stacks::new(),
            bindings: Bindings::new(),
            phase: Phase::Uninitialized,
            options,
            evaluator,
        }
    }

    /// Read-only view of the stacks, for rendering.
    pub fn stacks(&self) -> &Stacks {
        &self.stacks
    }

    /// Bindings left by the last successful match.
    pub fn bindings(&self) -> &Bindings {
        &self.bindings
    }

    pub fn clear_bindings(&mut self) {
        self.bindings.clear();
    }

    pub fn phase(&self) -> &Phase {
        &self.phase
    }

    /// Every rule currently consulted, highest priority first.
    pub fn rules(&self) -> impl Iterator<Item = &Rule> {
        rule_chain(&self.program, &self.overlays)
    }

    /// Push a value onto `stack`. Variables and expressions are rejected.
    pub fn push(&mut self, stack: &str, symbol: Symbol) -> Result<()> {
        self.stacks.push(stack, symbol)
    }

    /// Pop the top of `stack`, deleting it when it empties.
    pub fn pop(&mut self, stack: &str) -> Option<Symbol> {
        self.stacks.pop(stack)
    }

    /// Match a single pattern against the current stacks, extending
    /// [`bindings`](Self::bindings) on success.
    pub fn matches_cause(&mut self, pattern: &Pattern) -> Result<bool> {
        match_pattern(&self.stacks, pattern, &mut self.bindings)
    }

    /// Like [`matches_cause`](Self::matches_cause), then consume the matched
    /// entries unless the pattern is `keep`.
    pub fn pop_matching_cause(&mut self, pattern: &Pattern) -> Result<bool> {
        if !self.matches_cause(pattern)? {
            return Ok(false);
        }
        consume(pattern, &mut self.stacks)?;
        Ok(true)
    }

    /// Perform one transition. Returns whether anything fired.
    ///
    /// The first call runs every initializer instead of matching. On error
    /// nothing has been mutated.
    pub fn step(&mut self) -> Result<bool> {
        if let Phase::Faulted(reason) = &self.phase {
            return Err(GranaryError::Faulted(reason.clone()));
        }

        if self.phase == Phase::Uninitialized {
            let fired = initialize(self.program.initializers(), &mut self.stacks, self.evaluator.as_ref())?;
            self.phase = Phase::Running;
            tracing::debug!(initializers = fired, "initialized");
            return Ok(true);
        }

        let rules = rule_chain(&self.program, &self.overlays);
        match select(rules, &self.stacks, &mut self.bindings)? {
            Some((priority, rule)) => {
                fire(rule, &mut self.stacks, &self.bindings, self.evaluator.as_ref())?;
                tracing::debug!(
                    rule = priority,
                    causes = rule.causes.len(),
                    effects = rule.effects.len(),
                    "rule fired"
                );
                self.phase = Phase::Running;
                Ok(true)
            }
            None => {
                self.phase = Phase::Settled;
                Ok(false)
            }
        }
    }

    /// Step until no rule fires.
    pub fn settle(&mut self) -> Result<SettleReport> {
        self.settle_observed(|_| Ok(()))
    }

    /// [`settle`](Self::settle), calling `on_step` after every step that fired.
    ///
    /// Fails with [`GranaryError::NonTermination`] once `max_iterations` steps
    /// have all fired; the last mutation stays visible and the state is
    /// faulted.
    pub fn settle_observed<F>(&mut self, mut on_step: F) -> Result<SettleReport>
    where
        F: FnMut(&mut ExecutionState) -> Result<()>,
    {
        let started = Instant::now();
        let limit = self.options.max_iterations;
        let mut report = SettleReport::default();

        while report.steps < limit {
            let initializing = self.phase == Phase::Uninitialized;
            let progressed = self.step()?;
            report.steps += 1;
            if !progressed {
                report.duration = started.elapsed();
                tracing::debug!(steps = report.steps, fired = report.fired, "settled");
                return Ok(report);
            }
            if initializing {
                report.initialized = true;
            } else {
                report.fired += 1;
            }
            on_step(self)?;
        }

        let error = GranaryError::NonTermination { limit };
        tracing::debug!(limit, "iteration ceiling reached");
        self.phase = Phase::Faulted(error.to_string());
        Err(error)
    }

    /// Leave the faulted state so stepping may resume.
    pub fn recover(&mut self) {
        if matches!(self.phase, Phase::Faulted(_)) {
            self.phase = Phase::Running;
        }
    }

    /// Install `overlay` for the lifetime of the returned scope.
    ///
    /// The base program is initialized first if needed, then the overlay's
    /// causeless rules fire once as initializers.
    pub fn with_overlay(&mut self, overlay: Overlay) -> Result<OverlayScope<'_>> {
        if self.phase == Phase::Uninitialized {
            self.step()?;
        }
        if let Phase::Faulted(reason) = &self.phase {
            return Err(GranaryError::Faulted(reason.clone()));
        }

        let depth = self.overlays.len();
        tracing::debug!(
            depth,
            prepend = overlay.prepend.len(),
            append = overlay.append.len(),
            "overlay installed"
        );
        self.overlays.push(overlay);
        let mut scope = OverlayScope { state: self, depth };

        let state = &mut *scope.state;
        let installed = &state.overlays[depth];
        initialize(installed.initializers(), &mut state.stacks, state.evaluator.as_ref())?;
        Ok(scope)
    }

    /// Run `overlay` once: install, fire its initializers, settle, remove.
    pub fn run_with_temporary_rules(&mut self, overlay: Overlay) -> Result<SettleReport> {
        let mut scope = self.with_overlay(overlay)?;
        scope.settle()
    }
}

/// Guard returned by [`ExecutionState::with_overlay`].
///
/// Dereferences to the state; dropping it removes the overlay (and any inner
/// ones still present), including on early return or panic.
#[derive(Debug)]
pub struct OverlayScope<'a> {
    state: &'a mut ExecutionState,
    depth: usize,
}

impl Deref for OverlayScope<'_> {
    type Target = ExecutionState;

    fn deref(&self) -> &ExecutionState {
        self.state
    }
}

impl DerefMut for OverlayScope<'_> {
    fn deref_mut(&mut self) -> &mut ExecutionState {
        self.state
    }
}

impl Drop for OverlayScope<'_> {
    fn drop(&mut self) {
        self.state.overlays.truncate(self.depth);
        tracing::debug!(depth = self.depth, "overlay removed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::parser::parse_program;
    use pretty_assertions::assert_eq;

    fn lit(s: &str) -> Symbol {
        Symbol::Literal(s.to_string())
    }

    fn state(source: &str) -> ExecutionState {
        ExecutionState::new(parse_program(source))
    }

    #[test]
    fn first_step_only_initializes() {
        let mut st = state("|:a: x| :b: y ||:a: x|");
        assert_eq!(st.phase(), &Phase::Uninitialized);
        assert!(st.step().unwrap());
        assert_eq!(st.phase(), &Phase::Running);
        assert_eq!(st.stacks().get("a"), Some(&[lit("x")][..]));
        assert!(!st.stacks().contains("b"));

        assert!(st.step().unwrap());
        assert_eq!(st.stacks().get("b"), Some(&[lit("y")][..]));
        assert!(!st.step().unwrap());
        assert_eq!(st.phase(), &Phase::Settled);
        assert!(!st.step().unwrap());
    }

    #[test]
    fn settle_reports_work_done() {
        let mut st = state("||:n: a b c |:n: $x| :m: $x|");
        let report = st.settle().unwrap();
        assert!(report.initialized);
        assert_eq!(report.fired, 3);
        assert_eq!(report.steps, 5);
        assert_eq!(st.stacks().get("m"), Some(&[lit("c"), lit("b"), lit("a")][..]));
    }

    #[test]
    fn failing_initializer_leaves_no_partial_output() {
        let mut st = state("||:a: x ||:b: $unbound|");
        assert!(matches!(st.step(), Err(GranaryError::UnboundVariable { .. })));
        assert!(st.stacks().is_empty());
        assert_eq!(st.phase(), &Phase::Uninitialized);
    }

    #[test]
    fn faulted_state_is_sticky_until_recovered() {
        let mut st =
            ExecutionState::with_options(parse_program("||:a: x |:a: x| :a: x|"), Options { max_iterations: 5 });
        assert_eq!(st.settle().unwrap_err(), GranaryError::NonTermination { limit: 5 });
        assert!(matches!(st.phase(), Phase::Faulted(_)));
        assert!(matches!(st.step(), Err(GranaryError::Faulted(_))));
        assert!(matches!(st.with_overlay(Overlay::default()).map(|_| ()), Err(GranaryError::Faulted(_))));

        st.recover();
        assert!(st.step().unwrap());
    }

    #[test]
    fn overlay_priority_is_prepend_base_append() {
        let mut st = state("||:in: go |:in: go| :out: base|");
        st.step().unwrap();
        let overlay = Overlay {
            prepend: parse_program("|:in: go| :out: first|").rules,
            append: parse_program("|:in: go| :out: last|").rules,
        };
        let order: Vec<String> = {
            let scope = st.with_overlay(overlay).unwrap();
            scope.rules().map(|r| r.effects[0].symbols[0].to_string()).collect()
        };
        assert_eq!(order, vec!["first", "go", "base", "last"]);
        assert_eq!(st.rules().count(), 2);
    }

    #[test]
    fn temporary_rules_fire_then_disappear() {
        let mut st = state("|:cmd: inc :n: $x| :n: {$x + 1}|");
        st.push("n", lit("1")).unwrap();
        let overlay = Overlay::prepend(parse_program("||:cmd: inc|").rules);

        let report = st.run_with_temporary_rules(overlay.clone()).unwrap();
        assert_eq!(report.fired, 1);
        st.run_with_temporary_rules(overlay).unwrap();

        assert_eq!(st.stacks().get("n"), Some(&[Symbol::Host(crate::HostValue::Number(3.0))][..]));
        assert_eq!(st.rules().count(), 1);
    }

    #[test]
    fn overlay_is_removed_when_settling_fails() {
        let mut st = ExecutionState::with_options(Program::default(), Options { max_iterations: 3 });
        let looping = Overlay::append(parse_program("||:a: x |:a: x| :a: x|").rules);
        assert!(st.run_with_temporary_rules(looping).is_err());
        assert_eq!(st.rules().count(), 0);
    }

    #[test]
    fn overlay_initializer_failure_removes_the_overlay() {
        let mut st = state("");
        let bad = Overlay::prepend(parse_program("||:a: {1 +}|").rules);
        assert!(matches!(st.with_overlay(bad).map(|_| ()), Err(GranaryError::Evaluation { .. })));
        assert_eq!(st.rules().count(), 0);
        assert!(st.stacks().is_empty());
    }

    #[test]
    fn pop_matching_cause_consumes_unless_keep() {
        let mut st = state("");
        st.push("s", lit("a")).unwrap();
        st.push("s", lit("b")).unwrap();

        let kept = parse_program("|:s: $x?|").rules.remove(0).causes.remove(0);
        assert!(st.pop_matching_cause(&kept).unwrap());
        assert_eq!(st.stacks().depth("s"), 2);
        assert_eq!(st.bindings().get("x"), Some(&lit("b")));

        st.clear_bindings();
        let taken = parse_program("|:s: a $y|").rules.remove(0).causes.remove(0);
        assert!(st.pop_matching_cause(&taken).unwrap());
        assert!(!st.stacks().contains("s"));
        assert!(!st.pop_matching_cause(&taken).unwrap());
    }

    #[test]
    fn custom_evaluators_are_consulted() {
        let evaluator = |source: &str, _: &Bindings| Ok::<_, crate::EvalError>(crate::HostValue::Text(source.to_uppercase()));
        let mut st = ExecutionState::with_evaluator(
            parse_program("||:out: {shout}|"),
            Options::default(),
            Box::new(evaluator),
        );
        st.settle().unwrap();
        assert_eq!(st.stacks().get("out"), Some(&[Symbol::Host(crate::HostValue::Text("SHOUT".into()))][..]));
    }
}
