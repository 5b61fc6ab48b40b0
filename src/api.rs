use crate::engine::{self, DEFAULT_MAX_ITERATIONS, ExecutionState, Overlay, SettleReport, Stacks};
use crate::{Program, Result, Rule, Symbol};
use std::fmt;

/// Separator between entries in [`pretty_stack`].
const SEPARATOR: &str = " ";
/// Rendering of an absent stack.
const EMPTY_STACK: &str = "∅";

/// Options that affect execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Options {
    /// Steps `settle` may take before reporting non-termination.
    pub max_iterations: usize,
}

impl Default for Options {
    fn default() -> Self {
        Self { max_iterations: DEFAULT_MAX_ITERATIONS }
    }
}

/// Parse `text` into a [`Program`]. Malformed input never fails; it yields
/// whatever rules could be recovered.
///
/// # Example
/// ```
/// use granary::{ExecutionState, parse, sym};
///
/// let program = parse("|:match me:| :place: apple\n||:match me:");
/// let mut state = ExecutionState::new(program);
/// state.settle().unwrap();
/// assert_eq!(state.stacks().get("place"), Some(&[sym("apple")][..]));
/// ```
pub fn parse(text: &str) -> Program {
    engine::parse_program(text)
}

/// Parse a single rule: the first one found in `text`.
pub fn parse_rule(text: &str) -> Option<Rule> {
    parse(text).rules.into_iter().next()
}

/// Literal symbol, for pushing values from host code.
pub fn sym(text: impl Into<String>) -> Symbol {
    Symbol::Literal(text.into())
}

/// Render one stack bottom to top, or a placeholder when it does not exist.
///
/// Literal text is written as is, so a multi-word literal is not told apart
/// from several entries; `Symbol`'s `Display` keeps that distinction.
pub fn pretty_stack(entries: Option<&[Symbol]>) -> String {
    match entries {
        Some(entries) if !entries.is_empty() => entries.iter().map(raw_text).collect::<Vec<_>>().join(SEPARATOR),
        _ => EMPTY_STACK.to_string(),
    }
}

fn raw_text(symbol: &Symbol) -> String {
    match symbol {
        Symbol::Literal(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Render every stack as a `name: entries` line, in name order.
pub fn pretty_stacks(stacks: &Stacks) -> String {
    stacks
        .iter()
        .map(|(name, entries)| format!("{name}: {}", pretty_stack(Some(entries))))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Callback run by [`Host`] with exclusive access to the state.
pub type Listener = Box<dyn FnMut(&mut ExecutionState) -> Result<()>>;

/// An [`ExecutionState`] plus synchronous listeners.
///
/// `on_stepped` listeners run, in registration order, after every step that
/// fired; `on_settled` listeners run once a settle completes (after any
/// temporary rules are gone). A failing listener aborts the call with its
/// error.
pub struct Host {
    state: ExecutionState,
    stepped: Vec<Listener>,
    settled: Vec<Listener>,
}

impl fmt::Debug for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Host")
            .field("state", &self.state)
            .field("stepped", &self.stepped.len())
            .field("settled", &self.settled.len())
            .finish()
    }
}

impl Host {
    pub fn new(state: ExecutionState) -> Self {
        Host { state, stepped: Vec::new(), settled: Vec::new() }
    }

    pub fn from_source(text: &str) -> Self {
        Self::new(ExecutionState::new(parse(text)))
    }

    pub fn state(&self) -> &ExecutionState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut ExecutionState {
        &mut self.state
    }

    pub fn on_stepped(&mut self, listener: Listener) {
        self.stepped.push(listener);
    }

    pub fn on_settled(&mut self, listener: Listener) {
        self.settled.push(listener);
    }

    /// One step, notifying stepped listeners if it fired.
    pub fn step(&mut self) -> Result<bool> {
        let fired = self.state.step()?;
        if fired {
            notify(&mut self.stepped, &mut self.state)?;
        }
        Ok(fired)
    }

    pub fn settle(&mut self) -> Result<SettleReport> {
        let Host { state, stepped, settled } = self;
        let report = state.settle_observed(|st| notify(stepped, st))?;
        notify(settled, state)?;
        Ok(report)
    }

    /// Settle with `overlay` installed; it is removed before settled
    /// listeners run, whether or not settling succeeded.
    pub fn settle_with(&mut self, overlay: Overlay) -> Result<SettleReport> {
        let Host { state, stepped, settled } = self;
        let report = {
            let mut scope = state.with_overlay(overlay)?;
            scope.settle_observed(|st| notify(stepped, st))?
        };
        notify(settled, state)?;
        Ok(report)
    }
}

fn notify(listeners: &mut [Listener], state: &mut ExecutionState) -> Result<()> {
    for listener in listeners.iter_mut() {
        listener(state)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{GranaryError, HostValue};
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn parse_rule_takes_the_first_rule() {
        let rule = parse_rule("|:a: x| :b: y |:c: z| :d: w|").unwrap();
        assert_eq!(rule.causes[0].stack, "a");
        assert!(parse_rule("   ").is_none());
    }

    #[test]
    fn pretty_stack_joins_entries_and_marks_absence() {
        let entries = [sym("a"), sym("two words"), Symbol::Host(HostValue::Number(1.5))];
        assert_eq!(pretty_stack(Some(&entries)), "a two words 1.5");
        assert_eq!(pretty_stack(Some(&[sym("hello world"), sym("")])), "hello world ");
        assert_eq!(pretty_stack(None), "∅");
        assert_eq!(pretty_stack(Some(&[])), "∅");
    }

    #[test]
    fn pretty_stacks_lists_stacks_by_name() {
        let mut state = ExecutionState::new(parse("||:b: 2 3 :a: 1|"));
        state.settle().unwrap();
        assert_eq!(pretty_stacks(state.stacks()), "a: 1\nb: 2 3");
        assert_eq!(pretty_stacks(&Stacks::new()), "");
    }

    #[test]
    fn default_options_use_the_standard_ceiling() {
        assert_eq!(Options::default().max_iterations, 10_000);
    }

    #[test]
    fn stepped_listeners_see_every_fired_step_in_order() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut host = Host::from_source("||:n: a b |:n: $x| :m: $x|");
        for tag in ["first", "second"] {
            let log = Rc::clone(&log);
            host.on_stepped(Box::new(move |state| {
                log.borrow_mut().push(format!("{tag}:{}", state.stacks().depth("m")));
                Ok(())
            }));
        }
        let settled = Rc::clone(&log);
        host.on_settled(Box::new(move |_| {
            settled.borrow_mut().push("settled".to_string());
            Ok(())
        }));

        let report = host.settle().unwrap();
        assert_eq!(report.fired, 2);
        assert_eq!(
            *log.borrow(),
            vec!["first:0", "second:0", "first:1", "second:1", "first:2", "second:2", "settled"]
        );
    }

    #[test]
    fn listeners_may_feed_the_stacks() {
        let mut host = Host::from_source("|:ping: x| :pong: x|");
        let mut fed = false;
        host.on_stepped(Box::new(move |state| {
            if !fed {
                fed = true;
                state.push("ping", sym("x"))?;
            }
            Ok(())
        }));
        host.settle().unwrap();
        assert_eq!(host.state().stacks().get("pong"), Some(&[sym("x")][..]));
    }

    #[test]
    fn failing_listener_aborts_settle() {
        let mut host = Host::from_source("||:a: x|");
        host.on_stepped(Box::new(|_| Err(GranaryError::Host("boom".into()))));
        assert_eq!(host.settle().unwrap_err(), GranaryError::Host("boom".into()));
    }

    #[test]
    fn settle_with_removes_overlay_before_settled_listeners() {
        let mut host = Host::from_source("|:q: ask| :a: yes|");
        host.on_settled(Box::new(|state| {
            assert_eq!(state.rules().count(), 1);
            Ok(())
        }));
        let report = host.settle_with(Overlay::prepend(parse("||:q: ask|").rules)).unwrap();
        assert_eq!(report.fired, 1);
        assert_eq!(host.state().stacks().get("a"), Some(&[sym("yes")][..]));
        assert_eq!(host.state().rules().count(), 1);
    }
}
