//! Named stacks.
//!
//! A stack comes into existence on its first push and disappears the moment
//! its last entry is removed: an absent name and an empty stack are the same
//! state, and only the former is ever stored.
//!
//! Only value symbols (`Literal`, `Host`) are accepted. Pushing a `Variable`
//! or an `Expression` is an invariant violation and fails loudly instead of
//! corrupting later matches.

use crate::{GranaryError, Result, Symbol};
use std::collections::BTreeMap;

/// Stack store, ordered by name so snapshots render deterministically.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Stacks {
    stacks: BTreeMap<String, Vec<Symbol>>,
}

impl Stacks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Entries of `name`, bottom first. `None` when the stack does not exist.
    pub fn get(&self, name: &str) -> Option<&[Symbol]> {
        self.stacks.get(name).map(Vec::as_slice)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.stacks.contains_key(name)
    }

    /// Number of entries on `name` (0 when absent).
    pub fn depth(&self, name: &str) -> usize {
        self.stacks.get(name).map_or(0, Vec::len)
    }

    /// Number of existing (non-empty) stacks.
    pub fn len(&self) -> usize {
        self.stacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stacks.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.stacks.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[Symbol])> {
        self.stacks.iter().map(|(name, entries)| (name.as_str(), entries.as_slice()))
    }

    /// Push one value, creating the stack if needed.
    pub(crate) fn push(&mut self, name: &str, symbol: Symbol) -> Result<()> {
        ensure_value(name, &symbol)?;
        tracing::trace!(stack = name, symbol = %symbol, "push");
        self.stacks.entry(name.to_string()).or_default().push(symbol);
        Ok(())
    }

    /// Pop the top entry, deleting the stack if it becomes empty.
    pub(crate) fn pop(&mut self, name: &str) -> Option<Symbol> {
        let entries = self.stacks.get_mut(name)?;
        let top = entries.pop();
        if entries.is_empty() {
            self.stacks.remove(name);
        }
        top
    }

    /// Remove the top `count` entries of `name`, deleting it if it empties.
    pub(crate) fn drop_top(&mut self, name: &str, count: usize) -> Result<()> {
        let available = self.depth(name);
        if available < count {
            return Err(GranaryError::MissingStack { stack: name.to_string(), needed: count, available });
        }
        if let Some(entries) = self.stacks.get_mut(name) {
            entries.truncate(available - count);
            if entries.is_empty() {
                self.stacks.remove(name);
            }
        }
        Ok(())
    }

    /// Bypass the value check to simulate a corrupted store.
    #[cfg(test)]
    pub(crate) fn push_unchecked(&mut self, name: &str, symbol: Symbol) {
        self.stacks.entry(name.to_string()).or_default().push(symbol);
    }
}

/// Fails unless `symbol` may live on `stack`.
pub(crate) fn ensure_value(stack: &str, symbol: &Symbol) -> Result<()> {
    match symbol {
        Symbol::Literal(_) | Symbol::Host(_) => Ok(()),
        Symbol::Variable(name) => Err(GranaryError::VariableOnStack { stack: stack.to_string(), name: name.clone() }),
        Symbol::Expression(source) => {
            Err(GranaryError::ExpressionOnStack { stack: stack.to_string(), expression: source.clone() })
        }
    }
}
