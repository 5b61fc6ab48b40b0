//! Settle metrics.
//!
//! `settle` reports how much work it did. Callers that only care about the
//! final stacks can ignore the report; the CLI prints it with `--timing`.

use std::time::Duration;

/// Outcome of one successful `settle` call.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SettleReport {
    /// `step` calls made, including the final one that found no rule.
    pub steps: usize,
    /// Rules fired through normal matching (initializers excluded).
    pub fired: usize,
    /// Whether this call ran the one-time initialization pass.
    pub initialized: bool,
    /// Wall time spent settling.
    pub duration: Duration,
}
