//! Parsing and execution engine.
//!
//! The engine is split into focused submodules under `src/engine/` while the
//! public paths stay flat (`crate::ExecutionState`, `crate::Stacks`, ...).
//!
//! ## How the parts work together
//!
//! ```text
//! source text ── parse_program (parser.rs) ──▶ Program (ordered rules)
//!                                                   │
//!                                                   v
//!                           ExecutionState::step (state.rs)
//!                             first call: fire initializers
//!                             then:
//!                               select  (matcher.rs)  first rule whose causes hold
//!                               fire    (effects.rs)  resolve, check, consume, push
//!                                                   │
//!                                                   v
//!                                        Stacks (stacks.rs)
//!
//! settle = step until nothing fires, bounded by Options::max_iterations,
//! reported through SettleReport (metrics.rs)
//! ```
//!
//! Temporary rules are installed with `ExecutionState::with_overlay`; while the
//! returned scope is alive they are consulted around the base program:
//! overlay `prepend` rules first (innermost overlay first), then the program,
//! then overlay `append` rules.
//!
//! ## Responsibilities by module
//!
//! - `parser.rs`: delimiter-discovering scanner; never fails.
//! - `stacks.rs`: named stacks, with the value-only and no-empty-stack invariants.
//! - `matcher.rs`: pattern matching with variable bindings, and rule selection.
//! - `effects.rs`: effect resolution (variables, expressions) and atomic firing.
//! - `state.rs`: lifecycle, `step`/`settle`, overlays.
//! - `metrics.rs`: the per-`settle` report.
//!
//! ## Debugging
//!
//! Every module emits `tracing` events (`debug` for rule firing and
//! lifecycle, `trace` for individual pushes and rejected candidates). The CLI
//! installs a subscriber when `GRANARY_DEBUG_RULES` is set.

#[path = "engine/effects.rs"]
mod effects;
#[path = "engine/matcher.rs"]
mod matcher;
#[path = "engine/metrics.rs"]
mod metrics;
#[path = "engine/parser.rs"]
mod parser;
#[path = "engine/stacks.rs"]
mod stacks;
#[path = "engine/state.rs"]
mod state;


pub use metrics::SettleReport;
pub(crate) use parser::parse_program;
pub use stacks::Stacks;
pub use state::{DEFAULT_MAX_ITERATIONS, ExecutionState, Overlay, OverlayScope, Phase};
