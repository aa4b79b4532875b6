//! Playbook runtime: the graph executor.
//!
//! Drives one cooperative task per session through the resolved step graph:
//! sequential by `current_step_index`, with bounded parallel fan-out where a
//! step group declares it. Suspension points (every LLM call, tool call,
//! sandbox write, approval gate) consult the cancellation token and the pause
//! flag; between them the runtime does no blocking work of significance.

mod cost;
mod executor;
mod ir;

pub use cost::check_budget;
pub use executor::{ExecutorService, RuntimeDefaults};
pub use ir::{ir_context, lookup_path, render_template};
