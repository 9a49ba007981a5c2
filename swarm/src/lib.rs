//! Iterative code-repair engine.
//!
//! A run cycles audit → fix → judge over one artifact until it is clean or a
//! budget is spent. The crate keeps a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (state machine, payload parsing,
//!   ordering, classification). No I/O.
//! - **[`io`]**: Side-effecting operations (file staging, experiment log,
//!   backend and test processes, config). Behind traits where tests need fakes.
//! - **[`agents`]**: The three backend-driven roles.
//!
//! [`orchestrator`] and [`batch`] coordinate them to implement `swarm run`.

pub mod agents;
pub mod batch;
pub mod core;
pub mod error;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod orchestrator;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
