//! Burnup-criticality coupling engine.
//!
//! Couples an external neutron-transport solver with an external transmutation
//! solver to build per-material burnup libraries over parametric scenarios:
//!
//! - **[`core`]**: Pure, deterministic logic (States, Run grouping, materials,
//!   library aggregation, flux derivation). No I/O.
//! - **[`io`]**: Side effects (run control, solver processes, working
//!   directories, artifact parsing, writers).
//!
//! [`engine`] walks each Run step by step, memoizing results by State, and
//! [`fanout`] runs the per-material transmutation calls of one step.

pub mod core;
pub mod engine;
pub mod exit_codes;
pub mod fanout;
pub mod io;
pub mod logging;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
