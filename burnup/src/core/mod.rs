//! Deterministic, pure logic shared by the coupling engine.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod errors;
pub mod flux;
pub mod grouping;
pub mod library;
pub mod material;
pub mod state;
