//! Deterministic, pure logic shared by the repair engine.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod checksum;
pub mod classifier;
pub mod completeness;
pub mod ordering;
pub mod payload;
pub mod sandbox;
pub mod state_machine;
pub mod types;
