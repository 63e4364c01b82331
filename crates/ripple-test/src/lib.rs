//! Ripple Test Harness - fuzzing and event inspection
//!
//! This crate provides:
//! - Randomized collection fuzzing with invariant checks
//! - An event recorder for asserting dispatch order
//! - Benchmarks for dispatch and reconciliation (see `benches/`)

pub mod collection_fuzzer;
pub mod recorder;

pub use collection_fuzzer::*;
pub use recorder::*;
