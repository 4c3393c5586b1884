//! Verifier Module: Deterministic Validation Gates
//!
//! The Verifier decides whether an attempt's workspace is acceptable. It runs
//! a sequential pipeline of configured commands in the workspace root and
//! produces a structured report. An empty gate list is trivially green.
//!
//! # Usage
//!
//! ```rust,ignore
//! use coordination::verifier::{GateSpec, Verifier, VerifierConfig};
//!
//! let config = VerifierConfig::with_gates(vec![GateSpec::new("test", "cargo test")]);
//! let report = Verifier::new("/path/to/workspace", config).run_pipeline().await;
//! println!("Gates passed: {}/{}", report.gates_passed, report.gates_total);
//! ```

pub mod pipeline;
pub mod report;

pub use pipeline::{GateSpec, Verifier, VerifierConfig};
pub use report::{GateOutcome, GateResult, VerifierReport};
