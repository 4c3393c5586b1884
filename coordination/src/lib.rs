//! Coordination primitives for racing patch agents
//!
//! This library provides the deterministic, model-free half of the system:
//! - `vcs`: async git driver with retry, timeouts and credential redaction
//! - `file_walker`: repository listing for digests and deep tree copies
//! - `sandbox`: normalization and containment checks for untrusted paths
//! - `verifier`: sequential validation gates run inside a workspace
//!
//! Everything that talks to a language model or a hosting service lives in
//! the `patch-racer` crate.

#![allow(clippy::uninlined_format_args)]

pub mod file_walker;
pub mod sandbox;
pub mod vcs;
pub mod verifier;

pub use file_walker::{copy_tree, CopyStats, FileWalker};
pub use sandbox::{normalize_relative, sandbox_path, SandboxError};
pub use vcs::{redact_credentials, CommitIdentity, GitError, GitManager, GitResult};
pub use verifier::{GateOutcome, GateResult, GateSpec, Verifier, VerifierConfig, VerifierReport};
