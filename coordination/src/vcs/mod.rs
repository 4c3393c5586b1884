//! Version-control primitives
//!
//! Branch, stage, commit, push, reset and clean, all scoped to one checkout.

pub mod error;
pub mod git_manager;

pub use error::{GitError, GitResult};
pub use git_manager::{redact_credentials, CommitIdentity, GitManager};
