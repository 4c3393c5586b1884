//! Workspace sandbox checks for model-supplied paths.
//!
//! Paths coming back from a language model are untrusted. They are normalized
//! lexically first ([`normalize_relative`]) and then resolved against a
//! workspace root ([`sandbox_path`]) so that no write can escape it, whether
//! through `..`, an absolute path or a symlinked parent directory.

use std::path::{Component, Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SandboxError {
    #[error("path is empty")]
    Empty,
    #[error("absolute path rejected: {0}")]
    Absolute(String),
    #[error("path traversal rejected: {0}")]
    Traversal(String),
    #[error("version-control metadata is off limits: {0}")]
    VcsMetadata(String),
    #[error("path '{path}' resolves outside workspace '{root}'")]
    Escapes { path: String, root: String },
    #[error("io error resolving {path}: {message}")]
    Io { path: String, message: String },
}

/// Lexically normalize a workspace-relative path.
///
/// Drops `.` components, rejects empty, absolute, `..`-bearing and `.git/`
/// paths. Backslashes are treated as separators so Windows-style model output
/// normalizes the same way.
pub fn normalize_relative(raw: &str) -> Result<PathBuf, SandboxError> {
    let cleaned = raw.trim().replace('\\', "/");
    if cleaned.is_empty() {
        return Err(SandboxError::Empty);
    }

    let mut out = PathBuf::new();
    for component in Path::new(&cleaned).components() {
        match component {
            Component::Normal(part) => {
                if out.as_os_str().is_empty() && part == ".git" {
                    return Err(SandboxError::VcsMetadata(raw.to_string()));
                }
                out.push(part);
            }
            Component::CurDir => {}
            Component::ParentDir => return Err(SandboxError::Traversal(raw.to_string())),
            Component::RootDir | Component::Prefix(_) => {
                return Err(SandboxError::Absolute(raw.to_string()))
            }
        }
    }

    if out.as_os_str().is_empty() {
        return Err(SandboxError::Empty);
    }
    Ok(out)
}

/// Resolve `relative` under `root`, rejecting anything that lands outside.
///
/// The deepest existing ancestor is canonicalized, so a symlinked directory
/// pointing out of the workspace is caught even when the file itself does not
/// exist yet. A symlink whose target cannot be resolved is rejected, since a
/// write through it would land wherever the link points.
pub fn sandbox_path(root: &Path, relative: &Path) -> Result<PathBuf, SandboxError> {
    let relative_str = relative.display().to_string();
    let normalized = normalize_relative(&relative_str)?;

    let io_err = |e: std::io::Error| SandboxError::Io {
        path: relative_str.clone(),
        message: e.to_string(),
    };
    let canon_root = root.canonicalize().map_err(io_err)?;
    let candidate = canon_root.join(&normalized);

    let escapes = || SandboxError::Escapes {
        path: relative_str.clone(),
        root: canon_root.display().to_string(),
    };

    // symlink_metadata does not follow links, so a dangling symlink counts
    // as existing and is resolved below instead of being skipped over.
    let mut existing = candidate.as_path();
    while existing.symlink_metadata().is_err() {
        match existing.parent() {
            Some(parent) => existing = parent,
            None => break,
        }
    }
    let canon_existing = match existing.canonicalize() {
        Ok(path) => path,
        Err(_) if is_symlink(existing) => return Err(escapes()),
        Err(e) => return Err(io_err(e)),
    };
    if !canon_existing.starts_with(&canon_root) {
        return Err(escapes());
    }

    Ok(candidate)
}

fn is_symlink(path: &Path) -> bool {
    path.symlink_metadata()
        .map(|m| m.file_type().is_symlink())
        .unwrap_or(false)
}
