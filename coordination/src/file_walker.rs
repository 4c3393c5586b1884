//! File Walker: repository listing and deep tree copies using the `ignore` crate

use ignore::WalkBuilder;
use std::io;
use std::path::{Path, PathBuf};

/// README names probed (in order) when building a repository digest.
const README_CANDIDATES: &[&str] = &["README.md", "README", "README.rst", "README.txt"];

/// Counters returned by [`copy_tree`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CopyStats {
    pub files: usize,
    pub dirs: usize,
    pub symlinks: usize,
    pub bytes: u64,
}

/// Walks a checkout for source files, respecting .gitignore.
pub struct FileWalker {
    root: PathBuf,
}

impl FileWalker {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Return up to `limit` files under root (relative, sorted), skipping
    /// hidden entries and anything .gitignore excludes.
    pub fn source_files(&self, limit: usize) -> Vec<PathBuf> {
        let walker = WalkBuilder::new(&self.root)
            .hidden(true)
            .git_ignore(true)
            .require_git(false)
            .build();

        let mut files: Vec<PathBuf> = walker
            .flatten()
            .filter(|entry| entry.file_type().is_some_and(|t| t.is_file()))
            .filter_map(|entry| {
                entry
                    .path()
                    .strip_prefix(&self.root)
                    .ok()
                    .map(Path::to_path_buf)
            })
            .collect();

        files.sort();
        files.truncate(limit);
        files
    }

    /// First `max_chars` characters of the repository README, if any.
    pub fn readme_excerpt(&self, max_chars: usize) -> Option<String> {
        README_CANDIDATES.iter().find_map(|name| {
            let text = std::fs::read_to_string(self.root.join(name)).ok()?;
            Some(text.chars().take(max_chars).collect())
        })
    }
}

/// Duplicate every entry under `src` into `dest`, including hidden files,
/// ignored files and version-control metadata.
///
/// `dest` must already exist. Symlinks are recreated, not followed.
pub fn copy_tree(src: &Path, dest: &Path) -> io::Result<CopyStats> {
    let walker = WalkBuilder::new(src)
        .hidden(false)
        .ignore(false)
        .git_ignore(false)
        .git_global(false)
        .git_exclude(false)
        .parents(false)
        .follow_links(false)
        .build();

    let mut stats = CopyStats::default();
    for entry in walker {
        let entry = entry.map_err(|e| io::Error::other(e.to_string()))?;
        let rel = match entry.path().strip_prefix(src) {
            Ok(rel) if rel.as_os_str().is_empty() => continue,
            Ok(rel) => rel,
            Err(_) => continue,
        };
        let target = dest.join(rel);
        let Some(file_type) = entry.file_type() else {
            continue;
        };

        if file_type.is_dir() {
            std::fs::create_dir_all(&target)?;
            stats.dirs += 1;
        } else if file_type.is_symlink() {
            let link = std::fs::read_link(entry.path())?;
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            copy_symlink(&link, &target)?;
            stats.symlinks += 1;
        } else {
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            stats.bytes += std::fs::copy(entry.path(), &target)?;
            stats.files += 1;
        }
    }

    Ok(stats)
}

#[cfg(unix)]
fn copy_symlink(link: &Path, target: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(link, target)
}

#[cfg(not(unix))]
fn copy_symlink(link: &Path, target: &Path) -> io::Result<()> {
    // Symlinks are rare on the platforms without unix semantics; copy contents.
    let resolved = target.parent().map(|p| p.join(link)).unwrap_or_else(|| link.to_path_buf());
    std::fs::copy(resolved, target).map(|_| ())
}
