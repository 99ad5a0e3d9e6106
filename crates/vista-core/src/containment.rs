//! Path containment: every path a caller names must stay under the project root.
//!
//! Checks run in two stages. [`ProjectRoot::contain`] folds `.` and `..`
//! lexically and rejects escapes without touching the filesystem. Only a path
//! that passes is canonicalised (resolving symlinks) and checked again.

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use crate::error::{Result, VistaError};

/// Canonical project root that all requests are confined to.
#[derive(Debug, Clone)]
pub struct ProjectRoot {
    root: PathBuf,
}

impl ProjectRoot {
    /// Canonicalise `path` and make sure it is a directory.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let root = std::fs::canonicalize(path.as_ref()).map_err(|e| {
            VistaError::Internal(format!(
                "project root {} is not accessible: {e}",
                path.as_ref().display()
            ))
        })?;
        if !root.is_dir() {
            return Err(VistaError::Internal(format!(
                "project root {} is not a directory",
                root.display()
            )));
        }
        Ok(Self { root })
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Lexically resolve `requested` against the root. No filesystem access.
    ///
    /// Relative paths are joined onto the root; absolute paths are taken as-is.
    /// Fails with [`VistaError::AccessDenied`] when the result leaves the root.
    pub fn contain(&self, requested: &str) -> Result<PathBuf> {
        if requested.is_empty() {
            return Err(VistaError::Input("path must not be empty".into()));
        }
        if requested.contains('\0') {
            return Err(VistaError::Input("path must not contain NUL".into()));
        }

        let joined = self.root.join(requested);
        let mut normalized = PathBuf::new();
        for component in joined.components() {
            match component {
                Component::Prefix(p) => normalized.push(p.as_os_str()),
                Component::RootDir => normalized.push(component.as_os_str()),
                Component::CurDir => {}
                Component::ParentDir => {
                    if !normalized.pop() {
                        return Err(VistaError::AccessDenied);
                    }
                }
                Component::Normal(part) => normalized.push(part),
            }
        }

        if !normalized.starts_with(&self.root) {
            return Err(VistaError::AccessDenied);
        }
        Ok(normalized)
    }

    /// Resolve an existing path: lexical containment, then canonicalisation.
    ///
    /// A symlink pointing outside the root is [`VistaError::AccessDenied`]; a
    /// contained path that does not exist is [`VistaError::NotFound`].
    pub fn resolve(&self, requested: &str) -> Result<PathBuf> {
        let lexical = self.contain(requested)?;
        let canonical = match std::fs::canonicalize(&lexical) {
            Ok(p) => p,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(VistaError::NotFound(self.display_relative(&lexical)));
            }
            Err(e) => return Err(VistaError::Internal(e.to_string())),
        };
        if !canonical.starts_with(&self.root) {
            return Err(VistaError::AccessDenied);
        }
        Ok(canonical)
    }

    /// Resolve a path that may no longer exist (deleted files still have diffs
    /// and can be restored). The deepest existing ancestor is canonicalised and
    /// must stay inside the root.
    pub fn resolve_lenient(&self, requested: &str) -> Result<PathBuf> {
        let lexical = self.contain(requested)?;
        let mut existing = lexical.as_path();
        let mut missing = Vec::new();
        while !existing.exists() {
            match (existing.parent(), existing.file_name()) {
                (Some(parent), Some(name)) => {
                    missing.push(name.to_os_string());
                    existing = parent;
                }
                _ => return Err(VistaError::AccessDenied),
            }
        }
        let mut canonical = std::fs::canonicalize(existing)?;
        if !canonical.starts_with(&self.root) {
            return Err(VistaError::AccessDenied);
        }
        for name in missing.into_iter().rev() {
            canonical.push(name);
        }
        Ok(canonical)
    }

    /// Path relative to the root, for use as a git pathspec or module id.
    pub fn relative<'a>(&self, absolute: &'a Path) -> Result<&'a Path> {
        absolute
            .strip_prefix(&self.root)
            .map_err(|_| VistaError::AccessDenied)
    }

    fn display_relative(&self, absolute: &Path) -> String {
        absolute
            .strip_prefix(&self.root)
            .map(|p| p.display().to_string())
            .unwrap_or_else(|_| "file".to_string())
    }
}
