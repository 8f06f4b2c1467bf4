//! Working-directory path resolution.
//!
//! Maps a working-directory string onto the `.claude` layout used by a
//! manager set. Nothing here touches the filesystem; directories are created
//! on demand by the manager factory.

use std::path::{Path, PathBuf};

use crate::error::{Result, TodoError};

/// Name of the per-project state directory.
pub const STATE_DIR: &str = ".claude";

/// The directories a manager set operates on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkingPaths {
    pub working_dir: PathBuf,
    pub todos_dir: PathBuf,
    pub templates_dir: PathBuf,
    pub index_dir: PathBuf,
}

impl WorkingPaths {
    /// Resolve `working_dir`, falling back to `default_dir` when it is empty.
    /// A leading `~` expands to the home directory and relative paths are
    /// taken relative to `default_dir`. Trailing separators and `.`
    /// components are dropped so equivalent spellings share one cache key.
    ///
    /// # Errors
    ///
    /// Returns a validation error when both are empty, or when the value is
    /// not usable as a directory path (embedded NUL, trailing file-like
    /// component such as `..` only).
    pub fn resolve(working_dir: &str, default_dir: &Path) -> Result<Self> {
        let trimmed = working_dir.trim();
        let root = if trimmed.is_empty() {
            default_dir.to_path_buf()
        } else {
            let expanded = expand_home(trimmed);
            if expanded.is_relative() && !default_dir.as_os_str().is_empty() {
                default_dir.join(expanded)
            } else {
                expanded
            }
        };

        validate_dir_path(&root)?;
        Ok(Self::from_root(root.components().collect::<PathBuf>()))
    }

    /// Build the layout under an already-validated root.
    #[must_use]
    pub fn from_root(root: impl Into<PathBuf>) -> Self {
        let working_dir = root.into();
        let state = working_dir.join(STATE_DIR);
        Self {
            todos_dir: state.join("todos"),
            templates_dir: state.join("templates"),
            index_dir: state.join("index"),
            working_dir,
        }
    }

    /// Directory archived todos are moved under.
    #[must_use]
    pub fn archive_dir(&self) -> PathBuf {
        self.working_dir.join(STATE_DIR).join("archive")
    }

    /// Every directory that must exist before a manager set can be built.
    #[must_use]
    pub fn required_dirs(&self) -> [&Path; 3] {
        [&self.todos_dir, &self.templates_dir, &self.index_dir]
    }
}

fn expand_home(raw: &str) -> PathBuf {
    let rest = match raw.strip_prefix('~') {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => rest.trim_start_matches('/'),
        _ => return PathBuf::from(raw),
    };
    match dirs::home_dir() {
        Some(home) if rest.is_empty() => home,
        Some(home) => home.join(rest),
        None => PathBuf::from(raw),
    }
}

fn validate_dir_path(path: &Path) -> Result<()> {
    let raw = path.to_string_lossy();
    if raw.is_empty() {
        return Err(TodoError::validation(
            "working-directory",
            "must not be empty",
        ));
    }
    if raw.contains('\0') {
        return Err(TodoError::validation(
            "working-directory",
            "contains a NUL byte",
        ));
    }
    if path.file_name().is_none() && path.parent().is_some() && !path.is_absolute() {
        // "foo/.." style paths have no final component to create
        return Err(TodoError::validation(
            "working-directory",
            "does not name a directory",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_builds_claude_layout() {
        let paths = WorkingPaths::resolve("/tmp/project", Path::new("/default")).unwrap();
        assert_eq!(paths.working_dir, PathBuf::from("/tmp/project"));
        assert_eq!(paths.todos_dir, PathBuf::from("/tmp/project/.claude/todos"));
        assert_eq!(
            paths.templates_dir,
            PathBuf::from("/tmp/project/.claude/templates")
        );
        assert_eq!(paths.index_dir, PathBuf::from("/tmp/project/.claude/index"));
        assert_eq!(paths.archive_dir(), PathBuf::from("/tmp/project/.claude/archive"));
    }

    #[test]
    fn test_empty_falls_back_to_default() {
        let paths = WorkingPaths::resolve("  ", Path::new("/default")).unwrap();
        assert_eq!(paths.working_dir, PathBuf::from("/default"));
    }

    #[test]
    fn test_empty_default_is_rejected() {
        let err = WorkingPaths::resolve("", Path::new("")).unwrap_err();
        assert!(err.client_message().contains("working-directory"));
    }

    #[test]
    fn test_nul_byte_rejected() {
        assert!(WorkingPaths::resolve("/tmp/a\0b", Path::new("/d")).is_err());
    }

    #[test]
    fn test_relative_and_trailing_forms() {
        let paths = WorkingPaths::resolve("sub/dir/", Path::new("/default")).unwrap();
        assert_eq!(paths.working_dir, PathBuf::from("/default/sub/dir"));

        let a = WorkingPaths::resolve("/tmp/project/", Path::new("/d")).unwrap();
        let b = WorkingPaths::resolve("/tmp/./project", Path::new("/d")).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_home_expansion() {
        if let Some(home) = dirs::home_dir() {
            let paths = WorkingPaths::resolve("~/notes", Path::new("/d")).unwrap();
            assert_eq!(paths.working_dir, home.join("notes").components().collect::<PathBuf>());
        }
        let paths = WorkingPaths::resolve("/x/~y", Path::new("/d")).unwrap();
        assert_eq!(paths.working_dir, PathBuf::from("/x/~y"));
    }

    #[test]
    fn test_does_not_require_existence() {
        let paths = WorkingPaths::resolve("/definitely/not/here", Path::new("/d")).unwrap();
        assert!(!paths.todos_dir.exists());
    }
}
