//! Lexical sandbox checks for paths handled by a run.
//!
//! These helpers never touch the filesystem. Callers that need symlink-safe
//! checks canonicalize first and then apply [`resolve_within`] to the result.

use std::path::{Component, Path, PathBuf};

use crate::error::SwarmError;

/// Normalize `.` and `..` components without consulting the filesystem.
///
/// Returns `None` when `..` would climb above the first component.
pub fn normalize(path: &Path) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    let mut depth = 0usize;
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if depth == 0 {
                    return None;
                }
                out.pop();
                depth -= 1;
            }
            Component::Normal(part) => {
                out.push(part);
                depth += 1;
            }
            Component::RootDir | Component::Prefix(_) => out.push(component.as_os_str()),
        }
    }
    Some(out)
}

/// Resolve `candidate` (relative to `root` unless absolute) and require it to stay inside `root`.
///
/// `root` must already be normalized.
pub fn resolve_within(root: &Path, candidate: &Path) -> Result<PathBuf, SwarmError> {
    let joined = if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        root.join(candidate)
    };
    let violation = || SwarmError::SandboxViolation {
        path: candidate.to_path_buf(),
        root: root.to_path_buf(),
    };
    let resolved = normalize(&joined).ok_or_else(violation)?;
    if resolved.starts_with(root) {
        Ok(resolved)
    } else {
        Err(violation())
    }
}
