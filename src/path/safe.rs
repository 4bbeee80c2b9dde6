//! Containment-checked path joining.

use std::path::{Component, Path, PathBuf};

use crate::{ConnectorError, Result};

/// Lexically resolve `.` and `..` components without touching the filesystem.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut components = path.components().peekable();
    let mut ret = if let Some(c @ Component::Prefix(..)) = components.peek().cloned() {
        components.next();
        PathBuf::from(c.as_os_str())
    } else {
        PathBuf::new()
    };

    for component in components {
        match component {
            Component::Prefix(..) => {}
            Component::RootDir => ret.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                ret.pop();
            }
            Component::Normal(c) => ret.push(c),
        }
    }
    ret
}

/// Join `segments` under `parent`, failing unless the result lies strictly
/// inside `parent`.
pub fn safely_combine<S: AsRef<str>>(parent: &Path, segments: &[S]) -> Result<PathBuf> {
    let parent = normalize_path(parent);
    let mut combined = parent.clone();
    for segment in segments {
        let segment = segment.as_ref().trim_start_matches(['/', '\\']);
        combined.push(segment);
    }
    let combined = normalize_path(&combined);

    if combined == parent || !combined.starts_with(&parent) {
        return Err(ConnectorError::PermissionDenied(
            "Path must be inside parent".to_string(),
        ));
    }

    Ok(combined)
}

/// Map a decoded relative path (`""` or `/a/b`) under a volume root.
///
/// Unlike [`safely_combine`] the root itself is an acceptable result.
pub fn resolve_under(root: &Path, relative: &str) -> Result<PathBuf> {
    let segments: Vec<&str> = relative.split('/').filter(|s| !s.is_empty()).collect();
    if segments.is_empty() {
        return Ok(normalize_path(root));
    }
    safely_combine(root, &segments)
}

/// Whether `name` can be used as a single path segment.
pub fn is_name_valid(name: Option<&str>) -> bool {
    match name {
        None => true,
        Some(name) => !name.contains(['/', '\\', '\0']) && name != "." && name != "..",
    }
}

/// Relative path of `full` under `root`, as `""` or `/a/b`.
pub fn relative_to(root: &Path, full: &Path) -> String {
    match full.strip_prefix(root) {
        Ok(rest) => rest
            .components()
            .filter_map(|c| match c {
                Component::Normal(s) => Some(format!("/{}", s.to_string_lossy())),
                _ => None,
            })
            .collect(),
        Err(_) => String::new(),
    }
}
