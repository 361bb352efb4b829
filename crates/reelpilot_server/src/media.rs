use crate::error::ApiError;
use std::path::{Component, Path, PathBuf};

/// Resolve a client-supplied media path below `root`. Absolute paths and
/// `..` segments are rejected so nothing outside the media folder is reachable.
pub fn resolve(root: &Path, relative: &str) -> Result<PathBuf, ApiError> {
    let rel = Path::new(relative.trim());
    if rel.as_os_str().is_empty() {
        return Err(ApiError::BadRequest("media path must not be empty".into()));
    }

    let mut resolved = root.to_path_buf();
    let mut depth = 0;
    for component in rel.components() {
        match component {
            Component::Normal(part) => {
                resolved.push(part);
                depth += 1;
            }
            Component::CurDir => {}
            _ => {
                return Err(ApiError::BadRequest(format!(
                    "media path {relative:?} escapes the media folder"
                )))
            }
        }
    }
    if depth == 0 {
        return Err(ApiError::BadRequest("media path must name a file".into()));
    }
    Ok(resolved)
}
