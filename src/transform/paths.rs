//! Backslash path splitting for process images, files and registry keys

use super::error::TransformError;
use tracing::debug;

/// Directory used when a path has none
pub const ROOT_DIR: &str = "\\";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathParts {
    pub name: String,
    pub dir: String,
}

/// Split `C:\Windows\cmd.exe` into name `cmd.exe` and dir `C:\Windows`.
///
/// Forward slashes are normalized first. A path with no separator at all
/// cannot be split and is reported as malformed.
pub fn try_split_path(raw: &str) -> Result<PathParts, TransformError> {
    let normalized = raw.replace('/', "\\");
    match normalized.rsplit_once('\\') {
        Some((_, name)) if name.is_empty() => Err(TransformError::MalformedIdentityInput {
            field: "path".into(),
            raw: raw.to_string(),
        }),
        Some((dir, name)) => Ok(PathParts {
            name: name.to_string(),
            dir: if dir.is_empty() { ROOT_DIR.to_string() } else { dir.to_string() },
        }),
        None => Err(TransformError::MalformedIdentityInput {
            field: "path".into(),
            raw: raw.to_string(),
        }),
    }
}

/// Best-effort split: unsplittable input keeps the raw string as the name
/// under the root directory.
pub fn split_path(raw: &str) -> PathParts {
    try_split_path(raw).unwrap_or_else(|err| {
        debug!(error = %err, "falling back to raw path");
        PathParts {
            name: raw.to_string(),
            dir: ROOT_DIR.to_string(),
        }
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryPath {
    pub hive: String,
    pub key_path: String,
    pub key: String,
}

/// Split `<HKLM>\System\...\wordpadmouse\Type` into hive, key path and leaf key.
///
/// A leading backslash is ignored. A single segment becomes the hive with an
/// empty key path and key.
pub fn split_reg_path(raw: &str) -> RegistryPath {
    let trimmed = raw.trim_start_matches('\\');
    let mut segments: Vec<&str> = trimmed.split('\\').collect();
    let hive = segments.remove(0).to_string();
    let key = segments.pop().unwrap_or_default().to_string();
    RegistryPath {
        hive,
        key_path: segments.join("\\"),
        key,
    }
}
