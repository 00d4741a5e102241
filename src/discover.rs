//! Test file and build configuration discovery.

use std::path::{Path, PathBuf};

use crate::{Error, Result};

/// Build configuration file looked up when none is given explicitly.
pub const DEFAULT_BUILD_CONFIG: &str = "webpack.config.js";

/// Expand glob patterns relative to `cwd` into absolute file paths.
///
/// Matches keep argument order and are not deduplicated: a file matched by two
/// patterns is listed twice.
pub fn find_test_files(patterns: &[String], cwd: &Path) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    for pattern in patterns {
        let absolute = if Path::new(pattern).is_absolute() {
            PathBuf::from(pattern)
        } else {
            cwd.join(pattern)
        };
        let absolute = absolute.to_string_lossy().into_owned();

        let paths = glob::glob(&absolute).map_err(|e| Error::InvalidPattern {
            pattern: pattern.clone(),
            reason: e.to_string(),
        })?;
        for entry in paths {
            match entry {
                Ok(path) if path.is_file() => found.push(normalize(&path)),
                Ok(_) => {}
                Err(e) => tracing::warn!("Skipping unreadable match for {}: {}", pattern, e),
            }
        }
    }
    Ok(found)
}

/// Search `file_name` in `start` and each of its ancestors.
pub fn find_upward(start: &Path, file_name: &str) -> Option<PathBuf> {
    start
        .ancestors()
        .map(|dir| dir.join(file_name))
        .find(|candidate| candidate.is_file())
}

/// Strip `.` components so `cwd/./a.js` prints as `cwd/a.js`.
fn normalize(path: &Path) -> PathBuf {
    path.components()
        .filter(|c| !matches!(c, std::path::Component::CurDir))
        .collect()
}
