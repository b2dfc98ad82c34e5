//! Output file name helpers.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// `true` only when `path` definitely does not exist.
///
/// Other stat failures (permissions, I/O) count as present.
pub fn file_absent(path: impl AsRef<Path>) -> bool {
    matches!(
        std::fs::metadata(path),
        Err(e) if e.kind() == ErrorKind::NotFound
    )
}

/// First absent `prefix_NNNN.suffix` for NNNN in 0001..=9999.
pub fn make_filename(prefix: &str, suffix: &str) -> Option<PathBuf> {
    (1..10000)
        .map(|n| PathBuf::from(format!("{prefix}_{n:04}.{suffix}")))
        .find(|p| file_absent(p))
}
