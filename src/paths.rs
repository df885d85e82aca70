//! Program discovery and path helpers.

use std::path::{Path, PathBuf};

/// Find a program in `$PATH`.
///
/// Returns `None` if the program is not installed.
#[must_use = "found program path should be used"]
pub fn find_program(name: &str) -> Option<PathBuf> {
    which::which(name).ok()
}

/// Return the first of `candidates` accepted by `is_available`.
///
/// Order of `candidates` is the priority order.
pub fn first_available<'a>(
    candidates: &[&'a str],
    is_available: impl Fn(&str) -> bool,
) -> Option<&'a str> {
    candidates.iter().copied().find(|name| is_available(name))
}

/// File name component of an interpreter string.
///
/// The raw string may name a path that only exists under a cross target's
/// root, so matching is done on the file name alone.
#[must_use]
pub fn interpreter_file_name(raw: &str) -> Option<String> {
    Path::new(raw.trim())
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
}

/// Whether `path` names an existing regular file (symlinks are followed).
pub fn is_regular_file(path: &Path) -> bool {
    path.is_file()
}
