//! Failure categories reported by the resolver.

use std::path::PathBuf;

use thiserror::Error;

/// A fatal resolution failure.
///
/// Public operations return `anyhow::Result`; use
/// `err.downcast_ref::<ResolveError>()` to recover the category.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// None of the interpreter introspection programs is installed.
    #[error("Missing required program. Need any of {}", quote_list(.candidates))]
    MissingProgram { candidates: Vec<&'static str> },

    /// An external tool exited non-zero in a way that is not recognized.
    #[error(
        "The {program} command returned non-zero status {} for object {}.\noutput:\n{output}",
        display_code(.code),
        .object.display()
    )]
    ToolFailed {
        program: String,
        object: PathBuf,
        code: Option<i32>,
        output: String,
    },

    /// The lister reported a dependency it could not locate.
    #[error("ldd can not resolve all dependencies for object \"{}\". Error in line \"{line}\".", .object.display())]
    UnresolvedDependency { object: PathBuf, line: String },

    /// Two objects of one closure declare different interpreters.
    #[error(
        "library {} has interpreter {} but object {} has interpreter {}",
        .library.display(),
        .library_interpreter.display(),
        .object.display(),
        .object_interpreter.display()
    )]
    InconsistentInterpreter {
        library: PathBuf,
        library_interpreter: PathBuf,
        object: PathBuf,
        object_interpreter: PathBuf,
    },

    /// Tool output carried a section marker without its companion data.
    #[error("{program} found a {marker} line but not the interpreter path for object {}.\noutput:\n{output}", .object.display())]
    MalformedOutput {
        program: String,
        marker: &'static str,
        object: PathBuf,
        output: String,
    },
}

fn quote_list(names: &[&str]) -> String {
    names
        .iter()
        .map(|name| format!("`{name}`"))
        .collect::<Vec<_>>()
        .join(" or ")
}

fn display_code(code: &Option<i32>) -> String {
    match code {
        Some(code) => code.to_string(),
        None => "(killed by signal)".to_string(),
    }
}
