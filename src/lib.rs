//! Transitive shared-library resolution for ELF binaries.
//!
//! Runs `ldd` (or a cross variant) on an object and every library it pulls
//! in, and reconciles a single dynamic linker for the whole closure. The
//! interpreter of foreign-architecture objects is read with `patchelf` or
//! `readelf`, which parse ELF headers directly instead of running the host
//! dynamic linker.

// `SharedObjectResolver::resolve` is the closure entry point; the parsers and
// `resolve_object` work on a single object's tool output.

mod analyze;
mod error;
mod interp;
mod paths;
mod tools;

pub use analyze::{
    parse_ldd_output, Dependencies, LddEntry, ResolverConfig, SharedObjectResolver,
};
pub use error::ResolveError;
pub use interp::{
    parse_patchelf_interpreter, parse_readelf_interpreter, InterpreterStrategy,
    INTERPRETER_PROGRAMS,
};
pub use paths::interpreter_file_name;
pub use tools::{ElfTools, SystemTools, ToolOutput};
