//! Interpreter (`PT_INTERP`) introspection.
//!
//! Uses patchelf or readelf rather than the lister because both read the ELF
//! headers directly and work regardless of the architecture of the file.

use anyhow::Result;
use std::path::Path;

use crate::error::ResolveError;
use crate::paths::{find_program, first_available, interpreter_file_name};
use crate::tools::{ElfTools, ToolOutput};

/// Introspection programs in priority order.
pub const INTERPRETER_PROGRAMS: [&str; 2] = ["patchelf", "readelf"];

const PATCHELF_NO_SECTION: &str = "cannot find section";
const READELF_INTERP_MARKER: &str = ".interp";
const READELF_INTERP_REQUEST: &str = "Requesting program interpreter";

/// Which program is used to read an object's interpreter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterpreterStrategy {
    /// `patchelf --print-interpreter`
    Patchelf,
    /// `readelf -l`
    Readelf,
}

impl InterpreterStrategy {
    /// Pick the first strategy whose program is in `$PATH`.
    pub fn detect() -> Result<Self> {
        Self::detect_with(|name| find_program(name).is_some())
    }

    /// Pick the first strategy whose program `is_available` accepts.
    pub fn detect_with(is_available: impl Fn(&str) -> bool) -> Result<Self> {
        match first_available(&INTERPRETER_PROGRAMS, is_available) {
            Some(name) => {
                let strategy = Self::from_program(name).ok_or_else(missing_program)?;
                tracing::debug!("Using {} to read ELF interpreters", strategy.program());
                Ok(strategy)
            }
            None => {
                let err = missing_program();
                tracing::error!("Could not find any of the programs in $PATH: {err}");
                Err(err.into())
            }
        }
    }

    fn from_program(name: &str) -> Option<Self> {
        match name {
            "patchelf" => Some(Self::Patchelf),
            "readelf" => Some(Self::Readelf),
            _ => None,
        }
    }

    /// Name of the program this strategy runs.
    pub fn program(self) -> &'static str {
        match self {
            Self::Patchelf => "patchelf",
            Self::Readelf => "readelf",
        }
    }

    /// Interpreter file name declared by `object`, or `None` if it has no
    /// interpreter section (the normal case for shared libraries).
    pub fn interpreter_name<T: ElfTools + ?Sized>(
        self,
        tools: &T,
        object: &Path,
    ) -> Result<Option<String>> {
        let raw = match self {
            Self::Patchelf => {
                parse_patchelf_interpreter(object, &tools.print_interpreter(object)?)?
            }
            Self::Readelf => {
                parse_readelf_interpreter(object, &tools.program_headers(object)?)?
            }
        };
        Ok(raw.as_deref().and_then(interpreter_file_name))
    }
}

fn missing_program() -> ResolveError {
    ResolveError::MissingProgram {
        candidates: INTERPRETER_PROGRAMS.to_vec(),
    }
}

/// Parse `patchelf --print-interpreter` output.
///
/// A "cannot find section" failure means the object has no interpreter.
pub fn parse_patchelf_interpreter(object: &Path, result: &ToolOutput) -> Result<Option<String>> {
    if !result.is_success() {
        tracing::debug!("patchelf output:\n{}", result.output);
        if result.output.contains(PATCHELF_NO_SECTION) {
            return Ok(None);
        }
        return Err(tool_failed("patchelf", object, result).into());
    }
    let interpreter = result.output.trim();
    Ok((!interpreter.is_empty()).then(|| interpreter.to_string()))
}

/// Parse `readelf -l` output.
///
/// Example readelf output:
/// ```text
///   INTERP         0x0000000000000318 0x0000000000000318 0x0000000000000318
///                  0x000000000000001c 0x000000000000001c  R      0x1
///       [Requesting program interpreter: /lib64/ld-linux-x86-64.so.2]
/// ...
///    01     .interp
/// ```
pub fn parse_readelf_interpreter(object: &Path, result: &ToolOutput) -> Result<Option<String>> {
    if !result.is_success() {
        tracing::debug!("readelf output:\n{}", result.output);
        return Err(tool_failed("readelf", object, result).into());
    }

    let mut found_marker = false;
    for line in result.output.lines() {
        if line.contains(READELF_INTERP_MARKER) {
            found_marker = true;
        }
        if line.contains(READELF_INTERP_REQUEST) {
            if let Some((_, path)) = line.split_once(':') {
                let path = path.trim().trim_end_matches(']').trim();
                return Ok(Some(path.to_string()));
            }
        }
    }

    if found_marker {
        return Err(ResolveError::MalformedOutput {
            program: "readelf".to_string(),
            marker: READELF_INTERP_MARKER,
            object: object.to_path_buf(),
            output: result.output.clone(),
        }
        .into());
    }
    Ok(None)
}

fn tool_failed(program: &str, object: &Path, result: &ToolOutput) -> ResolveError {
    ResolveError::ToolFailed {
        program: program.to_string(),
        object: object.to_path_buf(),
        code: result.code,
        output: result.output.clone(),
    }
}
