//! Shared-library dependency resolution using ldd.
//!
//! `ldd` reports the libraries the dynamic linker would load for an object.
//! The native variant prints the interpreter on a line of its own; a cross
//! variant (e.g. `xldd`) prints it like any other library, so in that case the
//! interpreter is identified by reading the object's `PT_INTERP` name.

use anyhow::Result;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use crate::error::ResolveError;
use crate::interp::InterpreterStrategy;
use crate::paths::{find_program, is_regular_file};
use crate::tools::{ElfTools, SystemTools};

/// How to run the external programs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolverConfig {
    /// Dependency lister, `ldd` unless a cross variant is needed.
    pub ldd: PathBuf,
    /// Replaces the inherited environment of every subprocess when set
    /// (e.g. to point a cross lister at a sysroot). The introspection program
    /// is run by its resolved path, but a bare `ldd` name still needs `PATH`
    /// in this mapping.
    pub environment: Option<BTreeMap<String, String>>,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            ldd: PathBuf::from("ldd"),
            environment: None,
        }
    }
}

impl ResolverConfig {
    /// Use `ldd` as the dependency lister.
    pub fn with_ldd(mut self, ldd: impl Into<PathBuf>) -> Self {
        self.ldd = ldd.into();
        self
    }

    /// Replace the subprocess environment with `environment`.
    pub fn with_environment(mut self, environment: BTreeMap<String, String>) -> Self {
        self.environment = Some(environment);
        self
    }
}

/// Libraries and interpreter of an object.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dependencies {
    pub libraries: BTreeSet<PathBuf>,
    pub interpreter: Option<PathBuf>,
}

/// One meaningful line of ldd output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LddEntry {
    /// `libfoo.so.1 => /usr/lib/libfoo.so.1 (0x...)`
    Library(PathBuf),
    /// `/lib64/ld-linux-x86-64.so.2 (0x...)`
    Interpreter(PathBuf),
}

/// Parse ldd output into candidate entries.
///
/// Example ldd output:
/// ```text
///     linux-vdso.so.1 (0x00007ffd4a5f2000)
///     libtinfo.so.6 => /lib64/libtinfo.so.6 (0x00007f2c1a200000)
///     libc.so.6 => /lib64/libc.so.6 (0x00007f2c1a000000)
///     /lib64/ld-linux-x86-64.so.2 (0x00007f2c1a400000)
/// ```
///
/// Candidates are not checked against the filesystem here, so synthetic
/// entries such as `linux-vdso.so.1` are still returned.
///
/// # Errors
///
/// Returns [`ResolveError::UnresolvedDependency`] for a `=> not found` line.
pub fn parse_ldd_output(object: &Path, output: &str) -> Result<Vec<LddEntry>> {
    let mut entries = Vec::new();

    for line in output.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some((_, target)) = line.split_once("=>") {
            if target.contains("not found") {
                return Err(ResolveError::UnresolvedDependency {
                    object: object.to_path_buf(),
                    line: line.to_string(),
                }
                .into());
            }
            if let Some(path) = target.split_whitespace().next() {
                entries.push(LddEntry::Library(PathBuf::from(path)));
            }
        } else if let Some(path) = line.split_whitespace().next() {
            entries.push(LddEntry::Interpreter(PathBuf::from(path)));
        }
    }

    Ok(entries)
}

/// Resolves the transitive shared-library closure of ELF objects.
#[derive(Debug, Clone)]
pub struct SharedObjectResolver<T = SystemTools> {
    tools: T,
    strategy: InterpreterStrategy,
}

impl SharedObjectResolver<SystemTools> {
    /// Create a resolver running real programs.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError::MissingProgram`] if neither `patchelf` nor
    /// `readelf` is in `$PATH`.
    pub fn new(config: ResolverConfig) -> Result<Self> {
        let strategy = InterpreterStrategy::detect()?;
        let mut tools = SystemTools::new(config.ldd, config.environment);
        if let Some(path) = find_program(strategy.program()) {
            tools = match strategy {
                InterpreterStrategy::Patchelf => tools.with_patchelf(path),
                InterpreterStrategy::Readelf => tools.with_readelf(path),
            };
        }
        Ok(Self::with_tools(tools, strategy))
    }
}

impl<T: ElfTools> SharedObjectResolver<T> {
    /// Create a resolver over an explicit tool set.
    pub fn with_tools(tools: T, strategy: InterpreterStrategy) -> Self {
        Self { tools, strategy }
    }

    /// Introspection strategy chosen at construction.
    pub fn strategy(&self) -> InterpreterStrategy {
        self.strategy
    }

    /// Tool set the resolver runs.
    pub fn tools(&self) -> &T {
        &self.tools
    }

    /// Every library `object` loads at runtime, plus its interpreter.
    ///
    /// Neither the object itself nor the interpreter is reported as one of
    /// the libraries. Each call starts from an empty visited set.
    ///
    /// # Errors
    ///
    /// Fails on any tool failure, unresolved dependency, malformed tool
    /// output, or disagreement between interpreters in the closure.
    #[must_use = "resolved dependencies should be processed"]
    pub fn resolve(&self, object: &Path) -> Result<Dependencies> {
        self.resolve_with_visited(object, &mut HashSet::new())
    }

    /// Like [`resolve`](Self::resolve), but does not walk into libraries
    /// already in `visited`, and records every library it walks into there.
    ///
    /// When one set is shared across several roots, a library walked for an
    /// earlier root is still reported if it is a direct dependency, but its
    /// own dependencies are not reported again.
    pub fn resolve_with_visited(
        &self,
        object: &Path,
        visited: &mut HashSet<PathBuf>,
    ) -> Result<Dependencies> {
        visited.insert(object.to_path_buf());
        let mut deps = self.resolve_recursive(object, visited)?;
        deps.libraries.remove(object);
        if let Some(interpreter) = &deps.interpreter {
            deps.libraries.remove(interpreter);
        }
        tracing::debug!(
            "{} needs {} libraries, interpreter {:?}",
            object.display(),
            deps.libraries.len(),
            deps.interpreter
        );
        Ok(deps)
    }

    fn resolve_recursive(
        &self,
        object: &Path,
        visited: &mut HashSet<PathBuf>,
    ) -> Result<Dependencies> {
        let direct = self.resolve_object(object)?;
        let mut libraries = direct.libraries.clone();
        let mut interpreter = direct.interpreter;

        for lib in &direct.libraries {
            // Cycles are real (libfreetype.so.6 <-> libharfbuzz.so.0).
            if !visited.insert(lib.clone()) {
                continue;
            }

            let sub = self.resolve_recursive(lib, visited)?;
            libraries.extend(sub.libraries);

            if let Some(sub_interpreter) = sub.interpreter {
                let own = interpreter.get_or_insert_with(|| sub_interpreter.clone());
                if *own != sub_interpreter {
                    return Err(ResolveError::InconsistentInterpreter {
                        library: lib.clone(),
                        library_interpreter: sub_interpreter,
                        object: object.to_path_buf(),
                        object_interpreter: own.clone(),
                    }
                    .into());
                }
            }
        }

        Ok(Dependencies {
            libraries,
            interpreter,
        })
    }

    /// Direct libraries and interpreter of a single object.
    ///
    /// Only entries naming an existing regular file are kept.
    pub fn resolve_object(&self, object: &Path) -> Result<Dependencies> {
        let result = self.tools.list_dependencies(object)?;
        let lister = self.tools.lister_name();
        tracing::debug!("{} output:\n{}", lister, result.output);

        if !result.is_success() {
            return Err(ResolveError::ToolFailed {
                program: lister,
                object: object.to_path_buf(),
                code: result.code,
                output: result.output,
            }
            .into());
        }

        let mut deps = Dependencies::default();
        for entry in parse_ldd_output(object, &result.output)? {
            match entry {
                LddEntry::Library(path) if is_regular_file(&path) => {
                    deps.libraries.insert(path);
                }
                LddEntry::Interpreter(path) if is_regular_file(&path) => {
                    deps.interpreter = Some(path);
                }
                _ => {}
            }
        }

        if deps.interpreter.is_none() {
            deps.interpreter = self.take_foreign_interpreter(object, &mut deps.libraries)?;
        }

        Ok(deps)
    }

    /// Move the library matching `object`'s interpreter name out of
    /// `libraries`.
    fn take_foreign_interpreter(
        &self,
        object: &Path,
        libraries: &mut BTreeSet<PathBuf>,
    ) -> Result<Option<PathBuf>> {
        let Some(name) = self.strategy.interpreter_name(&self.tools, object)? else {
            return Ok(None);
        };

        let found = libraries
            .iter()
            .find(|lib| lib.file_name() == Some(OsStr::new(&name)))
            .cloned();
        if let Some(interpreter) = &found {
            libraries.remove(interpreter);
        }
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn app() -> &'static Path {
        Path::new("/usr/bin/app")
    }

    #[test]
    fn test_parse_ldd_output_native() {
        let output = r#"
	linux-vdso.so.1 (0x00007ffd4a5f2000)
	libtinfo.so.6 => /lib64/libtinfo.so.6 (0x00007f2c1a200000)
	libc.so.6 => /lib64/libc.so.6 (0x00007f2c1a000000)
	/lib64/ld-linux-x86-64.so.2 (0x00007f2c1a400000)
"#;
        let entries = parse_ldd_output(app(), output).unwrap();
        assert_eq!(
            entries,
            vec![
                LddEntry::Interpreter(PathBuf::from("linux-vdso.so.1")),
                LddEntry::Library(PathBuf::from("/lib64/libtinfo.so.6")),
                LddEntry::Library(PathBuf::from("/lib64/libc.so.6")),
                LddEntry::Interpreter(PathBuf::from("/lib64/ld-linux-x86-64.so.2")),
            ]
        );
    }

    #[test]
    fn test_parse_ldd_output_not_found() {
        let output = "\tlibfoo.so.1 => not found\n\tlibc.so.6 => /lib64/libc.so.6 (0x1)\n";
        let err = parse_ldd_output(app(), output).unwrap_err();
        match err.downcast_ref::<ResolveError>() {
            Some(ResolveError::UnresolvedDependency { object, line }) => {
                assert_eq!(object, app());
                assert_eq!(line, "libfoo.so.1 => not found");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_parse_ldd_output_empty_target() {
        // Old glibc prints the vdso with an empty arrow target.
        let output = "\tlinux-gate.so.1 =>  (0xb7f0e000)\n\tlibc.so.6 =>\n";
        let entries = parse_ldd_output(app(), output).unwrap();
        assert_eq!(entries, vec![LddEntry::Library(PathBuf::from("(0xb7f0e000)"))]);
    }

    #[test]
    fn test_parse_ldd_output_empty() {
        assert!(parse_ldd_output(app(), "").unwrap().is_empty());
    }

    #[test]
    fn test_new_uses_resolved_introspection_program() {
        // Skips on hosts without patchelf or readelf.
        let Ok(resolver) = SharedObjectResolver::new(ResolverConfig::default()) else {
            return;
        };
        let path = find_program(resolver.strategy().program()).unwrap();
        assert!(path.is_absolute());
        let tools = format!("{:?}", resolver.tools());
        assert!(tools.contains(&path.display().to_string()), "{tools}");
    }

    #[test]
    fn test_config_builder() {
        let mut env = BTreeMap::new();
        env.insert("SYSROOT".to_string(), "/opt/sysroot".to_string());
        let config = ResolverConfig::default()
            .with_ldd("/opt/cross/bin/xldd")
            .with_environment(env.clone());
        assert_eq!(config.ldd, PathBuf::from("/opt/cross/bin/xldd"));
        assert_eq!(config.environment, Some(env));
        assert_eq!(ResolverConfig::default().ldd, PathBuf::from("ldd"));
    }
}
