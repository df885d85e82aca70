//! External programs the resolver drives.
//!
//! Each external contract gets one method on [`ElfTools`] so the parsing
//! logic can be fed canned output in tests instead of real binaries.

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Exit code and combined output of one tool invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
    /// `None` when the process was terminated by a signal.
    pub code: Option<i32>,
    /// Stdout followed by stderr.
    pub output: String,
}

impl ToolOutput {
    /// Output of a run that exited 0.
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            code: Some(0),
            output: output.into(),
        }
    }

    /// Output of a run that exited with `code`.
    pub fn failure(code: i32, output: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            output: output.into(),
        }
    }

    /// Whether the program exited 0.
    pub fn is_success(&self) -> bool {
        self.code == Some(0)
    }
}

/// The three external capabilities the resolver relies on.
///
/// Implementations report what the program printed and how it exited; they
/// do not decide whether a non-zero exit is an error.
pub trait ElfTools {
    /// Program name used in diagnostics for [`ElfTools::list_dependencies`].
    fn lister_name(&self) -> String {
        "ldd".to_string()
    }

    /// Run the dependency lister (`ldd` or a cross variant) on `object`.
    fn list_dependencies(&self, object: &Path) -> Result<ToolOutput>;

    /// Run `patchelf --print-interpreter` on `object`.
    fn print_interpreter(&self, object: &Path) -> Result<ToolOutput>;

    /// Run `readelf -l` on `object`.
    fn program_headers(&self, object: &Path) -> Result<ToolOutput>;
}

/// [`ElfTools`] backed by real subprocesses.
#[derive(Debug, Clone)]
pub struct SystemTools {
    ldd: PathBuf,
    patchelf: PathBuf,
    readelf: PathBuf,
    environment: Option<BTreeMap<String, String>>,
}

impl SystemTools {
    /// When `environment` is set it replaces the inherited environment of
    /// every subprocess.
    pub fn new(ldd: impl Into<PathBuf>, environment: Option<BTreeMap<String, String>>) -> Self {
        Self {
            ldd: ldd.into(),
            patchelf: PathBuf::from("patchelf"),
            readelf: PathBuf::from("readelf"),
            environment,
        }
    }

    /// Run patchelf from `path` instead of looking it up by name.
    pub fn with_patchelf(mut self, path: impl Into<PathBuf>) -> Self {
        self.patchelf = path.into();
        self
    }

    /// Run readelf from `path` instead of looking it up by name.
    pub fn with_readelf(mut self, path: impl Into<PathBuf>) -> Self {
        self.readelf = path.into();
        self
    }

    fn run<I, S>(&self, program: &Path, args: I) -> Result<ToolOutput>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut cmd = Command::new(program);
        cmd.args(args);
        if let Some(env) = &self.environment {
            cmd.env_clear().envs(env);
        }

        tracing::debug!("EXEC {}", display_command(&cmd));

        let output = cmd
            .output()
            .with_context(|| format!("Failed to execute `{}`", program.display()))?;

        // Library paths are read from stdout and must decode exactly.
        let mut combined = String::from_utf8(output.stdout).with_context(|| {
            format!("`{}` printed output that is not valid UTF-8", display_command(&cmd))
        })?;
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        Ok(ToolOutput {
            code: output.status.code(),
            output: combined,
        })
    }
}

impl ElfTools for SystemTools {
    fn lister_name(&self) -> String {
        self.ldd.display().to_string()
    }

    fn list_dependencies(&self, object: &Path) -> Result<ToolOutput> {
        self.run(&self.ldd, [object])
    }

    fn print_interpreter(&self, object: &Path) -> Result<ToolOutput> {
        self.run(
            &self.patchelf,
            [OsStr::new("--print-interpreter"), object.as_os_str()],
        )
    }

    fn program_headers(&self, object: &Path) -> Result<ToolOutput> {
        self.run(&self.readelf, [OsStr::new("-l"), object.as_os_str()])
    }
}

fn display_command(cmd: &Command) -> String {
    let mut parts = vec![cmd.get_program().to_string_lossy().into_owned()];
    parts.extend(cmd.get_args().map(|arg| arg.to_string_lossy().into_owned()));
    parts.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    fn create_mock_tool(dir: &Path, name: &str, script: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, script).unwrap();
        let mut perms = fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&path, perms).unwrap();
        path
    }

    #[test]
    fn test_non_utf8_output_is_an_error() {
        let temp = TempDir::new().unwrap();
        let ldd = create_mock_tool(
            temp.path(),
            "ldd",
            "#!/bin/sh\nprintf 'lib\\377.so.1 => /opt/lib/lib\\377.so.1 (0x1)\\n'\n",
        );
        let tools = SystemTools::new(ldd, None);
        let err = tools.list_dependencies(Path::new("/usr/bin/app")).unwrap_err();
        assert!(
            err.to_string().contains("not valid UTF-8"),
            "unexpected error: {err}"
        );
    }

    #[test]
    fn test_readelf_runs_from_given_path() {
        let temp = TempDir::new().unwrap();
        let readelf = create_mock_tool(temp.path(), "readelf", "#!/bin/sh\necho \"$@\"\n");
        let tools = SystemTools::new("ldd", Some(BTreeMap::new())).with_readelf(readelf);
        let out = tools.program_headers(Path::new("/usr/bin/app")).unwrap();
        assert!(out.is_success());
        assert_eq!(out.output.trim(), "-l /usr/bin/app");
    }

    #[test]
    fn test_tool_output_success() {
        assert!(ToolOutput::success("").is_success());
        assert!(!ToolOutput::failure(1, "").is_success());
        assert!(!ToolOutput::default().is_success());
    }

    #[test]
    fn test_display_command() {
        let mut cmd = Command::new("readelf");
        cmd.args(["-l", "/bin/true"]);
        assert_eq!(display_command(&cmd), "readelf -l /bin/true");
    }

    #[test]
    fn test_missing_lister_is_an_error() {
        let tools = SystemTools::new("/nonexistent/bin/ldd", None);
        let err = tools.list_dependencies(Path::new("/bin/true")).unwrap_err();
        assert!(
            err.to_string().contains("Failed to execute"),
            "unexpected error: {err}"
        );
    }

    #[test]
    fn test_environment_replaces_inherited_env() {
        let sh = Path::new("/bin/sh");
        if !sh.exists() {
            return;
        }
        let mut env = BTreeMap::new();
        env.insert("RESOLVER_SYSROOT".to_string(), "sysroot".to_string());
        let tools = SystemTools::new(sh, Some(env));
        let out = tools
            .run(sh, ["-c", "echo ${RESOLVER_SYSROOT}:${HOME}"])
            .unwrap();
        assert!(out.is_success());
        assert_eq!(out.output.trim(), "sysroot:");
    }
}
