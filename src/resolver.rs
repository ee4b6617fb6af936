//! Command resolution and pre-spawn validation.
//!
//! Turns a tool and its environment into the argument vector handed to the
//! spawner. Validation is ordered and short-circuits at the first failing
//! rule; its only side effects are filesystem metadata queries. A failed
//! resolution must never be followed by a spawn attempt.

use std::path::{Path, PathBuf};

use crate::catalog::{Environment, Tool};

/// A fully resolved process invocation. The first element is the program,
/// the rest are its arguments. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgVector {
    argv: Vec<String>,
}

impl ArgVector {
    /// Starts an argv with the given program.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            argv: vec![program.into()],
        }
    }

    /// Appends a single argument verbatim.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.argv.push(arg.into());
        self
    }

    /// Appends the whitespace-separated tokens of `text`. Runs of whitespace
    /// collapse and empty tokens are dropped. No quote or escape handling is
    /// performed; a token containing spaces cannot be expressed, which is an
    /// accepted limitation of the parameter format.
    pub fn args_from(mut self, text: &str) -> Self {
        self.argv.extend(text.split_whitespace().map(str::to_string));
        self
    }

    pub fn program(&self) -> &str {
        &self.argv[0]
    }

    /// The arguments after the program.
    pub fn args(&self) -> &[String] {
        &self.argv[1..]
    }

    pub fn as_slice(&self) -> &[String] {
        &self.argv
    }
}

impl std::fmt::Display for ArgVector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.argv.join(" "))
    }
}

/// A configuration problem detected before any process is created. Each
/// variant names the failing field so the message can be shown to the user
/// as-is.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("tool has no command configured")]
    EmptyCommand,
    #[error("tool \"{0}\" has no environment assigned")]
    MissingEnvironment(String),
    #[error("no environment with id \"{0}\" exists")]
    UnknownEnvironment(String),
    #[error("environment executable path is empty")]
    EmptyExecutable,
    #[error("environment executable {0} does not exist")]
    ExecutableMissing(PathBuf),
    #[error("environment executable {0} is not a regular file")]
    ExecutableNotFile(PathBuf),
    #[error("environment executable {0} is not executable")]
    ExecutableNotExecutable(PathBuf),
    #[error("tool command {0} does not exist")]
    CommandMissing(PathBuf),
}

/// Validates `tool` against its looked-up `environment` and assembles the
/// argv `[executable, environment parameters.., command, tool arguments..]`.
///
/// `environment` is `None` when the catalog lookup for the tool's
/// environment id found nothing. Checks run in a fixed order (command,
/// environment id, environment lookup, executable, absolute command path)
/// and the first failure wins.
pub fn resolve(tool: &Tool, environment: Option<&Environment>) -> Result<ArgVector, ValidationError> {
    let command = tool.command.trim();
    if command.is_empty() {
        return Err(ValidationError::EmptyCommand);
    }

    let environment_id = tool
        .environment_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ValidationError::MissingEnvironment(tool.name.clone()))?;

    let environment =
        environment.ok_or_else(|| ValidationError::UnknownEnvironment(environment_id.to_string()))?;

    check_executable(&environment.executable_path)?;

    let command_path = Path::new(command);
    if command_path.is_absolute() && !command_path.exists() {
        return Err(ValidationError::CommandMissing(command_path.to_path_buf()));
    }

    Ok(ArgVector::new(environment.executable_path.trim())
        .args_from(environment.parameters.as_deref().unwrap_or(""))
        .arg(command)
        .args_from(tool.arguments.as_deref().unwrap_or("")))
}

/// Checks that `path` names an existing, regular, executable file. Reused by
/// the terminal session when a tool launch is routed through it.
pub fn check_executable(path: &str) -> Result<(), ValidationError> {
    let path = path.trim();
    if path.is_empty() {
        return Err(ValidationError::EmptyExecutable);
    }
    let path = Path::new(path);
    let metadata = match path.metadata() {
        Ok(metadata) => metadata,
        Err(_) => return Err(ValidationError::ExecutableMissing(path.to_path_buf())),
    };
    if !metadata.is_file() {
        return Err(ValidationError::ExecutableNotFile(path.to_path_buf()));
    }
    if !is_executable(&metadata) {
        return Err(ValidationError::ExecutableNotExecutable(path.to_path_buf()));
    }
    Ok(())
}

#[cfg(unix)]
fn is_executable(metadata: &std::fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o111 != 0
}

// Windows has no executable bit; existence as a regular file is the best
// pre-spawn check available.
#[cfg(not(unix))]
fn is_executable(_metadata: &std::fs::Metadata) -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Environment, Tool};

    fn tool(command: &str, arguments: Option<&str>) -> Tool {
        Tool {
            id: "t1".into(),
            name: "scanner".into(),
            description: None,
            category_id: None,
            environment_id: Some("e1".into()),
            command: command.into(),
            arguments: arguments.map(str::to_string),
            working_directory: None,
            icon_path: None,
            has_gui: false,
        }
    }

    fn environment(executable: &str, parameters: Option<&str>) -> Environment {
        Environment {
            id: "e1".into(),
            name: "runtime".into(),
            kind: None,
            executable_path: executable.into(),
            parameters: parameters.map(str::to_string),
            description: None,
        }
    }

    #[cfg(unix)]
    fn write_executable(dir: &Path, name: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join(name);
        std::fs::write(&path, "#!/bin/sh\n").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    #[test]
    fn assembles_argv_in_fixed_order_with_collapsed_whitespace() {
        let dir = tempfile::tempdir().unwrap();
        let exe = write_executable(dir.path(), "python3");
        let env = environment(exe.to_str().unwrap(), Some("-u"));
        let tool = tool("script.py", Some("--flag  value"));
        let argv = resolve(&tool, Some(&env)).unwrap();
        assert_eq!(
            argv.as_slice(),
            &[
                exe.to_str().unwrap().to_string(),
                "-u".into(),
                "script.py".into(),
                "--flag".into(),
                "value".into(),
            ]
        );
    }

    #[cfg(unix)]
    #[test]
    fn command_is_a_single_token_even_with_spaces() {
        let dir = tempfile::tempdir().unwrap();
        let exe = write_executable(dir.path(), "java");
        let env = environment(exe.to_str().unwrap(), None);
        let tool = tool("run me.jar", None);
        let argv = resolve(&tool, Some(&env)).unwrap();
        assert_eq!(argv.args(), &["run me.jar".to_string()]);
    }

    #[test]
    fn empty_command_wins_over_missing_environment() {
        let mut tool = tool("   ", None);
        tool.environment_id = None;
        assert_eq!(resolve(&tool, None), Err(ValidationError::EmptyCommand));
    }

    #[test]
    fn missing_environment_id_is_reported_before_lookup() {
        let mut tool = tool("script.py", None);
        tool.environment_id = Some("  ".into());
        assert_eq!(
            resolve(&tool, None),
            Err(ValidationError::MissingEnvironment("scanner".into()))
        );
    }

    #[test]
    fn unknown_environment_is_reported_with_its_id() {
        let tool = tool("script.py", None);
        assert_eq!(
            resolve(&tool, None),
            Err(ValidationError::UnknownEnvironment("e1".into()))
        );
    }

    #[test]
    fn missing_executable_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let env = environment(dir.path().join("absent").to_str().unwrap(), None);
        let tool = tool("script.py", None);
        assert!(matches!(
            resolve(&tool, Some(&env)),
            Err(ValidationError::ExecutableMissing(_))
        ));
    }

    #[test]
    fn directory_executable_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let env = environment(dir.path().to_str().unwrap(), None);
        let tool = tool("script.py", None);
        assert!(matches!(
            resolve(&tool, Some(&env)),
            Err(ValidationError::ExecutableNotFile(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn non_executable_file_is_rejected() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plain");
        std::fs::write(&path, "data").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();
        let env = environment(path.to_str().unwrap(), None);
        let tool = tool("script.py", None);
        assert!(matches!(
            resolve(&tool, Some(&env)),
            Err(ValidationError::ExecutableNotExecutable(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn absolute_command_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        let exe = write_executable(dir.path(), "python3");
        let env = environment(exe.to_str().unwrap(), None);
        let missing = dir.path().join("gone.py");
        let tool = tool(missing.to_str().unwrap(), None);
        assert_eq!(
            resolve(&tool, Some(&env)),
            Err(ValidationError::CommandMissing(missing))
        );
    }

    #[cfg(unix)]
    #[test]
    fn relative_command_is_not_checked_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let exe = write_executable(dir.path(), "python3");
        let env = environment(exe.to_str().unwrap(), None);
        let tool = tool("not-on-disk.py", None);
        assert!(resolve(&tool, Some(&env)).is_ok());
    }
}
