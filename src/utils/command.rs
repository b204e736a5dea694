// restore-watcher/src/utils/command.rs
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::info;
use url::Url;
use which::which;

use crate::errors::{RestoreError, Result};

/// A subprocess invocation: program, arguments and extra environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub envs: Vec<(String, String)>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn path_arg(self, path: &Path) -> Self {
        self.arg(path.to_string_lossy())
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    /// Renders the command line with any URL passwords masked, for logs and errors.
    pub fn redacted(&self) -> String {
        let mut rendered = self.program.clone();
        for arg in &self.args {
            rendered.push(' ');
            rendered.push_str(&redact_arg(arg));
        }
        rendered
    }

    #[cfg(test)]
    pub fn has_arg(&self, needle: &str) -> bool {
        self.args.iter().any(|arg| arg == needle)
    }
}

fn redact_arg(arg: &str) -> String {
    match Url::parse(arg) {
        Ok(mut url) if url.password().is_some() => {
            let _ = url.set_password(Some("***"));
            url.to_string()
        }
        _ => arg.to_string(),
    }
}

/// Executes commands and checks their exit status.
pub trait CommandRunner: Send + Sync {
    /// Runs `command` to completion and returns its stdout.
    /// A non-zero exit is an error carrying the captured output.
    fn run(&self, command: &CommandSpec) -> Result<String>;
}

/// Runs commands as real child processes, resolving programs through `PATH`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, command: &CommandSpec) -> Result<String> {
        let executable = find_executable(&command.program)?;
        info!("executing: {}", command.redacted());

        let output = Command::new(&executable)
            .args(&command.args)
            .envs(command.envs.iter().cloned())
            .stdin(Stdio::null())
            .output()?;

        if !output.status.success() {
            return Err(RestoreError::Command {
                command: command.redacted(),
                status: output.status.to_string(),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Finds an executable in the system PATH.
pub fn find_executable(program: &str) -> Result<PathBuf> {
    which(program).map_err(|_| {
        RestoreError::MissingExecutable(format!(
            "{} executable not found in PATH. Please ensure it is installed and in your PATH.",
            program
        ))
    })
}
