//! Worker command building.

use std::path::PathBuf;

use thiserror::Error;

use crate::resolve::resolve_executable_path;

/// Placeholder in worker parameters replaced with the project id.
pub const PROJECT_PLACEHOLDER: &str = "{project}";

/// Command build error.
#[derive(Debug, Error)]
pub enum CommandBuildError {
    #[error("Base command cannot be parsed: {0}")]
    InvalidBase(String),
    #[error("Base command is empty after parsing")]
    EmptyCommand,
    #[error("Executable not found: {0}")]
    ExecutableNotFound(String),
}

/// Parsed command parts (program + args).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandParts {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandParts {
    #[must_use]
    pub const fn new(program: String, args: Vec<String>) -> Self {
        Self { program, args }
    }

    /// Resolve the program to a path.
    ///
    /// # Errors
    /// Returns error if the executable is not found.
    pub async fn into_resolved(self) -> Result<(PathBuf, Vec<String>), CommandBuildError> {
        let Self { program, args } = self;
        let executable = resolve_executable_path(&program)
            .await
            .ok_or(CommandBuildError::ExecutableNotFound(program))?;
        Ok((executable, args))
    }
}

/// Command line that starts a worker process.
///
/// The base is split with shell quoting rules; params are appended verbatim
/// after `{project}` substitution.
#[derive(Debug, Clone)]
pub struct WorkerCommand {
    /// Base executable command.
    pub base: String,
    /// Parameters appended after the base.
    pub params: Vec<String>,
}

impl WorkerCommand {
    #[must_use]
    pub fn new<S: Into<String>>(base: S) -> Self {
        Self {
            base: base.into(),
            params: Vec::new(),
        }
    }

    /// Append parameters.
    #[must_use]
    pub fn params<I>(mut self, params: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        self.params.extend(params.into_iter().map(Into::into));
        self
    }

    /// Command parts for a worker serving `project_id`.
    ///
    /// # Errors
    /// Returns error if the base cannot be parsed or yields no program.
    pub fn build(&self, project_id: &str) -> Result<CommandParts, CommandBuildError> {
        let mut parts =
            shlex::split(&self.base).ok_or_else(|| CommandBuildError::InvalidBase(self.base.clone()))?;
        parts.extend(
            self.params
                .iter()
                .map(|param| param.replace(PROJECT_PLACEHOLDER, project_id)),
        );

        if parts.is_empty() {
            return Err(CommandBuildError::EmptyCommand);
        }
        let program = parts.remove(0);
        Ok(CommandParts::new(program, parts))
    }
}
