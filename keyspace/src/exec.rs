//! Command execution against a key directory.
//!
//! Commands are a program plus discrete arguments. No shell is involved, so
//! the key directory is appended as its own argument and shell
//! metacharacters in the command reach the program literally.

use std::fmt;
use std::path::Path;
use std::process::{Command, Stdio};
use std::str::FromStr;
use thiserror::Error;
use tracing::debug;

/// Errors that can occur while running a command against a key.
#[derive(Debug, Error)]
pub enum ExecError {
    /// No program was given.
    #[error("No command provided")]
    NoCommand,
    /// The program could not be started.
    #[error("Failed to start '{program}': {source}")]
    SpawnFailed {
        /// Program that failed to start.
        program: String,
        /// Source error.
        #[source]
        source: std::io::Error,
    },
    /// The program ran and reported failure.
    #[error("'{program}' exited unsuccessfully (code {code:?})")]
    NonZeroExit {
        /// Program that failed.
        program: String,
        /// Exit code, if the process was not killed by a signal.
        code: Option<i32>,
    },
}

/// A program and its leading arguments. The key directory is always added
/// as the final argument when the command runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecCommand {
    program: String,
    args: Vec<String>,
}

impl ExecCommand {
    /// Creates a command with no arguments.
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Appends one argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Appends several arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Splits a command line on whitespace. Quoting is not interpreted.
    ///
    /// # Errors
    ///
    /// Returns [`ExecError::NoCommand`] if the line is blank.
    pub fn parse(line: &str) -> Result<Self, ExecError> {
        let mut words = line.split_whitespace();
        let program = words.next().ok_or(ExecError::NoCommand)?;
        Ok(Self::new(program).args(words))
    }

    /// The program to run.
    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Arguments placed before the key directory.
    #[must_use]
    pub fn arguments(&self) -> &[String] {
        &self.args
    }

    /// Runs the command with `key_dir` appended, in `working_dir`, inheriting
    /// the caller's standard streams. Blocks until the process exits.
    ///
    /// # Errors
    ///
    /// Returns an error if the process cannot be started or exits unsuccessfully.
    pub fn run(&self, key_dir: &Path, working_dir: &Path) -> Result<(), ExecError> {
        if self.program.is_empty() {
            return Err(ExecError::NoCommand);
        }

        debug!(program = %self.program, args = ?self.args, "Spawning command against key directory");

        let status = Command::new(&self.program)
            .args(&self.args)
            .arg(key_dir)
            .current_dir(working_dir)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .map_err(|source| ExecError::SpawnFailed {
                program: self.program.clone(),
                source,
            })?;

        if status.success() {
            Ok(())
        } else {
            Err(ExecError::NonZeroExit {
                program: self.program.clone(),
                code: status.code(),
            })
        }
    }
}

impl FromStr for ExecCommand {
    type Err = ExecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for ExecCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}
