//! Error types.
//!
//! `ConfigError` is fatal and stops the run before anything is scheduled.
//! `TaskError` is data: it is recorded on the task that produced it and never
//! unwinds through the scheduler or printer.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while turning command-line input into a run.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// `--max-processes` is neither a number nor a percentage.
    #[error("invalid max-processes value '{0}'")]
    MaxProcesses(String),

    /// `--max-processes` ends in `%` but the rest is not a non-negative number.
    #[error("invalid max-processes percentage '{0}'")]
    Percentage(String),

    #[error("unknown kill signal '{0}'")]
    KillSignal(String),

    /// `--restart-after` is neither whole seconds nor a duration like `500ms`.
    #[error("invalid restart delay '{value}': {source}")]
    RestartDelay {
        value: String,
        #[source]
        source: humantime::DurationError,
    },

    /// Script filter of a shorthand command is not a valid regex.
    #[error("invalid script pattern '{pattern}': {source}")]
    ScriptPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("failed to read manifest '{path}': {source}")]
    ManifestRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse manifest '{path}': {source}")]
    ManifestParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("unterminated quote in command '{0}'")]
    UnterminatedQuote(String),

    #[error("invalid color '{0}'")]
    Color(String),

    #[error("no commands to run")]
    NoCommands,
}

/// Terminal outcome of a failed task attempt.
#[derive(Debug, Error)]
pub enum TaskError {
    /// The process could not be started at all.
    #[error("error running command {command}: {source}")]
    Launch {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// The process ran and exited unsuccessfully (or was killed by a signal).
    #[error("error running command {command}: exited with code {code}")]
    Exit { command: String, code: i32 },

    #[error("error waiting for command {command}: {source}")]
    Wait {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

impl TaskError {
    /// Exit code recorded on the task for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            TaskError::Launch { .. } => 127,
            TaskError::Exit { code, .. } => *code,
            TaskError::Wait { .. } => 1,
        }
    }
}
