// src/error.rs

use std::path::PathBuf;
use thiserror::Error;

/// Errors that prevent a command from being attempted at all.
///
/// Anything that happens after the child is running (non-zero exit,
/// inactivity kill, read errors) is reported inside a `CommandResult` instead.
#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("Failed to spawn command `{command}`")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Working directory {} does not exist or is not a directory", .0.display())]
    WorkingDir(PathBuf),
    #[error("Failed to get command stdout")]
    StdoutPipe,
    #[error("Failed to get command stderr")]
    StderrPipe,
    #[error("Invalid timeout configuration: {0}")]
    InvalidTimeout(String),
}

/// Raised by `shrink_by_size` when the budget cannot hold the elision marker
/// plus one character on each side.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TruncateError {
    #[error("size {size} is too small for the join marker, the minimum size is {min_size}")]
    BudgetTooSmall { size: usize, min_size: usize },
}

/// Errors loading a `SupervisorConfig`.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse config file")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}
