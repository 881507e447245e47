//! Service Layer Error Types
//!
//! This module defines error types for the node count job, the scheduler and
//! configuration loading.

use crate::db::RepositoryError;
use std::path::PathBuf;
use thiserror::Error;

/// Node count job errors
///
/// Per-page write failures are not errors at this level; they are recorded as
/// page outcomes. These variants cover failures that end a unit of work.
#[derive(Error, Debug)]
pub enum NodeCountError {
    /// Repository call failed outside the per-page write path
    #[error("Repository operation failed: {0}")]
    Repository(#[from] RepositoryError),

    /// Configuration is invalid
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Configuration file could not be read
    #[error("Failed to read configuration {path}: {source}")]
    ConfigIo {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl NodeCountError {
    /// Create an invalid configuration error
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Create a configuration I/O error
    pub fn config_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::ConfigIo {
            path: path.into(),
            source,
        }
    }
}

/// Scheduler errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    /// Schedule expression could not be parsed
    #[error("Invalid schedule expression '{expression}': {reason}")]
    InvalidExpression { expression: String, reason: String },

    /// A task is already registered under this name
    #[error("Task already scheduled: {name}")]
    AlreadyScheduled { name: String },

    /// No async runtime is available to drive the task
    #[error("No runtime available to schedule task: {name}")]
    NoRuntime { name: String },
}

impl SchedulerError {
    /// Create an invalid expression error
    pub fn invalid_expression(expression: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidExpression {
            expression: expression.into(),
            reason: reason.into(),
        }
    }

    /// Create an already scheduled error
    pub fn already_scheduled(name: impl Into<String>) -> Self {
        Self::AlreadyScheduled { name: name.into() }
    }
}
