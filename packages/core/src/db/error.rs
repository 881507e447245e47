//! Repository Error Types
//!
//! This module defines error types for repository sessions, covering login,
//! lookup, commit and persistence failures.

use crate::models::ValidationError;
use std::path::PathBuf;
use thiserror::Error;

/// Repository operation errors
///
/// Every session call is fallible I/O; callers decide which of these are
/// fatal for their unit of work.
#[derive(Error, Debug)]
pub enum RepositoryError {
    /// No session could be opened for the requested service user
    #[error("Failed to open session for service user '{subservice}': {reason}")]
    LoginFailed { subservice: String, reason: String },

    /// Path failed validation
    #[error("Invalid path: {0}")]
    InvalidPath(#[from] ValidationError),

    /// Node does not exist
    #[error("Node not found: {path}")]
    NodeNotFound { path: String },

    /// Node already exists
    #[error("Node already exists: {path}")]
    NodeExists { path: String },

    /// Reading from the repository failed
    #[error("Read failed at {path}: {reason}")]
    ReadFailed { path: String, reason: String },

    /// Persisting staged changes failed
    #[error("Commit failed: {context}")]
    CommitFailed { context: String },

    /// Internal lock was poisoned by a panicking writer
    #[error("Repository state is poisoned")]
    Poisoned,

    /// Backing file could not be read or written
    #[error("Repository file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Content could not be parsed or serialized
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl RepositoryError {
    /// Create a login failed error
    pub fn login_failed(subservice: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::LoginFailed {
            subservice: subservice.into(),
            reason: reason.into(),
        }
    }

    /// Create a node not found error
    pub fn node_not_found(path: impl Into<String>) -> Self {
        Self::NodeNotFound { path: path.into() }
    }

    /// Create a node exists error
    pub fn node_exists(path: impl Into<String>) -> Self {
        Self::NodeExists { path: path.into() }
    }

    /// Create a read failed error
    pub fn read_failed(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ReadFailed {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a commit failed error
    pub fn commit_failed(context: impl Into<String>) -> Self {
        Self::CommitFailed {
            context: context.into(),
        }
    }

    /// Create a file I/O error
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create a serialization error
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }
}
