//! Repository Session Traits - Storage Abstraction Layer
//!
//! This module defines the `RepositorySession` trait used by the services to
//! read the content tree and write attributes back, and the `SessionFactory`
//! trait that hands out sessions for technical service users.
//!
//! # Design Decisions
//!
//! 1. **Async-First**: Every call is async so file-backed and remote backends fit
//!    behind the same trait
//! 2. **Staged Writes**: `apply` stages attribute changes; nothing is persisted
//!    until `commit`. `revert` discards everything staged since the last commit
//! 3. **Scoped Release**: A session is an owned value. Dropping it releases it,
//!    so a session opened at the top of a run is released on every exit path
//! 4. **Error Handling**: Uses `RepositoryError`, all calls are fallible
//!
//! # Examples
//!
//! ```rust,no_run
//! use complexity_analyzer_core::db::{MemoryRepository, SessionFactory};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let repository = MemoryRepository::new();
//! let session = repository.service_session("nodecount-updater").await?;
//!
//! if let Some(root) = session.get_node("/content/site").await? {
//!     for child in session.list_children(&root).await? {
//!         println!("{} ({})", child.path, child.resource_type);
//!     }
//! }
//! # Ok(())
//! # }
//! ```

use super::error::RepositoryError;
use crate::models::{ModifiableAttributes, Node};
use async_trait::async_trait;
use serde_json::Value;

/// Result alias for repository calls
pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// A credentialed view of the content repository
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync` so sessions can be held across await
/// points inside spawned tasks.
#[async_trait]
pub trait RepositorySession: Send + Sync {
    /// Identity this session was opened for
    fn user_id(&self) -> &str;

    /// Get node by path
    ///
    /// - `Ok(Some(node))` if the node exists
    /// - `Ok(None)` if it doesn't (not an error)
    async fn get_node(&self, path: &str) -> RepositoryResult<Option<Node>>;

    /// Direct children of a node in the repository's native order
    async fn list_children(&self, node: &Node) -> RepositoryResult<Vec<Node>>;

    /// Named direct child of a node
    async fn get_child(&self, node: &Node, name: &str) -> RepositoryResult<Option<Node>>;

    /// Read a single attribute as stored
    async fn get_attribute(&self, node: &Node, name: &str) -> RepositoryResult<Option<Value>>;

    /// Writable view of a node's attributes
    ///
    /// Returns `Ok(None)` when the node cannot be adapted for writing
    /// (protected, or removed since the snapshot was taken).
    async fn modifiable_attributes(
        &self,
        node: &Node,
    ) -> RepositoryResult<Option<ModifiableAttributes>>;

    /// Stage the changes held by a writable view
    async fn apply(&mut self, attributes: ModifiableAttributes) -> RepositoryResult<()>;

    /// Persist everything staged since the last commit
    async fn commit(&mut self) -> RepositoryResult<()>;

    /// Discard everything staged since the last commit
    async fn revert(&mut self);

    /// Whether staged changes are waiting for `commit`
    fn has_changes(&self) -> bool;
}

/// Opens sessions for technical service users
#[async_trait]
pub trait SessionFactory: Send + Sync {
    /// Open a session for the given sub-service mapping
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::LoginFailed` if no identity is mapped to the
    /// sub-service or the repository refuses the login.
    async fn service_session(
        &self,
        subservice: &str,
    ) -> RepositoryResult<Box<dyn RepositorySession>>;
}
