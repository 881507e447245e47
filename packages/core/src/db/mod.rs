//! Repository Layer
//!
//! This module holds the storage abstraction the services are written against
//! and the in-memory implementation shipped with the crate:
//!
//! - `RepositorySession` - Read nodes, enumerate children, stage and commit attribute writes
//! - `SessionFactory` - Open sessions for technical service users
//! - `MemoryRepository` - Ordered in-memory tree, optionally persisted to a JSON file
//!
//! Services never hold a session longer than one unit of work; sessions are
//! released when dropped.

mod error;
mod memory_store;
mod session;

pub use error::RepositoryError;
pub use memory_store::{MemoryRepository, MemorySession};
pub use session::{RepositoryResult, RepositorySession, SessionFactory};
