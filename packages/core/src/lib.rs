//! Complexity Analyzer Core
//!
//! This crate recomputes a structural metric for every page of a hierarchical
//! content repository on a schedule, and exposes stored page metrics to the
//! listing view.
//!
//! # Architecture
//!
//! - **Page boundaries**: A node typed `cq:Page` starts a page; its `jcr:content`
//!   child holds the page's authored structure
//! - **Scoped counts**: A page's `nodeCount` counts its content nodes, excluding
//!   nested pages and everything below them
//! - **Per-page commits**: Each page write is committed on its own, so one failed
//!   write never affects another page
//! - **Non-concurrent runs**: The job is registered with the scheduler as a single
//!   named, non-concurrent task
//!
//! # Modules
//!
//! - [`models`] - Node snapshots, writable attribute views, type markers
//! - [`db`] - Repository session traits and the in-memory repository
//! - [`services`] - Traversal, scheduled job, scheduler and info providers
//! - [`config`] - Job configuration

pub mod config;
pub mod db;
pub mod models;
pub mod services;

// Re-export commonly used types
pub use config::PageNodeCountConfig;
pub use db::{MemoryRepository, RepositoryError, RepositorySession, SessionFactory};
pub use models::*;
pub use services::*;
