//! Data Models
//!
//! This module contains the data structures shared by the repository layer and
//! the services:
//!
//! - `Node` - Snapshot of one location in the content tree
//! - `ModifiableAttributes` - Writable view of a node's attributes
//! - Type markers and attribute names used to recognise pages

mod node;

pub use node::{
    child_path, name_of, parent_of, validate_name, validate_path, value_to_string,
    ModifiableAttributes, Node, ValidationError, COMPLEXITY_PROPERTY, CONTENT_ROOT,
    DEFAULT_PRIMARY_TYPE, NODE_COUNT_PROPERTY, PAGE_TYPE, PRIMARY_TYPE_PROPERTY,
    RESOURCE_TYPE_PROPERTY,
};
