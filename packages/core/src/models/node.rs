//! Content Node Data Structures
//!
//! This module defines the `Node` struct that represents one location in the
//! content tree, plus `ModifiableAttributes`, the writable view of a node's
//! attribute map handed out by a repository session.
//!
//! # Architecture
//!
//! - **Path-addressed**: Every node is identified by its absolute, slash-delimited path
//! - **Typed attributes**: Attribute values are JSON values (string, number, bool, array)
//! - **Read-only snapshots**: A `Node` is a snapshot; writes go through `ModifiableAttributes`
//!
//! # Examples
//!
//! ```rust
//! use complexity_analyzer_core::models::{Node, PAGE_TYPE};
//! use serde_json::json;
//!
//! let mut properties = serde_json::Map::new();
//! properties.insert("jcr:primaryType".to_string(), json!("cq:Page"));
//!
//! let page = Node::new("/content/site/en", properties);
//! assert_eq!(page.name, "en");
//! assert!(page.is_page());
//! assert_eq!(page.resource_type, PAGE_TYPE);
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Type tag marking a page boundary
pub const PAGE_TYPE: &str = "cq:Page";

/// Fixed name of the child that holds a page's authored content
pub const CONTENT_ROOT: &str = "jcr:content";

/// Attribute holding a node's primary type
pub const PRIMARY_TYPE_PROPERTY: &str = "jcr:primaryType";

/// Attribute holding an explicit resource type
pub const RESOURCE_TYPE_PROPERTY: &str = "sling:resourceType";

/// Attribute written on content roots with the scoped descendant count
pub const NODE_COUNT_PROPERTY: &str = "nodeCount";

/// Attribute maintained on content roots by an external writer
pub const COMPLEXITY_PROPERTY: &str = "complexity";

/// Primary type assumed for nodes that do not declare one
pub const DEFAULT_PRIMARY_TYPE: &str = "nt:unstructured";

/// Validation errors for node paths
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Path must be absolute: {0}")]
    RelativePath(String),

    #[error("Path contains an empty segment: {0}")]
    EmptySegment(String),

    #[error("Invalid node name: {0}")]
    InvalidName(String),
}

/// A location in the content tree.
///
/// # Fields
///
/// - `path`: Absolute path, unique across the repository (e.g. `/content/site/en`)
/// - `name`: Last path segment (empty for the repository root `/`)
/// - `resource_type`: `sling:resourceType` when set, otherwise the primary type
/// - `properties`: Attribute name to typed value, in insertion order
///
/// Children are not stored on the node; they are enumerated through a
/// repository session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub path: String,
    pub name: String,
    pub resource_type: String,
    #[serde(default)]
    pub properties: Map<String, Value>,
}

impl Node {
    /// Create a node snapshot from its path and attributes
    ///
    /// The resource type is derived from the attributes the same way the
    /// repository does it: an explicit `sling:resourceType` wins, then the
    /// primary type, then `nt:unstructured`.
    pub fn new(path: impl Into<String>, properties: Map<String, Value>) -> Self {
        let path = path.into();
        let name = name_of(&path).to_string();
        let resource_type = properties
            .get(RESOURCE_TYPE_PROPERTY)
            .and_then(Value::as_str)
            .or_else(|| properties.get(PRIMARY_TYPE_PROPERTY).and_then(Value::as_str))
            .unwrap_or(DEFAULT_PRIMARY_TYPE)
            .to_string();

        Self {
            path,
            name,
            resource_type,
            properties,
        }
    }

    /// The `jcr:primaryType` attribute, if it is a string
    pub fn primary_type(&self) -> Option<&str> {
        self.properties
            .get(PRIMARY_TYPE_PROPERTY)
            .and_then(Value::as_str)
    }

    /// Whether this node starts a page boundary
    ///
    /// Either the resource type or the primary type may carry the marker.
    pub fn is_page(&self) -> bool {
        self.resource_type == PAGE_TYPE || self.primary_type() == Some(PAGE_TYPE)
    }

    /// Read an attribute as a string, converting scalars
    pub fn get_str(&self, name: &str) -> Option<String> {
        self.properties.get(name).map(value_to_string)
    }

    /// Path of the named child of this node
    pub fn child_path(&self, name: &str) -> String {
        child_path(&self.path, name)
    }
}

/// Writable view of a node's attributes.
///
/// Obtained from `RepositorySession::modifiable_attributes`. Changes are held
/// here until the view is applied to the session, and reach the repository
/// only when the session commits.
#[derive(Debug, Clone, PartialEq)]
pub struct ModifiableAttributes {
    path: String,
    values: Map<String, Value>,
    changes: Map<String, Value>,
}

impl ModifiableAttributes {
    pub fn new(path: impl Into<String>, values: Map<String, Value>) -> Self {
        Self {
            path: path.into(),
            values,
            changes: Map::new(),
        }
    }

    /// Path of the node these attributes belong to
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Current value of an attribute, including uncommitted puts
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.changes.get(name).or_else(|| self.values.get(name))
    }

    /// Current value of an attribute as a string
    pub fn get_str(&self, name: &str) -> Option<String> {
        self.get(name).map(value_to_string)
    }

    /// Set an attribute, returning the value it replaces
    pub fn put(&mut self, name: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        let name = name.into();
        let previous = self.get(&name).cloned();
        self.changes.insert(name, value.into());
        previous
    }

    /// Attributes changed through `put`
    pub fn changes(&self) -> &Map<String, Value> {
        &self.changes
    }

    pub fn into_changes(self) -> (String, Map<String, Value>) {
        (self.path, self.changes)
    }
}

/// Coerce an attribute value to its string form
///
/// Strings are returned verbatim; other values use their JSON text.
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Validate an absolute repository path
pub fn validate_path(path: &str) -> Result<(), ValidationError> {
    if !path.starts_with('/') {
        return Err(ValidationError::RelativePath(path.to_string()));
    }
    if path == "/" {
        return Ok(());
    }
    if path[1..].split('/').any(str::is_empty) {
        return Err(ValidationError::EmptySegment(path.to_string()));
    }
    Ok(())
}

/// Validate a single node name
pub fn validate_name(name: &str) -> Result<(), ValidationError> {
    if name.is_empty() || name.contains('/') {
        return Err(ValidationError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// Last segment of a path
pub fn name_of(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or_default()
}

/// Parent path, or `None` for the repository root
pub fn parent_of(path: &str) -> Option<&str> {
    if path == "/" {
        return None;
    }
    match path.rfind('/') {
        Some(0) => Some("/"),
        Some(idx) => Some(&path[..idx]),
        None => None,
    }
}

/// Join a parent path and a child name
pub fn child_path(parent: &str, name: &str) -> String {
    if parent == "/" {
        format!("/{}", name)
    } else {
        format!("{}/{}", parent, name)
    }
}
