//! In-Memory Content Repository
//!
//! `MemoryRepository` keeps an ordered content tree in memory and hands out
//! `MemorySession`s through the `SessionFactory` trait. It backs the dev
//! runner (optionally persisted to a JSON file) and the test suites.
//!
//! # JSON Tree Format
//!
//! Content is imported and exported as nested JSON objects in the same shape a
//! JCR content export uses:
//!
//! ```json
//! {
//!   "jcr:primaryType": "cq:Page",
//!   "jcr:content": {
//!     "jcr:primaryType": "cq:PageContent",
//!     "title": "Home"
//!   }
//! }
//! ```
//!
//! Object-valued keys are child nodes, kept in document order. Every other key
//! is an attribute.
//!
//! # Sessions
//!
//! Sessions see committed content plus their own staged changes. `commit`
//! validates all staged paths before touching the tree, so a rejected commit
//! leaves the repository unchanged. The repository counts open sessions so
//! callers can observe that every session was released.

use super::error::RepositoryError;
use super::session::{RepositoryResult, RepositorySession, SessionFactory};
use crate::models::{
    child_path, parent_of, validate_name, validate_path, ModifiableAttributes, Node,
};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

const ROOT_PATH: &str = "/";
const ROOT_PRIMARY_TYPE: &str = "rep:root";

#[derive(Debug, Clone, Default)]
struct StoredNode {
    properties: Map<String, Value>,
    children: Vec<String>,
}

/// Injected failures, keyed by node path
#[derive(Debug, Default)]
struct Faults {
    logins_denied: bool,
    protected: HashSet<String>,
    failing_commits: HashSet<String>,
    failing_listings: HashSet<String>,
}

#[derive(Debug, Default)]
struct RepositoryState {
    nodes: HashMap<String, StoredNode>,
    faults: Faults,
}

#[derive(Debug)]
struct Shared {
    state: RwLock<RepositoryState>,
    open_sessions: AtomicUsize,
    commits: AtomicUsize,
    backing_file: Option<PathBuf>,
    /// Serializes commits so the file and the tree are updated in the same order
    commit_lock: tokio::sync::Mutex<()>,
}

/// Ordered content tree held in memory
///
/// Cloning is cheap and every clone shares the same tree.
#[derive(Debug, Clone)]
pub struct MemoryRepository {
    shared: Arc<Shared>,
}

impl Default for MemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRepository {
    /// Create a repository containing only the root node
    pub fn new() -> Self {
        let mut root = StoredNode::default();
        root.properties.insert(
            crate::models::PRIMARY_TYPE_PROPERTY.to_string(),
            Value::String(ROOT_PRIMARY_TYPE.to_string()),
        );

        let mut nodes = HashMap::new();
        nodes.insert(ROOT_PATH.to_string(), root);

        Self::from_state(
            RepositoryState {
                nodes,
                faults: Faults::default(),
            },
            None,
        )
    }

    fn from_state(state: RepositoryState, backing_file: Option<PathBuf>) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: RwLock::new(state),
                open_sessions: AtomicUsize::new(0),
                commits: AtomicUsize::new(0),
                backing_file,
                commit_lock: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// Build a repository from a JSON tree rooted at `/`
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Serialization` if the root is not an object or
    /// a child name is not a valid node name.
    pub fn from_json(tree: &Value) -> RepositoryResult<Self> {
        let object = tree
            .as_object()
            .ok_or_else(|| RepositoryError::serialization("content root must be a JSON object"))?;

        let mut nodes = HashMap::new();
        import_object(ROOT_PATH, object, &mut nodes)?;

        let root = nodes
            .entry(ROOT_PATH.to_string())
            .or_insert_with(StoredNode::default);
        root.properties
            .entry(crate::models::PRIMARY_TYPE_PROPERTY.to_string())
            .or_insert_with(|| Value::String(ROOT_PRIMARY_TYPE.to_string()));

        Ok(Self::from_state(
            RepositoryState {
                nodes,
                faults: Faults::default(),
            },
            None,
        ))
    }

    /// Load a repository from a JSON file and persist every commit back to it
    pub async fn open_json_file(path: impl AsRef<Path>) -> RepositoryResult<Self> {
        let path = path.as_ref().to_path_buf();
        let text = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| RepositoryError::io(&path, e))?;
        let tree: Value = serde_json::from_str(&text)
            .map_err(|e| RepositoryError::serialization(format!("{}: {}", path.display(), e)))?;

        let loaded = Self::from_json(&tree)?;
        let state = {
            let mut guard = loaded.write_state()?;
            std::mem::take(&mut *guard)
        };

        tracing::info!(
            "Loaded content repository from {} ({} nodes)",
            path.display(),
            state.nodes.len()
        );

        Ok(Self::from_state(state, Some(path)))
    }

    /// Export the committed tree as JSON
    pub fn to_json(&self) -> RepositoryResult<Value> {
        let state = self.read_state()?;
        Ok(export_object(ROOT_PATH, &state.nodes))
    }

    /// Add a node under an existing parent
    ///
    /// `properties` must be a JSON object (use `json!({})` for none); nested
    /// objects inside it are imported as children.
    pub fn add_node(&self, path: &str, properties: Value) -> RepositoryResult<()> {
        validate_path(path)?;
        let object = properties
            .as_object()
            .ok_or_else(|| RepositoryError::serialization("node properties must be an object"))?;
        let parent = parent_of(path).ok_or_else(|| RepositoryError::node_exists(path))?;

        // Nested names are validated here, before the tree is touched
        let mut imported = HashMap::new();
        import_object(path, object, &mut imported)?;

        let mut state = self.write_state()?;
        if state.nodes.contains_key(path) {
            return Err(RepositoryError::node_exists(path));
        }
        let name = crate::models::name_of(path).to_string();
        let parent_node = state
            .nodes
            .get_mut(parent)
            .ok_or_else(|| RepositoryError::node_not_found(parent))?;
        parent_node.children.push(name);
        state.nodes.extend(imported);
        Ok(())
    }

    /// Remove a node and its subtree
    pub fn remove_node(&self, path: &str) -> RepositoryResult<()> {
        let parent = parent_of(path).ok_or_else(|| RepositoryError::node_not_found(path))?;
        let mut state = self.write_state()?;
        if !state.nodes.contains_key(path) {
            return Err(RepositoryError::node_not_found(path));
        }

        let name = crate::models::name_of(path);
        if let Some(parent_node) = state.nodes.get_mut(parent) {
            parent_node.children.retain(|child| child != name);
        }

        let prefix = format!("{}/", path);
        state
            .nodes
            .retain(|candidate, _| candidate != path && !candidate.starts_with(&prefix));
        Ok(())
    }

    /// Committed value of an attribute
    pub fn property(&self, path: &str, name: &str) -> Option<Value> {
        let state = self.read_state().ok()?;
        state.nodes.get(path)?.properties.get(name).cloned()
    }

    /// Set a committed attribute directly, bypassing sessions
    pub fn set_property(&self, path: &str, name: &str, value: Value) -> RepositoryResult<()> {
        let mut state = self.write_state()?;
        let node = state
            .nodes
            .get_mut(path)
            .ok_or_else(|| RepositoryError::node_not_found(path))?;
        node.properties.insert(name.to_string(), value);
        Ok(())
    }

    /// Refuse every subsequent login
    pub fn deny_logins(&self, denied: bool) -> RepositoryResult<()> {
        self.write_state()?.faults.logins_denied = denied;
        Ok(())
    }

    /// Make a node's attributes non-modifiable
    pub fn protect(&self, path: &str) -> RepositoryResult<()> {
        self.write_state()?.faults.protected.insert(path.to_string());
        Ok(())
    }

    /// Reject any commit that contains changes for `path`
    pub fn fail_commits_at(&self, path: &str) -> RepositoryResult<()> {
        self.write_state()?
            .faults
            .failing_commits
            .insert(path.to_string());
        Ok(())
    }

    /// Fail child enumeration of `path`
    pub fn fail_listing_at(&self, path: &str) -> RepositoryResult<()> {
        self.write_state()?
            .faults
            .failing_listings
            .insert(path.to_string());
        Ok(())
    }

    /// Number of sessions currently open
    pub fn open_sessions(&self) -> usize {
        self.shared.open_sessions.load(Ordering::SeqCst)
    }

    /// Number of successful commits that carried changes
    pub fn commit_count(&self) -> usize {
        self.shared.commits.load(Ordering::SeqCst)
    }

    /// Open a session without going through the service user mapping
    pub fn login(&self, user_id: impl Into<String>) -> MemorySession {
        self.shared.open_sessions.fetch_add(1, Ordering::SeqCst);
        MemorySession {
            shared: self.shared.clone(),
            user_id: user_id.into(),
            pending: BTreeMap::new(),
        }
    }

    fn read_state(&self) -> RepositoryResult<RwLockReadGuard<'_, RepositoryState>> {
        self.shared
            .state
            .read()
            .map_err(|_| RepositoryError::Poisoned)
    }

    fn write_state(&self) -> RepositoryResult<RwLockWriteGuard<'_, RepositoryState>> {
        self.shared
            .state
            .write()
            .map_err(|_| RepositoryError::Poisoned)
    }
}

#[async_trait]
impl SessionFactory for MemoryRepository {
    async fn service_session(
        &self,
        subservice: &str,
    ) -> RepositoryResult<Box<dyn RepositorySession>> {
        if self.read_state()?.faults.logins_denied {
            return Err(RepositoryError::login_failed(
                subservice,
                "no service user mapped",
            ));
        }
        tracing::debug!("Opening repository session for service user '{}'", subservice);
        Ok(Box::new(self.login(subservice)))
    }
}

/// Session over a `MemoryRepository`
///
/// Staged changes are private to the session until committed. Dropping the
/// session discards anything still staged.
#[derive(Debug)]
pub struct MemorySession {
    shared: Arc<Shared>,
    user_id: String,
    pending: BTreeMap<String, Map<String, Value>>,
}

impl MemorySession {
    fn read_state(&self) -> RepositoryResult<RwLockReadGuard<'_, RepositoryState>> {
        self.shared
            .state
            .read()
            .map_err(|_| RepositoryError::Poisoned)
    }

    fn snapshot(&self, path: &str, stored: &StoredNode) -> Node {
        let mut properties = stored.properties.clone();
        if let Some(changes) = self.pending.get(path) {
            for (name, value) in changes {
                properties.insert(name.clone(), value.clone());
            }
        }
        Node::new(path, properties)
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        if !self.pending.is_empty() {
            tracing::debug!(
                "Session '{}' released with {} uncommitted node(s)",
                self.user_id,
                self.pending.len()
            );
        }
        self.shared.open_sessions.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl RepositorySession for MemorySession {
    fn user_id(&self) -> &str {
        &self.user_id
    }

    async fn get_node(&self, path: &str) -> RepositoryResult<Option<Node>> {
        validate_path(path)?;
        let state = self.read_state()?;
        Ok(state
            .nodes
            .get(path)
            .map(|stored| self.snapshot(path, stored)))
    }

    async fn list_children(&self, node: &Node) -> RepositoryResult<Vec<Node>> {
        let state = self.read_state()?;
        if state.faults.failing_listings.contains(&node.path) {
            return Err(RepositoryError::read_failed(
                &node.path,
                "child enumeration failed",
            ));
        }

        let stored = state
            .nodes
            .get(&node.path)
            .ok_or_else(|| RepositoryError::node_not_found(&node.path))?;

        Ok(stored
            .children
            .iter()
            .filter_map(|name| {
                let path = child_path(&node.path, name);
                state
                    .nodes
                    .get(&path)
                    .map(|child| self.snapshot(&path, child))
            })
            .collect())
    }

    async fn get_child(&self, node: &Node, name: &str) -> RepositoryResult<Option<Node>> {
        validate_name(name)?;
        self.get_node(&node.child_path(name)).await
    }

    async fn get_attribute(&self, node: &Node, name: &str) -> RepositoryResult<Option<Value>> {
        if let Some(value) = self.pending.get(&node.path).and_then(|c| c.get(name)) {
            return Ok(Some(value.clone()));
        }
        let state = self.read_state()?;
        let stored = state
            .nodes
            .get(&node.path)
            .ok_or_else(|| RepositoryError::node_not_found(&node.path))?;
        Ok(stored.properties.get(name).cloned())
    }

    async fn modifiable_attributes(
        &self,
        node: &Node,
    ) -> RepositoryResult<Option<ModifiableAttributes>> {
        let state = self.read_state()?;
        if state.faults.protected.contains(&node.path) {
            return Ok(None);
        }
        Ok(state.nodes.get(&node.path).map(|stored| {
            let snapshot = self.snapshot(&node.path, stored);
            ModifiableAttributes::new(snapshot.path, snapshot.properties)
        }))
    }

    async fn apply(&mut self, attributes: ModifiableAttributes) -> RepositoryResult<()> {
        let (path, changes) = attributes.into_changes();
        if changes.is_empty() {
            return Ok(());
        }
        self.pending.entry(path).or_default().extend(changes);
        Ok(())
    }

    async fn commit(&mut self) -> RepositoryResult<()> {
        if self.pending.is_empty() {
            return Ok(());
        }

        let shared = self.shared.clone();
        let _commit = shared.commit_lock.lock().await;

        // Validate, and build the file image, without touching the tree
        let snapshot = {
            let state = self.read_state()?;

            for path in self.pending.keys() {
                if state.faults.failing_commits.contains(path) {
                    return Err(RepositoryError::commit_failed(format!(
                        "write rejected for {}",
                        path
                    )));
                }
                if !state.nodes.contains_key(path) {
                    return Err(RepositoryError::commit_failed(format!(
                        "node removed before commit: {}",
                        path
                    )));
                }
            }

            shared.backing_file.as_ref().map(|_| {
                let mut nodes = state.nodes.clone();
                merge_pending(&mut nodes, &self.pending);
                export_object(ROOT_PATH, &nodes)
            })
        };

        if let (Some(file), Some(tree)) = (shared.backing_file.as_ref(), snapshot) {
            let text = serde_json::to_string_pretty(&tree)
                .map_err(|e| RepositoryError::serialization(e.to_string()))?;
            tokio::fs::write(file, text)
                .await
                .map_err(|e| RepositoryError::io(file, e))?;
        }

        {
            let mut state = shared
                .state
                .write()
                .map_err(|_| RepositoryError::Poisoned)?;
            let pending = std::mem::take(&mut self.pending);
            merge_pending(&mut state.nodes, &pending);
        }

        shared.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn revert(&mut self) {
        self.pending.clear();
    }

    fn has_changes(&self) -> bool {
        !self.pending.is_empty()
    }
}

fn merge_pending(
    nodes: &mut HashMap<String, StoredNode>,
    pending: &BTreeMap<String, Map<String, Value>>,
) {
    for (path, changes) in pending {
        if let Some(stored) = nodes.get_mut(path) {
            stored
                .properties
                .extend(changes.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
    }
}

fn import_object(
    path: &str,
    object: &Map<String, Value>,
    nodes: &mut HashMap<String, StoredNode>,
) -> RepositoryResult<()> {
    let mut stored = StoredNode::default();

    for (key, value) in object {
        match value {
            Value::Object(child) => {
                validate_name(key)
                    .map_err(|e| RepositoryError::serialization(format!("{}: {}", path, e)))?;
                stored.children.push(key.clone());
                import_object(&child_path(path, key), child, nodes)?;
            }
            other => {
                stored.properties.insert(key.clone(), other.clone());
            }
        }
    }

    nodes.insert(path.to_string(), stored);
    Ok(())
}

fn export_object(path: &str, nodes: &HashMap<String, StoredNode>) -> Value {
    let mut object = Map::new();
    if let Some(stored) = nodes.get(path) {
        object.extend(stored.properties.clone());
        for name in &stored.children {
            let child = child_path(path, name);
            if nodes.contains_key(&child) {
                object.insert(name.clone(), export_object(&child, nodes));
            }
        }
    }
    Value::Object(object)
}

#[cfg(test)]
#[path = "memory_store_test.rs"]
mod memory_store_test;
