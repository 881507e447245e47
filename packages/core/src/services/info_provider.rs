//! Page Info Providers
//!
//! Read-side projection of attributes stored on a page's content root, used by
//! the listing view. One `InfoProvider` is configured per exported attribute:
//!
//! - `InfoProvider::node_count()` - `{"nodecount": {"nodeCount": "<n>"}}`
//! - `InfoProvider::complexity()` - `{"complexity": {"complexity": "<s>"}}`
//!
//! An empty inner object means the value has not been computed yet. Lookups
//! never fail; repository errors degrade to the empty object.

use crate::db::{RepositoryError, RepositorySession};
use crate::models::{
    value_to_string, Node, COMPLEXITY_PROPERTY, CONTENT_ROOT, NODE_COUNT_PROPERTY,
};
use serde_json::{Map, Value};

/// Provider key of the node count instance
pub const NODE_COUNT_PROVIDER: &str = "nodecount";

/// Provider key of the complexity instance
pub const COMPLEXITY_PROVIDER: &str = "complexity";

const PROVIDER_TYPE_PREFIX: &str = "sites.listView.info.provider.";

/// Exports one content-root attribute under a provider key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InfoProvider {
    provider_key: String,
    attribute: String,
}

impl InfoProvider {
    pub fn new(provider_key: impl Into<String>, attribute: impl Into<String>) -> Self {
        Self {
            provider_key: provider_key.into(),
            attribute: attribute.into(),
        }
    }

    /// Provider exporting `nodeCount` under `nodecount`
    pub fn node_count() -> Self {
        Self::new(NODE_COUNT_PROVIDER, NODE_COUNT_PROPERTY)
    }

    /// Provider exporting `complexity` under `complexity`
    pub fn complexity() -> Self {
        Self::new(COMPLEXITY_PROVIDER, COMPLEXITY_PROPERTY)
    }

    pub fn provider_key(&self) -> &str {
        &self.provider_key
    }

    pub fn attribute(&self) -> &str {
        &self.attribute
    }

    /// Type the listing view registers this provider under
    pub fn registration_type(&self) -> String {
        format!("{}{}", PROVIDER_TYPE_PREFIX, self.provider_key)
    }

    /// Build the provider's payload for a resource
    pub async fn lookup(&self, session: &dyn RepositorySession, resource: Option<&Node>) -> Value {
        let mut info = Map::new();
        self.update_page_info(session, resource, &mut info).await;
        Value::Object(info)
    }

    /// Add this provider's entry to an existing info object
    ///
    /// The provider key is always set, to an empty object when the page,
    /// its content root or the attribute is missing.
    pub async fn update_page_info(
        &self,
        session: &dyn RepositorySession,
        resource: Option<&Node>,
        info: &mut Map<String, Value>,
    ) {
        let mut entry = Map::new();

        match resource {
            None => tracing::warn!(
                "{}: page info requested for a missing resource",
                self.provider_key
            ),
            Some(resource) if !resource.is_page() => tracing::warn!(
                "{}: resource could not be adapted to a page: {}",
                self.provider_key,
                resource.path
            ),
            Some(page) => match self.read_attribute(session, page).await {
                Ok(Some(value)) => {
                    tracing::debug!(
                        "{}: {}='{}' for page {}",
                        self.provider_key,
                        self.attribute,
                        value,
                        page.path
                    );
                    entry.insert(self.attribute.clone(), Value::String(value));
                }
                Ok(None) => {}
                Err(e) => tracing::warn!(
                    "{}: failed to read {} for page {}: {}",
                    self.provider_key,
                    self.attribute,
                    page.path,
                    e
                ),
            },
        }

        info.insert(self.provider_key.clone(), Value::Object(entry));
    }

    async fn read_attribute(
        &self,
        session: &dyn RepositorySession,
        page: &Node,
    ) -> Result<Option<String>, RepositoryError> {
        let Some(content) = session.get_child(page, CONTENT_ROOT).await? else {
            tracing::debug!(
                "{}: {} not found for page {}",
                self.provider_key,
                CONTENT_ROOT,
                page.path
            );
            return Ok(None);
        };

        let value = session.get_attribute(&content, &self.attribute).await?;
        if value.is_none() {
            tracing::debug!(
                "{}: {} is not set for page {}",
                self.provider_key,
                self.attribute,
                page.path
            );
        }
        Ok(value.as_ref().map(value_to_string))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryRepository;
    use serde_json::json;

    fn repository() -> MemoryRepository {
        MemoryRepository::from_json(&json!({
            "content": {
                "counted": {
                    "jcr:primaryType": "cq:Page",
                    "jcr:content": {
                        "nodeCount": "12",
                        "complexity": 3
                    }
                },
                "fresh": {
                    "jcr:primaryType": "cq:Page",
                    "jcr:content": {}
                },
                "bare": { "jcr:primaryType": "cq:Page" },
                "folder": { "jcr:primaryType": "sling:Folder" }
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_instances() {
        assert_eq!(InfoProvider::node_count().provider_key(), "nodecount");
        assert_eq!(InfoProvider::node_count().attribute(), "nodeCount");
        assert_eq!(InfoProvider::complexity().provider_key(), "complexity");
        assert_eq!(
            InfoProvider::node_count().registration_type(),
            "sites.listView.info.provider.nodecount"
        );
    }

    #[tokio::test]
    async fn test_lookup_present_value() {
        let repo = repository();
        let session = repo.login("reader");
        let page = session.get_node("/content/counted").await.unwrap();

        let info = InfoProvider::node_count()
            .lookup(&session, page.as_ref())
            .await;
        assert_eq!(info, json!({ "nodecount": { "nodeCount": "12" } }));
    }

    #[tokio::test]
    async fn test_lookup_coerces_to_string() {
        let repo = repository();
        let session = repo.login("reader");
        let page = session.get_node("/content/counted").await.unwrap();

        let info = InfoProvider::complexity()
            .lookup(&session, page.as_ref())
            .await;
        assert_eq!(info, json!({ "complexity": { "complexity": "3" } }));
    }

    #[tokio::test]
    async fn test_lookup_missing_values_are_empty() {
        let repo = repository();
        let session = repo.login("reader");
        let provider = InfoProvider::node_count();

        for path in ["/content/fresh", "/content/bare", "/content/folder"] {
            let node = session.get_node(path).await.unwrap();
            let info = provider.lookup(&session, node.as_ref()).await;
            assert_eq!(info, json!({ "nodecount": {} }), "lookup of {}", path);
        }

        assert_eq!(
            provider.lookup(&session, None).await,
            json!({ "nodecount": {} })
        );
    }

    #[tokio::test]
    async fn test_update_page_info_keeps_other_providers() {
        let repo = repository();
        let session = repo.login("reader");
        let page = session.get_node("/content/counted").await.unwrap();

        let mut info = Map::new();
        info.insert("status".to_string(), json!({ "published": true }));
        InfoProvider::node_count()
            .update_page_info(&session, page.as_ref(), &mut info)
            .await;
        InfoProvider::complexity()
            .update_page_info(&session, page.as_ref(), &mut info)
            .await;

        assert_eq!(
            Value::Object(info),
            json!({
                "status": { "published": true },
                "nodecount": { "nodeCount": "12" },
                "complexity": { "complexity": "3" }
            })
        );
    }

    #[tokio::test]
    async fn test_removed_page_degrades_to_empty() {
        let repo = repository();
        let session = repo.login("reader");
        let page = session.get_node("/content/counted").await.unwrap();
        repo.remove_node("/content/counted").unwrap();

        let info = InfoProvider::node_count()
            .lookup(&session, page.as_ref())
            .await;
        assert_eq!(info, json!({ "nodecount": {} }));
    }
}
