//! Tests for MemoryRepository and MemorySession
//!
//! Tests cover:
//! - JSON import/export and child ordering
//! - Session overlay of staged changes
//! - Commit validation and fault injection
//! - Session release accounting
//! - File-backed persistence

#[cfg(test)]
mod tests {
    use crate::db::{MemoryRepository, RepositoryError, RepositorySession, SessionFactory};
    use serde_json::json;
    use tempfile::TempDir;

    fn sample_repository() -> MemoryRepository {
        MemoryRepository::from_json(&json!({
            "content": {
                "jcr:primaryType": "sling:Folder",
                "site": {
                    "jcr:primaryType": "cq:Page",
                    "jcr:content": {
                        "jcr:primaryType": "cq:PageContent",
                        "title": "Site",
                        "zeta": { "jcr:primaryType": "nt:unstructured" },
                        "alpha": { "jcr:primaryType": "nt:unstructured" }
                    }
                }
            }
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_children_keep_document_order() {
        let repo = sample_repository();
        let session = repo.login("reader");

        let content = session
            .get_node("/content/site/jcr:content")
            .await
            .unwrap()
            .unwrap();
        let names: Vec<String> = session
            .list_children(&content)
            .await
            .unwrap()
            .into_iter()
            .map(|n| n.name)
            .collect();

        assert_eq!(names, vec!["zeta", "alpha"]);
    }

    #[tokio::test]
    async fn test_get_node_missing_is_none() {
        let repo = sample_repository();
        let session = repo.login("reader");
        assert!(session.get_node("/content/other").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_get_node_rejects_relative_path() {
        let repo = sample_repository();
        let session = repo.login("reader");
        let result = session.get_node("content/site").await;
        assert!(matches!(result, Err(RepositoryError::InvalidPath(_))));
    }

    #[tokio::test]
    async fn test_staged_changes_visible_to_session_only() {
        let repo = sample_repository();
        let mut session = repo.login("writer");
        let content = session
            .get_node("/content/site/jcr:content")
            .await
            .unwrap()
            .unwrap();

        let mut attrs = session.modifiable_attributes(&content).await.unwrap().unwrap();
        attrs.put("nodeCount", "2");
        session.apply(attrs).await.unwrap();

        assert!(session.has_changes());
        assert_eq!(
            session.get_attribute(&content, "nodeCount").await.unwrap(),
            Some(json!("2"))
        );
        assert_eq!(repo.property("/content/site/jcr:content", "nodeCount"), None);

        session.commit().await.unwrap();
        assert!(!session.has_changes());
        assert_eq!(
            repo.property("/content/site/jcr:content", "nodeCount"),
            Some(json!("2"))
        );
        assert_eq!(repo.commit_count(), 1);
    }

    #[tokio::test]
    async fn test_revert_discards_staged_changes() {
        let repo = sample_repository();
        let mut session = repo.login("writer");
        let content = session
            .get_node("/content/site/jcr:content")
            .await
            .unwrap()
            .unwrap();

        let mut attrs = session.modifiable_attributes(&content).await.unwrap().unwrap();
        attrs.put("nodeCount", "2");
        session.apply(attrs).await.unwrap();
        session.revert().await;
        session.commit().await.unwrap();

        assert_eq!(repo.property("/content/site/jcr:content", "nodeCount"), None);
        assert_eq!(repo.commit_count(), 0);
    }

    #[tokio::test]
    async fn test_failing_commit_leaves_tree_unchanged() {
        let repo = sample_repository();
        repo.fail_commits_at("/content/site/jcr:content").unwrap();

        let mut session = repo.login("writer");
        let content = session
            .get_node("/content/site/jcr:content")
            .await
            .unwrap()
            .unwrap();
        let mut attrs = session.modifiable_attributes(&content).await.unwrap().unwrap();
        attrs.put("nodeCount", "2");
        session.apply(attrs).await.unwrap();

        let result = session.commit().await;
        assert!(matches!(result, Err(RepositoryError::CommitFailed { .. })));
        assert!(session.has_changes());
        assert_eq!(repo.property("/content/site/jcr:content", "nodeCount"), None);
    }

    #[tokio::test]
    async fn test_commit_fails_when_node_removed() {
        let repo = sample_repository();
        let mut session = repo.login("writer");
        let content = session
            .get_node("/content/site/jcr:content")
            .await
            .unwrap()
            .unwrap();
        let mut attrs = session.modifiable_attributes(&content).await.unwrap().unwrap();
        attrs.put("nodeCount", "2");
        session.apply(attrs).await.unwrap();

        repo.remove_node("/content/site/jcr:content").unwrap();

        assert!(session.commit().await.is_err());
    }

    #[tokio::test]
    async fn test_protected_node_is_not_modifiable() {
        let repo = sample_repository();
        repo.protect("/content/site/jcr:content").unwrap();
        let session = repo.login("writer");
        let content = session
            .get_node("/content/site/jcr:content")
            .await
            .unwrap()
            .unwrap();
        assert!(session
            .modifiable_attributes(&content)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_failing_listing() {
        let repo = sample_repository();
        repo.fail_listing_at("/content").unwrap();
        let session = repo.login("reader");
        let content = session.get_node("/content").await.unwrap().unwrap();
        assert!(matches!(
            session.list_children(&content).await,
            Err(RepositoryError::ReadFailed { .. })
        ));
    }

    #[tokio::test]
    async fn test_sessions_released_on_drop() {
        let repo = sample_repository();
        {
            let first = repo.service_session("nodecount-updater").await.unwrap();
            let second = repo.login("reader");
            assert_eq!(repo.open_sessions(), 2);
            assert_eq!(first.user_id(), "nodecount-updater");
            assert_eq!(second.user_id(), "reader");
        }
        assert_eq!(repo.open_sessions(), 0);
    }

    #[tokio::test]
    async fn test_denied_login() {
        let repo = sample_repository();
        repo.deny_logins(true).unwrap();
        let result = repo.service_session("nodecount-updater").await;
        assert!(matches!(result, Err(RepositoryError::LoginFailed { .. })));
        assert_eq!(repo.open_sessions(), 0);
    }

    #[test]
    fn test_add_and_remove_node() {
        let repo = MemoryRepository::new();
        repo.add_node("/content", json!({ "jcr:primaryType": "sling:Folder" }))
            .unwrap();
        repo.add_node(
            "/content/site",
            json!({ "jcr:primaryType": "cq:Page", "jcr:content": {} }),
        )
        .unwrap();

        assert!(matches!(
            repo.add_node("/content/site", json!({})),
            Err(RepositoryError::NodeExists { .. })
        ));
        assert!(matches!(
            repo.add_node("/missing/child", json!({})),
            Err(RepositoryError::NodeNotFound { .. })
        ));

        repo.remove_node("/content/site").unwrap();
        let exported = repo.to_json().unwrap();
        assert_eq!(
            exported["content"],
            json!({ "jcr:primaryType": "sling:Folder" })
        );
    }

    #[test]
    fn test_from_json_rejects_non_object() {
        assert!(MemoryRepository::from_json(&json!(["not", "a", "tree"])).is_err());
    }

    #[test]
    fn test_export_round_trips_import() {
        let tree = json!({
            "jcr:primaryType": "rep:root",
            "content": {
                "jcr:primaryType": "sling:Folder",
                "site": { "jcr:primaryType": "cq:Page" }
            }
        });
        let repo = MemoryRepository::from_json(&tree).unwrap();
        assert_eq!(repo.to_json().unwrap(), tree);
    }

    #[tokio::test]
    async fn test_file_backed_commit_persists() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("content.json");
        let tree = json!({
            "content": {
                "site": {
                    "jcr:primaryType": "cq:Page",
                    "jcr:content": { "jcr:primaryType": "cq:PageContent" }
                }
            }
        });
        tokio::fs::write(&file, serde_json::to_string(&tree).unwrap())
            .await
            .unwrap();

        let repo = MemoryRepository::open_json_file(&file).await.unwrap();
        let mut session = repo.login("writer");
        let content = session
            .get_node("/content/site/jcr:content")
            .await
            .unwrap()
            .unwrap();
        let mut attrs = session.modifiable_attributes(&content).await.unwrap().unwrap();
        attrs.put("nodeCount", "0");
        session.apply(attrs).await.unwrap();
        session.commit().await.unwrap();

        let reloaded = MemoryRepository::open_json_file(&file).await.unwrap();
        assert_eq!(
            reloaded.property("/content/site/jcr:content", "nodeCount"),
            Some(json!("0"))
        );
    }

    #[tokio::test]
    async fn test_open_missing_file_fails() {
        let temp_dir = TempDir::new().unwrap();
        let result = MemoryRepository::open_json_file(temp_dir.path().join("nope.json")).await;
        assert!(matches!(result, Err(RepositoryError::Io { .. })));
    }

    #[test]
    fn test_add_node_with_invalid_nested_name_leaves_tree_unchanged() {
        let repo = sample_repository();
        let before = repo.to_json().unwrap();

        let result = repo.add_node(
            "/content/other",
            json!({ "ok": { "deeper": {} }, "": { "broken": {} } }),
        );

        assert!(matches!(result, Err(RepositoryError::Serialization(_))));
        assert_eq!(repo.to_json().unwrap(), before);
        assert!(matches!(
            repo.remove_node("/content/other/ok"),
            Err(RepositoryError::NodeNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_failed_file_write_leaves_tree_unchanged() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().join("store");
        tokio::fs::create_dir(&dir).await.unwrap();
        let file = dir.join("content.json");
        tokio::fs::write(
            &file,
            json!({ "content": { "p": { "jcr:content": {} } } }).to_string(),
        )
        .await
        .unwrap();

        let repo = MemoryRepository::open_json_file(&file).await.unwrap();
        tokio::fs::remove_dir_all(&dir).await.unwrap();

        let mut session = repo.login("writer");
        let content = session
            .get_node("/content/p/jcr:content")
            .await
            .unwrap()
            .unwrap();
        let mut attrs = session.modifiable_attributes(&content).await.unwrap().unwrap();
        attrs.put("nodeCount", "1");
        session.apply(attrs).await.unwrap();

        let result = session.commit().await;

        assert!(matches!(result, Err(RepositoryError::Io { .. })));
        assert_eq!(repo.property("/content/p/jcr:content", "nodeCount"), None);
        assert_eq!(repo.commit_count(), 0);
        assert!(session.has_changes());

        session.revert().await;
        assert!(!session.has_changes());
    }
}
