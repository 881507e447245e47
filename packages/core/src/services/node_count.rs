//! Page Node Count Traversal
//!
//! Walks a content tree, finds every page boundary below a root and writes the
//! scoped descendant count of each page's content root to its `nodeCount`
//! attribute.
//!
//! ## Two Traversals
//!
//! - The outer walk (`NodeCountWalker::walk`) visits every node, pages
//!   included, so nested pages get their own count.
//! - The inner count (`count_scoped_descendants`) stops at page boundaries, so
//!   a page's count covers only its own authored content.
//!
//! ## Failure Isolation
//!
//! Each page write is its own unit of work. A content root that cannot be made
//! writable, or a rejected commit, yields a `PageOutcome::Failed` and the walk
//! moves on. Read failures while enumerating the tree stop the walk; the
//! outcomes gathered up to that point stay in the walker's report.

use crate::db::{RepositoryError, RepositorySession};
use crate::models::{
    value_to_string, ModifiableAttributes, Node, CONTENT_ROOT, NODE_COUNT_PROPERTY, PAGE_TYPE,
    PRIMARY_TYPE_PROPERTY,
};
use crate::services::error::NodeCountError;
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;

type WalkFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, NodeCountError>> + Send + 'a>>;

/// Why a page was skipped without a write
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// The page has no `jcr:content` child
    MissingContentRoot,
}

/// Why a page write failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// The content root could not be adapted to writable attributes
    NotModifiable(String),
    /// Staging or committing the write was rejected
    CommitFailed(String),
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotModifiable(reason) => write!(f, "content root not modifiable: {}", reason),
            Self::CommitFailed(reason) => write!(f, "commit failed: {}", reason),
        }
    }
}

/// Result of processing a single page
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageOutcome {
    /// `nodeCount` was written and committed
    Updated {
        page: String,
        count: usize,
        previous: Option<String>,
    },
    /// Nothing was written
    Skipped { page: String, reason: SkipReason },
    /// The write did not reach the repository
    Failed { page: String, reason: FailureReason },
}

impl PageOutcome {
    /// Path of the page this outcome belongs to
    pub fn page(&self) -> &str {
        match self {
            Self::Updated { page, .. } | Self::Skipped { page, .. } | Self::Failed { page, .. } => {
                page
            }
        }
    }

    pub fn is_updated(&self) -> bool {
        matches!(self, Self::Updated { .. })
    }
}

/// Outcomes of one traversal, in visit order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TraversalReport {
    pub outcomes: Vec<PageOutcome>,
}

impl TraversalReport {
    /// Number of pages whose count was committed
    pub fn pages_processed(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_updated()).count()
    }

    /// Number of pages skipped or failed
    pub fn pages_not_updated(&self) -> usize {
        self.outcomes.len() - self.pages_processed()
    }

    /// Committed count for a page, if this run wrote one
    pub fn count_for(&self, page: &str) -> Option<usize> {
        self.outcomes.iter().find_map(|outcome| match outcome {
            PageOutcome::Updated { page: p, count, .. } if p == page => Some(*count),
            _ => None,
        })
    }

    pub fn failures(&self) -> impl Iterator<Item = &PageOutcome> {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, PageOutcome::Failed { .. }))
    }
}

async fn primary_type(
    session: &dyn RepositorySession,
    node: &Node,
) -> Result<Option<String>, NodeCountError> {
    Ok(session
        .get_attribute(node, PRIMARY_TYPE_PROPERTY)
        .await?
        .and_then(|value| value.as_str().map(str::to_string)))
}

/// Count the structural descendants of `node`, stopping at nested pages
///
/// A child whose primary type is `cq:Page` contributes nothing, and neither
/// does anything below it. Every other child counts as one plus its own
/// scoped descendants.
pub fn count_scoped_descendants<'a>(
    session: &'a dyn RepositorySession,
    node: &'a Node,
) -> WalkFuture<'a, usize> {
    Box::pin(async move {
        let mut count = 0;
        for child in session.list_children(node).await? {
            if primary_type(session, &child).await?.as_deref() == Some(PAGE_TYPE) {
                continue;
            }
            count += 1;
            count += count_scoped_descendants(session, &child).await?;
        }
        Ok(count)
    })
}

/// Depth-first walk that writes `nodeCount` on every page below a root
pub struct NodeCountWalker<'s> {
    session: &'s mut dyn RepositorySession,
    report: TraversalReport,
}

impl<'s> NodeCountWalker<'s> {
    pub fn new(session: &'s mut dyn RepositorySession) -> Self {
        Self {
            session,
            report: TraversalReport::default(),
        }
    }

    /// Outcomes recorded so far
    pub fn report(&self) -> &TraversalReport {
        &self.report
    }

    pub fn into_report(self) -> TraversalReport {
        self.report
    }

    /// Visit every node below `node` in pre-order
    ///
    /// Pages are recognised by resource type or primary type. The walk
    /// descends into every child, pages included.
    pub fn walk<'a>(&'a mut self, node: &'a Node) -> WalkFuture<'a, ()> {
        Box::pin(async move {
            let children = self.session.list_children(node).await?;
            for child in children {
                if self.is_page(&child).await? {
                    let outcome = self.process_page(&child).await?;
                    self.report.outcomes.push(outcome);
                }
                self.walk(&child).await?;
            }
            Ok(())
        })
    }

    async fn is_page(&self, node: &Node) -> Result<bool, NodeCountError> {
        if node.resource_type == PAGE_TYPE {
            return Ok(true);
        }
        Ok(primary_type(&*self.session, node).await?.as_deref() == Some(PAGE_TYPE))
    }

    async fn process_page(&mut self, page: &Node) -> Result<PageOutcome, NodeCountError> {
        tracing::debug!("Processing page: {}", page.path);

        let content = match self.session.get_child(page, CONTENT_ROOT).await? {
            Some(content) => content,
            None => {
                tracing::debug!("No {} found for page: {}", CONTENT_ROOT, page.path);
                return Ok(PageOutcome::Skipped {
                    page: page.path.clone(),
                    reason: SkipReason::MissingContentRoot,
                });
            }
        };

        let count = count_scoped_descendants(&*self.session, &content).await?;
        tracing::debug!("Total descendants count for {}: {}", page.path, count);

        let mut attributes = match self.session.modifiable_attributes(&content).await {
            Ok(Some(attributes)) => attributes,
            Ok(None) => {
                tracing::warn!(
                    "Could not adapt {} to modifiable attributes for: {}",
                    CONTENT_ROOT,
                    page.path
                );
                return Ok(PageOutcome::Failed {
                    page: page.path.clone(),
                    reason: FailureReason::NotModifiable("not adaptable".to_string()),
                });
            }
            Err(e) => {
                tracing::warn!(
                    "Could not adapt {} to modifiable attributes for {}: {}",
                    CONTENT_ROOT,
                    page.path,
                    e
                );
                return Ok(PageOutcome::Failed {
                    page: page.path.clone(),
                    reason: FailureReason::NotModifiable(e.to_string()),
                });
            }
        };

        // Always overwrite, even when the stored value already matches
        let previous = attributes
            .put(NODE_COUNT_PROPERTY, Value::String(count.to_string()))
            .map(|value| value_to_string(&value));

        if let Err(e) = self.persist(attributes).await {
            tracing::warn!("Failed to persist nodeCount for page {}: {}", page.path, e);
            self.session.revert().await;
            return Ok(PageOutcome::Failed {
                page: page.path.clone(),
                reason: FailureReason::CommitFailed(e.to_string()),
            });
        }

        match &previous {
            Some(old) => tracing::debug!(
                "Overwritten nodeCount for page: {} (old={}, new={})",
                page.path,
                old,
                count
            ),
            None => tracing::debug!("Set nodeCount={} for page: {}", count, page.path),
        }

        Ok(PageOutcome::Updated {
            page: page.path.clone(),
            count,
            previous,
        })
    }

    async fn persist(&mut self, attributes: ModifiableAttributes) -> Result<(), RepositoryError> {
        self.session.apply(attributes).await?;
        self.session.commit().await
    }
}

/// Walk `root` and write counts for every page below it
///
/// Convenience wrapper around `NodeCountWalker` for callers that do not need
/// the partial report when the walk is interrupted.
pub async fn process_subtree(
    session: &mut dyn RepositorySession,
    root: &Node,
) -> Result<TraversalReport, NodeCountError> {
    let mut walker = NodeCountWalker::new(session);
    walker.walk(root).await?;
    Ok(walker.into_report())
}

#[cfg(test)]
#[path = "node_count_test.rs"]
mod node_count_test;
