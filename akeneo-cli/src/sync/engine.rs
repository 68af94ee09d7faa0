//! Incremental synchronization engine
//!
//! One `sync_since` pass streams the changed-product-models feed and then
//! the changed-products feed, resolves every yielded node to its hierarchy
//! root, and copies each distinct root exactly once. Per-node problems are
//! collected in the report; a failure of the stream machinery itself aborts
//! the run.

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use log::{debug, info};
use tokio_util::sync::CancellationToken;

use super::copier::{HierarchyCopier, NodeError};
use super::dedup::RootSet;
use super::node::{CatalogNode, NodeKind};
use super::repository::{DestinationRepository, SourceRepository};
use super::resolver::RootResolver;
use super::stream::{BatchVisitor, ChangeStreamProcessor};
use crate::api::Payload;

/// Progress of one incremental sync pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    Idle,
    StreamingModels,
    StreamingProducts,
    Done,
}

impl std::fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::StreamingModels => write!(f, "streaming changed product models"),
            Self::StreamingProducts => write!(f, "streaming changed products"),
            Self::Done => write!(f, "done"),
        }
    }
}

/// Aggregate result of a sync run.
#[derive(Debug, Default)]
pub struct SyncReport {
    /// The `updated since` boundary of the run; `None` for single-hierarchy runs.
    pub updated_since: Option<String>,
    pub models_synced: usize,
    pub products_synced: usize,
    pub errors: Vec<NodeError>,
    pub success: bool,
}

impl SyncReport {
    fn since(updated_since: &str) -> Self {
        Self {
            updated_since: Some(updated_since.to_string()),
            ..Self::default()
        }
    }

    pub fn total_synced(&self) -> usize {
        self.models_synced + self.products_synced
    }

    fn finalize(&mut self) {
        self.success = self.errors.is_empty();
    }
}

/// Composes resolver, dedup set, copier, and stream processor into whole
/// sync runs. Collaborators are injected at construction and owned for the
/// engine's lifetime; all per-run state is built fresh inside each call.
pub struct SyncEngine {
    source: Arc<dyn SourceRepository>,
    dest: Arc<dyn DestinationRepository>,
    batch_size: usize,
}

impl SyncEngine {
    pub fn new(
        source: Arc<dyn SourceRepository>,
        dest: Arc<dyn DestinationRepository>,
        batch_size: usize,
    ) -> Self {
        Self {
            source,
            dest,
            batch_size,
        }
    }

    /// Synchronize every hierarchy containing an entity updated after
    /// `updated_since`. Errors local to one node or one hierarchy end up in
    /// the report; a change-stream failure fails the whole run.
    pub async fn sync_since(
        &self,
        updated_since: &str,
        cancel: &CancellationToken,
    ) -> anyhow::Result<SyncReport> {
        debug!("phase: {}", SyncPhase::Idle);
        info!(
            "incremental sync of entities updated since {} (batch size {})",
            updated_since, self.batch_size
        );

        let mut seen = RootSet::new();
        let mut report = SyncReport::since(updated_since);

        {
            let mut visitor = HierarchyVisitor {
                resolver: RootResolver::new(self.source.as_ref()),
                copier: HierarchyCopier::new(self.source.as_ref(), self.dest.as_ref()),
                cancel,
                kind: NodeKind::ProductModel,
                seen: &mut seen,
                report: &mut report,
            };

            info!("phase: {}", SyncPhase::StreamingModels);
            let mut feed = self
                .source
                .changed_product_models(updated_since, self.batch_size);
            ChangeStreamProcessor::process(feed.as_mut(), &mut visitor, cancel)
                .await
                .context("streaming updated product models")?;
            drop(feed);

            info!("phase: {}", SyncPhase::StreamingProducts);
            visitor.kind = NodeKind::Product;
            let mut feed = self.source.changed_products(updated_since, self.batch_size);
            ChangeStreamProcessor::process(feed.as_mut(), &mut visitor, cancel)
                .await
                .context("streaming updated products")?;
        }

        report.finalize();
        info!(
            "phase: {} - {} hierarchies, {} models, {} products, {} errors",
            SyncPhase::Done,
            seen.len(),
            report.models_synced,
            report.products_synced,
            report.errors.len()
        );
        Ok(report)
    }

    /// Copy one named hierarchy, regardless of timestamps.
    pub async fn sync_hierarchy(&self, root_key: &str, cancel: &CancellationToken) -> SyncReport {
        info!("one-shot sync of hierarchy '{}'", root_key);

        let copier = HierarchyCopier::new(self.source.as_ref(), self.dest.as_ref());
        let outcome = copier.copy_hierarchy(root_key, cancel).await;

        let mut report = SyncReport {
            models_synced: outcome.models_synced,
            products_synced: outcome.products_synced,
            errors: outcome.errors,
            ..SyncReport::default()
        };
        report.finalize();
        report
    }
}

/// Per-run visitor: resolves each changed node to its root and copies each
/// fresh root once. Holds the run's dedup set and report by mutable borrow;
/// both streams are driven through the same instance.
struct HierarchyVisitor<'a> {
    resolver: RootResolver<'a>,
    copier: HierarchyCopier<'a>,
    cancel: &'a CancellationToken,
    kind: NodeKind,
    seen: &'a mut RootSet,
    report: &'a mut SyncReport,
}

#[async_trait]
impl BatchVisitor for HierarchyVisitor<'_> {
    async fn visit_batch(&mut self, batch: Vec<Payload>) -> anyhow::Result<()> {
        for payload in batch {
            if self.cancel.is_cancelled() {
                return Ok(());
            }

            let node = match CatalogNode::from_payload(self.kind, payload) {
                Ok(node) => node,
                Err(err) => {
                    self.report
                        .errors
                        .push(NodeError::new("(unknown)", err.to_string()));
                    continue;
                }
            };

            let root = self.resolver.resolve_root(&node).await;
            if !self.seen.should_sync(&root) {
                debug!(
                    "hierarchy '{}' already handled this run (triggered by '{}')",
                    root, node.key
                );
                continue;
            }
            self.seen.mark_synced(root.clone());

            info!(
                "syncing hierarchy '{}' (triggered by {} '{}')",
                root, node.kind, node.key
            );
            let outcome = self.copier.copy_hierarchy(&root, self.cancel).await;
            self.report.models_synced += outcome.models_synced;
            self.report.products_synced += outcome.products_synced;
            self.report.errors.extend(outcome.errors);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::testing::{payload, InMemorySource, RecordingDestination};
    use serde_json::json;

    /// Root model "tee" with sub-model "tee-blue" carrying two variants.
    fn scenario_source() -> InMemorySource {
        let mut source = InMemorySource::new();
        source.add_model(json!({"code": "tee"}));
        source.add_model(json!({"code": "tee-blue", "parent": "tee"}));
        source.add_product(json!({"identifier": "tee-blue-s", "parent": "tee-blue"}));
        source.add_product(json!({"identifier": "tee-blue-m", "parent": "tee-blue"}));
        source
    }

    fn engine(
        source: InMemorySource,
    ) -> (SyncEngine, Arc<RecordingDestination>) {
        let dest = Arc::new(RecordingDestination::new());
        let engine = SyncEngine::new(Arc::new(source), dest.clone(), 100);
        (engine, dest)
    }

    #[tokio::test]
    async fn test_changed_leaf_and_group_trigger_one_hierarchy_copy() {
        let mut source = scenario_source();
        // The model feed yields the sub-model, the product feed one variant;
        // both resolve to the same root
        source.model_pages = vec![vec![payload(
            json!({"code": "tee-blue", "parent": "tee"}),
        )]];
        source.product_pages = vec![vec![payload(
            json!({"identifier": "tee-blue-s", "parent": "tee-blue"}),
        )]];
        let (engine, dest) = engine(source);

        let report = engine
            .sync_since("2024-01-01 00:00:00", &CancellationToken::new())
            .await
            .unwrap();

        assert!(report.success);
        assert_eq!(report.models_synced, 2);
        assert_eq!(report.products_synced, 2);
        assert_eq!(report.total_synced(), 4);
        // Exactly one copy of the tree: the root was written exactly once
        assert_eq!(dest.writes_for("tee"), 1);
    }

    #[tokio::test]
    async fn test_distinct_roots_are_each_copied() {
        let mut source = scenario_source();
        source.add_model(json!({"code": "mug"}));
        source.add_product(json!({"identifier": "mug-gold", "parent": "mug"}));
        source.model_pages = vec![vec![payload(json!({"code": "mug"}))]];
        source.product_pages = vec![vec![payload(
            json!({"identifier": "tee-blue-m", "parent": "tee-blue"}),
        )]];
        let (engine, dest) = engine(source);

        let report = engine
            .sync_since("2024-01-01 00:00:00", &CancellationToken::new())
            .await
            .unwrap();

        assert!(report.success);
        assert_eq!(dest.writes_for("mug"), 1);
        assert_eq!(dest.writes_for("tee"), 1);
        assert_eq!(report.models_synced, 3);
        assert_eq!(report.products_synced, 3);
    }

    #[tokio::test]
    async fn test_malformed_entry_is_one_error_and_rest_continues() {
        let mut source = scenario_source();
        source.product_pages = vec![vec![
            payload(json!({"parent": "tee-blue", "enabled": true})),
            payload(json!({"identifier": "tee-blue-s", "parent": "tee-blue"})),
        ]];
        let (engine, dest) = engine(source);

        let report = engine
            .sync_since("2024-01-01 00:00:00", &CancellationToken::new())
            .await
            .unwrap();

        assert!(!report.success);
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].message.contains("could not extract"));
        // The valid entry in the same batch was still processed
        assert_eq!(dest.writes_for("tee"), 1);
        assert_eq!(report.total_synced(), 4);
    }

    #[tokio::test]
    async fn test_stream_failure_is_fatal() {
        let mut source = scenario_source();
        source.product_pages = vec![vec![payload(
            json!({"identifier": "tee-blue-s", "parent": "tee-blue"}),
        )]];
        source.fail_product_feed_on_page = Some(1);
        let (engine, _dest) = engine(source);

        let err = engine
            .sync_since("2024-01-01 00:00:00", &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(err.to_string().contains("streaming updated products"));
    }

    #[tokio::test]
    async fn test_failed_root_is_not_retried_within_a_run() {
        let mut source = scenario_source();
        // Both feeds yield a rootless entry with the same key, but no such
        // entity exists on the source; the copy fails once and the second
        // stream's entry is deduplicated against the claimed root
        source.model_pages = vec![vec![payload(json!({"code": "phantom"}))]];
        source.product_pages = vec![vec![payload(json!({"identifier": "phantom"}))]];
        let (engine, _dest) = engine(source);

        let report = engine
            .sync_since("2024-01-01 00:00:00", &CancellationToken::new())
            .await
            .unwrap();

        assert!(!report.success);
        assert_eq!(report.total_synced(), 0);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].node, "phantom");
    }

    #[tokio::test]
    async fn test_empty_feeds_produce_empty_successful_report() {
        let (engine, dest) = engine(scenario_source());

        let report = engine
            .sync_since("2030-01-01 00:00:00", &CancellationToken::new())
            .await
            .unwrap();

        assert!(report.success);
        assert_eq!(report.total_synced(), 0);
        assert!(dest.write_log().is_empty());
        assert_eq!(report.updated_since.as_deref(), Some("2030-01-01 00:00:00"));
    }

    #[tokio::test]
    async fn test_sync_hierarchy_one_shot() {
        let (engine, dest) = engine(scenario_source());

        let report = engine
            .sync_hierarchy("tee", &CancellationToken::new())
            .await;

        assert!(report.success);
        assert_eq!(report.models_synced, 2);
        assert_eq!(report.products_synced, 2);
        assert!(report.updated_since.is_none());
        assert_eq!(dest.writes_for("tee"), 1);
    }

    #[tokio::test]
    async fn test_validation_failure_surfaces_in_report() {
        let mut source = scenario_source();
        source.model_pages = vec![vec![payload(json!({"code": "tee"}))]];
        let dest = Arc::new(RecordingDestination::rejecting(&["tee-blue-s"]));
        let engine = SyncEngine::new(Arc::new(source), dest.clone(), 100);

        let report = engine
            .sync_since("2024-01-01 00:00:00", &CancellationToken::new())
            .await
            .unwrap();

        assert!(!report.success);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].node, "tee-blue-s");
        // Siblings of the rejected variant were still written
        assert_eq!(dest.writes_for("tee-blue-m"), 1);
    }
}
