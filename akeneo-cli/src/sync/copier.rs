//! Hierarchy copying
//!
//! Transfers one full catalog tree from source to destination. A root key
//! arrives untyped, so the copier probes it once — product first (flat
//! two-level tree), product model second (three-level tree) — and then walks
//! the tree strictly parent-before-child: the destination rejects a child
//! whose declared parent does not exist yet. A failed write on one node is
//! recorded and never halts its siblings or the rest of the tree.

use log::{debug, warn};
use tokio_util::sync::CancellationToken;

use super::node::{parent_key, CatalogNode, NodeKind};
use super::repository::{DestinationRepository, SourceRepository};
use crate::api::{ApiError, Payload};

/// Error record for a single node that could not be transferred.
#[derive(Debug, Clone)]
pub struct NodeError {
    pub node: String,
    pub message: String,
}

impl NodeError {
    pub fn new(node: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for NodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.node, self.message)
    }
}

/// Counts and per-node errors from one hierarchy copy.
#[derive(Debug, Default)]
pub struct CopyOutcome {
    pub models_synced: usize,
    pub products_synced: usize,
    pub errors: Vec<NodeError>,
}

impl CopyOutcome {
    pub fn total_synced(&self) -> usize {
        self.models_synced + self.products_synced
    }
}

/// The root's kind, decided once by the double probe.
enum RootEntry {
    Product(CatalogNode),
    ProductModel(CatalogNode),
}

/// Copies one tree at a time between the two instances.
pub struct HierarchyCopier<'a> {
    source: &'a dyn SourceRepository,
    dest: &'a dyn DestinationRepository,
}

impl<'a> HierarchyCopier<'a> {
    pub fn new(source: &'a dyn SourceRepository, dest: &'a dyn DestinationRepository) -> Self {
        Self { source, dest }
    }

    /// Copy the hierarchy rooted at `root_key`. Always returns an outcome;
    /// every failure short of cancellation is recorded per node.
    pub async fn copy_hierarchy(
        &self,
        root_key: &str,
        cancel: &CancellationToken,
    ) -> CopyOutcome {
        let mut outcome = CopyOutcome::default();

        let entry = match self.probe_root(root_key).await {
            Ok(Some(entry)) => entry,
            Ok(None) => {
                outcome.errors.push(NodeError::new(
                    root_key,
                    "not found as product or product model on the source",
                ));
                return outcome;
            }
            Err(err) => {
                outcome
                    .errors
                    .push(NodeError::new(root_key, err.to_string()));
                return outcome;
            }
        };

        match entry {
            RootEntry::Product(root) => {
                debug!("copying flat hierarchy rooted at product '{}'", root.key);
                self.copy_flat_tree(root, cancel, &mut outcome).await;
            }
            RootEntry::ProductModel(root) => {
                debug!("copying model hierarchy rooted at '{}'", root.key);
                self.copy_model_tree(root, cancel, &mut outcome).await;
            }
        }

        debug!(
            "hierarchy '{}': {} models, {} products, {} errors",
            root_key,
            outcome.models_synced,
            outcome.products_synced,
            outcome.errors.len()
        );
        outcome
    }

    /// Decide the root's kind: product lookup first, model lookup on a miss.
    async fn probe_root(&self, key: &str) -> Result<Option<RootEntry>, ApiError> {
        match self.source.find_product(key).await {
            Ok(payload) => return Ok(Some(RootEntry::Product(envelope(NodeKind::Product, key, payload)))),
            Err(err) if err.is_not_found() => {}
            Err(err) => return Err(err),
        }

        match self.source.find_product_model(key).await {
            Ok(payload) => Ok(Some(RootEntry::ProductModel(envelope(
                NodeKind::ProductModel,
                key,
                payload,
            )))),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Two-level tree: a standalone product with products attached to it.
    async fn copy_flat_tree(
        &self,
        root: CatalogNode,
        cancel: &CancellationToken,
        outcome: &mut CopyOutcome,
    ) {
        if cancel.is_cancelled() {
            return;
        }
        let root_key = root.key.clone();
        self.write_product(&root_key, root.payload, outcome).await;

        self.copy_products_under(&root_key, cancel, outcome).await;
    }

    /// Three-level tree: root model, its sub-models, and the products under
    /// the root and under each sub-model.
    async fn copy_model_tree(
        &self,
        root: CatalogNode,
        cancel: &CancellationToken,
        outcome: &mut CopyOutcome,
    ) {
        if cancel.is_cancelled() {
            return;
        }
        let root_key = root.key.clone();
        self.write_model(&root_key, root.payload, outcome).await;

        let groups = match self.source.product_models_by_parent(&root_key).await {
            Ok(groups) => groups,
            Err(err) => {
                outcome.errors.push(NodeError::new(
                    &root_key,
                    format!("failed to list sub-models: {}", err),
                ));
                Vec::new()
            }
        };
        debug!("'{}': {} sub-models", root_key, groups.len());

        // Parents that can carry leaf products: the root itself plus every
        // sub-model, written (or at least attempted) before their leaves.
        let mut leaf_parents = vec![root_key.clone()];
        for group in groups {
            if cancel.is_cancelled() {
                return;
            }
            match CatalogNode::from_payload(NodeKind::ProductModel, group) {
                Ok(node) => {
                    let key = node.key.clone();
                    self.write_model(&key, node.payload, outcome).await;
                    leaf_parents.push(key);
                }
                Err(err) => {
                    outcome
                        .errors
                        .push(NodeError::new(&root_key, err.to_string()));
                }
            }
        }

        for parent in leaf_parents {
            if cancel.is_cancelled() {
                return;
            }
            self.copy_products_under(&parent, cancel, outcome).await;
        }
    }

    /// Copy every product whose declared parent is `parent`.
    async fn copy_products_under(
        &self,
        parent: &str,
        cancel: &CancellationToken,
        outcome: &mut CopyOutcome,
    ) {
        let products = match self.source.products_by_parent(parent).await {
            Ok(products) => products,
            Err(err) => {
                outcome.errors.push(NodeError::new(
                    parent,
                    format!("failed to list child products: {}", err),
                ));
                return;
            }
        };
        debug!("'{}': {} child products", parent, products.len());

        for product in products {
            if cancel.is_cancelled() {
                return;
            }
            match CatalogNode::from_payload(NodeKind::Product, product) {
                Ok(node) => {
                    let key = node.key.clone();
                    self.write_product(&key, node.payload, outcome).await;
                }
                Err(err) => {
                    outcome.errors.push(NodeError::new(parent, err.to_string()));
                }
            }
        }
    }

    async fn write_model(&self, key: &str, payload: Payload, outcome: &mut CopyOutcome) {
        match self.dest.save_product_model(key, payload).await {
            Ok(()) => {
                debug!("synced product model '{}'", key);
                outcome.models_synced += 1;
            }
            Err(err) => {
                warn!("failed to sync product model '{}': {}", key, err);
                outcome.errors.push(NodeError::new(key, err.to_string()));
            }
        }
    }

    async fn write_product(&self, key: &str, payload: Payload, outcome: &mut CopyOutcome) {
        match self.dest.save_product(key, payload).await {
            Ok(()) => {
                debug!("synced product '{}'", key);
                outcome.products_synced += 1;
            }
            Err(err) => {
                warn!("failed to sync product '{}': {}", key, err);
                outcome.errors.push(NodeError::new(key, err.to_string()));
            }
        }
    }
}

/// Build the envelope for a payload fetched by key: the key is already
/// known, so a missing identity field cannot occur here.
fn envelope(kind: NodeKind, key: &str, payload: Payload) -> CatalogNode {
    let parent = parent_key(&payload);
    CatalogNode {
        kind,
        key: key.to_string(),
        parent,
        payload,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::testing::{InMemorySource, RecordingDestination};
    use serde_json::json;

    fn three_level_source() -> InMemorySource {
        let mut source = InMemorySource::new();
        source.add_model(json!({"code": "tee", "family_variant": "by_color_size"}));
        source.add_model(json!({"code": "tee-blue", "parent": "tee"}));
        source.add_model(json!({"code": "tee-red", "parent": "tee"}));
        source.add_product(json!({"identifier": "tee-blue-s", "parent": "tee-blue"}));
        source.add_product(json!({"identifier": "tee-blue-m", "parent": "tee-blue"}));
        source.add_product(json!({"identifier": "tee-red-s", "parent": "tee-red"}));
        source
    }

    #[tokio::test]
    async fn test_flat_tree_copy() {
        let mut source = InMemorySource::new();
        source.add_product(json!({"identifier": "bundle", "enabled": true}));
        source.add_product(json!({"identifier": "bundle-a", "parent": "bundle"}));
        source.add_product(json!({"identifier": "bundle-b", "parent": "bundle"}));
        let dest = RecordingDestination::new();
        let copier = HierarchyCopier::new(&source, &dest);

        let outcome = copier
            .copy_hierarchy("bundle", &CancellationToken::new())
            .await;

        assert_eq!(outcome.products_synced, 3);
        assert_eq!(outcome.models_synced, 0);
        assert!(outcome.errors.is_empty());
        assert!(dest.index_of("bundle").unwrap() < dest.index_of("bundle-a").unwrap());
        assert!(dest.index_of("bundle").unwrap() < dest.index_of("bundle-b").unwrap());

        // The payload travels untouched; volatile-field stripping happens in
        // the destination client, not here
        let records = dest.records();
        let root = &records[dest.index_of("bundle").unwrap()];
        assert_eq!(root.payload.get("enabled"), Some(&json!(true)));
    }

    #[tokio::test]
    async fn test_model_tree_copy_counts() {
        let source = three_level_source();
        let dest = RecordingDestination::new();
        let copier = HierarchyCopier::new(&source, &dest);

        let outcome = copier.copy_hierarchy("tee", &CancellationToken::new()).await;

        assert_eq!(outcome.models_synced, 3);
        assert_eq!(outcome.products_synced, 3);
        assert_eq!(outcome.total_synced(), 6);
        assert!(outcome.errors.is_empty());
    }

    #[tokio::test]
    async fn test_parent_written_before_children() {
        let source = three_level_source();
        let dest = RecordingDestination::new();
        let copier = HierarchyCopier::new(&source, &dest);

        copier.copy_hierarchy("tee", &CancellationToken::new()).await;

        let root = dest.index_of("tee").unwrap();
        for group in ["tee-blue", "tee-red"] {
            assert!(root < dest.index_of(group).unwrap());
        }
        for (group, leaf) in [
            ("tee-blue", "tee-blue-s"),
            ("tee-blue", "tee-blue-m"),
            ("tee-red", "tee-red-s"),
        ] {
            assert!(
                dest.index_of(group).unwrap() < dest.index_of(leaf).unwrap(),
                "{} must be written before {}",
                group,
                leaf
            );
        }
    }

    #[tokio::test]
    async fn test_products_attached_directly_to_root_are_copied() {
        let mut source = InMemorySource::new();
        source.add_model(json!({"code": "mug"}));
        source.add_product(json!({"identifier": "mug-plain", "parent": "mug"}));
        source.add_model(json!({"code": "mug-deco", "parent": "mug"}));
        source.add_product(json!({"identifier": "mug-deco-gold", "parent": "mug-deco"}));
        let dest = RecordingDestination::new();
        let copier = HierarchyCopier::new(&source, &dest);

        let outcome = copier.copy_hierarchy("mug", &CancellationToken::new()).await;

        assert_eq!(outcome.models_synced, 2);
        assert_eq!(outcome.products_synced, 2);
        assert!(dest.index_of("mug").unwrap() < dest.index_of("mug-plain").unwrap());
    }

    #[tokio::test]
    async fn test_unknown_root_records_single_error() {
        let source = InMemorySource::new();
        let dest = RecordingDestination::new();
        let copier = HierarchyCopier::new(&source, &dest);

        let outcome = copier
            .copy_hierarchy("ghost", &CancellationToken::new())
            .await;

        assert_eq!(outcome.total_synced(), 0);
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.errors[0].node, "ghost");
        assert!(outcome.errors[0].message.contains("not found"));
        assert!(dest.write_log().is_empty());
    }

    #[tokio::test]
    async fn test_leaf_failure_does_not_block_siblings() {
        let source = three_level_source();
        let dest = RecordingDestination::rejecting(&["tee-blue-s"]);
        let copier = HierarchyCopier::new(&source, &dest);

        let outcome = copier.copy_hierarchy("tee", &CancellationToken::new()).await;

        assert_eq!(outcome.models_synced, 3);
        assert_eq!(outcome.products_synced, 2);
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.errors[0].node, "tee-blue-s");
        // The failed leaf's siblings and the sibling group's leaves were still attempted
        assert_eq!(dest.writes_for("tee-blue-m"), 1);
        assert_eq!(dest.writes_for("tee-red-s"), 1);
    }

    #[tokio::test]
    async fn test_group_failure_does_not_block_its_leaves_or_siblings() {
        let source = three_level_source();
        let dest = RecordingDestination::rejecting(&["tee-blue"]);
        let copier = HierarchyCopier::new(&source, &dest);

        let outcome = copier.copy_hierarchy("tee", &CancellationToken::new()).await;

        assert_eq!(outcome.models_synced, 2);
        assert_eq!(outcome.errors.len(), 1);
        // The write was attempted before the leaves, so ordering still holds
        assert!(dest.index_of("tee-blue").unwrap() < dest.index_of("tee-blue-s").unwrap());
        assert_eq!(dest.writes_for("tee-red"), 1);
        assert_eq!(dest.writes_for("tee-red-s"), 1);
    }

    #[tokio::test]
    async fn test_listing_failure_is_local_to_the_subtree() {
        let mut source = three_level_source();
        source.fail_listings = true;
        let dest = RecordingDestination::new();
        let copier = HierarchyCopier::new(&source, &dest);

        let outcome = copier.copy_hierarchy("tee", &CancellationToken::new()).await;

        // Root still written; the listing failures are recorded, not fatal
        assert_eq!(outcome.models_synced, 1);
        assert!(!outcome.errors.is_empty());
        assert_eq!(dest.writes_for("tee"), 1);
    }

    #[tokio::test]
    async fn test_repeated_copy_is_idempotent() {
        let source = three_level_source();
        let dest = RecordingDestination::new();
        let copier = HierarchyCopier::new(&source, &dest);

        let first = copier.copy_hierarchy("tee", &CancellationToken::new()).await;
        let log_after_first = dest.write_log();
        let second = copier.copy_hierarchy("tee", &CancellationToken::new()).await;
        let log_after_second = dest.write_log();

        assert_eq!(first.total_synced(), second.total_synced());
        // The second pass re-issues exactly the same upserts in the same order
        assert_eq!(log_after_second.len(), log_after_first.len() * 2);
        assert_eq!(&log_after_second[log_after_first.len()..], &log_after_first[..]);
    }

    #[tokio::test]
    async fn test_cancelled_copy_writes_nothing() {
        let source = three_level_source();
        let dest = RecordingDestination::new();
        let copier = HierarchyCopier::new(&source, &dest);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = copier.copy_hierarchy("tee", &cancel).await;

        assert_eq!(outcome.total_synced(), 0);
        assert!(dest.write_log().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_child_is_recorded_and_skipped() {
        let mut source = InMemorySource::new();
        source.add_product(json!({"identifier": "bundle"}));
        source.add_product(json!({"identifier": "bundle-ok", "parent": "bundle"}));
        // A child listing entry without an identifier
        source.products.insert(
            "broken".to_string(),
            json!({"parent": "bundle", "enabled": true})
                .as_object()
                .unwrap()
                .clone(),
        );
        let dest = RecordingDestination::new();
        let copier = HierarchyCopier::new(&source, &dest);

        let outcome = copier
            .copy_hierarchy("bundle", &CancellationToken::new())
            .await;

        assert_eq!(outcome.products_synced, 2);
        assert_eq!(outcome.errors.len(), 1);
        assert!(outcome.errors[0].message.contains("could not extract"));
    }
}
