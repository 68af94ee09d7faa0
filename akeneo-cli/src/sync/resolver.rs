//! Hierarchy root resolution
//!
//! A changed node can be a leaf deep inside a tree; the resolver walks its
//! parent chain up to the parentless ancestor. A raw parent key does not
//! declare whether it names a product model or a product, so each hop probes
//! the model lookup first and falls back to the product lookup. The walk is
//! an explicit loop with a hop bound and a visited set; malformed (cyclic)
//! source data terminates with a warning instead of recursing forever.

use std::collections::HashSet;

use log::warn;

use super::node::{parent_key, CatalogNode};
use super::repository::SourceRepository;
use crate::api::ApiError;

/// Upper bound on parent-chain length before the walk is abandoned.
pub const MAX_PARENT_HOPS: usize = 50;

enum Probe {
    /// The parent exists; carries its own parent key, if any.
    Found(Option<String>),
    /// Neither lookup resolved the key.
    Missing,
}

/// Walks parent chains on the source instance.
pub struct RootResolver<'a> {
    source: &'a dyn SourceRepository,
    max_hops: usize,
}

impl<'a> RootResolver<'a> {
    pub fn new(source: &'a dyn SourceRepository) -> Self {
        Self {
            source,
            max_hops: MAX_PARENT_HOPS,
        }
    }

    /// Override the hop bound (tests exercise the cutoff with short chains).
    pub fn with_max_hops(source: &'a dyn SourceRepository, max_hops: usize) -> Self {
        Self { source, max_hops }
    }

    /// Key of the hierarchy root above `node`. Never fails: anomalies
    /// (orphaned parents, cycles, lookup errors) fall back to the deepest
    /// node reached and are logged as warnings.
    pub async fn resolve_root(&self, node: &CatalogNode) -> String {
        let mut current = node.key.clone();
        let mut parent = node.parent.clone();
        let mut visited: HashSet<String> = HashSet::new();
        visited.insert(current.clone());

        let mut hops = 0usize;
        while let Some(next) = parent {
            if hops >= self.max_hops {
                warn!(
                    "parent chain of '{}' exceeds {} hops, treating '{}' as root",
                    node.key, self.max_hops, current
                );
                break;
            }
            if !visited.insert(next.clone()) {
                warn!(
                    "parent cycle through '{}' while resolving '{}', treating '{}' as root",
                    next, node.key, current
                );
                break;
            }
            hops += 1;

            match self.probe(&next).await {
                Ok(Probe::Found(grandparent)) => {
                    current = next;
                    parent = grandparent;
                }
                Ok(Probe::Missing) => {
                    warn!(
                        "parent '{}' of '{}' not found as product model or product, keeping '{}' as an orphaned root",
                        next, current, current
                    );
                    break;
                }
                Err(err) => {
                    warn!(
                        "probing parent '{}' of '{}' failed ({}), treating '{}' as root",
                        next, current, err, current
                    );
                    break;
                }
            }
        }

        current
    }

    /// Probe a raw key, model lookup first, product lookup on a miss.
    async fn probe(&self, key: &str) -> Result<Probe, ApiError> {
        match self.source.find_product_model(key).await {
            Ok(payload) => return Ok(Probe::Found(parent_key(&payload))),
            Err(err) if err.is_not_found() => {}
            Err(err) => return Err(err),
        }

        match self.source.find_product(key).await {
            Ok(payload) => Ok(Probe::Found(parent_key(&payload))),
            Err(err) if err.is_not_found() => Ok(Probe::Missing),
            Err(err) => Err(err),
        }
    }
}
