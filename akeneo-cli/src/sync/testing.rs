//! In-memory collaborator fakes shared by the engine tests

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use super::node::{parent_key, NodeKind};
use super::repository::{DestinationRepository, SourceRepository};
use super::stream::ChangeFeed;
use crate::api::{ApiError, Payload};

pub fn payload(value: Value) -> Payload {
    value.as_object().unwrap().clone()
}

/// Source fake over two keyed maps plus canned change-feed pages.
#[derive(Default)]
pub struct InMemorySource {
    pub models: BTreeMap<String, Payload>,
    pub products: BTreeMap<String, Payload>,
    pub model_pages: Vec<Vec<Payload>>,
    pub product_pages: Vec<Vec<Payload>>,
    /// Make every single-entity lookup fail with a transport error.
    pub fail_lookups: bool,
    /// Make every parent listing fail with a transport error.
    pub fail_listings: bool,
    /// Fail the changed-products feed on the given 1-based page.
    pub fail_product_feed_on_page: Option<usize>,
}

impl InMemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_model(&mut self, value: Value) {
        let p = payload(value);
        let code = p.get("code").unwrap().as_str().unwrap().to_string();
        self.models.insert(code, p);
    }

    pub fn add_product(&mut self, value: Value) {
        let p = payload(value);
        let identifier = p.get("identifier").unwrap().as_str().unwrap().to_string();
        self.products.insert(identifier, p);
    }

    fn by_parent(map: &BTreeMap<String, Payload>, parent: &str) -> Vec<Payload> {
        map.values()
            .filter(|p| parent_key(p).as_deref() == Some(parent))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl SourceRepository for InMemorySource {
    async fn find_product(&self, identifier: &str) -> Result<Payload, ApiError> {
        if self.fail_lookups {
            return Err(ApiError::Transport("lookup unavailable".to_string()));
        }
        self.products
            .get(identifier)
            .cloned()
            .ok_or_else(|| ApiError::not_found("product", identifier))
    }

    async fn find_product_model(&self, code: &str) -> Result<Payload, ApiError> {
        if self.fail_lookups {
            return Err(ApiError::Transport("lookup unavailable".to_string()));
        }
        self.models
            .get(code)
            .cloned()
            .ok_or_else(|| ApiError::not_found("product model", code))
    }

    async fn products_by_parent(&self, parent: &str) -> Result<Vec<Payload>, ApiError> {
        if self.fail_listings {
            return Err(ApiError::Transport("listing unavailable".to_string()));
        }
        Ok(Self::by_parent(&self.products, parent))
    }

    async fn product_models_by_parent(&self, parent: &str) -> Result<Vec<Payload>, ApiError> {
        if self.fail_listings {
            return Err(ApiError::Transport("listing unavailable".to_string()));
        }
        Ok(Self::by_parent(&self.models, parent))
    }

    fn changed_product_models<'a>(
        &'a self,
        _since: &str,
        _batch_size: usize,
    ) -> Box<dyn ChangeFeed + 'a> {
        Box::new(PageFeed {
            pages: self.model_pages.clone().into(),
            fail_on_page: None,
            served: 0,
        })
    }

    fn changed_products<'a>(
        &'a self,
        _since: &str,
        _batch_size: usize,
    ) -> Box<dyn ChangeFeed + 'a> {
        Box::new(PageFeed {
            pages: self.product_pages.clone().into(),
            fail_on_page: self.fail_product_feed_on_page,
            served: 0,
        })
    }
}

struct PageFeed {
    pages: VecDeque<Vec<Payload>>,
    fail_on_page: Option<usize>,
    served: usize,
}

#[async_trait]
impl ChangeFeed for PageFeed {
    async fn next_batch(&mut self) -> Result<Option<Vec<Payload>>, ApiError> {
        if let Some(fail_page) = self.fail_on_page {
            if self.served + 1 == fail_page {
                return Err(ApiError::Transport("cannot fetch next page".to_string()));
            }
        }
        self.served += 1;
        Ok(self.pages.pop_front())
    }
}

/// One recorded write attempt against the destination fake.
#[derive(Debug, Clone)]
pub struct WriteRecord {
    pub kind: NodeKind,
    pub key: String,
    pub payload: Payload,
}

/// Destination fake recording every write attempt in order.
#[derive(Default)]
pub struct RecordingDestination {
    writes: Mutex<Vec<WriteRecord>>,
    /// Keys whose save is rejected with a validation error.
    pub fail_keys: HashSet<String>,
}

impl RecordingDestination {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rejecting(keys: &[&str]) -> Self {
        Self {
            writes: Mutex::new(Vec::new()),
            fail_keys: keys.iter().map(|k| k.to_string()).collect(),
        }
    }

    fn record(&self, kind: NodeKind, key: &str, payload: Payload) -> Result<(), ApiError> {
        self.writes.lock().unwrap().push(WriteRecord {
            kind,
            key: key.to_string(),
            payload,
        });
        if self.fail_keys.contains(key) {
            return Err(ApiError::Validation {
                key: key.to_string(),
                message: "Field 'values': rejected by destination".to_string(),
            });
        }
        Ok(())
    }

    /// Every write attempt, in order.
    pub fn records(&self) -> Vec<WriteRecord> {
        self.writes.lock().unwrap().clone()
    }

    /// `(kind, key)` of every write attempt, in order.
    pub fn write_log(&self) -> Vec<(NodeKind, String)> {
        self.writes
            .lock()
            .unwrap()
            .iter()
            .map(|w| (w.kind, w.key.clone()))
            .collect()
    }

    /// Position of the first write attempt for `key`.
    pub fn index_of(&self, key: &str) -> Option<usize> {
        self.writes
            .lock()
            .unwrap()
            .iter()
            .position(|w| w.key == key)
    }

    /// Number of write attempts for `key`.
    pub fn writes_for(&self, key: &str) -> usize {
        self.writes
            .lock()
            .unwrap()
            .iter()
            .filter(|w| w.key == key)
            .count()
    }
}

#[async_trait]
impl DestinationRepository for RecordingDestination {
    async fn save_product(&self, identifier: &str, payload: Payload) -> Result<(), ApiError> {
        self.record(NodeKind::Product, identifier, payload)
    }

    async fn save_product_model(&self, code: &str, payload: Payload) -> Result<(), ApiError> {
        self.record(NodeKind::ProductModel, code, payload)
    }
}
