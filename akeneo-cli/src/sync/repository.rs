//! Collaborator surfaces for the sync engine
//!
//! The engine reads from a `SourceRepository` and writes to a
//! `DestinationRepository`; both are traits so tests can substitute in-memory
//! fakes. The API-backed implementations are thin adapters over [`PimClient`].

use async_trait::async_trait;

use super::stream::{ChangeFeed, PagedChangeFeed};
use crate::api::{ApiError, Payload, PimClient};

/// Read-only operations against the source instance.
#[async_trait]
pub trait SourceRepository: Send + Sync {
    /// Retrieve a product by its identifier.
    async fn find_product(&self, identifier: &str) -> Result<Payload, ApiError>;

    /// Retrieve a product model by its code.
    async fn find_product_model(&self, code: &str) -> Result<Payload, ApiError>;

    /// All products whose declared parent is `parent`.
    async fn products_by_parent(&self, parent: &str) -> Result<Vec<Payload>, ApiError>;

    /// All product models whose declared parent is `parent`.
    async fn product_models_by_parent(&self, parent: &str) -> Result<Vec<Payload>, ApiError>;

    /// Paginated feed of product models updated after `since`.
    fn changed_product_models<'a>(
        &'a self,
        since: &str,
        batch_size: usize,
    ) -> Box<dyn ChangeFeed + 'a>;

    /// Paginated feed of products updated after `since`.
    fn changed_products<'a>(&'a self, since: &str, batch_size: usize)
        -> Box<dyn ChangeFeed + 'a>;
}

/// Write operations against the destination instance. Both saves are
/// upserts.
#[async_trait]
pub trait DestinationRepository: Send + Sync {
    /// Create or update a product.
    async fn save_product(&self, identifier: &str, payload: Payload) -> Result<(), ApiError>;

    /// Create or update a product model.
    async fn save_product_model(&self, code: &str, payload: Payload) -> Result<(), ApiError>;
}

/// [`SourceRepository`] backed by an Akeneo instance.
pub struct PimSourceRepository {
    client: PimClient,
}

impl PimSourceRepository {
    pub fn new(client: PimClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SourceRepository for PimSourceRepository {
    async fn find_product(&self, identifier: &str) -> Result<Payload, ApiError> {
        self.client.get_product(identifier).await
    }

    async fn find_product_model(&self, code: &str) -> Result<Payload, ApiError> {
        self.client.get_product_model(code).await
    }

    async fn products_by_parent(&self, parent: &str) -> Result<Vec<Payload>, ApiError> {
        self.client.products_by_parent(parent).await
    }

    async fn product_models_by_parent(&self, parent: &str) -> Result<Vec<Payload>, ApiError> {
        self.client.product_models_by_parent(parent).await
    }

    fn changed_product_models<'a>(
        &'a self,
        since: &str,
        batch_size: usize,
    ) -> Box<dyn ChangeFeed + 'a> {
        let url = self.client.product_models_updated_since_url(since, batch_size);
        Box::new(PagedChangeFeed::new(&self.client, url))
    }

    fn changed_products<'a>(
        &'a self,
        since: &str,
        batch_size: usize,
    ) -> Box<dyn ChangeFeed + 'a> {
        let url = self.client.products_updated_since_url(since, batch_size);
        Box::new(PagedChangeFeed::new(&self.client, url))
    }
}

/// [`DestinationRepository`] backed by an Akeneo instance.
pub struct PimDestinationRepository {
    client: PimClient,
}

impl PimDestinationRepository {
    pub fn new(client: PimClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl DestinationRepository for PimDestinationRepository {
    async fn save_product(&self, identifier: &str, payload: Payload) -> Result<(), ApiError> {
        self.client.upsert_product(identifier, payload).await
    }

    async fn save_product_model(&self, code: &str, payload: Payload) -> Result<(), ApiError> {
        self.client.upsert_product_model(code, payload).await
    }
}
