//! HTTP client for the Akeneo REST API
//!
//! Thin typed wrapper over the endpoints the sync engine needs: single-item
//! lookups, parent-filtered listings, upserts, and paginated updated-since
//! searches. All calls are blocking round trips from the caller's point of
//! view; there is no request fan-out here.

use std::time::Duration;

use log::{debug, trace};
use serde::Deserialize;
use serde_json::Value;

use super::auth::AuthManager;
use super::error::ApiError;
use crate::config::InstanceConfig;

/// Open string-keyed attribute mapping: the wire shape of every catalog
/// entity. Attribute sets vary by entity and instance, so nothing beyond the
/// identity and parent fields is ever interpreted.
pub type Payload = serde_json::Map<String, Value>;

/// Page size for parent-filtered listings.
const LIST_PAGE_SIZE: usize = 100;

/// Fields never sent back on writes: navigation metadata and server-owned
/// timestamps. Stripping them keeps repeated upserts of unchanged data
/// idempotent and avoids 422s on read-only fields.
const VOLATILE_FIELDS: &[&str] = &["_links", "created", "updated", "metadata"];

/// Error body returned by Akeneo on rejected requests
#[derive(Debug, Deserialize)]
struct ErrorResponse {
    message: Option<String>,
    #[serde(default)]
    errors: Vec<FieldError>,
}

/// Field-level detail inside an [`ErrorResponse`]
#[derive(Debug, Deserialize)]
struct FieldError {
    property: Option<String>,
    message: Option<String>,
}

/// One page of a paginated search response
#[derive(Debug, Deserialize)]
struct SearchPage {
    #[serde(rename = "_embedded")]
    embedded: Embedded,
    #[serde(rename = "_links", default)]
    links: Links,
}

#[derive(Debug, Deserialize)]
struct Embedded {
    items: Vec<Payload>,
}

#[derive(Debug, Default, Deserialize)]
struct Links {
    next: Option<Link>,
}

#[derive(Debug, Deserialize)]
struct Link {
    href: String,
}

/// Client for one Akeneo instance
#[derive(Debug)]
pub struct PimClient {
    http: reqwest::Client,
    host: String,
    auth: AuthManager,
}

impl PimClient {
    pub fn new(config: InstanceConfig) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        let host = config.host.trim_end_matches('/').to_string();
        let auth = AuthManager::new(http.clone(), config);

        Ok(Self { http, host, auth })
    }

    /// Fetch a single product by identifier. 404 maps to [`ApiError::NotFound`].
    pub async fn get_product(&self, identifier: &str) -> Result<Payload, ApiError> {
        self.get_entity("product", "products", identifier).await
    }

    /// Fetch a single product model by code. 404 maps to [`ApiError::NotFound`].
    pub async fn get_product_model(&self, code: &str) -> Result<Payload, ApiError> {
        self.get_entity("product model", "product-models", code).await
    }

    /// List every product whose parent is `parent`, across all pages.
    pub async fn products_by_parent(&self, parent: &str) -> Result<Vec<Payload>, ApiError> {
        self.list_by_parent("products", parent).await
    }

    /// List every product model whose parent is `parent`, across all pages.
    pub async fn product_models_by_parent(&self, parent: &str) -> Result<Vec<Payload>, ApiError> {
        self.list_by_parent("product-models", parent).await
    }

    /// Create-or-update a product. The payload is sanitized before transmission.
    pub async fn upsert_product(&self, identifier: &str, payload: Payload) -> Result<(), ApiError> {
        self.upsert_entity("products", identifier, payload).await
    }

    /// Create-or-update a product model. The payload is sanitized before transmission.
    pub async fn upsert_product_model(&self, code: &str, payload: Payload) -> Result<(), ApiError> {
        self.upsert_entity("product-models", code, payload).await
    }

    /// URL of the first page of products updated strictly after `since`.
    pub fn products_updated_since_url(&self, since: &str, batch_size: usize) -> String {
        self.updated_since_url("products", since, batch_size)
    }

    /// URL of the first page of product models updated strictly after `since`.
    pub fn product_models_updated_since_url(&self, since: &str, batch_size: usize) -> String {
        self.updated_since_url("product-models", since, batch_size)
    }

    fn updated_since_url(&self, collection: &str, since: &str, batch_size: usize) -> String {
        let search = serde_json::json!({
            "updated": [{"operator": ">", "value": since}]
        })
        .to_string();

        format!(
            "{}/api/rest/v1/{}?search={}&pagination_type=search_after&limit={}",
            self.host,
            collection,
            urlencoding::encode(&search),
            batch_size
        )
    }

    /// Fetch one page of a search by absolute URL; returns the items and the
    /// URL of the next page, if the server reports one.
    pub async fn fetch_search_page(
        &self,
        url: &str,
    ) -> Result<(Vec<Payload>, Option<String>), ApiError> {
        let token = self.auth.access_token().await?;

        trace!("GET {}", url);
        let response = self.http.get(url).bearer_auth(&token).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Transport(format!(
                "search page fetch failed: {} - {}",
                status, body
            )));
        }

        let page: SearchPage = response
            .json()
            .await
            .map_err(|e| ApiError::Transport(format!("malformed search page: {}", e)))?;

        Ok((page.embedded.items, page.links.next.map(|l| l.href)))
    }

    async fn get_entity(
        &self,
        resource: &'static str,
        collection: &str,
        key: &str,
    ) -> Result<Payload, ApiError> {
        let token = self.auth.access_token().await?;
        let url = format!(
            "{}/api/rest/v1/{}/{}",
            self.host,
            collection,
            urlencoding::encode(key)
        );

        trace!("GET {}", url);
        let response = self.http.get(&url).bearer_auth(&token).send().await?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(ApiError::not_found(resource, key));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Transport(format!(
                "fetching {} '{}' failed: {} - {}",
                resource, key, status, body
            )));
        }

        response
            .json()
            .await
            .map_err(|e| ApiError::Transport(format!("malformed {} payload: {}", resource, e)))
    }

    async fn list_by_parent(&self, collection: &str, parent: &str) -> Result<Vec<Payload>, ApiError> {
        let search = serde_json::json!({
            "parent": [{"operator": "=", "value": parent}]
        })
        .to_string();

        let mut url = format!(
            "{}/api/rest/v1/{}?search={}&limit={}",
            self.host,
            collection,
            urlencoding::encode(&search),
            LIST_PAGE_SIZE
        );

        let mut items = Vec::new();
        loop {
            let (page_items, next) = self.fetch_search_page(&url).await?;
            items.extend(page_items);
            match next {
                Some(next_url) => url = next_url,
                None => break,
            }
        }

        debug!("{} under '{}': {} items", collection, parent, items.len());
        Ok(items)
    }

    async fn upsert_entity(
        &self,
        collection: &str,
        key: &str,
        payload: Payload,
    ) -> Result<(), ApiError> {
        let token = self.auth.access_token().await?;
        let url = format!(
            "{}/api/rest/v1/{}/{}",
            self.host,
            collection,
            urlencoding::encode(key)
        );

        let body = sanitize_payload(payload);

        trace!("PATCH {}", url);
        let response = self
            .http
            .patch(&url)
            .bearer_auth(&token)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let text = response.text().await.unwrap_or_default();
        if status == reqwest::StatusCode::UNPROCESSABLE_ENTITY {
            let message = serde_json::from_str::<ErrorResponse>(&text)
                .map(|e| format_field_errors(&e))
                .unwrap_or_else(|_| text.clone());
            return Err(ApiError::Validation {
                key: key.to_string(),
                message,
            });
        }

        Err(ApiError::Transport(format!(
            "upserting '{}' failed: {} - {}",
            key, status, text
        )))
    }
}

/// Strip volatile fields and null attributes from an outgoing payload.
pub fn sanitize_payload(payload: Payload) -> Payload {
    payload
        .into_iter()
        .filter(|(key, value)| !VOLATILE_FIELDS.contains(&key.as_str()) && !value.is_null())
        .collect()
}

fn format_field_errors(error: &ErrorResponse) -> String {
    let message = error.message.clone().unwrap_or_else(|| "rejected".to_string());
    if error.errors.is_empty() {
        return message;
    }

    let details: Vec<String> = error
        .errors
        .iter()
        .map(|e| {
            format!(
                "Field '{}': {}",
                e.property.as_deref().unwrap_or("?"),
                e.message.as_deref().unwrap_or("invalid")
            )
        })
        .collect();

    format!("{}. Details: {}", message, details.join("; "))
}
