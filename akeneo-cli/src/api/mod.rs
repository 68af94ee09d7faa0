//! Akeneo REST API Module
//!
//! Typed client for the Akeneo PIM REST API: OAuth2 password-grant
//! authentication, single-entity lookups, parent-filtered listings, upserts,
//! and paginated updated-since searches. One [`PimClient`] per instance; the
//! sync engine talks to a source client and a destination client.

pub mod auth;
pub mod client;
pub mod error;

pub use auth::AuthManager;
pub use client::{sanitize_payload, Payload, PimClient};
pub use error::ApiError;
