//! Catalog node model
//!
//! A node is an open attribute map on the wire; the engine only ever
//! interprets two fields of it — the identity key and the optional parent
//! key — so those are extracted once into a typed envelope and the rest of
//! the payload is carried opaquely.

use serde_json::Value;
use thiserror::Error;

use crate::api::Payload;

/// The two entity kinds making up a catalog hierarchy. Roots and mid-level
/// groupings of configurable trees are product models; leaf variants and
/// standalone items are products.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    ProductModel,
    Product,
}

impl NodeKind {
    /// Name of the identity field in this kind's wire payload.
    pub fn key_field(self) -> &'static str {
        match self {
            Self::ProductModel => "code",
            Self::Product => "identifier",
        }
    }

    /// Human-readable name of the identity field, used in error records.
    pub fn key_label(self) -> &'static str {
        match self {
            Self::ProductModel => "product model code",
            Self::Product => "product identifier",
        }
    }
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ProductModel => write!(f, "product model"),
            Self::Product => write!(f, "product"),
        }
    }
}

/// A payload in a change feed did not carry its identity field.
#[derive(Debug, Error)]
#[error("could not extract {0} from changed entry")]
pub struct MalformedNode(pub &'static str);

/// Typed envelope around one catalog entity's wire payload.
#[derive(Debug, Clone)]
pub struct CatalogNode {
    pub kind: NodeKind,
    pub key: String,
    pub parent: Option<String>,
    pub payload: Payload,
}

impl CatalogNode {
    /// Extract the envelope from a raw payload. Fails only when the identity
    /// field is missing, empty, or not a string.
    pub fn from_payload(kind: NodeKind, payload: Payload) -> Result<Self, MalformedNode> {
        let key = payload
            .get(kind.key_field())
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .ok_or(MalformedNode(kind.key_label()))?
            .to_string();

        let parent = parent_key(&payload);

        Ok(Self {
            kind,
            key,
            parent,
            payload,
        })
    }

    /// A node without a parent is the root of its own hierarchy.
    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }
}

/// Parent key of a raw payload. Absent, JSON null, empty, and the literal
/// string "null" (seen in exports from some instances) all mean "no parent".
pub fn parent_key(payload: &Payload) -> Option<String> {
    match payload.get("parent") {
        Some(Value::String(s)) if !s.is_empty() && s != "null" => Some(s.clone()),
        _ => None,
    }
}
