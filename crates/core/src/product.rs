//! Retrieved products and the retrieval collaborator seam.

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

#[cfg(test)]
use mockall::automock;

/// Where a product sits in the store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Location {
    #[serde(default, deserialize_with = "string_or_number")]
    pub aisle: Option<String>,
    #[serde(default, deserialize_with = "string_or_number")]
    pub section: Option<String>,
    #[serde(default, deserialize_with = "string_or_number")]
    pub shelf: Option<String>,
}

/// Accepts `"4"`, `4` or `null` for location fields.
fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// A product as returned by the retrieval collaborator.
///
/// Everything besides the SKU, location and score is kept verbatim in
/// `attributes`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedProduct {
    pub sku: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(flatten)]
    pub attributes: Map<String, Value>,
}

impl RetrievedProduct {
    pub fn name(&self) -> &str {
        self.attributes
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or("Unknown")
    }

    /// One human-readable line describing where to find the product.
    pub fn location_line(&self) -> String {
        let location = self.location.clone().unwrap_or_default();
        let or_unknown = |v: Option<String>| v.unwrap_or_else(|| "Unknown".to_string());
        format!(
            "{}: aisle {}, section {}, shelf {}",
            self.name(),
            or_unknown(location.aisle),
            or_unknown(location.section),
            or_unknown(location.shelf)
        )
    }
}

/// The payload produced by the `retrieve_products` tool.
///
/// Failures are carried as data so the turn can keep going.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RetrievalResult {
    Found { results: Vec<RetrievedProduct> },
    Failed { error: String },
}

impl RetrievalResult {
    pub fn products(&self) -> &[RetrievedProduct] {
        match self {
            RetrievalResult::Found { results } => results,
            RetrievalResult::Failed { .. } => &[],
        }
    }

    /// Pretty JSON for prompt embedding.
    pub fn to_prompt_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| "{}".to_string())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RetrievalError {
    #[error("no retrieval credential is configured")]
    MissingCredential,
    #[error("retrieval service is unreachable: {0}")]
    Unreachable(String),
    #[error("retrieval service rejected the request ({status}): {body}")]
    Rejected { status: u16, body: String },
    #[error("could not decode retrieval response: {0}")]
    Decode(String),
}

/// The external product search collaborator.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Retriever: Send + Sync {
    /// Returns up to `k` products ranked by relevance to `query`.
    async fn retrieve(&self, query: &str, k: u32) -> Result<Vec<RetrievedProduct>, RetrievalError>;
}
