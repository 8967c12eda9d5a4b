//! Tool Call Bridge
//!
//! Maps a structured invocation emitted by the backend onto a typed call and
//! its handler. The argument structs below are the single definition of each
//! tool's shape: they drive deserialization in [`ToolCall::parse`] and, through
//! `schemars`, the declarations handed to the backend at session setup.

use crate::agent::AgentType;
use crate::product::{RetrievalResult, RetrievedProduct, Retriever};
use schemars::JsonSchema;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value, json};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{info, warn};

/// Default number of products to retrieve when the backend does not say.
pub const DEFAULT_TOP_K: u32 = 4;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ToolError {
    #[error("unknown tool '{0}'")]
    UnknownTool(String),
    #[error("invalid arguments for '{tool}': {reason}")]
    InvalidArguments { tool: &'static str, reason: String },
}

// --- Argument payloads ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RetrieveProductsArgs {
    #[schemars(
        description = "The search query for products, combining names, attributes, and other details."
    )]
    pub query: String,
    #[schemars(with = "Option<u32>", description = "The number of top results to retrieve.")]
    #[serde(default, deserialize_with = "lenient_count")]
    pub k: Option<u32>,
}

/// The backend sometimes sends integers as `4.0`.
fn lenient_count<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Number(n)) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0 && *f >= 0.0).map(|f| f as u64))
            .and_then(|v| u32::try_from(v).ok()),
        _ => None,
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SetAgentArgs {
    #[schemars(description = "The type of agent to handle the query")]
    pub agent_type: AgentType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ValidateProductsArgs {
    #[schemars(description = "The list of product SKUs to validate.")]
    pub products: Vec<String>,
}

// --- Names and declarations ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolName {
    RetrieveProducts,
    SetAgent,
    ValidateProducts,
}

impl ToolName {
    pub const ALL: [ToolName; 3] = [
        ToolName::RetrieveProducts,
        ToolName::SetAgent,
        ToolName::ValidateProducts,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ToolName::RetrieveProducts => "retrieve_products",
            ToolName::SetAgent => "set_agent",
            ToolName::ValidateProducts => "validate_products",
        }
    }

    pub fn from_name(name: &str) -> Option<ToolName> {
        ToolName::ALL.into_iter().find(|tool| tool.as_str() == name)
    }

    fn description(&self) -> &'static str {
        match self {
            ToolName::RetrieveProducts => {
                "Generates a search query for finding products in the store's catalogue."
            }
            ToolName::SetAgent => "Selects the most appropriate agent type based on the user query",
            ToolName::ValidateProducts => {
                "Validates which of the retrieved products are relevant to the user's query."
            }
        }
    }

    pub fn declaration(&self) -> ToolDeclaration {
        let parameters = match self {
            ToolName::RetrieveProducts => parameters_schema::<RetrieveProductsArgs>(),
            ToolName::SetAgent => parameters_schema::<SetAgentArgs>(),
            ToolName::ValidateProducts => parameters_schema::<ValidateProductsArgs>(),
        };
        ToolDeclaration {
            name: self.as_str().to_string(),
            description: self.description().to_string(),
            parameters,
        }
    }
}

/// A tool as advertised to the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDeclaration {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

pub fn declarations() -> Vec<ToolDeclaration> {
    ToolName::ALL.iter().map(ToolName::declaration).collect()
}

/// Reduces a generated JSON schema to `{type: object, properties, required}`.
///
/// Only `type`, `description`, `enum` and `items` survive on each property;
/// references into `$defs` are inlined and nullable types collapse to their
/// non-null member.
fn parameters_schema<T: JsonSchema>() -> Value {
    let root = serde_json::to_value(schemars::schema_for!(T)).unwrap_or(Value::Null);
    let defs = root.get("$defs").cloned().unwrap_or(Value::Null);

    let properties: Map<String, Value> = root
        .get("properties")
        .and_then(Value::as_object)
        .map(|props| {
            props
                .iter()
                .map(|(name, prop)| (name.clone(), simplify_property(prop, &defs)))
                .collect()
        })
        .unwrap_or_default();
    let required = root.get("required").cloned().unwrap_or_else(|| json!([]));

    json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

fn simplify_property(prop: &Value, defs: &Value) -> Value {
    let mut resolved = Map::new();
    if let Some(reference) = prop.get("$ref").and_then(Value::as_str) {
        let name = reference.rsplit('/').next().unwrap_or_default();
        if let Some(def) = defs.get(name).and_then(Value::as_object) {
            resolved.extend(def.clone());
        }
    }
    if let Some(own) = prop.as_object() {
        resolved.extend(own.clone());
    }

    let mut simplified = Map::new();
    if let Some(ty) = resolved.get("type") {
        let ty = match ty {
            Value::Array(types) => types
                .iter()
                .find(|t| t.as_str() != Some("null"))
                .cloned()
                .unwrap_or(Value::Null),
            other => other.clone(),
        };
        simplified.insert("type".into(), ty);
    }
    for key in ["description", "enum"] {
        if let Some(value) = resolved.get(key) {
            simplified.insert(key.into(), value.clone());
        }
    }
    if let Some(items) = resolved.get("items") {
        simplified.insert("items".into(), simplify_property(items, defs));
    }
    Value::Object(simplified)
}

// --- Calls and results ---

/// A decoded tool invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolCall {
    RetrieveProducts(RetrieveProductsArgs),
    SetAgent(SetAgentArgs),
    ValidateProducts(ValidateProductsArgs),
}

impl ToolCall {
    pub fn parse(name: &str, arguments: &Map<String, Value>) -> Result<ToolCall, ToolError> {
        let tool = ToolName::from_name(name).ok_or_else(|| ToolError::UnknownTool(name.into()))?;
        let invalid = |e: serde_json::Error| ToolError::InvalidArguments {
            tool: tool.as_str(),
            reason: e.to_string(),
        };
        let value = Value::Object(arguments.clone());

        match tool {
            ToolName::RetrieveProducts => serde_json::from_value(value)
                .map(ToolCall::RetrieveProducts)
                .map_err(invalid),
            ToolName::SetAgent => {
                let agent_type = arguments
                    .get("agent_type")
                    .and_then(Value::as_str)
                    .map(AgentType::parse_or_fallback)
                    .unwrap_or_default();
                Ok(ToolCall::SetAgent(SetAgentArgs { agent_type }))
            }
            ToolName::ValidateProducts => serde_json::from_value(value)
                .map(ToolCall::ValidateProducts)
                .map_err(invalid),
        }
    }

    pub fn name(&self) -> ToolName {
        match self {
            ToolCall::RetrieveProducts(_) => ToolName::RetrieveProducts,
            ToolCall::SetAgent(_) => ToolName::SetAgent,
            ToolCall::ValidateProducts(_) => ToolName::ValidateProducts,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ToolResult {
    Retrieved(RetrievalResult),
    AgentSelected(AgentType),
    Validated(Vec<RetrievedProduct>),
}

/// Keeps the candidates whose SKU was requested, in request order.
///
/// SKUs that are not among the candidates are dropped silently; the backend
/// cannot make the caller display a product it invented.
pub fn validate_products(skus: &[String], candidates: &[RetrievedProduct]) -> Vec<RetrievedProduct> {
    let by_sku: HashMap<&str, &RetrievedProduct> =
        candidates.iter().map(|p| (p.sku.as_str(), p)).collect();
    let mut seen = HashSet::new();
    skus.iter()
        .filter(|sku| seen.insert(sku.as_str()))
        .filter_map(|sku| by_sku.get(sku.as_str()).map(|p| (*p).clone()))
        .collect()
}

/// Executes decoded tool calls.
pub struct ToolBridge {
    retriever: Arc<dyn Retriever>,
    default_k: u32,
}

impl ToolBridge {
    pub fn new(retriever: Arc<dyn Retriever>) -> Self {
        Self {
            retriever,
            default_k: DEFAULT_TOP_K,
        }
    }

    pub fn with_default_k(mut self, k: u32) -> Self {
        self.default_k = k.max(1);
        self
    }

    pub async fn retrieve(&self, args: RetrieveProductsArgs) -> RetrievalResult {
        let k = args.k.filter(|k| *k > 0).unwrap_or(self.default_k);
        info!(query = %args.query, k, "Executing tool 'retrieve_products'");
        match self.retriever.retrieve(&args.query, k).await {
            Ok(results) => RetrievalResult::Found { results },
            Err(e) => {
                warn!(error = %e, "Product retrieval failed");
                RetrievalResult::Failed {
                    error: e.to_string(),
                }
            }
        }
    }

    /// Runs the handler for `call`. Never fails: retrieval problems come back
    /// as [`RetrievalResult::Failed`].
    ///
    /// `candidates` is the product set `validate_products` filters against.
    pub async fn dispatch(&self, call: ToolCall, candidates: &[RetrievedProduct]) -> ToolResult {
        match call {
            ToolCall::RetrieveProducts(args) => ToolResult::Retrieved(self.retrieve(args).await),
            ToolCall::SetAgent(args) => {
                info!(agent = %args.agent_type, "Executing tool 'set_agent'");
                ToolResult::AgentSelected(args.agent_type)
            }
            ToolCall::ValidateProducts(args) => {
                let validated = validate_products(&args.products, candidates);
                info!(
                    requested = args.products.len(),
                    kept = validated.len(),
                    "Executing tool 'validate_products'"
                );
                ToolResult::Validated(validated)
            }
        }
    }
}
