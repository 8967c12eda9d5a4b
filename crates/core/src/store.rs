//! Per-conversation store configuration.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The store a caller is shopping in, as fetched from its remote config.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreContext {
    #[serde(default)]
    pub store_id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub industry: Option<String>,
    #[serde(default)]
    pub services: Vec<String>,
    #[serde(default)]
    pub currency: Option<String>,
    /// Anything else the config carries.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl StoreContext {
    pub fn new(store_id: impl Into<String>) -> Self {
        Self {
            store_id: store_id.into(),
            ..Default::default()
        }
    }

    /// Parses a fetched config, falling back to `store_id` when the config
    /// does not name itself.
    pub fn from_config(store_id: &str, config: Value) -> Result<Self, serde_json::Error> {
        let mut context: StoreContext = serde_json::from_value(config)?;
        if context.store_id.is_empty() {
            context.store_id = store_id.to_string();
        }
        Ok(context)
    }

    /// The fulfillment context embedded in routing prompts.
    pub fn describe(&self) -> String {
        let mut lines = vec![format!(
            "Store: {}",
            self.name.as_deref().unwrap_or(&self.store_id)
        )];
        if let Some(industry) = &self.industry {
            lines.push(format!("Industry: {}", industry));
        }
        if let Some(currency) = &self.currency {
            lines.push(format!("Currency: {}", currency));
        }
        if self.services.is_empty() {
            lines.push("Services: none listed".to_string());
        } else {
            lines.push(format!("Services: {}", self.services.join(", ")));
        }
        lines.join("\n")
    }
}
