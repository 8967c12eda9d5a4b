//! Remote store configuration.

use crate::config::STORE_ID_PLACEHOLDER;
use anyhow::{Context, Result, bail};
use concierge_core::store::StoreContext;
use serde_json::Value;
use tracing::{info, warn};

pub struct StoreConfigClient {
    http: reqwest::Client,
    url_template: Option<String>,
}

impl StoreConfigClient {
    pub fn new(http: reqwest::Client, url_template: Option<String>) -> Self {
        Self { http, url_template }
    }

    pub fn config_url(&self, store_id: &str) -> Option<String> {
        self.url_template
            .as_ref()
            .map(|template| template.replace(STORE_ID_PLACEHOLDER, store_id))
    }

    /// Fetches the store's configuration once per connection.
    ///
    /// Without a configured URL the store is known only by its id.
    pub async fn fetch(&self, store_id: &str) -> Result<StoreContext> {
        let Some(url) = self.config_url(store_id) else {
            warn!(store_id, "No STORE_CONFIG_URL configured, using a bare store context");
            return Ok(StoreContext::new(store_id));
        };

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .with_context(|| format!("Failed to reach store config at {}", url))?;
        if !response.status().is_success() {
            bail!("Store config request returned {}", response.status());
        }
        let config: Value = response
            .json()
            .await
            .context("Store config is not valid JSON")?;
        let store = StoreContext::from_config(store_id, config).context("Unexpected store config shape")?;
        info!(store_id, name = ?store.name, "Store config loaded");
        Ok(store)
    }
}
