//! Taxlot alias resolution
//!
//! The county search endpoint answers a taxlot query with a redirect to
//! the property's record page; the canonical id is the final path
//! segment of wherever the redirect lands. Landing back on a search or
//! results page means the taxlot matched nothing.

use crate::types::{
    ContextKey, Provider, ProviderError, ProviderResult, RunContext,
};
use async_trait::async_trait;
use tracing::debug;

pub struct TaxlotResolver {
    client: reqwest::Client,
    base_url: String,
}

impl TaxlotResolver {
    pub fn new(client: reqwest::Client, base_url: String) -> Self {
        Self { client, base_url }
    }

    async fn resolve(&self, taxlot: &str) -> Result<String, ProviderError> {
        let url = format!("{}/Search/Results?searchterm={}", self.base_url, taxlot);
        debug!(taxlot = %taxlot, url = %url, "Resolving taxlot via search redirect");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(ProviderError::from_reqwest)?;
        if !response.status().is_success() {
            return Err(ProviderError::from_status(response.status(), "record search"));
        }

        let landed = response.url().clone();
        match canonical_id_from_url(landed.path()) {
            Some(id) => Ok(id),
            None => Err(ProviderError::ResolutionFailure(format!(
                "taxlot {} did not redirect to a record page (landed on {})",
                taxlot,
                landed.path()
            ))),
        }
    }
}

/// Extract the canonical id from a record page path. Only an all-digit
/// final segment on a non-search path counts.
fn canonical_id_from_url(path: &str) -> Option<String> {
    if path.contains("/Search") {
        return None;
    }
    let segment = path.trim_end_matches('/').rsplit('/').next()?;
    if !segment.is_empty() && segment.chars().all(|c| c.is_ascii_digit()) {
        Some(segment.to_string())
    } else {
        None
    }
}

#[async_trait]
impl Provider for TaxlotResolver {
    fn id(&self) -> &'static str {
        "resolver"
    }

    fn requires(&self) -> &'static [ContextKey] {
        &[ContextKey::TaxlotId]
    }

    fn supplies(&self) -> &'static [ContextKey] {
        &[ContextKey::PropertyId]
    }

    async fn execute(&self, ctx: &RunContext) -> ProviderResult {
        let Some(taxlot) = ctx.get_str(ContextKey::TaxlotId) else {
            return ProviderResult::failure(
                self.id(),
                ProviderError::ResolutionFailure("no taxlot in context".to_string()),
            );
        };
        match self.resolve(taxlot).await {
            Ok(id) => ProviderResult::success(self.id())
                .with_context(ContextKey::PropertyId, serde_json::json!(id)),
            Err(e) => ProviderResult::failure(self.id(), e),
        }
    }
}
