//! Street-level power detection
//!
//! Shows the vision classifier a street-level photo at the parcel
//! coordinate and asks a single yes/no question about visible power
//! lines. Any answer other than exactly yes or no is a classification
//! failure, never a guess. The merge policy ranks this below the
//! service-provider narrative.

use crate::types::{
    ContextKey, FieldValue, Provider, ProviderError, ProviderResult, RunContext,
};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

const PROVIDER_ID: &str = "power";

const QUESTION: &str =
    "Are overhead power lines or utility poles visible in this image? Answer exactly yes or no.";

#[derive(Debug, Clone)]
pub struct PowerConfig {
    pub street_imagery_url: String,
    pub maps_api_key: String,
    pub llm_endpoint: String,
    pub llm_api_key: String,
    pub llm_model: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: String,
}

/// Normalize a yes/no reply. Tolerates case and trailing punctuation,
/// nothing else.
pub fn parse_yes_no(reply: &str) -> Result<bool, String> {
    let normalized = reply
        .trim()
        .trim_end_matches(['.', '!'])
        .to_ascii_lowercase();
    match normalized.as_str() {
        "yes" => Ok(true),
        "no" => Ok(false),
        _ => Err(format!("expected yes or no, got '{}'", reply.trim())),
    }
}

pub struct PowerProvider {
    client: reqwest::Client,
    config: PowerConfig,
}

impl PowerProvider {
    pub fn new(client: reqwest::Client, config: PowerConfig) -> Self {
        Self { client, config }
    }

    fn street_image_url(&self, lat: f64, lon: f64) -> String {
        format!(
            "{}?location={},{}&size=640x400&key={}",
            self.config.street_imagery_url, lat, lon, self.config.maps_api_key
        )
    }

    async fn ask_vision(&self, image_url: &str) -> Result<String, ProviderError> {
        let body = serde_json::json!({
            "model": self.config.llm_model,
            "temperature": 0,
            "messages": [{
                "role": "user",
                "content": [
                    { "type": "text", "text": QUESTION },
                    { "type": "image_url", "image_url": { "url": image_url } },
                ],
            }],
        });
        let response = self
            .client
            .post(&self.config.llm_endpoint)
            .bearer_auth(&self.config.llm_api_key)
            .json(&body)
            .send()
            .await
            .map_err(ProviderError::from_reqwest)?;
        if !response.status().is_success() {
            return Err(ProviderError::from_status(
                response.status(),
                "vision classifier",
            ));
        }
        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::ExtractionFailure(e.to_string()))?;
        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| {
                ProviderError::ClassificationUncertain("classifier returned no reply".to_string())
            })
    }
}

#[async_trait]
impl Provider for PowerProvider {
    fn id(&self) -> &'static str {
        PROVIDER_ID
    }

    fn requires(&self) -> &'static [ContextKey] {
        &[ContextKey::Coordinates]
    }

    fn supplies(&self) -> &'static [ContextKey] {
        &[]
    }

    async fn execute(&self, ctx: &RunContext) -> ProviderResult {
        let Some(coord) = ctx.coordinates() else {
            return ProviderResult::failure(
                self.id(),
                ProviderError::ExtractionFailure("no coordinates in context".to_string()),
            );
        };

        let image_url = self.street_image_url(coord.lat, coord.lon);
        let reply = match self.ask_vision(&image_url).await {
            Ok(reply) => reply,
            Err(e) => return ProviderResult::failure(self.id(), e),
        };

        match parse_yes_no(&reply) {
            Ok(visible) => {
                debug!(power_visible = visible, "Vision classifier answered");
                let source = format!("street imagery at {:.6},{:.6}", coord.lat, coord.lon);
                let power_type = if visible {
                    FieldValue::text(PROVIDER_ID, "power_type", "overhead at street", &source)
                } else {
                    FieldValue::absent(PROVIDER_ID, "power_type", &source)
                };
                ProviderResult::success(self.id())
                    .with_field(FieldValue::flag(PROVIDER_ID, "power_visible", visible, &source))
                    .with_field(power_type)
            }
            Err(e) => {
                ProviderResult::failure(self.id(), ProviderError::ClassificationUncertain(e))
            }
        }
    }
}
