//! Planning and hazard narrative extraction
//!
//! Asks the text classifier about setbacks, wildfire hazard, and
//! jurisdiction for the parcel's address and zone. The reply must follow
//! a strict `Label: value` line grammar; a reply with none of the
//! expected labels is a classification failure, and a label answered
//! "unknown" leaves that field unavailable rather than guessed.

use crate::types::{
    ContextKey, FieldValue, Provider, ProviderError, ProviderResult, RunContext, Scalar,
};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::debug;

const PROVIDER_ID: &str = "planning";

/// Expected reply labels and the profile field each feeds. Setbacks are
/// numeric feet, the rest are text.
const LABELS: &[(&str, &str, bool)] = &[
    ("Front Setback", "setback_front", true),
    ("Side Setback", "setback_side", true),
    ("Rear Setback", "setback_rear", true),
    ("Solar Setback", "setback_solar", true),
    ("Special Setback", "setback_special", true),
    ("Max Lot Coverage", "max_lot_coverage", true),
    ("Max Building Height", "max_building_height", true),
    ("Wildfire Hazard", "wildfire_hazard", false),
    ("Jurisdiction", "jurisdiction", false),
    ("Fire District", "fire_district", false),
];

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

fn prompt_for(address: &str, zoning: &str) -> String {
    format!(
        "For the property at {address}, zoned {zoning}, in Deschutes County, Oregon, \
         answer with exactly these lines and nothing else. Use the word unknown when \
         you cannot answer a line. Setbacks and height are in feet, lot coverage in \
         percent.\n\
         Front Setback: <number or unknown>\n\
         Side Setback: <number or unknown>\n\
         Rear Setback: <number or unknown>\n\
         Solar Setback: <number or unknown>\n\
         Special Setback: <number or unknown>\n\
         Max Lot Coverage: <number or unknown>\n\
         Max Building Height: <number or unknown>\n\
         Wildfire Hazard: <low, moderate, high, or unknown>\n\
         Jurisdiction: <name or unknown>\n\
         Fire District: <name or unknown>"
    )
}

/// Parse a reply against the label grammar. Returns field name to value
/// for every answered label; an error when no expected label appears.
pub fn parse_reply(reply: &str) -> Result<BTreeMap<&'static str, Scalar>, String> {
    let mut fields = BTreeMap::new();
    let mut labels_seen = 0usize;

    for line in reply.lines() {
        let Some((label, rest)) = line.split_once(':') else {
            continue;
        };
        let label = label.trim();
        let value = rest.trim();
        let Some(&(_, field, numeric)) = LABELS
            .iter()
            .find(|(l, _, _)| l.eq_ignore_ascii_case(label))
        else {
            continue;
        };
        labels_seen += 1;
        if value.is_empty() || value.eq_ignore_ascii_case("unknown") {
            continue;
        }
        if numeric {
            // leading number, tolerating a trailing unit
            let digits: String = value
                .chars()
                .take_while(|c| c.is_ascii_digit() || *c == '.')
                .collect();
            if let Ok(n) = digits.parse::<f64>() {
                fields.insert(field, Scalar::Number(n));
            }
        } else {
            fields.insert(field, Scalar::Text(value.to_string()));
        }
    }

    if labels_seen == 0 {
        return Err("reply contains none of the expected labels".to_string());
    }
    Ok(fields)
}

pub struct PlanningProvider {
    client: reqwest::Client,
    llm_endpoint: String,
    api_key: String,
    model: String,
}

impl PlanningProvider {
    pub fn new(
        client: reqwest::Client,
        llm_endpoint: String,
        api_key: String,
        model: String,
    ) -> Self {
        Self {
            client,
            llm_endpoint,
            api_key,
            model,
        }
    }

    async fn ask(&self, prompt: &str) -> Result<String, ProviderError> {
        let body = serde_json::json!({
            "model": self.model,
            "temperature": 0,
            "messages": [{ "role": "user", "content": prompt }],
        });
        let response = self
            .client
            .post(&self.llm_endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(ProviderError::from_reqwest)?;
        if !response.status().is_success() {
            return Err(ProviderError::from_status(response.status(), "classifier"));
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
impl Provider for PlanningProvider {
    fn id(&self) -> &'static str {
        PROVIDER_ID
    }

    fn requires(&self) -> &'static [ContextKey] {
        &[ContextKey::SiteAddress, ContextKey::Zoning]
    }

    fn supplies(&self) -> &'static [ContextKey] {
        &[]
    }

    async fn execute(&self, ctx: &RunContext) -> ProviderResult {
        let (Some(address), Some(zoning)) = (
            ctx.get_str(ContextKey::SiteAddress),
            ctx.get_str(ContextKey::Zoning),
        ) else {
            return ProviderResult::failure(
                self.id(),
                ProviderError::ExtractionFailure("address or zoning missing from context".to_string()),
            );
        };

        let reply = match self.ask(&prompt_for(address, zoning)).await {
            Ok(reply) => reply,
            Err(e) => return ProviderResult::failure(self.id(), e),
        };

        match parse_reply(&reply) {
            Ok(fields) => {
                debug!(answered = fields.len(), "Classifier reply parsed");
                let source = format!("text classifier ({})", self.model);
                let mut result = ProviderResult::success(self.id());
                for (name, value) in fields {
                    result = result.with_field(match value {
                        Scalar::Number(n) => FieldValue::number(PROVIDER_ID, name, n, &source),
                        Scalar::Text(t) => FieldValue::text(PROVIDER_ID, name, t, &source),
                        Scalar::Flag(b) => FieldValue::flag(PROVIDER_ID, name, b, &source),
                    });
                }
                result
            }
            Err(e) => ProviderResult::failure(
                self.id(),
                ProviderError::ClassificationUncertain(e),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn well_formed_reply_parses_all_fields() {
        let reply = "Front Setback: 20 feet\n\
                     Side Setback: 10\n\
                     Rear Setback: 25 ft\n\
                     Max Lot Coverage: 30 percent\n\
                     Max Building Height: 30\n\
                     Wildfire Hazard: moderate\n\
                     Jurisdiction: Deschutes County\n\
                     Fire District: Rural FPD #2";
        let fields = parse_reply(reply).unwrap();
        assert_eq!(fields.get("setback_front"), Some(&Scalar::Number(20.0)));
        assert_eq!(fields.get("setback_side"), Some(&Scalar::Number(10.0)));
        assert_eq!(fields.get("setback_rear"), Some(&Scalar::Number(25.0)));
        assert_eq!(fields.get("max_lot_coverage"), Some(&Scalar::Number(30.0)));
        assert_eq!(
            fields.get("max_building_height"),
            Some(&Scalar::Number(30.0))
        );
        assert_eq!(
            fields.get("wildfire_hazard"),
            Some(&Scalar::Text("moderate".to_string()))
        );
        assert_eq!(
            fields.get("fire_district"),
            Some(&Scalar::Text("Rural FPD #2".to_string()))
        );
    }

    #[test]
    fn unknown_lines_leave_fields_unavailable() {
        let reply = "Front Setback: unknown\nWildfire Hazard: high";
        let fields = parse_reply(reply).unwrap();
        assert!(fields.get("setback_front").is_none());
        assert_eq!(
            fields.get("wildfire_hazard"),
            Some(&Scalar::Text("high".to_string()))
        );
    }

    #[test]
    fn freeform_reply_is_rejected() {
        let reply = "The setbacks in this zone are generally 20 feet in front.";
        assert!(parse_reply(reply).is_err());
    }

    #[test]
    fn non_numeric_setback_is_not_guessed() {
        let reply = "Front Setback: per plat\nJurisdiction: Deschutes County";
        let fields = parse_reply(reply).unwrap();
        assert!(fields.get("setback_front").is_none());
        assert!(fields.get("jurisdiction").is_some());
    }
}
