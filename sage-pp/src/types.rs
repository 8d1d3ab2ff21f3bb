//! Core types for the property profile pipeline
//!
//! A profile run executes a set of [`Provider`]s against a shared
//! [`RunContext`]. Each provider emits [`FieldValue`] observations tagged
//! with provenance; the merge layer later picks one observation per field.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

// ============================================================================
// Identifiers
// ============================================================================

/// How the caller identified the property.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Identifier {
    /// The county's canonical property id
    Canonical(String),
    /// A taxlot alias that must be resolved to the canonical id first
    Taxlot(String),
}

impl Identifier {
    pub fn as_str(&self) -> &str {
        match self {
            Identifier::Canonical(s) | Identifier::Taxlot(s) => s,
        }
    }
}

// ============================================================================
// Field observations
// ============================================================================

/// A typed field value. Serializes untagged so `"R2"` / `4.7` / `true`
/// round-trip naturally through JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Text(String),
    Number(f64),
    Flag(bool),
}

impl Scalar {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Scalar::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Scalar::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_flag(&self) -> Option<bool> {
        match self {
            Scalar::Flag(b) => Some(*b),
            _ => None,
        }
    }
}

/// One provider's observation of one profile field.
///
/// `value: None` means the provider looked and found the field absent; a
/// provider that makes no claim about a field simply does not emit it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldValue {
    /// Canonical field name, e.g. `"zoning"` or `"septic_status"`
    pub name: String,
    pub value: Option<Scalar>,
    /// Human-readable provenance (a URL or service description)
    pub source: String,
    pub observed_at: DateTime<Utc>,
    /// Id of the provider that produced this observation
    pub provider_id: &'static str,
}

impl FieldValue {
    pub fn text(
        provider_id: &'static str,
        name: impl Into<String>,
        value: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            value: Some(Scalar::Text(value.into())),
            source: source.into(),
            observed_at: Utc::now(),
            provider_id,
        }
    }

    pub fn number(
        provider_id: &'static str,
        name: impl Into<String>,
        value: f64,
        source: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            value: Some(Scalar::Number(value)),
            source: source.into(),
            observed_at: Utc::now(),
            provider_id,
        }
    }

    pub fn flag(
        provider_id: &'static str,
        name: impl Into<String>,
        value: bool,
        source: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            value: Some(Scalar::Flag(value)),
            source: source.into(),
            observed_at: Utc::now(),
            provider_id,
        }
    }

    /// The provider checked and the field is positively absent.
    pub fn absent(
        provider_id: &'static str,
        name: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            value: None,
            source: source.into(),
            observed_at: Utc::now(),
            provider_id,
        }
    }
}

// ============================================================================
// Run context
// ============================================================================

/// Keys providers publish into / read from the shared run context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextKey {
    /// Canonical county property id
    PropertyId,
    /// Taxlot identifier as supplied by the caller
    TaxlotId,
    /// Street address of the parcel
    SiteAddress,
    /// Assessor parcel number
    ParcelNumber,
    /// Geographic coordinates of the parcel
    Coordinates,
    /// Zoning designation
    Zoning,
}

/// A latitude/longitude pair in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lat: f64,
    pub lon: f64,
}

/// Shared key/value store a run threads through its providers.
///
/// Writes are first-writer-wins: once a key is present, later suppliers
/// cannot replace it. That keeps downstream providers deterministic with
/// respect to which upstream resolved first.
#[derive(Debug, Clone, Default)]
pub struct RunContext {
    values: HashMap<ContextKey, serde_json::Value>,
}

impl RunContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `value` unless the key is already present. Returns whether
    /// the insert took effect.
    pub fn insert_if_absent(&mut self, key: ContextKey, value: serde_json::Value) -> bool {
        use std::collections::hash_map::Entry;
        match self.values.entry(key) {
            Entry::Vacant(e) => {
                e.insert(value);
                true
            }
            Entry::Occupied(_) => false,
        }
    }

    pub fn contains(&self, key: ContextKey) -> bool {
        self.values.contains_key(&key)
    }

    pub fn get(&self, key: ContextKey) -> Option<&serde_json::Value> {
        self.values.get(&key)
    }

    pub fn get_str(&self, key: ContextKey) -> Option<&str> {
        self.values.get(&key).and_then(|v| v.as_str())
    }

    pub fn coordinates(&self) -> Option<Coordinate> {
        self.values
            .get(&ContextKey::Coordinates)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }
}

// ============================================================================
// Provider errors
// ============================================================================

/// Classified provider failure. The class determines how the run report
/// presents the failure; it never aborts sibling providers.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum ProviderError {
    /// The identifier could not be resolved to a canonical property id
    #[error("Resolution failed: {0}")]
    ResolutionFailure(String),

    /// The external service was unreachable or returned an error status
    #[error("Service unavailable: {0}")]
    ProviderUnavailable(String),

    /// The service responded but the payload could not be interpreted
    #[error("Extraction failed: {0}")]
    ExtractionFailure(String),

    /// A classifier answered outside its permitted response grammar
    #[error("Classification uncertain: {0}")]
    ClassificationUncertain(String),

    /// The provider exceeded its execution budget
    #[error("Timed out after {0} seconds")]
    Timeout(u64),

    /// The merged profile could not be written to storage
    #[error("Persistence failed: {0}")]
    PersistenceFailure(String),
}

impl ProviderError {
    /// Map a transport error to the matching failure class.
    pub fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() {
            ProviderError::ProviderUnavailable(err.to_string())
        } else if err.is_decode() {
            ProviderError::ExtractionFailure(err.to_string())
        } else {
            ProviderError::ProviderUnavailable(err.to_string())
        }
    }

    /// Failure class for a non-success HTTP status.
    pub fn from_status(status: reqwest::StatusCode, service: &str) -> Self {
        ProviderError::ProviderUnavailable(format!("{} returned HTTP {}", service, status))
    }
}

// ============================================================================
// Provider results
// ============================================================================

/// Why a provider was skipped rather than executed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Required context keys that no upstream provider ever supplied
    UnmetDependency { missing: Vec<ContextKey> },
}

/// Terminal status of one provider within a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ProviderStatus {
    Success,
    /// Some fields were produced but at least one extraction step failed
    PartialSuccess { error: ProviderError },
    Failure { error: ProviderError },
    Skipped { reason: SkipReason },
}

impl ProviderStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, ProviderStatus::Success)
    }
}

/// Everything a provider hands back to the scheduler.
#[derive(Debug, Clone)]
pub struct ProviderResult {
    pub provider_id: &'static str,
    pub status: ProviderStatus,
    /// Field observations, in the provider's emission order
    pub emitted: Vec<FieldValue>,
    /// Context values to publish for downstream providers
    pub context: Vec<(ContextKey, serde_json::Value)>,
}

impl ProviderResult {
    pub fn success(provider_id: &'static str) -> Self {
        Self {
            provider_id,
            status: ProviderStatus::Success,
            emitted: Vec::new(),
            context: Vec::new(),
        }
    }

    pub fn partial(provider_id: &'static str, error: ProviderError) -> Self {
        Self {
            provider_id,
            status: ProviderStatus::PartialSuccess { error },
            emitted: Vec::new(),
            context: Vec::new(),
        }
    }

    pub fn failure(provider_id: &'static str, error: ProviderError) -> Self {
        Self {
            provider_id,
            status: ProviderStatus::Failure { error },
            emitted: Vec::new(),
            context: Vec::new(),
        }
    }

    pub fn skipped(provider_id: &'static str, reason: SkipReason) -> Self {
        Self {
            provider_id,
            status: ProviderStatus::Skipped { reason },
            emitted: Vec::new(),
            context: Vec::new(),
        }
    }

    pub fn with_field(mut self, field: FieldValue) -> Self {
        self.emitted.push(field);
        self
    }

    pub fn with_fields(mut self, fields: impl IntoIterator<Item = FieldValue>) -> Self {
        self.emitted.extend(fields);
        self
    }

    pub fn with_context(mut self, key: ContextKey, value: serde_json::Value) -> Self {
        self.context.push((key, value));
        self
    }
}

// ============================================================================
// Provider trait
// ============================================================================

/// One data source in the reconciliation pipeline.
///
/// Implementations must be pure with respect to the context: reads go
/// through [`RunContext`], writes come back in [`ProviderResult::context`].
#[async_trait]
pub trait Provider: Send + Sync {
    /// Stable identifier used in merge priorities and provenance
    fn id(&self) -> &'static str;

    /// Context keys that must be present before this provider runs
    fn requires(&self) -> &'static [ContextKey];

    /// Context keys this provider may publish
    fn supplies(&self) -> &'static [ContextKey];

    /// Per-provider execution budget
    fn timeout(&self) -> Duration {
        Duration::from_secs(30)
    }

    async fn execute(&self, ctx: &RunContext) -> ProviderResult;
}
