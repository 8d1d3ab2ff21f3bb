//! Settings resolution for the Sage services
//!
//! Every external endpoint, credential, and tuning knob lives in one
//! explicit [`Settings`] struct that is constructed once at startup and
//! injected into the orchestrator. Nothing reads ambient globals after
//! that point.
//!
//! Resolution priority per field: environment variable (`SAGE_*`) →
//! TOML config file → compiled default.

use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Service settings, fully resolved.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// HTTP listen port for the profile service
    pub listen_port: u16,
    /// SQLite database path
    pub database_path: PathBuf,

    /// Base URL of the county record service (record page, development
    /// summary, permits, service providers are all paths under it)
    pub record_base_url: String,
    /// Base URL of the GIS feature/identify service
    pub gis_base_url: String,
    /// Geocoding service URL (address -> projected candidates)
    pub geocoder_url: String,
    /// Elevation service URL (coordinate -> elevation)
    pub elevation_url: String,
    /// Static top-down imagery service URL (coordinate -> raster)
    pub imagery_url: String,
    /// Street-level imagery service URL (coordinate -> photo)
    pub street_imagery_url: String,
    /// Document-parsing service URL (document URL -> extracted text)
    pub doc_parser_url: String,
    /// Well registry search URL (address -> well records)
    pub well_registry_url: String,
    /// URL of the jurisdiction's design-standards document
    pub design_standards_url: String,

    /// API key shared by the elevation/imagery/street services
    pub maps_api_key: String,

    /// Chat-completions endpoint of the language-model classifier
    pub llm_endpoint: String,
    /// API key for the classifier service
    pub llm_api_key: String,
    /// Model used for text classification
    pub llm_text_model: String,
    /// Model used for vision classification
    pub llm_vision_model: String,

    /// Maximum providers executing concurrently within a wave
    pub max_concurrency: usize,
    /// Per-provider timeout budget (seconds)
    pub provider_timeout_secs: u64,
    /// Whole-run deadline (seconds)
    pub run_deadline_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            listen_port: 5730,
            database_path: default_database_path(),
            record_base_url: "https://dial.deschutes.org".to_string(),
            gis_base_url: "https://maps.deschutes.org/arcgis/rest/services/Operational_Layers/MapServer".to_string(),
            geocoder_url: "https://geocode.arcgis.com/arcgis/rest/services/World/GeocodeServer/findAddressCandidates".to_string(),
            elevation_url: "https://maps.googleapis.com/maps/api/elevation/json".to_string(),
            imagery_url: "https://maps.googleapis.com/maps/api/staticmap".to_string(),
            street_imagery_url: "https://maps.googleapis.com/maps/api/streetview".to_string(),
            doc_parser_url: "http://127.0.0.1:5741/extract".to_string(),
            well_registry_url: "https://apps.wrd.state.or.us/apps/gw/well_log/search".to_string(),
            design_standards_url: "https://www.deschutes.org/sites/default/files/fileattachments/design_requirements.pdf".to_string(),
            maps_api_key: String::new(),
            llm_endpoint: "https://api.openai.com/v1/chat/completions".to_string(),
            llm_api_key: String::new(),
            llm_text_model: "gpt-4o-mini".to_string(),
            llm_vision_model: "gpt-4o".to_string(),
            max_concurrency: 4,
            provider_timeout_secs: 30,
            run_deadline_secs: 120,
        }
    }
}

impl Settings {
    /// Load settings: TOML file (if present) overlaid with `SAGE_*`
    /// environment variables.
    pub fn load() -> Result<Self> {
        let mut settings = match config_file_path() {
            Some(path) if path.exists() => Self::from_toml_file(&path)?,
            _ => Self::default(),
        };
        settings.apply_env_overrides();
        settings.validate()?;
        Ok(settings)
    }

    /// Parse settings from a TOML file. Absent keys fall back to defaults.
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
        toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))
    }

    /// Overlay `SAGE_*` environment variables (highest priority).
    pub fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("SAGE_LISTEN_PORT") {
            if let Ok(port) = v.parse() {
                self.listen_port = port;
            }
        }
        if let Ok(v) = std::env::var("SAGE_DATABASE_PATH") {
            self.database_path = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("SAGE_RECORD_BASE_URL") {
            self.record_base_url = v;
        }
        if let Ok(v) = std::env::var("SAGE_GIS_BASE_URL") {
            self.gis_base_url = v;
        }
        if let Ok(v) = std::env::var("SAGE_GEOCODER_URL") {
            self.geocoder_url = v;
        }
        if let Ok(v) = std::env::var("SAGE_ELEVATION_URL") {
            self.elevation_url = v;
        }
        if let Ok(v) = std::env::var("SAGE_IMAGERY_URL") {
            self.imagery_url = v;
        }
        if let Ok(v) = std::env::var("SAGE_STREET_IMAGERY_URL") {
            self.street_imagery_url = v;
        }
        if let Ok(v) = std::env::var("SAGE_DOC_PARSER_URL") {
            self.doc_parser_url = v;
        }
        if let Ok(v) = std::env::var("SAGE_WELL_REGISTRY_URL") {
            self.well_registry_url = v;
        }
        if let Ok(v) = std::env::var("SAGE_DESIGN_STANDARDS_URL") {
            self.design_standards_url = v;
        }
        if let Ok(v) = std::env::var("SAGE_MAPS_API_KEY") {
            self.maps_api_key = v;
        }
        if let Ok(v) = std::env::var("SAGE_LLM_ENDPOINT") {
            self.llm_endpoint = v;
        }
        if let Ok(v) = std::env::var("SAGE_LLM_API_KEY") {
            self.llm_api_key = v;
        }
        if let Ok(v) = std::env::var("SAGE_LLM_TEXT_MODEL") {
            self.llm_text_model = v;
        }
        if let Ok(v) = std::env::var("SAGE_LLM_VISION_MODEL") {
            self.llm_vision_model = v;
        }
        if let Ok(v) = std::env::var("SAGE_MAX_CONCURRENCY") {
            if let Ok(n) = v.parse() {
                self.max_concurrency = n;
            }
        }
        if let Ok(v) = std::env::var("SAGE_PROVIDER_TIMEOUT_SECS") {
            if let Ok(n) = v.parse() {
                self.provider_timeout_secs = n;
            }
        }
        if let Ok(v) = std::env::var("SAGE_RUN_DEADLINE_SECS") {
            if let Ok(n) = v.parse() {
                self.run_deadline_secs = n;
            }
        }
    }

    fn validate(&self) -> Result<()> {
        if self.max_concurrency == 0 {
            return Err(Error::Config(
                "max_concurrency must be at least 1".to_string(),
            ));
        }
        if self.run_deadline_secs == 0 {
            return Err(Error::Config(
                "run_deadline_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Platform config file location: `<config dir>/sage/sage.toml`.
fn config_file_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("sage").join("sage.toml"))
}

/// Platform data location: `<data dir>/sage/sage.db`.
fn default_database_path() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("sage").join("sage.db"))
        .unwrap_or_else(|| PathBuf::from("./sage.db"))
}
