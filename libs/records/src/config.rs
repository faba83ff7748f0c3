//! Configuration management for record orchestration

use crate::{Error, Result};
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub fhir: FhirConfig,
    #[serde(default)]
    pub prediction: PredictionConfig,
    #[serde(default)]
    pub assembly: AssemblyConfig,
    #[serde(default)]
    pub listing: ListingConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FhirConfig {
    /// Base URL of the FHIR REST endpoint, e.g. `http://fhir-server:8080/fhir`.
    #[serde(default = "default_fhir_base_url")]
    pub base_url: String,
    /// Per-request timeout in seconds, so a hung server cannot block a caller
    /// indefinitely. Default: 30
    #[serde(default = "default_fhir_timeout")]
    pub timeout_seconds: u64,
    /// Result pages fetched for one search before it fails. Default: 50
    #[serde(default = "default_max_search_pages")]
    pub max_search_pages: usize,
}

impl Default for FhirConfig {
    fn default() -> Self {
        Self {
            base_url: default_fhir_base_url(),
            timeout_seconds: default_fhir_timeout(),
            max_search_pages: default_max_search_pages(),
        }
    }
}

impl FhirConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PredictionConfig {
    /// Base URL of the risk prediction service.
    #[serde(default = "default_prediction_base_url")]
    pub base_url: String,
    /// Scoring may be slow; Default: 60
    #[serde(default = "default_prediction_timeout")]
    pub timeout_seconds: u64,
}

impl Default for PredictionConfig {
    fn default() -> Self {
        Self {
            base_url: default_prediction_base_url(),
            timeout_seconds: default_prediction_timeout(),
        }
    }
}

impl PredictionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

/// What to do with a Patient whose dependents could not all be created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CompensationPolicy {
    /// Purge the Patient and whatever dependents were created.
    #[default]
    Rollback,
    /// Leave the partial graph and report it as incomplete.
    Retain,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct AssemblyConfig {
    #[serde(default)]
    pub compensation: CompensationPolicy,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListingConfig {
    /// Upper bound on per-patient lookups in flight at once. Default: 8
    #[serde(default = "default_max_concurrent_lookups")]
    pub max_concurrent_lookups: usize,
    /// Source the ten-year CHD probability from stored RiskAssessments.
    /// When false the field is left empty. Default: true
    #[serde(default = "default_true")]
    pub include_risk: bool,
}

impl Default for ListingConfig {
    fn default() -> Self {
        Self {
            max_concurrent_lookups: default_max_concurrent_lookups(),
            include_risk: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level or EnvFilter directive (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Use JSON formatting for logs
    #[serde(default)]
    pub json: bool,

    /// Enable file logging in addition to console
    #[serde(default)]
    pub file_enabled: bool,

    /// Directory for log files (default: ./logs)
    #[serde(default = "default_log_directory")]
    pub file_directory: String,

    /// Log file prefix (default: cardiorisk)
    #[serde(default = "default_log_file_prefix")]
    pub file_prefix: String,

    /// Log rotation: daily, hourly, minutely, never (default: daily)
    #[serde(default = "default_log_rotation")]
    pub file_rotation: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
            file_enabled: false,
            file_directory: default_log_directory(),
            file_prefix: default_log_file_prefix(),
            file_rotation: default_log_rotation(),
        }
    }
}

fn default_fhir_base_url() -> String {
    "http://fhir-server:8080/fhir".to_string()
}

fn default_fhir_timeout() -> u64 {
    30
}

fn default_max_search_pages() -> usize {
    50
}

fn default_prediction_base_url() -> String {
    "http://model-service:8000".to_string()
}

fn default_prediction_timeout() -> u64 {
    60
}

fn default_max_concurrent_lookups() -> usize {
    8
}

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_directory() -> String {
    "./logs".to_string()
}

fn default_log_file_prefix() -> String {
    "cardiorisk".to_string()
}

fn default_log_rotation() -> String {
    "daily".to_string()
}

impl Config {
    /// Load configuration from defaults, an optional `cardiorisk` config file,
    /// and environment variables.
    pub fn load() -> Result<Self> {
        // Load .env file if present
        dotenvy::dotenv().ok();
        Self::load_from(config::File::with_name("cardiorisk").required(false))
    }

    /// Like [`Config::load`], but reads the given file, which must exist.
    pub fn load_with_file(path: &std::path::Path) -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::load_from(config::File::from(path).required(true))
    }

    /// Load configuration with an explicit file source layered over defaults.
    pub fn load_from<S>(file: S) -> Result<Self>
    where
        S: config::Source + Send + Sync + 'static,
    {
        let config = config::Config::builder()
            .set_default("fhir.base_url", default_fhir_base_url())?
            .set_default("fhir.timeout_seconds", default_fhir_timeout())?
            .set_default("fhir.max_search_pages", default_max_search_pages() as i64)?
            .set_default("prediction.base_url", default_prediction_base_url())?
            .set_default("prediction.timeout_seconds", default_prediction_timeout())?
            .set_default("assembly.compensation", "rollback")?
            .set_default(
                "listing.max_concurrent_lookups",
                default_max_concurrent_lookups() as i64,
            )?
            .set_default("listing.include_risk", default_true())?
            .set_default("logging.level", default_log_level())?
            .set_default("logging.json", false)?
            .set_default("logging.file_enabled", false)?
            .set_default("logging.file_directory", default_log_directory())?
            .set_default("logging.file_prefix", default_log_file_prefix())?
            .set_default("logging.file_rotation", default_log_rotation())?
            .add_source(file)
            // Uses double underscore (__) to map to nested config structure
            // Example: CARDIORISK__FHIR__BASE_URL → config.fhir.base_url
            .add_source(
                config::Environment::with_prefix("CARDIORISK")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Self = config.try_deserialize()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        validate_base_url("fhir.base_url", &self.fhir.base_url)?;
        validate_base_url("prediction.base_url", &self.prediction.base_url)?;

        if self.fhir.timeout_seconds == 0 {
            return Err(Error::Config("fhir.timeout_seconds must be > 0".to_string()));
        }
        if self.fhir.max_search_pages == 0 {
            return Err(Error::Config("fhir.max_search_pages must be > 0".to_string()));
        }
        if self.prediction.timeout_seconds == 0 {
            return Err(Error::Config(
                "prediction.timeout_seconds must be > 0".to_string(),
            ));
        }
        if self.listing.max_concurrent_lookups == 0 {
            return Err(Error::Config(
                "listing.max_concurrent_lookups must be > 0".to_string(),
            ));
        }
        match self.logging.file_rotation.as_str() {
            "daily" | "hourly" | "minutely" | "never" => {}
            other => {
                return Err(Error::Config(format!(
                    "logging.file_rotation must be one of daily, hourly, minutely, never (got '{other}')"
                )))
            }
        }

        Ok(())
    }
}

fn validate_base_url(key: &str, value: &str) -> Result<()> {
    let url = url::Url::parse(value)
        .map_err(|e| Error::Config(format!("{key} is not a valid URL ({value}): {e}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(Error::Config(format!(
            "{key} must use http or https (got '{}')",
            url.scheme()
        )));
    }
    if url.cannot_be_a_base() {
        return Err(Error::Config(format!("{key} must be an absolute base URL")));
    }
    Ok(())
}
