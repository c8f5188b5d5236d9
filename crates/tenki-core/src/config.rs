use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::error::{AppError, ConfigError};

type Result<T> = std::result::Result<T, AppError>;

const APP_DIR: &str = "tenki";
const DEFAULT_AREA_URL: &str = "http://www.jma.go.jp/bosai/common/const/area.json";
const DEFAULT_FORECAST_BASE_URL: &str = "https://www.jma.go.jp/bosai/forecast/data/forecast/";
const DEFAULT_TIMEOUT_SECS: u64 = 10;
const MAX_REASONABLE_TIMEOUT_SECS: u64 = 120;

/// Configuration validation errors
#[derive(Debug, Clone)]
pub struct ConfigValidationError {
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Result of config validation
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub errors: Vec<ConfigValidationError>,
    pub warnings: Vec<ConfigValidationError>,
}

impl ValidationResult {
    /// Returns true if there are no errors (warnings are OK)
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ConfigValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    pub fn add_warning(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.warnings.push(ConfigValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    /// Get a user-friendly message summarizing all errors
    pub fn error_summary(&self) -> String {
        self.errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// A region picked by id and display name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionChoice {
    pub id: String,
    pub name: String,
}

impl Default for RegionChoice {
    fn default() -> Self {
        Self {
            id: "130000".to_string(),
            name: "東京都".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Region hierarchy document (zones, offices, fine areas)
    #[serde(default = "default_area_url")]
    pub area_url: String,

    /// Prefix for per-office forecast documents; `{office_id}.json` is appended
    #[serde(default = "default_forecast_base_url")]
    pub forecast_base_url: String,

    /// Upper bound for every upstream request
    #[serde(default = "default_timeout_secs")]
    pub request_timeout_secs: u64,

    /// SQLite file holding the forecast history
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    /// Region shown on startup
    #[serde(default)]
    pub default_region: RegionChoice,
}

fn default_area_url() -> String {
    DEFAULT_AREA_URL.to_string()
}

fn default_forecast_base_url() -> String {
    DEFAULT_FORECAST_BASE_URL.to_string()
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}

fn default_database_path() -> PathBuf {
    default_config_dir().join("weather_history.db")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            area_url: default_area_url(),
            forecast_base_url: default_forecast_base_url(),
            request_timeout_secs: default_timeout_secs(),
            database_path: default_database_path(),
            default_region: RegionChoice::default(),
        }
    }
}

impl Config {
    /// Load configuration from the default location, creating it if it doesn't exist
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    /// Load configuration from an explicit file, writing defaults there if missing
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            let config = Self::default();
            config.save_to(path)?;
            tracing::info!("Wrote default configuration to {}", path.display());
            return Ok(config);
        }

        let contents = std::fs::read_to_string(path)?;

        let config: Config = toml::from_str(&contents)
            .map_err(|e| ConfigError::ParseError(format!("{}: {}", path.display(), e)))?;

        Ok(config)
    }

    /// Load configuration from the default location and validate it
    ///
    /// Returns the config along with any validation warnings.
    /// Returns an error if validation fails with critical errors.
    pub fn load_validated() -> Result<(Self, ValidationResult)> {
        Self::load_validated_from(&Self::config_path())
    }

    pub fn load_validated_from(path: &Path) -> Result<(Self, ValidationResult)> {
        let config = Self::load_from(path)?;
        let validation = config.validate();

        if !validation.is_valid() {
            return Err(ConfigError::Invalid(validation.error_summary()).into());
        }

        for warning in &validation.warnings {
            tracing::warn!("Config warning: {}", warning);
        }

        Ok((config, validation))
    }

    /// Validate the configuration
    pub fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::default();

        self.validate_url(&self.area_url, "area_url", &mut result);
        self.validate_url(&self.forecast_base_url, "forecast_base_url", &mut result);

        // Office ids are appended verbatim
        if !self.forecast_base_url.ends_with('/') {
            result.add_error("forecast_base_url", "Base URL must end with '/'");
        }

        if self.request_timeout_secs == 0 {
            result.add_error(
                "request_timeout_secs",
                "Timeout must be greater than 0 seconds",
            );
        } else if self.request_timeout_secs > MAX_REASONABLE_TIMEOUT_SECS {
            result.add_warning(
                "request_timeout_secs",
                format!(
                    "Timeout is unusually long (>{} seconds)",
                    MAX_REASONABLE_TIMEOUT_SECS
                ),
            );
        }

        if self.default_region.id.trim().is_empty() {
            result.add_error("default_region.id", "Default region id must not be empty");
        }

        if self.database_path.as_os_str().is_empty() {
            result.add_error("database_path", "Database path must not be empty");
        }

        result
    }

    fn validate_url(&self, url_str: &str, field_name: &str, result: &mut ValidationResult) {
        match Url::parse(url_str) {
            Ok(url) => {
                if url.scheme() != "http" && url.scheme() != "https" {
                    result.add_error(
                        field_name,
                        format!("URL must use http or https scheme, got: {}", url.scheme()),
                    );
                }

                if url.host().is_none() {
                    result.add_error(field_name, "URL must have a host");
                }
            }
            Err(e) => {
                result.add_error(field_name, format!("Invalid URL: {}", e));
            }
        }
    }

    /// Network bound applied to catalog and forecast requests
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents =
            toml::to_string_pretty(self).map_err(|e| ConfigError::Invalid(e.to_string()))?;

        std::fs::write(path, contents)?;

        Ok(())
    }

    /// Get the path to the configuration file
    pub fn config_path() -> PathBuf {
        default_config_dir().join("config.toml")
    }
}
