use std::env;
use std::path::Path;

use chrono::Duration;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::flare_detector::{default_class_bands, ClassBand, ClassificationTable, DetectionConfig};

pub const CONFIG_PATH_VAR: &str = "GOESFLUX_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value for {var}: {value}")]
    InvalidEnv { var: &'static str, value: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub upstream: UpstreamConfig,
    pub detection: DetectionSettings,
    pub storage: StorageConfig,
    pub annotations: AnnotationConfig,
    pub secrets: SecretsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    pub base_url: String,
    pub satellite: String,
    pub timeout_secs: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: "https://services.swpc.noaa.gov".to_string(),
            satellite: "primary".to_string(),
            timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionSettings {
    pub storage_window_hours: i64,
    pub lookback_days: i64,
    pub short_threshold: f64,
    pub long_threshold: f64,
    pub min_duration_minutes: i64,
    pub classes: Vec<ClassBand>,
}

impl Default for DetectionSettings {
    fn default() -> Self {
        Self {
            storage_window_hours: 24,
            lookback_days: 7,
            short_threshold: 1e-7,
            long_threshold: 1e-6,
            min_duration_minutes: 3,
            classes: default_class_bands(),
        }
    }
}

impl DetectionSettings {
    pub fn storage_window(&self) -> Duration {
        Duration::hours(self.storage_window_hours)
    }

    pub fn lookback(&self) -> Duration {
        Duration::days(self.lookback_days)
    }

    pub fn detection_config(&self) -> Result<DetectionConfig, ConfigError> {
        Ok(DetectionConfig {
            short_threshold: self.short_threshold,
            long_threshold: self.long_threshold,
            min_duration: Duration::minutes(self.min_duration_minutes),
            classes: ClassificationTable::new(self.classes.clone())?,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub bucket: String,
    pub region: String,
    pub endpoint: Option<String>,
    pub force_path_style: bool,
    pub prefix: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            bucket: "goesflux-timeseries".to_string(),
            region: "us-east-1".to_string(),
            endpoint: None,
            force_path_style: false,
            prefix: "goes-xrs".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnnotationConfig {
    pub grafana_url: Option<String>,
    pub dashboard_name: String,
    pub panel_name: String,
    pub tags: Vec<String>,
    pub timeout_secs: u64,
}

impl Default for AnnotationConfig {
    fn default() -> Self {
        Self {
            grafana_url: None,
            dashboard_name: "Context Observations".to_string(),
            panel_name: "GOES XRS".to_string(),
            tags: vec!["GOES XRS".to_string()],
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecretsConfig {
    pub secret_reference: Option<String>,
    pub api_key_field: String,
}

impl Default for SecretsConfig {
    fn default() -> Self {
        Self {
            secret_reference: None,
            api_key_field: "grafana_api_key".to_string(),
        }
    }
}

impl AppConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Reads `GOESFLUX_CONFIG` when set (defaults otherwise), then applies environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match env::var(CONFIG_PATH_VAR) {
            Ok(path) => Self::from_file(path)?,
            Err(_) => Self::default(),
        };
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(url) = env::var("SWPC_BASE_URL") {
            self.upstream.base_url = url;
        }
        if let Ok(bucket) = env::var("BUCKET_NAME") {
            self.storage.bucket = bucket;
        }
        if let Ok(endpoint) = env::var("BUCKET_ENDPOINT") {
            self.storage.endpoint = Some(endpoint);
            self.storage.force_path_style = true;
        }
        if let Ok(region) = env::var("AWS_REGION") {
            self.storage.region = region;
        }
        if let Ok(url) = env::var("GRAFANA_URL") {
            self.annotations.grafana_url = Some(url);
        }
        if let Ok(arn) = env::var("SECRET_ARN") {
            self.secrets.secret_reference = Some(arn);
        }
        if let Ok(value) = env::var("GOESFLUX_LOOKBACK_DAYS") {
            self.detection.lookback_days = value.parse().map_err(|_| ConfigError::InvalidEnv {
                var: "GOESFLUX_LOOKBACK_DAYS",
                value,
            })?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let detection = &self.detection;
        if detection.storage_window_hours <= 0 {
            return Err(ConfigError::Invalid(
                "detection.storage_window_hours must be positive".into(),
            ));
        }
        if detection.lookback_days <= 0 {
            return Err(ConfigError::Invalid(
                "detection.lookback_days must be positive".into(),
            ));
        }
        if detection.lookback_days > 7 {
            return Err(ConfigError::Invalid(
                "detection.lookback_days cannot exceed the 7-day upstream feed".into(),
            ));
        }
        if detection.lookback() < detection.storage_window() {
            return Err(ConfigError::Invalid(
                "detection.lookback_days must cover the storage window".into(),
            ));
        }
        for (name, value) in [
            ("short_threshold", detection.short_threshold),
            ("long_threshold", detection.long_threshold),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(ConfigError::Invalid(format!(
                    "detection.{name} must be positive, got {value}"
                )));
            }
        }
        if detection.min_duration_minutes < 0 {
            return Err(ConfigError::Invalid(
                "detection.min_duration_minutes cannot be negative".into(),
            ));
        }
        ClassificationTable::new(detection.classes.clone())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = AppConfig::from_toml_str(
            r#"
            [detection]
            long_threshold = 5e-6
            min_duration_minutes = 10

            [annotations]
            grafana_url = "https://grafana.example.org"
            "#,
        )
        .unwrap();

        assert_eq!(config.detection.long_threshold, 5e-6);
        assert_eq!(config.detection.short_threshold, 1e-7);
        assert_eq!(config.detection.lookback_days, 7);
        assert_eq!(config.annotations.panel_name, "GOES XRS");
        assert_eq!(config.detection.classes.len(), 5);
    }

    #[test]
    fn custom_class_table_is_loaded() {
        let config = AppConfig::from_toml_str(
            r#"
            [[detection.classes]]
            label = "quiet"
            floor = 1e-7

            [[detection.classes]]
            label = "loud"
            floor = 1e-5
            "#,
        )
        .unwrap();

        let detection = config.detection.detection_config().unwrap();
        assert_eq!(detection.classes.classify(3e-5), "loud3.0");
    }

    #[test]
    fn rejects_non_positive_threshold() {
        let err = AppConfig::from_toml_str(
            r#"
            [detection]
            short_threshold = 0.0
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_lookback_shorter_than_storage_window() {
        let err = AppConfig::from_toml_str(
            r#"
            [detection]
            storage_window_hours = 72
            lookback_days = 1
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }
}
