pub mod manifest;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct GreenlightConfig {
    #[serde(default)]
    pub manifest: ManifestSettings,
    #[serde(default)]
    pub report: ReportSettings,
}

pub use manifest::StackManifest;

#[derive(Debug, Clone, Deserialize)]
pub struct ManifestSettings {
    pub path: String,
}

impl Default for ManifestSettings {
    fn default() -> Self {
        Self {
            path: "greenlight.yaml".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ReportSettings {
    #[serde(default)]
    pub format: ReportFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    #[default]
    Table,
    Json,
}

impl GreenlightConfig {
    pub fn load() -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(File::with_name("config/local").required(false))
            .add_source(Environment::with_prefix("GREENLIGHT").separator("__"))
            .build()?
            .try_deserialize()
    }
}
