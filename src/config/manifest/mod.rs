mod app;
mod services;

use crate::registry::ServiceSpec;
use serde::de::Error as _;
use serde::Deserialize;
use serde_yaml::{self, Value as YamlValue};
use std::collections::{BTreeMap, HashSet};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use thiserror::Error;

pub use app::{default_app_retry_budget, AppSettings, JitterMode, RetryBudget};

/// Parsed and validated stack manifest: app-wide settings plus the service
/// definitions, in file order.
#[derive(Debug, Clone)]
pub struct StackManifest {
    pub api_version: ApiVersion,
    pub app: AppSettings,
    pub services: Vec<ServiceSpec>,
}

const TOP_LEVEL_FIELDS: &str = "api_version, app, services";

impl StackManifest {
    pub fn from_reader(mut reader: impl Read) -> Result<Self, ManifestError> {
        let mut contents = String::new();
        reader.read_to_string(&mut contents)?;
        Self::from_yaml_str(&contents)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ManifestError> {
        let file = File::open(path)?;
        Self::from_reader(file)
    }

    fn from_yaml_str(contents: &str) -> Result<Self, ManifestError> {
        let mut documents = serde_yaml::Deserializer::from_str(contents);
        let mut parsed = None;
        let mut extra_errors = Vec::new();

        for (index, document) in documents.by_ref().enumerate() {
            if index == 0 {
                parsed = Some(RawManifestFile::deserialize(document)?);
            } else {
                let _: YamlValue = YamlValue::deserialize(document)?;
                extra_errors
                    .push("error[root]: multiple YAML documents are not supported".to_string());
                break;
            }
        }

        let Some(raw) = parsed else {
            let err =
                serde_yaml::Error::custom("stack manifest must contain exactly one YAML document");
            return Err(ManifestError::Parse(err));
        };

        Self::from_raw(raw, extra_errors).map_err(ManifestError::Invalid)
    }

    fn from_raw(
        raw: RawManifestFile,
        mut errors: Vec<String>,
    ) -> Result<Self, ManifestValidationError> {
        let RawManifestFile {
            api_version: raw_api_version,
            app: raw_app,
            services: raw_services,
            extra_fields,
        } = raw;

        if !extra_fields.is_empty() {
            for key in extra_fields.keys() {
                errors.push(format!(
                    "error[root]: unknown top-level key \"{key}\" (expected one of {TOP_LEVEL_FIELDS})"
                ));
            }
        }

        let api_version = parse_api_version(raw_api_version, &mut errors);
        let app = app::parse_app_settings(raw_app, &mut errors);
        let services = services::parse_services(raw_services, &mut errors);

        validate_dependency_references(&services, &mut errors);

        if errors.is_empty() {
            Ok(Self {
                api_version,
                app,
                services,
            })
        } else {
            let schema_version = schema_version_label(&api_version);
            Err(ManifestValidationError::new(errors, schema_version))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ApiVersion {
    #[default]
    V1,
    Unsupported(String),
}

fn parse_api_version(raw: Option<String>, errors: &mut Vec<String>) -> ApiVersion {
    match raw {
        None => {
            errors
                .push("error[root]: api_version is required (supported versions: v1)".to_string());
            ApiVersion::V1
        }
        Some(value) => {
            let trimmed = value.trim();
            if trimmed.is_empty() {
                errors.push("api_version must be a non-empty string".to_string());
                ApiVersion::V1
            } else if trimmed.eq_ignore_ascii_case("v1") {
                ApiVersion::V1
            } else {
                errors.push(format!(
                    "api_version `{trimmed}` is not supported (supported versions: v1)"
                ));
                ApiVersion::Unsupported(trimmed.to_string())
            }
        }
    }
}

fn schema_version_label(version: &ApiVersion) -> String {
    match version {
        ApiVersion::V1 => "v1".to_string(),
        ApiVersion::Unsupported(other) => other.clone(),
    }
}

fn validate_dependency_references(services: &[ServiceSpec], errors: &mut Vec<String>) {
    let known: HashSet<&str> = services.iter().map(|spec| spec.name.as_str()).collect();

    for spec in services {
        for dependency in &spec.depends_on {
            if dependency == &spec.name {
                errors.push(format!("service `{}` must not depend on itself", spec.name));
            } else if !known.contains(dependency.as_str()) {
                errors.push(format!(
                    "service `{}` depends on undefined service `{}`",
                    spec.name, dependency
                ));
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawManifestFile {
    #[serde(default)]
    api_version: Option<String>,
    #[serde(default)]
    app: Option<app::RawAppSection>,
    #[serde(default)]
    services: Vec<services::RawService>,
    #[serde(default)]
    #[serde(flatten)]
    extra_fields: BTreeMap<String, YamlValue>,
}

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("failed to read stack manifest: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse stack manifest: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error(transparent)]
    Invalid(ManifestValidationError),
}

#[derive(Debug, Error)]
#[error("stack manifest validation failed:\nschema_version: \"{schema_version}\"\n{rendered}")]
pub struct ManifestValidationError {
    schema_version: String,
    rendered: String,
}

impl ManifestValidationError {
    pub fn new(messages: Vec<String>, schema_version: impl Into<String>) -> Self {
        let rendered = messages
            .iter()
            .map(|msg| format!("- {msg}"))
            .collect::<Vec<_>>()
            .join("\n");
        Self {
            schema_version: schema_version.into(),
            rendered,
        }
    }
}
