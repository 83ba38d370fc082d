use std::collections::BTreeMap;
use std::fmt;

use serde::Deserialize;

/// One deployment manifest as loaded from YAML. Unknown fields are ignored so
/// that manifests written for newer tool versions still load.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentManifest {
    #[serde(default)]
    pub deployment_prefix: String,
    #[serde(default)]
    pub packages: Vec<PackageConfig>,
}

/// A named bag of artifacts plus tenant-side metadata.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageConfig {
    pub id: String,
    #[serde(default)]
    pub package_dir: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub short_text: Option<String>,
    #[serde(default = "default_true")]
    pub sync: bool,
    #[serde(default = "default_true")]
    pub deploy: bool,
    #[serde(default)]
    pub artifacts: Vec<ArtifactConfig>,
}

impl PackageConfig {
    /// Display name with the package id as fallback.
    pub fn display_name_or_id(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.id)
    }
}

/// A single deployable unit inside a package.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactConfig {
    pub id: String,
    #[serde(default)]
    pub artifact_dir: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default, rename = "type")]
    pub artifact_type: String,
    #[serde(default = "default_true")]
    pub sync: bool,
    #[serde(default = "default_true")]
    pub deploy: bool,
    #[serde(default)]
    pub config_overrides: BTreeMap<String, ConfigValue>,
}

impl ArtifactConfig {
    pub fn display_name_or_id(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.id)
    }

    pub fn kind(&self) -> ArtifactType {
        ArtifactType::from_input(&self.artifact_type)
    }
}

fn default_true() -> bool {
    true
}

/// Scalar value allowed in `configOverrides`. Rendered back to the string
/// representation used in parameter property files.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ConfigValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl fmt::Display for ConfigValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigValue::Bool(v) => write!(f, "{v}"),
            ConfigValue::Int(v) => write!(f, "{v}"),
            ConfigValue::Float(v) => write!(f, "{v}"),
            ConfigValue::String(v) => write!(f, "{v}"),
        }
    }
}

/// Normalized artifact types understood by the tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ArtifactType {
    #[default]
    Integration,
    ValueMapping,
    MessageMapping,
    ScriptCollection,
}

impl ArtifactType {
    /// Normalize a manifest `type` value. Empty or unrecognized input falls
    /// back to an integration flow.
    pub fn from_input(input: &str) -> Self {
        match input.trim().to_ascii_lowercase().as_str() {
            "valuemapping" | "value mapping" => ArtifactType::ValueMapping,
            "messagemapping" | "message mapping" => ArtifactType::MessageMapping,
            "scriptcollection" | "script collection" => ArtifactType::ScriptCollection,
            "integrationflow" | "integration flow" | "iflow" => ArtifactType::Integration,
            other => {
                if !other.is_empty() {
                    tracing::debug!(input = other, "unknown artifact type; default to integration flow");
                }
                ArtifactType::Integration
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactType::Integration => "Integration",
            ArtifactType::ValueMapping => "ValueMapping",
            ArtifactType::MessageMapping => "MessageMapping",
            ArtifactType::ScriptCollection => "ScriptCollection",
        }
    }
}

impl fmt::Display for ArtifactType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
