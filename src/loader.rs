//! Loads deployment manifests from files, directories or URLs and merges
//! several manifests into one, folding each manifest's prefix into its
//! packages.

use std::collections::HashMap;
use std::path::Path;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use globset::Glob;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::{DeployerError, Result};
use crate::model::DeploymentManifest;

/// Default glob applied to base names during folder loads.
pub const DEFAULT_MANIFEST_GLOB: &str = "*.y*ml";

/// Credentials applied to URL sources.
#[derive(Debug, Clone, Default)]
pub enum SourceAuth {
    #[default]
    None,
    Bearer(String),
    Basic {
        user: String,
        password: String,
    },
}

impl SourceAuth {
    fn header_value(&self) -> Option<String> {
        match self {
            SourceAuth::None => None,
            SourceAuth::Bearer(token) => Some(format!("Bearer {token}")),
            SourceAuth::Basic { user, password } => Some(format!(
                "Basic {}",
                BASE64.encode(format!("{user}:{password}"))
            )),
        }
    }
}

/// One parsed manifest together with where it came from.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub manifest: DeploymentManifest,
    pub source: String,
    pub ordinal: usize,
}

/// Load manifests from a source string: `http(s)://` URLs, directories
/// (recursively, alphabetically) and plain files. A path that exists as
/// neither is fatal.
pub async fn load_source(
    source: &str,
    auth: &SourceAuth,
    pattern: Option<&str>,
) -> Result<Vec<LoadedConfig>> {
    if source.starts_with("http://") || source.starts_with("https://") {
        return load_url(source, auth).await.map(|cfg| vec![cfg]);
    }
    let path = Path::new(source);
    if path.is_dir() {
        return load_folder(path, pattern.unwrap_or(DEFAULT_MANIFEST_GLOB));
    }
    if path.is_file() {
        return load_file(path).map(|cfg| vec![cfg]);
    }
    Err(DeployerError::NotFound(format!(
        "deployment config source '{source}' does not exist"
    )))
}

fn load_file(path: &Path) -> Result<LoadedConfig> {
    let contents = std::fs::read_to_string(path)?;
    let manifest: DeploymentManifest = serde_yaml_bw::from_str(&contents)?;
    Ok(LoadedConfig {
        manifest,
        source: path.display().to_string(),
        ordinal: 0,
    })
}

fn load_folder(root: &Path, pattern: &str) -> Result<Vec<LoadedConfig>> {
    let matcher = Glob::new(pattern)
        .map_err(|err| DeployerError::Config(format!("invalid manifest glob '{pattern}': {err}")))?
        .compile_matcher();

    let mut paths = Vec::new();
    for entry in WalkDir::new(root) {
        let entry = entry.map_err(|err| {
            DeployerError::Config(format!("cannot walk {}: {err}", root.display()))
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        if matcher.is_match(entry.file_name()) {
            paths.push(entry.into_path());
        }
    }
    paths.sort();

    let mut configs = Vec::new();
    for path in &paths {
        match load_file(path) {
            Ok(mut cfg) => {
                cfg.ordinal = configs.len();
                debug!(source = %path.display(), "loaded deployment manifest");
                configs.push(cfg);
            }
            Err(err) => {
                warn!(source = %path.display(), %err, "skipping unparsable manifest");
            }
        }
    }
    if configs.is_empty() {
        return Err(DeployerError::Config(format!(
            "no deployment manifest loaded from {} (pattern '{pattern}', {} candidate files)",
            root.display(),
            paths.len()
        )));
    }
    Ok(configs)
}

async fn load_url(url: &str, auth: &SourceAuth) -> Result<LoadedConfig> {
    let client = reqwest::Client::builder().build()?;
    let mut request = client.get(url);
    if let Some(value) = auth.header_value() {
        request = request.header("Authorization", value);
    }
    let response = request.send().await?;
    let status = response.status().as_u16();
    if status != 200 {
        let body = response.text().await.unwrap_or_default();
        return Err(DeployerError::from_status(
            status,
            format!("config load from {url} failed: {body}"),
        ));
    }
    let body = response.text().await?;
    let manifest: DeploymentManifest = serde_yaml_bw::from_str(&body)?;
    Ok(LoadedConfig {
        manifest,
        source: url.to_string(),
        ordinal: 0,
    })
}

/// A valid prefix is empty or `[A-Za-z0-9_]+`.
pub fn validate_prefix(prefix: &str) -> Result<()> {
    if prefix
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        Ok(())
    } else {
        Err(DeployerError::Config(format!(
            "invalid deployment prefix '{prefix}': only letters, digits and underscores are allowed"
        )))
    }
}

/// Package ids take the prefix with no separator.
pub fn prefixed_package_id(prefix: &str, id: &str) -> String {
    format!("{prefix}{id}")
}

/// Display names take the prefix joined by " - ".
pub fn prefixed_display_name(prefix: &str, name: &str) -> String {
    format!("{prefix} - {name}")
}

/// Artifact ids take the prefix joined by "_".
pub fn prefixed_artifact_id(prefix: &str, id: &str) -> String {
    format!("{prefix}_{id}")
}

/// Merge loaded manifests into one. Each source's prefix is folded into its
/// packages; fully qualified package ids must stay unique across sources.
pub fn merge_configs(configs: &[LoadedConfig]) -> Result<DeploymentManifest> {
    if configs.is_empty() {
        return Err(DeployerError::Config("no configs to merge".into()));
    }

    let mut seen: HashMap<String, String> = HashMap::new();
    let mut merged = DeploymentManifest::default();

    for cfg in configs {
        let prefix = cfg.manifest.deployment_prefix.trim();
        validate_prefix(prefix)?;

        for package in &cfg.manifest.packages {
            let mut package = package.clone();
            if !prefix.is_empty() {
                let display = prefixed_display_name(prefix, package.display_name_or_id());
                package.id = prefixed_package_id(prefix, &package.id);
                package.display_name = Some(display);
                for artifact in &mut package.artifacts {
                    artifact.id = prefixed_artifact_id(prefix, &artifact.id);
                }
            }
            if let Some(previous) = seen.insert(package.id.clone(), cfg.source.clone()) {
                return Err(DeployerError::Conflict(format!(
                    "duplicate package id '{}' defined in both {} and {}",
                    package.id, previous, cfg.source
                )));
            }
            merged.packages.push(package);
        }
    }
    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ArtifactConfig, PackageConfig};

    fn package(id: &str, artifacts: Vec<ArtifactConfig>) -> PackageConfig {
        PackageConfig {
            id: id.to_string(),
            package_dir: id.to_string(),
            display_name: None,
            description: None,
            short_text: None,
            sync: true,
            deploy: true,
            artifacts,
        }
    }

    fn artifact(id: &str) -> ArtifactConfig {
        ArtifactConfig {
            id: id.to_string(),
            artifact_dir: id.to_string(),
            display_name: None,
            artifact_type: String::new(),
            sync: true,
            deploy: true,
            config_overrides: Default::default(),
        }
    }

    fn loaded(prefix: &str, source: &str, packages: Vec<PackageConfig>) -> LoadedConfig {
        LoadedConfig {
            manifest: DeploymentManifest {
                deployment_prefix: prefix.to_string(),
                packages,
            },
            source: source.to_string(),
            ordinal: 0,
        }
    }

    #[test]
    fn prefix_validation() {
        validate_prefix("").expect("empty allowed");
        validate_prefix("DEV_1").expect("alphanumeric allowed");
        assert!(validate_prefix("DE-V").is_err());
        assert!(validate_prefix("a b").is_err());
    }

    #[test]
    fn merge_applies_prefix_joiners() {
        let configs = vec![
            loaded("DEV", "a.yml", vec![package("P1", vec![artifact("A1")])]),
            loaded("QA", "b.yml", vec![package("P1", vec![artifact("A1")])]),
        ];
        let merged = merge_configs(&configs).expect("merge");
        assert_eq!(merged.deployment_prefix, "");
        assert_eq!(merged.packages.len(), 2);
        assert_eq!(merged.packages[0].id, "DEVP1");
        assert_eq!(merged.packages[0].display_name.as_deref(), Some("DEV - P1"));
        assert_eq!(merged.packages[0].artifacts[0].id, "DEV_A1");
        assert_eq!(merged.packages[1].id, "QAP1");
        assert_eq!(merged.packages[1].display_name.as_deref(), Some("QA - P1"));
    }

    #[test]
    fn merge_detects_duplicates_naming_both_sources() {
        let configs = vec![
            loaded("DEV", "a.yml", vec![package("P1", Vec::new())]),
            loaded("DEV", "b.yml", vec![package("P1", Vec::new())]),
        ];
        let err = merge_configs(&configs).unwrap_err();
        let message = format!("{err}");
        assert!(message.contains("DEVP1"), "{message}");
        assert!(message.contains("a.yml"), "{message}");
        assert!(message.contains("b.yml"), "{message}");
    }

    #[test]
    fn merge_without_configs_fails() {
        let err = merge_configs(&[]).unwrap_err();
        assert!(format!("{err}").contains("no configs to merge"));
    }

    #[test]
    fn empty_prefix_leaves_ids_untouched() {
        let configs = vec![loaded("", "a.yml", vec![package("P1", vec![artifact("A1")])])];
        let merged = merge_configs(&configs).expect("merge");
        assert_eq!(merged.packages[0].id, "P1");
        assert_eq!(merged.packages[0].display_name, None);
        assert_eq!(merged.packages[0].artifacts[0].id, "A1");
    }
}
