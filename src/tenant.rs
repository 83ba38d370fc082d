//! Default tenant-backed implementations of the pipeline's three external
//! interfaces. These stay deliberately thin: probe, create-or-update, and a
//! deploy trigger with a bounded status poll.

use std::io::{Cursor, Read, Write};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;

use crate::client::{Method, TenantTransport};
use crate::error::{DeployerError, Result};
use crate::model::ArtifactType;
use crate::pipeline::{
    ArtifactDeployer, ArtifactUploader, ArtifactUpload, DeploymentTask, PackageMetadata,
    PackageSyncer,
};

const PACKAGE_COLLECTION: &str = "api/v1/IntegrationPackages";
const RUNTIME_COLLECTION: &str = "api/v1/IntegrationRuntimeArtifacts";

/// Tenant client implementing [`PackageSyncer`], [`ArtifactUploader`] and
/// [`ArtifactDeployer`] over the shared transport.
pub struct TenantClient {
    transport: Arc<dyn TenantTransport>,
    retries: u32,
    delay: Duration,
}

impl TenantClient {
    pub fn new(transport: Arc<dyn TenantTransport>, retries: u32, delay_seconds: u64) -> Self {
        Self {
            transport,
            retries,
            delay: Duration::from_secs(delay_seconds),
        }
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let response = self
            .transport
            .request(
                Method::Get,
                path,
                &[("Accept".to_string(), "application/json".to_string())],
                None,
            )
            .await?;
        match response.status {
            200 => Ok(true),
            404 => Ok(false),
            status => Err(DeployerError::from_status(
                status,
                format!("probe of {path} failed: {}", response.body_text()),
            )),
        }
    }

    async fn send_json(&self, method: Method, path: &str, body: serde_json::Value) -> Result<()> {
        let response = self
            .transport
            .request(
                method,
                path,
                &[
                    ("Content-Type".to_string(), "application/json".to_string()),
                    ("Accept".to_string(), "application/json".to_string()),
                ],
                Some(serde_json::to_vec(&body)?),
            )
            .await?;
        if !response.is_success() {
            return Err(DeployerError::from_status(
                response.status,
                format!("{method} {path} failed: {}", response.body_text()),
            ));
        }
        Ok(())
    }

    async fn runtime_status(&self, artifact_id: &str) -> Result<Option<String>> {
        let path = format!("{RUNTIME_COLLECTION}('{}')", quote_key(artifact_id));
        let response = self
            .transport
            .request(
                Method::Get,
                &path,
                &[("Accept".to_string(), "application/json".to_string())],
                None,
            )
            .await?;
        match response.status {
            200 => {
                let parsed: RuntimeEnvelope = serde_json::from_slice(&response.body)?;
                Ok(Some(parsed.d.status))
            }
            // Not materialized yet; the poll keeps waiting.
            404 => Ok(None),
            status => Err(DeployerError::from_status(
                status,
                format!("runtime status of {artifact_id} failed: {}", response.body_text()),
            )),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RuntimeEnvelope {
    d: RuntimeArtifact,
}

#[derive(Debug, Deserialize)]
struct RuntimeArtifact {
    #[serde(rename = "Status", default)]
    status: String,
}

#[async_trait]
impl PackageSyncer for TenantClient {
    async fn sync_package(&self, package: &PackageMetadata) -> Result<()> {
        let key = format!("{PACKAGE_COLLECTION}('{}')", quote_key(&package.id));
        if self.exists(&key).await? {
            debug!(package = %package.id, "updating package metadata");
            self.send_json(
                Method::Put,
                &key,
                json!({
                    "Name": package.display_name,
                    "Description": package.description,
                    "ShortText": package.short_text,
                }),
            )
            .await
        } else {
            debug!(package = %package.id, "creating package");
            self.send_json(
                Method::Post,
                PACKAGE_COLLECTION,
                json!({
                    "Id": package.id,
                    "Name": package.display_name,
                    "Description": package.description,
                    "ShortText": package.short_text,
                }),
            )
            .await
        }
    }
}

#[async_trait]
impl ArtifactUploader for TenantClient {
    async fn upload(&self, upload: &ArtifactUpload) -> Result<()> {
        let content = BASE64.encode(zip_directory(&upload.staging_dir)?);
        let collection = designtime_collection(upload.artifact_type);
        let key = format!(
            "api/v1/{collection}(Id='{}',Version='active')",
            quote_key(&upload.artifact_id)
        );
        if self.exists(&key).await? {
            debug!(artifact = %upload.artifact_id, "updating designtime artifact");
            self.send_json(
                Method::Put,
                &key,
                json!({
                    "Name": upload.display_name,
                    "ArtifactContent": content,
                }),
            )
            .await
        } else {
            debug!(artifact = %upload.artifact_id, "creating designtime artifact");
            self.send_json(
                Method::Post,
                &format!("api/v1/{collection}"),
                json!({
                    "Id": upload.artifact_id,
                    "Name": upload.display_name,
                    "PackageId": upload.package_id,
                    "ArtifactContent": content,
                }),
            )
            .await
        }
    }
}

#[async_trait]
impl ArtifactDeployer for TenantClient {
    async fn deploy(&self, task: &DeploymentTask) -> Result<()> {
        let action = format!(
            "api/v1/{}?Id='{}'&Version='active'",
            deploy_action(task.artifact_type),
            quote_key(&task.artifact_id)
        );
        let response = self.transport.request(Method::Post, &action, &[], None).await?;
        if !response.is_success() {
            return Err(DeployerError::from_status(
                response.status,
                format!(
                    "deploy trigger for {} failed: {}",
                    task.artifact_id,
                    response.body_text()
                ),
            ));
        }

        for attempt in 0..=self.retries {
            match self.runtime_status(&task.artifact_id).await? {
                Some(status) if status.eq_ignore_ascii_case("STARTED") => {
                    info!(artifact = %task.artifact_id, "artifact is running");
                    return Ok(());
                }
                Some(status)
                    if status.eq_ignore_ascii_case("ERROR")
                        || status.eq_ignore_ascii_case("FAILED") =>
                {
                    return Err(DeployerError::Other(format!(
                        "deployment of {} ended in status {status}",
                        task.artifact_id
                    )));
                }
                status => {
                    debug!(
                        artifact = %task.artifact_id,
                        attempt,
                        status = status.as_deref().unwrap_or("<pending>"),
                        "deployment still in progress"
                    );
                }
            }
            if attempt < self.retries {
                tokio::time::sleep(self.delay).await;
            }
        }
        Err(DeployerError::Other(format!(
            "deployment of {} did not reach STARTED after {} checks",
            task.artifact_id,
            self.retries + 1
        )))
    }
}

fn designtime_collection(kind: ArtifactType) -> &'static str {
    match kind {
        ArtifactType::Integration => "IntegrationDesigntimeArtifacts",
        ArtifactType::ValueMapping => "ValueMappingDesigntimeArtifacts",
        ArtifactType::MessageMapping => "MessageMappingDesigntimeArtifacts",
        ArtifactType::ScriptCollection => "ScriptCollectionDesigntimeArtifacts",
    }
}

fn deploy_action(kind: ArtifactType) -> &'static str {
    match kind {
        ArtifactType::Integration => "DeployIntegrationDesigntimeArtifact",
        ArtifactType::ValueMapping => "DeployValueMappingDesigntimeArtifact",
        ArtifactType::MessageMapping => "DeployMessageMappingDesigntimeArtifact",
        ArtifactType::ScriptCollection => "DeployScriptCollectionDesigntimeArtifact",
    }
}

fn quote_key(value: &str) -> String {
    value.replace('\'', "''")
}

/// Zip a staged artifact directory, storing entries with forward-slash
/// relative paths.
fn zip_directory(dir: &std::path::Path) -> Result<Vec<u8>> {
    let mut buffer = Cursor::new(Vec::new());
    {
        let mut writer = zip::ZipWriter::new(&mut buffer);
        let options = SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Deflated);
        for entry in WalkDir::new(dir) {
            let entry =
                entry.map_err(|err| DeployerError::Other(format!("cannot walk zip input: {err}")))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry
                .path()
                .strip_prefix(dir)
                .map_err(|err| DeployerError::Other(err.to_string()))?;
            let name = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            writer.start_file(name, options)?;
            let mut file = std::fs::File::open(entry.path())?;
            let mut contents = Vec::new();
            file.read_to_end(&mut contents)?;
            writer.write_all(&contents)?;
        }
        writer.finish()?;
    }
    Ok(buffer.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn collections_and_actions_agree_per_type() {
        assert_eq!(
            designtime_collection(ArtifactType::Integration),
            "IntegrationDesigntimeArtifacts"
        );
        assert_eq!(
            deploy_action(ArtifactType::ScriptCollection),
            "DeployScriptCollectionDesigntimeArtifact"
        );
    }

    #[test]
    fn zips_nested_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::create_dir_all(dir.path().join("META-INF")).expect("mkdir");
        fs::write(dir.path().join("META-INF/MANIFEST.MF"), "Bundle-Name: X\n").expect("write");
        let bytes = zip_directory(dir.path()).expect("zip");

        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).expect("open");
        let names: Vec<String> = (0..archive.len())
            .map(|i| archive.by_index(i).expect("entry").name().to_string())
            .collect();
        assert_eq!(names, vec!["META-INF/MANIFEST.MF"]);
    }
}
