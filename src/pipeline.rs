//! Two-phase update-and-deploy engine. Phase 1 stages artifact working
//! copies, rewrites their bundle headers and parameter files and hands them
//! to the external uploader; phase 2 deploys the collected tasks with
//! bounded parallelism per package.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Semaphore, mpsc};
use tracing::{info, warn};

use crate::bundle;
use crate::error::{DeployerError, Result};
use crate::loader::{
    self, LoadedConfig, prefixed_artifact_id, prefixed_display_name, prefixed_package_id,
};
use crate::model::{ArtifactConfig, ArtifactType, PackageConfig};
use crate::properties;
use crate::report::RunReport;
use crate::workdir::{WorkDir, copy_dir_recursive};

/// Relative locations probed for an artifact's parameter file, in order.
const PARAMETER_FILE_CANDIDATES: &[&str] = &[
    "src/main/resources/parameters.prop",
    "src/main/resources/script/parameters.prop",
    "parameters.prop",
];

/// What the run does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    #[default]
    UpdateAndDeploy,
    UpdateOnly,
    DeployOnly,
}

/// Options driving one pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub mode: Mode,
    pub packages_dir: PathBuf,
    pub package_filter: BTreeSet<String>,
    pub artifact_filter: BTreeSet<String>,
    pub prefix: String,
    pub keep_workdir: bool,
    pub merge_configs: bool,
    pub parallel_deployments: usize,
    pub retries: u32,
    pub delay_seconds: u64,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            mode: Mode::default(),
            packages_dir: PathBuf::from("packages"),
            package_filter: BTreeSet::new(),
            artifact_filter: BTreeSet::new(),
            prefix: String::new(),
            keep_workdir: false,
            merge_configs: false,
            parallel_deployments: 3,
            retries: 10,
            delay_seconds: 30,
        }
    }
}

/// Tenant-side package metadata the syncer writes.
#[derive(Debug, Clone)]
pub struct PackageMetadata {
    pub id: String,
    pub display_name: String,
    pub description: String,
    pub short_text: String,
}

/// Everything the external single-artifact updater needs.
#[derive(Debug, Clone)]
pub struct ArtifactUpload {
    pub artifact_id: String,
    pub display_name: String,
    pub artifact_type: ArtifactType,
    pub package_id: String,
    pub staging_dir: PathBuf,
    pub work_dir: PathBuf,
}

/// One unit of phase-2 work.
#[derive(Debug, Clone)]
pub struct DeploymentTask {
    pub artifact_id: String,
    pub artifact_type: ArtifactType,
    pub package_id: String,
    pub display_name: String,
}

/// Creates or updates package metadata in the tenant.
#[async_trait]
pub trait PackageSyncer: Send + Sync {
    async fn sync_package(&self, package: &PackageMetadata) -> Result<()>;
}

/// Uploads one staged artifact to the tenant.
#[async_trait]
pub trait ArtifactUploader: Send + Sync {
    async fn upload(&self, upload: &ArtifactUpload) -> Result<()>;
}

/// Triggers a deploy and polls activation until it settles.
#[async_trait]
pub trait ArtifactDeployer: Send + Sync {
    async fn deploy(&self, task: &DeploymentTask) -> Result<()>;
}

/// Run the two-phase pipeline over the loaded configs. Failures inside the
/// phases are accumulated into the report, never propagated; only setup
/// problems (bad prefix, merge conflicts, empty config list) are fatal.
pub async fn run(
    options: &PipelineOptions,
    configs: &[LoadedConfig],
    syncer: &dyn PackageSyncer,
    uploader: &dyn ArtifactUploader,
    deployer: Arc<dyn ArtifactDeployer>,
) -> Result<RunReport> {
    loader::validate_prefix(&options.prefix)?;
    if configs.is_empty() {
        return Err(DeployerError::Config("no deployment configs loaded".into()));
    }

    // Effective package list. In merge mode the per-config prefixes are
    // baked into ids by the merge; a CLI prefix on top is ignored with a
    // warning. Otherwise the CLI prefix wins over the config's own.
    let mut entries: Vec<(PackageConfig, String)> = Vec::new();
    if options.merge_configs {
        if !options.prefix.is_empty() {
            warn!(
                prefix = %options.prefix,
                "merge mode uses per-config prefixes; ignoring the explicit prefix"
            );
        }
        let merged = loader::merge_configs(configs)?;
        entries.extend(merged.packages.into_iter().map(|p| (p, String::new())));
    } else {
        for cfg in configs {
            let prefix = if options.prefix.is_empty() {
                cfg.manifest.deployment_prefix.trim().to_string()
            } else {
                options.prefix.clone()
            };
            loader::validate_prefix(&prefix)?;
            entries.extend(
                cfg.manifest
                    .packages
                    .iter()
                    .cloned()
                    .map(|p| (p, prefix.clone())),
            );
        }
    }

    let mut report = RunReport::default();
    let mut tasks: Vec<DeploymentTask> = Vec::new();

    let workdir = if options.mode != Mode::DeployOnly {
        Some(WorkDir::create(options.keep_workdir)?)
    } else {
        None
    };

    for (package, prefix) in &entries {
        if !options.package_filter.is_empty() && !options.package_filter.contains(&package.id) {
            report.packages_filtered += 1;
            continue;
        }
        if !package.sync && !package.deploy {
            continue;
        }

        let effective_id = prefixed_or(prefix, &package.id, prefixed_package_id);
        let display_name = if prefix.is_empty() {
            package.display_name_or_id().to_string()
        } else {
            prefixed_display_name(prefix, package.display_name_or_id())
        };

        let package_dir_name = if package.package_dir.is_empty() {
            &package.id
        } else {
            &package.package_dir
        };
        let package_dir = options.packages_dir.join(package_dir_name);
        if !package_dir.is_dir() {
            warn!(
                package = %package.id,
                path = %package_dir.display(),
                "package directory missing; skipping package"
            );
            continue;
        }

        let mut failed_artifacts: BTreeSet<String> = BTreeSet::new();

        if let Some(workdir) = &workdir {
            let metadata = PackageMetadata {
                id: effective_id.clone(),
                display_name: display_name.clone(),
                description: package.description.clone().unwrap_or_default(),
                short_text: package.short_text.clone().unwrap_or_default(),
            };
            if let Err(err) = syncer.sync_package(&metadata).await {
                warn!(package = %effective_id, %err, "package metadata update failed");
                report.failed_packages.insert(effective_id.clone());
                report.packages_failed += 1;
                continue;
            }
            report.packages_updated += 1;

            if package.sync {
                for artifact in &package.artifacts {
                    report.artifacts_total += 1;
                    if !options.artifact_filter.is_empty()
                        && !options.artifact_filter.contains(&artifact.id)
                    {
                        report.artifacts_filtered += 1;
                        continue;
                    }
                    if !artifact.sync {
                        continue;
                    }
                    let artifact_id = prefixed_or(prefix, &artifact.id, prefixed_artifact_id);
                    match stage_and_upload(
                        workdir,
                        &package_dir,
                        artifact,
                        &effective_id,
                        &artifact_id,
                        uploader,
                    )
                    .await
                    {
                        Ok(()) => {
                            report.artifacts_updated += 1;
                        }
                        Err(err) => {
                            warn!(artifact = %artifact_id, %err, "artifact update failed");
                            report.failed_artifact_updates.insert(artifact_id.clone());
                            failed_artifacts.insert(artifact.id.clone());
                        }
                    }
                }
            }
        }

        if package.deploy && options.mode != Mode::UpdateOnly {
            for artifact in &package.artifacts {
                if failed_artifacts.contains(&artifact.id) {
                    continue;
                }
                if !options.artifact_filter.is_empty()
                    && !options.artifact_filter.contains(&artifact.id)
                {
                    continue;
                }
                if !artifact.deploy {
                    continue;
                }
                tasks.push(DeploymentTask {
                    artifact_id: prefixed_or(prefix, &artifact.id, prefixed_artifact_id),
                    artifact_type: artifact.kind(),
                    package_id: effective_id.clone(),
                    display_name: artifact.display_name_or_id().to_string(),
                });
            }
        }
    }

    if options.mode != Mode::UpdateOnly && !tasks.is_empty() {
        deploy_tasks(options, tasks, deployer, &mut report).await;
    }

    info!(
        packages_updated = report.packages_updated,
        packages_deployed = report.packages_deployed,
        packages_failed = report.packages_failed,
        "pipeline run complete"
    );
    Ok(report)
}

fn prefixed_or(prefix: &str, id: &str, apply: fn(&str, &str) -> String) -> String {
    if prefix.is_empty() {
        id.to_string()
    } else {
        apply(prefix, id)
    }
}

/// Stage one artifact into the workspace, rewrite its bundle headers and
/// parameter file, then hand it to the uploader.
async fn stage_and_upload(
    workdir: &WorkDir,
    package_dir: &std::path::Path,
    artifact: &ArtifactConfig,
    package_id: &str,
    artifact_id: &str,
    uploader: &dyn ArtifactUploader,
) -> Result<()> {
    let artifact_dir_name = if artifact.artifact_dir.is_empty() {
        &artifact.id
    } else {
        &artifact.artifact_dir
    };
    let source_dir = package_dir.join(artifact_dir_name);
    if !source_dir.is_dir() {
        return Err(DeployerError::NotFound(format!(
            "artifact directory {} does not exist",
            source_dir.display()
        )));
    }

    let staging_dir = workdir.path().join(&artifact.id);
    copy_dir_recursive(&source_dir, &staging_dir)?;

    let modified_dir = workdir.path().join("modified").join(&artifact.id);
    fs::create_dir_all(&modified_dir)?;

    let manifest = staging_dir.join("META-INF/MANIFEST.MF");
    if manifest.is_file() {
        let modified_manifest = modified_dir.join("MANIFEST.MF");
        bundle::update_bundle_headers(
            &manifest,
            artifact_id,
            artifact.display_name_or_id(),
            &modified_manifest,
        )?;
        fs::copy(&modified_manifest, &manifest)?;
    }

    if let Some(parameters) = PARAMETER_FILE_CANDIDATES
        .iter()
        .map(|candidate| staging_dir.join(candidate))
        .find(|path| path.is_file())
    {
        let modified_parameters = modified_dir.join("parameters.prop");
        if artifact.config_overrides.is_empty() {
            fs::copy(&parameters, &modified_parameters)?;
        } else {
            let overrides: Vec<(String, String)> = artifact
                .config_overrides
                .iter()
                .map(|(key, value)| (key.clone(), value.to_string()))
                .collect();
            properties::merge(&parameters, &overrides, &modified_parameters)?;
            fs::copy(&modified_parameters, &parameters)?;
        }
    }

    let upload = ArtifactUpload {
        artifact_id: artifact_id.to_string(),
        display_name: artifact.display_name_or_id().to_string(),
        artifact_type: artifact.kind(),
        package_id: package_id.to_string(),
        staging_dir,
        work_dir: workdir.path().to_path_buf(),
    };
    uploader.upload(&upload).await
}

/// Phase 2: deploy per package group with a counting semaphore. All phase-1
/// updates have completed before this is called; tasks within a group run in
/// no particular order.
async fn deploy_tasks(
    options: &PipelineOptions,
    tasks: Vec<DeploymentTask>,
    deployer: Arc<dyn ArtifactDeployer>,
    report: &mut RunReport,
) {
    let mut groups: BTreeMap<String, Vec<DeploymentTask>> = BTreeMap::new();
    for task in tasks {
        groups.entry(task.package_id.clone()).or_default().push(task);
    }

    for (package_id, group) in groups {
        let semaphore = Arc::new(Semaphore::new(options.parallel_deployments.max(1)));
        let expected: BTreeSet<String> =
            group.iter().map(|task| task.artifact_id.clone()).collect();
        let (tx, mut rx) = mpsc::channel::<(String, std::result::Result<(), String>)>(group.len());

        for task in group {
            let semaphore = semaphore.clone();
            let deployer = deployer.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                // The permit is tied to this scope, so a panicking deploy
                // still releases its slot.
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return;
                };
                let outcome = deployer
                    .deploy(&task)
                    .await
                    .map_err(|err| err.to_string());
                let _ = tx.send((task.artifact_id.clone(), outcome)).await;
            });
        }
        drop(tx);

        let mut seen: BTreeSet<String> = BTreeSet::new();
        let mut group_failed = false;
        while let Some((artifact_id, outcome)) = rx.recv().await {
            seen.insert(artifact_id.clone());
            match outcome {
                Ok(()) => {
                    report.artifacts_deploy_ok += 1;
                    report.successful_artifact_deploys.insert(artifact_id);
                }
                Err(err) => {
                    warn!(artifact = %artifact_id, %err, "artifact deploy failed");
                    report.artifacts_deploy_failed += 1;
                    report.failed_artifact_deploys.insert(artifact_id);
                    group_failed = true;
                }
            }
        }
        for missing in expected.difference(&seen) {
            warn!(artifact = %missing, "deploy worker exited without reporting");
            report.artifacts_deploy_failed += 1;
            report.failed_artifact_deploys.insert(missing.clone());
            group_failed = true;
        }

        if group_failed {
            report.packages_failed += 1;
            report.failed_packages.insert(package_id);
        } else {
            report.packages_deployed += 1;
        }
    }
}
