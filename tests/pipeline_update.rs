use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use ipaas_deployer::error::Result;
use ipaas_deployer::loader::LoadedConfig;
use ipaas_deployer::model::DeploymentManifest;
use ipaas_deployer::pipeline::{
    self, ArtifactDeployer, ArtifactUploader, ArtifactUpload, DeploymentTask, Mode,
    PackageMetadata, PackageSyncer, PipelineOptions,
};
use ipaas_deployer::DeployerError;

#[derive(Default)]
struct RecordingSyncer {
    calls: Mutex<Vec<PackageMetadata>>,
    fail_for: Option<String>,
}

#[async_trait]
impl PackageSyncer for RecordingSyncer {
    async fn sync_package(&self, package: &PackageMetadata) -> Result<()> {
        self.calls.lock().unwrap().push(package.clone());
        if self.fail_for.as_deref() == Some(package.id.as_str()) {
            return Err(DeployerError::Remote {
                status: 500,
                message: "boom".into(),
            });
        }
        Ok(())
    }
}

/// Captures uploads together with the staged file contents, which only exist
/// while the work directory is alive.
#[derive(Default)]
struct RecordingUploader {
    calls: Mutex<Vec<(ArtifactUpload, String, Option<String>)>>,
}

#[async_trait]
impl ArtifactUploader for RecordingUploader {
    async fn upload(&self, upload: &ArtifactUpload) -> Result<()> {
        let manifest = fs::read_to_string(upload.staging_dir.join("META-INF/MANIFEST.MF"))
            .unwrap_or_default();
        let parameters =
            fs::read_to_string(upload.staging_dir.join("src/main/resources/parameters.prop")).ok();
        self.calls
            .lock()
            .unwrap()
            .push((upload.clone(), manifest, parameters));
        Ok(())
    }
}

struct NoopDeployer;

#[async_trait]
impl ArtifactDeployer for NoopDeployer {
    async fn deploy(&self, _task: &DeploymentTask) -> Result<()> {
        Ok(())
    }
}

fn loaded(yaml: &str) -> LoadedConfig {
    let manifest: DeploymentManifest = serde_yaml_bw::from_str(yaml).expect("parse manifest");
    LoadedConfig {
        manifest,
        source: "test.yml".into(),
        ordinal: 0,
    }
}

fn options(mode: Mode, packages_dir: PathBuf) -> PipelineOptions {
    PipelineOptions {
        mode,
        packages_dir,
        ..PipelineOptions::default()
    }
}

#[tokio::test]
async fn update_only_rewrites_manifest_and_reports() {
    let root = tempfile::tempdir().expect("tempdir");
    let artifact_dir = root.path().join("packages/Pkg1/A1/META-INF");
    fs::create_dir_all(&artifact_dir).expect("mkdir");
    fs::write(
        artifact_dir.join("MANIFEST.MF"),
        "Bundle-Name: Old\nBundle-SymbolicName: Old\n",
    )
    .expect("write manifest");

    let config = loaded(
        r#"
packages:
  - id: Pkg1
    packageDir: Pkg1
    artifacts:
      - id: A1
        artifactDir: A1
        type: IntegrationFlow
"#,
    );

    let syncer = RecordingSyncer::default();
    let uploader = RecordingUploader::default();
    let report = pipeline::run(
        &options(Mode::UpdateOnly, root.path().join("packages")),
        &[config],
        &syncer,
        &uploader,
        Arc::new(NoopDeployer),
    )
    .await
    .expect("run");

    let synced = syncer.calls.lock().unwrap();
    assert_eq!(synced.len(), 1);
    assert_eq!(synced[0].id, "Pkg1");

    let uploads = uploader.calls.lock().unwrap();
    assert_eq!(uploads.len(), 1);
    let (upload, manifest, _) = &uploads[0];
    assert_eq!(upload.artifact_id, "A1");
    assert_eq!(upload.display_name, "A1");
    assert_eq!(upload.artifact_type.as_str(), "Integration");
    assert_eq!(upload.package_id, "Pkg1");
    assert!(manifest.contains("Bundle-Name: A1"));
    assert!(manifest.contains("Bundle-SymbolicName: A1"));

    assert_eq!(report.artifacts_updated, 1);
    assert_eq!(report.artifacts_deploy_ok, 0);
    assert_eq!(report.packages_failed, 0);
    assert!(!report.completed_with_failures());
}

#[tokio::test]
async fn config_overrides_merge_into_staged_parameters() {
    let root = tempfile::tempdir().expect("tempdir");
    let resources = root.path().join("packages/Pkg1/A1/src/main/resources");
    fs::create_dir_all(root.path().join("packages/Pkg1/A1/META-INF")).expect("mkdir");
    fs::create_dir_all(&resources).expect("mkdir");
    fs::write(
        root.path().join("packages/Pkg1/A1/META-INF/MANIFEST.MF"),
        "Bundle-Name: Old\n",
    )
    .expect("write manifest");
    fs::write(resources.join("parameters.prop"), "endpoint=old\nkeep=yes\n").expect("write prop");

    let config = loaded(
        r#"
packages:
  - id: Pkg1
    packageDir: Pkg1
    artifacts:
      - id: A1
        artifactDir: A1
        configOverrides:
          endpoint: https://new.example
          retries: 5
"#,
    );

    let syncer = RecordingSyncer::default();
    let uploader = RecordingUploader::default();
    pipeline::run(
        &options(Mode::UpdateOnly, root.path().join("packages")),
        &[config],
        &syncer,
        &uploader,
        Arc::new(NoopDeployer),
    )
    .await
    .expect("run");

    let uploads = uploader.calls.lock().unwrap();
    let (_, _, parameters) = &uploads[0];
    let parameters = parameters.as_deref().expect("staged parameters present");
    assert_eq!(parameters, "endpoint=https://new.example\nkeep=yes\nretries=5\n");
}

#[tokio::test]
async fn empty_manifest_completes_cleanly() {
    let root = tempfile::tempdir().expect("tempdir");
    fs::create_dir_all(root.path().join("packages")).expect("mkdir");
    let config = loaded("packages: []\n");

    let syncer = RecordingSyncer::default();
    let uploader = RecordingUploader::default();
    let report = pipeline::run(
        &options(Mode::UpdateAndDeploy, root.path().join("packages")),
        &[config],
        &syncer,
        &uploader,
        Arc::new(NoopDeployer),
    )
    .await
    .expect("run");

    assert_eq!(report.packages_updated, 0);
    assert_eq!(report.artifacts_total, 0);
    assert!(!report.completed_with_failures());
}

#[tokio::test]
async fn failed_package_sync_skips_its_artifacts() {
    let root = tempfile::tempdir().expect("tempdir");
    fs::create_dir_all(root.path().join("packages/Pkg1/A1")).expect("mkdir");

    let config = loaded(
        r#"
packages:
  - id: Pkg1
    packageDir: Pkg1
    artifacts:
      - id: A1
        artifactDir: A1
"#,
    );

    let syncer = RecordingSyncer {
        fail_for: Some("Pkg1".into()),
        ..Default::default()
    };
    let uploader = RecordingUploader::default();
    let report = pipeline::run(
        &options(Mode::UpdateAndDeploy, root.path().join("packages")),
        &[config],
        &syncer,
        &uploader,
        Arc::new(NoopDeployer),
    )
    .await
    .expect("run");

    assert!(uploader.calls.lock().unwrap().is_empty());
    assert_eq!(report.packages_failed, 1);
    assert!(report.failed_packages.contains("Pkg1"));
    assert!(report.completed_with_failures());
}

#[tokio::test]
async fn package_filter_counts_filtered_packages() {
    let root = tempfile::tempdir().expect("tempdir");
    fs::create_dir_all(root.path().join("packages/Pkg1")).expect("mkdir");

    let config = loaded(
        r#"
packages:
  - id: Pkg1
    packageDir: Pkg1
  - id: Pkg2
    packageDir: Pkg2
"#,
    );

    let mut opts = options(Mode::UpdateOnly, root.path().join("packages"));
    opts.package_filter = ["Pkg1".to_string()].into_iter().collect();

    let syncer = RecordingSyncer::default();
    let uploader = RecordingUploader::default();
    let report = pipeline::run(&opts, &[config], &syncer, &uploader, Arc::new(NoopDeployer))
        .await
        .expect("run");

    assert_eq!(report.packages_filtered, 1);
    assert_eq!(report.packages_updated, 1);
}
