#![forbid(unsafe_code)]

pub mod batch;
pub mod bundle;
pub mod client;
pub mod config;
pub mod content_type;
pub mod error;
pub mod loader;
pub mod model;
pub mod partner;
pub mod pipeline;
pub mod properties;
pub mod report;
pub mod tenant;
pub mod workdir;

pub use client::{HttpTenantClient, Method, ServiceCredentials, TenantTransport};
pub use config::{CliArgs, Command, DeployerConfig, PartnerDirection};
pub use error::DeployerError;
pub use loader::{LoadedConfig, SourceAuth};
pub use model::{ArtifactConfig, ArtifactType, DeploymentManifest, PackageConfig};
pub use partner::{PartnerDirectory, SyncOptions};
pub use pipeline::{
    ArtifactDeployer, ArtifactUploader, ArtifactUpload, DeploymentTask, Mode, PackageMetadata,
    PackageSyncer, PipelineOptions,
};
pub use report::{RunReport, SyncReport};
pub use tenant::TenantClient;
