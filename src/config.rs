//! CLI surface and option resolution. Flags win over environment variables,
//! which win over defaults; validation happens up front so nothing remote is
//! touched with a bad prefix or missing credentials.

use std::collections::BTreeSet;
use std::env;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::client::ServiceCredentials;
use crate::error::{DeployerError, Result};
use crate::loader::{SourceAuth, validate_prefix};
use crate::partner::SyncOptions;
use crate::pipeline::{Mode, PipelineOptions};

/// Top-level CLI structure.
#[derive(Debug, Parser)]
#[command(
    name = "ipaas-deployer",
    version,
    about = "Continuous delivery for hosted integration tenants.",
    long_about = "Updates packages and artifacts from a versioned local tree, deploys them with bounded parallelism, and synchronizes the tenant's Partner Directory with an on-disk layout."
)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Update packages and artifacts, then deploy them.
    Run(PipelineArgs),
    /// Update packages and artifacts without deploying.
    Update(PipelineArgs),
    /// Deploy artifacts without updating them first.
    Deploy(PipelineArgs),
    /// Download the Partner Directory into the local layout.
    PdSnapshot(PartnerArgs),
    /// Push the local Partner Directory to the tenant.
    PdDeploy(PartnerArgs),
}

/// Tenant credentials shared by every subcommand.
#[derive(Debug, Args, Clone)]
pub struct CredentialArgs {
    /// Tenant host (defaults to $IPAAS_HOST).
    #[arg(long)]
    pub host: Option<String>,

    /// Basic-auth user (defaults to $IPAAS_USER).
    #[arg(long)]
    pub user: Option<String>,

    /// Basic-auth password (defaults to $IPAAS_PASSWORD).
    #[arg(long)]
    pub password: Option<String>,

    /// OAuth bearer token (defaults to $IPAAS_TOKEN; wins over basic auth).
    #[arg(long)]
    pub token: Option<String>,
}

/// Arguments of the two-phase pipeline commands.
#[derive(Debug, Args)]
pub struct PipelineArgs {
    /// Deployment manifest source: file, directory or http(s) URL. Repeatable.
    #[arg(long = "config", required = true)]
    pub configs: Vec<String>,

    /// Root directory holding the package/artifact tree.
    #[arg(long, default_value = "packages")]
    pub packages_dir: PathBuf,

    /// Only process these package ids. Repeatable.
    #[arg(long = "package")]
    pub package_filter: Vec<String>,

    /// Only process these artifact ids. Repeatable.
    #[arg(long = "artifact")]
    pub artifact_filter: Vec<String>,

    /// Prefix applied to package and artifact ids.
    #[arg(long, default_value = "")]
    pub prefix: String,

    /// Merge all config sources into one manifest, folding per-config prefixes in.
    #[arg(long, default_value_t = false)]
    pub merge_configs: bool,

    /// Keep the temp work directory after the run.
    #[arg(long, default_value_t = false)]
    pub keep_workdir: bool,

    /// Concurrent deployments per package.
    #[arg(long, default_value_t = 3)]
    pub parallel_deployments: usize,

    /// Activation status checks per artifact.
    #[arg(long, default_value_t = 10)]
    pub retries: u32,

    /// Seconds between activation status checks.
    #[arg(long, default_value_t = 30)]
    pub delay_seconds: u64,

    /// Glob for manifest base names during directory loads.
    #[arg(long)]
    pub config_pattern: Option<String>,

    /// Bearer token for URL config sources.
    #[arg(long)]
    pub config_token: Option<String>,

    /// Basic-auth user for URL config sources.
    #[arg(long)]
    pub config_user: Option<String>,

    /// Basic-auth password for URL config sources.
    #[arg(long)]
    pub config_password: Option<String>,

    #[command(flatten)]
    pub credentials: CredentialArgs,
}

/// Arguments of the Partner Directory commands.
#[derive(Debug, Args)]
pub struct PartnerArgs {
    /// Root of the on-disk partner layout.
    #[arg(long, default_value = "partnerdir")]
    pub resources_dir: PathBuf,

    /// Only touch these partner ids. Repeatable.
    #[arg(long = "pid")]
    pub pid_filter: Vec<String>,

    /// Never overwrite existing values, only add missing ones.
    #[arg(long, default_value_t = false)]
    pub add_only: bool,

    /// Delete remote records absent locally (managed partners only).
    #[arg(long, default_value_t = false)]
    pub full_sync: bool,

    /// Log intended changes without mutating anything.
    #[arg(long, default_value_t = false)]
    pub dry_run: bool,

    /// Submit creates/updates through the batch endpoint.
    #[arg(long, default_value_t = false)]
    pub batch: bool,

    #[command(flatten)]
    pub credentials: CredentialArgs,
}

/// Which direction a Partner Directory run goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartnerDirection {
    Snapshot,
    Deploy,
}

/// Fully resolved invocation.
#[derive(Debug)]
pub enum DeployerConfig {
    Pipeline {
        options: PipelineOptions,
        sources: Vec<String>,
        source_auth: SourceAuth,
        config_pattern: Option<String>,
        credentials: ServiceCredentials,
    },
    Partner {
        direction: PartnerDirection,
        options: SyncOptions,
        batch: bool,
        credentials: ServiceCredentials,
    },
}

impl DeployerConfig {
    pub fn from_env_and_args(cli: CliArgs) -> Result<Self> {
        match cli.command {
            Command::Run(args) => Self::pipeline(Mode::UpdateAndDeploy, args),
            Command::Update(args) => Self::pipeline(Mode::UpdateOnly, args),
            Command::Deploy(args) => Self::pipeline(Mode::DeployOnly, args),
            Command::PdSnapshot(args) => Self::partner(PartnerDirection::Snapshot, args),
            Command::PdDeploy(args) => Self::partner(PartnerDirection::Deploy, args),
        }
    }

    fn pipeline(mode: Mode, args: PipelineArgs) -> Result<Self> {
        validate_prefix(&args.prefix)?;
        let credentials = resolve_credentials(&args.credentials)?;
        let source_auth = resolve_source_auth(&args)?;

        let options = PipelineOptions {
            mode,
            packages_dir: args.packages_dir,
            package_filter: to_set(args.package_filter),
            artifact_filter: to_set(args.artifact_filter),
            prefix: args.prefix,
            keep_workdir: args.keep_workdir,
            merge_configs: args.merge_configs,
            parallel_deployments: args.parallel_deployments,
            retries: args.retries,
            delay_seconds: args.delay_seconds,
        };
        Ok(DeployerConfig::Pipeline {
            options,
            sources: args.configs,
            source_auth,
            config_pattern: args.config_pattern,
            credentials,
        })
    }

    fn partner(direction: PartnerDirection, args: PartnerArgs) -> Result<Self> {
        let credentials = resolve_credentials(&args.credentials)?;
        let pid_filter = if args.pid_filter.is_empty() {
            None
        } else {
            Some(args.pid_filter.into_iter().collect::<BTreeSet<String>>())
        };
        let options = SyncOptions {
            resources_dir: args.resources_dir,
            pid_filter,
            replace: !args.add_only,
            full_sync: args.full_sync,
            dry_run: args.dry_run,
        };
        Ok(DeployerConfig::Partner {
            direction,
            options,
            batch: args.batch,
            credentials,
        })
    }
}

fn to_set(values: Vec<String>) -> BTreeSet<String> {
    values.into_iter().collect()
}

/// Consult sources in priority order: explicit flag, then environment.
fn resolve_option(explicit: &Option<String>, env_key: &str) -> Option<String> {
    explicit.clone().or_else(|| env::var(env_key).ok())
}

fn resolve_credentials(args: &CredentialArgs) -> Result<ServiceCredentials> {
    let host = resolve_option(&args.host, "IPAAS_HOST").ok_or_else(|| {
        DeployerError::Config("tenant host is required (flag --host or IPAAS_HOST)".into())
    })?;
    Ok(ServiceCredentials {
        host,
        user: resolve_option(&args.user, "IPAAS_USER"),
        password: resolve_option(&args.password, "IPAAS_PASSWORD"),
        token: resolve_option(&args.token, "IPAAS_TOKEN"),
    })
}

fn resolve_source_auth(args: &PipelineArgs) -> Result<SourceAuth> {
    if let Some(token) = &args.config_token {
        return Ok(SourceAuth::Bearer(token.clone()));
    }
    match (&args.config_user, &args.config_password) {
        (Some(user), Some(password)) => Ok(SourceAuth::Basic {
            user: user.clone(),
            password: password.clone(),
        }),
        (None, None) => Ok(SourceAuth::None),
        _ => Err(DeployerError::Config(
            "--config-user and --config-password must be set together".into(),
        )),
    }
}
