use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use ipaas_deployer::config::{CliArgs, DeployerConfig, PartnerDirection};
use ipaas_deployer::error::Result;
use ipaas_deployer::{HttpTenantClient, PartnerDirectory, TenantClient, loader, pipeline};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("IPAAS_LOG").unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = CliArgs::parse();
    match DeployerConfig::from_env_and_args(cli) {
        Ok(config) => match run(config).await {
            Ok(true) => {}
            Ok(false) => std::process::exit(2),
            Err(err) => {
                eprintln!("error: {err}");
                std::process::exit(1);
            }
        },
        Err(err) => {
            eprintln!("configuration error: {err}");
            std::process::exit(1);
        }
    }
}

/// Returns whether the run completed without failures. Fatal setup problems
/// surface as errors instead.
async fn run(config: DeployerConfig) -> Result<bool> {
    match config {
        DeployerConfig::Pipeline {
            options,
            sources,
            source_auth,
            config_pattern,
            credentials,
        } => {
            let mut configs = Vec::new();
            for source in &sources {
                let loaded =
                    loader::load_source(source, &source_auth, config_pattern.as_deref()).await?;
                for mut cfg in loaded {
                    cfg.ordinal = configs.len();
                    configs.push(cfg);
                }
            }

            let transport = Arc::new(HttpTenantClient::new(credentials)?);
            let client = Arc::new(TenantClient::new(
                transport,
                options.retries,
                options.delay_seconds,
            ));
            let report = pipeline::run(
                &options,
                &configs,
                client.as_ref(),
                client.as_ref(),
                client.clone(),
            )
            .await?;
            print!("{report}");
            Ok(!report.completed_with_failures())
        }
        DeployerConfig::Partner {
            direction,
            options,
            batch,
            credentials,
        } => {
            let transport = HttpTenantClient::new(credentials)?;
            let engine = PartnerDirectory::new(&transport);
            let report = match (direction, batch) {
                (PartnerDirection::Snapshot, _) => engine.snapshot(&options).await?,
                (PartnerDirection::Deploy, true) => engine.batch_deploy(&options).await?,
                (PartnerDirection::Deploy, false) => engine.deploy(&options).await?,
            };
            print!("{report}");
            Ok(!report.has_errors())
        }
    }
}
