use clap::Parser;
use thiserror::Error;
use tracing_subscriber::{EnvFilter, fmt};

mod cli;
mod render;

use crate::cli::{Cli, Command, OutputFormat};
use skiff_cluster::{Cluster, ClusterError};
use skiff_config::{Config, ConfigError};

#[derive(Error, Debug)]
enum AppError {
    #[error(transparent)]
    Cluster(#[from] ClusterError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to render JSON: {0}")]
    Render(#[from] serde_json::Error),
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    install_tracing(&cli.log);

    if let Err(err) = run(cli).await {
        tracing::error!("{err}");
        std::process::exit(1);
    }
}

fn install_tracing(level: &str) {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_level(true)
        .init();
}

async fn run(cli: Cli) -> Result<(), AppError> {
    match cli.command {
        Command::Init { name } => {
            Config::sample(&name).save(&cli.config).await?;
            println!("Wrote cluster config to {}", cli.config.display());
        }
        Command::Create => {
            Cluster::from_file(&cli.config).await?.create().await?;
        }
        Command::Delete => {
            Cluster::from_file(&cli.config).await?.delete().await?;
        }
        Command::Start => {
            Cluster::from_file(&cli.config).await?.start().await?;
        }
        Command::Stop => {
            Cluster::from_file(&cli.config).await?.stop().await?;
        }
        Command::Show { output } => {
            let machines = Cluster::from_file(&cli.config).await?.gather().await?;
            match output {
                OutputFormat::Table => render::print_table(&machines),
                OutputFormat::Json => println!("{}", render::to_json(&machines)?),
            }
        }
        Command::Inspect { name } => {
            let machine = Cluster::from_file(&cli.config).await?.inspect(&name).await?;
            println!("{}", render::to_json_single(&machine)?);
        }
        Command::Ssh {
            hostname,
            username,
            remote,
        } => {
            Cluster::from_file(&cli.config)
                .await?
                .ssh(&hostname, &username, &remote)
                .await?;
        }
    }
    Ok(())
}
