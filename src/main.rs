use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use gitvault::{Config, MetaStore, ObjectStore, Server};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "gitvault")]
#[command(about = "Git Smart-HTTP hosting over object and metadata stores", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gitvault server
    Start {
        #[arg(long, default_value = "config.yaml")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Start { config } => {
            let config = Config::load(&config)?;
            init_tracing(&config.log.level)?;

            let meta = MetaStore::connect(&config.meta_store)
                .await
                .context("failed to connect to metadata store")?;
            meta.migrate()
                .await
                .context("failed to ensure metadata schema")?;
            tracing::info!(
                host = %config.meta_store.host,
                dbname = %config.meta_store.dbname,
                "metadata store ready"
            );

            let objects = ObjectStore::new(&config.object_store);
            objects
                .ensure_bucket()
                .await
                .context("failed to ensure object store bucket")?;
            tracing::info!(bucket = %config.object_store.bucket, "object store ready");

            let server = Server::new(config, meta.clone(), objects);
            server.run().await?;

            meta.close().await;
        }
    }

    Ok(())
}

fn init_tracing(level: &str) -> Result<()> {
    // RUST_LOG overrides the configured level when set.
    let filter = match tracing_subscriber::EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => tracing_subscriber::EnvFilter::try_new(level)
            .with_context(|| format!("invalid log level {level:?}"))?,
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
    Ok(())
}
