use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use facedup_core::types::group_by_faceset;
use facedup_core::{FaceStore, VerificationReport, Verifier};
use facedup_remote::FacePlusPlusClient;
use facedup_store::SqliteFaceStore;
use serde_json::json;
use tracing_subscriber::EnvFilter;

mod config;

use config::Config;

#[derive(Parser)]
#[command(name = "facedup", about = "Duplicate-face check backed by Face++ facesets")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check an image for an already stored face; store it if new
    Verify {
        /// Image file (JPEG, PNG, ...)
        image: PathBuf,
    },
    /// List known facesets
    Facesets,
    /// Show configuration and store totals
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();

    match cli.command {
        Commands::Verify { image } => {
            let bytes = tokio::fs::read(&image)
                .await
                .with_context(|| format!("reading {}", image.display()))?;
            tracing::debug!(image = %image.display(), bytes = bytes.len(), "image loaded");

            let client = FacePlusPlusClient::new(config.client_options()?)?;
            let store = open_store(&config).await?;
            let verifier = Verifier::new(Arc::new(client), Arc::new(store), config.verifier_options());

            let outcome = verifier.verify(&bytes).await;
            let report = VerificationReport::from(&outcome);
            println!("{}", serde_json::to_string_pretty(&report)?);

            if outcome.error_kind().is_some() {
                std::process::exit(1);
            }
        }
        Commands::Facesets => {
            let store = open_store(&config).await?;
            let records = store.get_all_faceset_records().await?;
            let by_faceset = group_by_faceset(&store.get_face_index().await?);

            let rows: Vec<_> = records
                .iter()
                .map(|r| {
                    json!({
                        "id": r.id,
                        "count": r.count,
                        "created_at": r.created_at,
                        "indexed_faces": by_faceset.get(&r.id).map_or(0, Vec::len),
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&rows)?);
        }
        Commands::Status => {
            let store = open_store(&config).await?;
            let records = store.get_all_faceset_records().await?;
            let indexed = store.get_face_index().await?.len();
            let full = records
                .iter()
                .filter(|r| !r.has_capacity(config.faceset_capacity))
                .count();

            let status = json!({
                "api_base_url": config.api_base_url,
                "credentials_configured": config.has_credentials(),
                "db_path": config.db_path,
                "confidence_threshold": config.confidence_threshold,
                "faceset_capacity": config.faceset_capacity,
                "search_result_count": config.search_result_count,
                "rate_limit": {
                    "requests": config.rate_limit_requests,
                    "window_ms": config.rate_limit_window_ms,
                },
                "retry": {
                    "max_retries": config.max_retries,
                    "base_delay_ms": config.retry_base_delay_ms,
                },
                "facesets": records.len(),
                "full_facesets": full,
                "indexed_faces": indexed,
            });
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
    }

    Ok(())
}

async fn open_store(config: &Config) -> Result<SqliteFaceStore> {
    SqliteFaceStore::open(&config.db_path)
        .await
        .with_context(|| format!("opening face store at {}", config.db_path.display()))
}
