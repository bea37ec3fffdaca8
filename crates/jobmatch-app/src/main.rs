//! jobmatch binary - composition root.
//!
//! Ties the crates together:
//! 1. Load configuration from TOML
//! 2. Open the SQLite record store
//! 3. Dispatch the subcommand: import, refresh, build-index, recommend, stats
//!
//! Ctrl-C is wired to the cancellation token for the long-running
//! subcommands; progress committed before cancellation is kept.

mod cli;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use jobmatch_core::cancel::CancelToken;
use jobmatch_core::config::JobMatchConfig;
use jobmatch_core::error::Result;
use jobmatch_core::types::PostingId;
use jobmatch_storage::{import_postings_from_csv, Database, PostingRepository, PostingStore};
use jobmatch_vector::{OpenAiEmbedding, Recommender, RefreshPipeline, SharedIndex};

use cli::{expand_tilde, CliArgs, Command};

#[tokio::main]
async fn main() {
    let args = CliArgs::parse();
    let config = JobMatchConfig::load_or_default(&args.resolve_config_path());

    let log_level = args
        .resolve_log_level()
        .unwrap_or_else(|| config.general.log_level.clone());
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level)),
        )
        .init();

    let data_dir = args
        .resolve_data_dir()
        .unwrap_or_else(|| expand_tilde(&config.general.data_dir));

    if let Err(e) = run(args, config, data_dir).await {
        tracing::error!(error = %e, "jobmatch failed");
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run(args: CliArgs, config: JobMatchConfig, data_dir: PathBuf) -> Result<()> {
    let db = Arc::new(Database::new(&data_dir.join(&config.database.file))?);
    let repo = Arc::new(PostingRepository::new(db));
    let index_path = data_dir.join(&config.index.file);

    match args.command {
        Command::Import { csv, commit_every } => {
            let imported = import_postings_from_csv(&repo, &csv, commit_every)?;
            println!("Imported {} job postings.", imported);
        }

        Command::Refresh => {
            let embedder = Arc::new(OpenAiEmbedding::from_config(&config.embedding)?);
            let pipeline =
                RefreshPipeline::new(repo.clone(), embedder, config.refresh.workers);

            let cancel = cancel_on_ctrl_c();
            let outcome = pipeline
                .run(config.refresh.batch_size, config.refresh.commit_every, &cancel)
                .await?;
            println!(
                "Processed {} embeddings ({} failed).",
                outcome.processed, outcome.failed
            );
        }

        Command::BuildIndex => {
            let shared = SharedIndex::new();
            let cancel = cancel_on_ctrl_c();
            let count =
                shared.rebuild(repo.as_ref(), config.index.page_size, &index_path, &cancel)?;
            println!("Indexed {} postings to {}.", count, index_path.display());
        }

        Command::Recommend { document, k } => {
            let text = std::fs::read_to_string(&document)?;

            let shared = SharedIndex::new();
            shared.load_artifact(&index_path)?;

            let embedder = OpenAiEmbedding::from_config(&config.embedding)?;
            let recommender = Recommender::new(
                embedder,
                shared,
                repo.clone(),
                k.unwrap_or(config.recommend.candidate_k),
            );

            let hits = recommender.recommend(&text).await?;
            if hits.is_empty() {
                println!("No recommendations.");
                return Ok(());
            }

            let ids: Vec<PostingId> = hits.iter().map(|hit| hit.id).collect();
            let titles: HashMap<PostingId, String> = repo
                .get_by_ids(&ids)?
                .into_iter()
                .map(|p| {
                    let label = match (p.title, p.company_name) {
                        (Some(t), Some(c)) => format!("{} — {}", t, c),
                        (Some(t), None) => t,
                        (None, Some(c)) => c,
                        (None, None) => String::new(),
                    };
                    (p.id, label)
                })
                .collect();

            for hit in &hits {
                println!(
                    "{:>10}  {:.4}  {}",
                    hit.id,
                    hit.score,
                    titles.get(&hit.id).map(String::as_str).unwrap_or("")
                );
            }
        }

        Command::Stats => {
            let total = repo.count()?;
            let embedded = repo.count_embedded()?;
            println!("{} postings, {} embedded, {} pending.", total, embedded, total - embedded);
        }
    }

    Ok(())
}

/// A token that flips when the process receives Ctrl-C.
fn cancel_on_ctrl_c() -> CancelToken {
    let cancel = CancelToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Ctrl-C received; finishing current batch");
            token.cancel();
        }
    });
    cancel
}
