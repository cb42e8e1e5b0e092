use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use stocklens::config::Config;
use stocklens::corpus::load_catalog;
use stocklens::matcher::HashMatcher;
use stocklens::search::discard_upload;
use stocklens::similarity::cosine_similarity;
use stocklens::{EmbeddingExtractor, SearchService, Strategy};
use tracing_subscriber::EnvFilter;

mod cli;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = cli::Args::parse();

    let config = match load_config() {
        Ok(config) => config,
        Err(e) => {
            // the upload is consumed by every search, even one that never starts
            if let cli::Command::Search { upload, .. } = &args.command {
                discard_upload(upload);
            }
            return Err(e);
        }
    };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start runtime")?;

    runtime.block_on(run(args.command, config))
}

async fn run(command: cli::Command, config: Config) -> anyhow::Result<()> {
    match command {
        cli::Command::Search {
            upload,
            corpus,
            detailed,
        } => {
            let catalog = match load_catalog(&corpus) {
                Ok(catalog) => catalog,
                Err(e) => {
                    discard_upload(&upload);
                    return Err(e);
                }
            };

            let service = SearchService::from_config(&config);
            let outcome = service.search_by_photo_detailed(&upload, &catalog).await?;

            if detailed {
                let strategy = match outcome.strategy {
                    Strategy::Semantic => "semantic",
                    Strategy::Hash => "hash",
                    Strategy::None => "none",
                };
                let out = serde_json::json!({ "ids": outcome.ids, "strategy": strategy });
                println!("{}", serde_json::to_string_pretty(&out)?);
            } else {
                println!("{}", serde_json::to_string_pretty(&outcome.ids)?);
            }
            Ok(())
        }

        cli::Command::Hash { path } => {
            let matcher = HashMatcher::new(config.hash.hash_size, config.hash.max_distance);
            let hash = matcher.hash(&path).await?;
            println!("{hash}");
            Ok(())
        }

        cli::Command::Compare { first, second } => {
            let extractor: Arc<EmbeddingExtractor> =
                EmbeddingExtractor::shared(&config.semantic, config.base_path().to_path_buf());
            let similarity = match (extractor.embed(&first).await, extractor.embed(&second).await) {
                (Some(a), Some(b)) => Some(cosine_similarity(&a, &b)),
                _ => None,
            };

            let matcher = HashMatcher::new(config.hash.hash_size, config.hash.max_distance);
            let distance = match (matcher.hash(&first).await, matcher.hash(&second).await) {
                (Ok(a), Ok(b)) => a.distance(&b),
                (Err(e), _) | (_, Err(e)) => {
                    log::warn!("{e}");
                    None
                }
            };

            let out = serde_json::json!({
                "similarity": similarity,
                "semanticMatch": similarity.map(|s| s >= config.semantic.threshold),
                "hashDistance": distance,
                "hashMatch": distance.map(|d| d < matcher.max_distance()),
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
            Ok(())
        }
    }
}

fn load_config() -> anyhow::Result<Config> {
    let base_path = base_path()?;
    Config::load_with(&base_path).with_context(|| format!("failed to load config from {base_path:?}"))
}

fn base_path() -> anyhow::Result<PathBuf> {
    if let Ok(path) = std::env::var("STOCKLENS_BASE_PATH") {
        return Ok(PathBuf::from(path));
    }

    let home = homedir::my_home()
        .ok()
        .flatten()
        .context("could not determine home directory")?;
    Ok(home.join(".local/share/stocklens"))
}
