use std::collections::HashMap;
use std::env;
use std::fs;
use std::time::Duration;

use indicatif::ProgressBar;
use tracing_subscriber::EnvFilter;

use profiledb_core::config::{expand_path, Config};
use profiledb_core::memory::StaticVerifier;
use profiledb_core::types::OnboardingRequest;
use profiledb_docstore::LanceDocumentStore;
use profiledb_embed::default_embedder;
use profiledb_pipeline::OnboardingOrchestrator;
use profiledb_vector::LanceVectorIndex;

fn parse_args() -> (String, Vec<String>) {
    let mut args: Vec<String> = env::args().collect();
    let prog = args.remove(0);
    if args.is_empty() {
        eprintln!("Usage: {} <init|register|rebuild> [args...]", prog);
        std::process::exit(1);
    }
    let cmd = args.remove(0);
    (cmd, args)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
    let config = Config::load().map_err(|e| {
        eprintln!("error loading config: {}", e);
        e
    })?;
    let (cmd, args) = parse_args();

    let docstore_dir: String = config
        .get("data.docstore_dir")
        .unwrap_or_else(|_| "data/docstore".to_string());
    let vector_dir: String = config
        .get("data.vector_dir")
        .unwrap_or_else(|_| "data/vectors".to_string());
    let docs =
        LanceDocumentStore::open(&expand_path(&docstore_dir).to_string_lossy()).await?;
    let index = LanceVectorIndex::open(&expand_path(&vector_dir).to_string_lossy()).await?;
    let embedder = default_embedder()?;
    let sessions: HashMap<String, String> = config.get("auth.sessions").unwrap_or_default();
    let verifier = StaticVerifier::new(sessions);
    let pipeline = OnboardingOrchestrator::new(docs, index, embedder, Box::new(verifier));

    match cmd.as_str() {
        "init" => {
            pipeline.ensure_collections().await?;
            println!("vector collections ready");
        }
        "register" => {
            let path = args.first().cloned().unwrap_or_else(|| {
                eprintln!("Usage: profiledb register <submission.json> <session-token>");
                std::process::exit(1)
            });
            let token = args.get(1).cloned().unwrap_or_else(|| {
                eprintln!("Usage: profiledb register <submission.json> <session-token>");
                std::process::exit(1)
            });
            let raw = fs::read_to_string(&path)?;
            let request: OnboardingRequest = serde_json::from_str(&raw)?;
            pipeline.ensure_collections().await?;
            let outcome = pipeline.onboard(Some(&token), &request).await?;
            println!(
                "{} (uid={}, vectors_indexed={})",
                outcome.message, outcome.uid, outcome.vectors_indexed
            );
        }
        "rebuild" => {
            let spinner = ProgressBar::new_spinner();
            spinner.set_message("rebuilding entity vectors...");
            spinner.enable_steady_tick(Duration::from_millis(120));
            let report = pipeline.rebuild_vectors().await?;
            spinner.finish_and_clear();
            println!(
                "rebuilt {} user vectors, {} project vectors ({} skipped)",
                report.users, report.projects, report.skipped
            );
        }
        other => {
            eprintln!("unknown command: {}", other);
            std::process::exit(1);
        }
    }
    Ok(())
}
