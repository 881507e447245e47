//! Local Node Count Runner
//!
//! Runs the page node count job against a JSON content export, so the job can
//! be exercised without a live repository.
//!
//! Environment:
//!   NODE_COUNT_CONTENT   Content tree file (required). Committed counts are
//!                        written back to this file.
//!   NODE_COUNT_CONFIG    Job configuration file (optional, defaults apply)
//!   NODE_COUNT_RUN_ONCE  Execute a single run and exit instead of scheduling
//!   RUST_LOG             Log filter (defaults to `info`)

use anyhow::Context;
use complexity_analyzer_core::{
    InfoProvider, MemoryRepository, PageNodeCountConfig, PageNodeCountJob, PageOutcome,
    RepositorySession, RunSummary, TokioScheduler,
};
use serde_json::{Map, Value};
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let content_path = std::env::var("NODE_COUNT_CONTENT")
        .context("NODE_COUNT_CONTENT must point to a JSON content file")?;
    let config = match std::env::var("NODE_COUNT_CONFIG") {
        Ok(path) => PageNodeCountConfig::from_json_file(&path)
            .await
            .with_context(|| format!("Failed to load configuration from {}", path))?,
        Err(_) => PageNodeCountConfig::default(),
    };
    let run_once = std::env::var("NODE_COUNT_RUN_ONCE")
        .map(|v| !v.is_empty() && v != "0" && v != "false")
        .unwrap_or(false);
    tracing::debug!("Runner configuration: {:?} (run once: {})", config, run_once);

    println!("📂 Loading content from {}", content_path);
    let repository = MemoryRepository::open_json_file(&content_path)
        .await
        .with_context(|| format!("Failed to load content from {}", content_path))?;

    let scheduler = Arc::new(TokioScheduler::new());
    let job = PageNodeCountJob::new(Arc::new(repository.clone()), scheduler);

    if run_once {
        job.activate(config);
        let summary = job.execute().await;
        job.deactivate();
        print_summary(&summary);
        print_page_info(&repository, &summary).await?;
        return Ok(());
    }

    let state = job.activate(config.clone());
    println!(
        "⏱️  Job is {:?} with '{}' on {}",
        state, config.scheduler_expression, config.root_path
    );
    println!("   Press Ctrl+C to stop");

    tokio::signal::ctrl_c().await?;
    job.deactivate();
    println!("👋 Job unregistered");
    Ok(())
}

fn print_summary(summary: &RunSummary) {
    println!(
        "✅ Run over {} finished with {:?} in {:?}",
        summary.root_path, summary.status, summary.duration
    );
    for outcome in &summary.report.outcomes {
        match outcome {
            PageOutcome::Updated {
                page,
                count,
                previous,
            } => match previous {
                Some(previous) => println!("   {} = {} (was {})", page, count, previous),
                None => println!("   {} = {}", page, count),
            },
            PageOutcome::Skipped { page, reason } => println!("   {} skipped: {:?}", page, reason),
            PageOutcome::Failed { page, reason } => println!("   {} failed: {}", page, reason),
        }
    }
}

async fn print_page_info(repository: &MemoryRepository, summary: &RunSummary) -> anyhow::Result<()> {
    let session = repository.login("listing");
    let providers = [InfoProvider::node_count(), InfoProvider::complexity()];

    for outcome in &summary.report.outcomes {
        let page = session.get_node(outcome.page()).await?;
        let mut info = Map::new();
        for provider in &providers {
            provider
                .update_page_info(&session, page.as_ref(), &mut info)
                .await;
        }
        println!("   {} {}", outcome.page(), Value::Object(info));
    }
    Ok(())
}
