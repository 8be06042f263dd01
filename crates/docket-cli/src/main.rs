use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::Parser;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use docket_core::app::BATCH_SEARCH_TASK;
use docket_core::domain::{Document, Project, User};
use docket_core::impls::{InMemoryBatchRepository, MemoryIndex};
use docket_core::ports::BatchSearchRepository;
use docket_core::typed::{Handler, Task, TaskContext};
use docket_core::{AppBuilder, EngineConfig, TaskError};

#[derive(Parser)]
#[command(name = "docket", version, about = "Run a batch search against a demo in-memory index")]
struct Cli {
    /// TOML config file, layered over the defaults and under DOCKET_* variables
    #[arg(long, env = "DOCKET_CONFIG")]
    config: Option<PathBuf>,

    /// Query to run (repeatable)
    #[arg(short, long = "query", default_values_t = [String::from("mydoc")])]
    queries: Vec<String>,

    #[arg(long, default_value = "local")]
    project: String,

    /// Match queries as phrases with this slop
    #[arg(long, value_name = "SLOP")]
    phrase: Option<u32>,

    #[arg(long, default_value_t = 0)]
    fuzziness: u32,
}

/// Counts the documents of the demo index.
#[derive(Debug, Serialize, Deserialize)]
struct IndexStats {}

impl Task for IndexStats {
    const TYPE: &'static str = "index_stats";
}

struct IndexStatsHandler {
    index: Arc<MemoryIndex>,
}

#[async_trait]
impl Handler<IndexStats> for IndexStatsHandler {
    async fn handle(&self, _task: IndexStats, ctx: TaskContext) -> Result<Value, TaskError> {
        ctx.progress.report(1.0);
        Ok(json!({ "documents": self.index.len() }))
    }
}

fn init_logging(default_filter: &str) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(default_filter).context("invalid log_filter")?,
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}

fn demo_documents(project: &Project) -> Vec<Document> {
    vec![
        Document::new(project.clone(), "mydoc", "I'm looking for a document that I need to find mydoc")
            .with_path("/vault/mail/mydoc.eml")
            .with_content_type("message/rfc822"),
        Document::new(project.clone(), "report", "quarterly report on offshore accounts")
            .with_path("/vault/reports/q3.pdf")
            .with_content_type("application/pdf"),
        Document::new(project.clone(), "memo", "memo about the offshore leak and the report")
            .with_path("/vault/memos/leak.txt")
            .with_content_type("text/plain"),
        Document::new(project.clone(), "draft", "draft replaced by the final report")
            .with_path("/vault/reports/draft.txt")
            .with_content_type("text/plain")
            .deleted(),
    ]
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = EngineConfig::load(cli.config.as_deref())?;
    init_logging(&config.log_filter)?;

    let project = Project::new(cli.project);
    let index = Arc::new(MemoryIndex::with_documents(demo_documents(&project)));
    let repository = Arc::new(InMemoryBatchRepository::new());

    let app = AppBuilder::new()
        .with_config(config)
        .register::<IndexStats, _>(IndexStatsHandler { index: Arc::clone(&index) })?
        .with_batch_search(index, repository.clone())?
        .expect_tasks(&[IndexStats::TYPE, BATCH_SEARCH_TASK])
        .build()?;
    let app = Arc::new(app);

    let signals = {
        let app = Arc::clone(&app);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupted, terminating workers");
                app.terminate();
            }
        })
    };

    let batches = app.batches.as_ref().context("batch search loop is not enabled")?;
    let recovered = batches.requeue_database_batches().await?;

    let mut batch = batches
        .new_batch(vec![project], "cli", cli.queries, User::local())
        .with_fuzziness(cli.fuzziness);
    if let Some(slop) = cli.phrase {
        batch = batch.with_phrase_matches(slop);
    }
    let batch_id = batches.submit(batch).await?;
    let task_id = app.tasks.submit(User::local(), &IndexStats {})?;
    info!(%batch_id, %task_id, recovered, "work submitted");

    let shutdown = app.shutdown().await;
    signals.abort();

    let status = json!({
        "recovered": recovered,
        "batch": repository.get(&batch_id).await?,
        "results": repository.results(&batch_id).await?,
        "task": app.tasks.get(&task_id),
        "counts": app.tasks.counts(),
        "shutdown": shutdown,
    });
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}
