//! queryforge CLI
//!
//! Runs one workflow invocation: generate, grade, repair, and execute a SQL
//! and a Cypher query for a natural-language question, then print both
//! outcomes as JSON.

use anyhow::Context;
use clap::Parser;
use queryforge::config::WorkflowConfig;
use queryforge::workflow::{WorkflowController, WorkflowRequest};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "queryforge", about = "Self-correcting SQL + Cypher query generation")]
struct Cli {
    /// Natural-language question (used for both targets unless
    /// --graph-question is given).
    question: String,

    /// Separate question for the graph target.
    #[arg(long)]
    graph_question: Option<String>,

    /// Regeneration budget per target.
    #[arg(long)]
    max_attempts: Option<u8>,

    /// Timeout in seconds applied to each external call.
    #[arg(long)]
    timeout_secs: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let mut config = WorkflowConfig::from_env().context("loading configuration")?;
    if let Some(max_attempts) = cli.max_attempts {
        config = config.with_max_attempts(max_attempts);
    }
    if let Some(secs) = cli.timeout_secs {
        config = config.with_call_timeout(std::time::Duration::from_secs(secs));
    }

    let controller = WorkflowController::from_config(&config)
        .await
        .context("initializing workflow")?;

    let request = match cli.graph_question {
        Some(graph_question) => WorkflowRequest {
            question_relational: cli.question,
            question_graph: graph_question,
        },
        None => WorkflowRequest::same(cli.question),
    };

    let response = controller.run(request).await;
    println!("{}", serde_json::to_string_pretty(&response)?);

    if !response.result_relational.is_done() && !response.result_graph.is_done() {
        std::process::exit(1);
    }
    Ok(())
}
