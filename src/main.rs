//! Process entrypoint: either runs the orchestration core as a long-lived
//! service (queue consumer + HTTP ingress) or submits a single job against
//! a running instance.

use std::sync::Arc;

use alex_core::config::AppConfig;
use alex_core::instrument::PostgresInstrumentStore;
use alex_core::job::{JobStore, PostgresJobStore};
use alex_core::knowledge::VectorKnowledgeLookup;
use alex_core::llm::{create_llm_provider, ModelLoop};
use alex_core::orchestrator::api::{self, ApiState};
use alex_core::orchestrator::OrchestratorDeps;
use alex_core::queue::{run_consumer, InMemoryJobQueue, JobQueue};

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "alex-core", version, about = "Alex orchestration core")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the queue consumer and the HTTP ingress. Default if no
    /// subcommand is given.
    Serve {
        #[arg(long, env = "HTTP_PORT", default_value_t = 8080)]
        port: u16,
    },
    /// Submit one job against a running instance and print the job id.
    SubmitJob {
        #[arg(long, env = "ALEX_BASE_URL", default_value = "http://localhost:8080")]
        base_url: String,
        #[arg(long)]
        user_ref: String,
        #[arg(long, default_value = "portfolio_analysis")]
        kind: String,
        /// Path to a JSON file holding the request payload (`{"portfolio": {...}}`).
        #[arg(long)]
        payload: std::path::PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .json()
        .init();

    let cli = Cli::parse();
    match cli.command.unwrap_or(Command::Serve { port: 8080 }) {
        Command::Serve { port } => serve(port).await,
        Command::SubmitJob {
            base_url,
            user_ref,
            kind,
            payload,
        } => submit_job(base_url, user_ref, kind, payload).await,
    }
}

async fn serve(port: u16) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let config = AppConfig::from_env()?;

    let job_pool = config.job_db.connect_pool().await?;
    alex_core::migrations::run(&job_pool).await?;

    let job_store: Arc<dyn JobStore> = Arc::new(PostgresJobStore::from_pool(job_pool.clone()));
    let instrument_store = Arc::new(PostgresInstrumentStore::new(&config.instrument_db).await?);

    // The knowledge index shares the job database's connection parameters;
    // it gets its own pool rather than borrowing the job store's.
    let knowledge_pool = config.job_db.connect_pool().await?;
    let knowledge = Arc::new(VectorKnowledgeLookup::new(
        knowledge_pool,
        config.knowledge.clone(),
    ));

    let llm_provider = create_llm_provider(&config.llm)?;
    let model_loop = Arc::new(ModelLoop::new(llm_provider));

    let deps = OrchestratorDeps::from_config(
        &config,
        job_store.clone(),
        instrument_store,
        knowledge,
        model_loop,
    );

    let queue: Arc<dyn JobQueue> = if config.queue.queue_url.starts_with("memory://") {
        Arc::new(InMemoryJobQueue::with_visibility_timeout(
            config.queue.visibility_timeout,
        ))
    } else {
        return Err(format!(
            "unsupported QUEUE_URL scheme: {} (only memory:// is implemented by this core)",
            config.queue.queue_url
        )
        .into());
    };

    let api_state = ApiState {
        job_store,
        queue: queue.clone(),
    };
    let router = api::router(api_state);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    tracing::info!(port, "alex-core listening");

    let consumer = run_consumer(queue, deps, config.queue.clone());
    let server = axum::serve(listener, router);

    tokio::select! {
        result = server => { result?; }
        _ = consumer => {}
    }

    Ok(())
}

async fn submit_job(
    base_url: String,
    user_ref: String,
    kind: String,
    payload_path: std::path::PathBuf,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let payload_text = std::fs::read_to_string(&payload_path)?;
    let request_payload: serde_json::Value = serde_json::from_str(&payload_text)?;

    let body = serde_json::json!({
        "user_ref": user_ref,
        "kind": kind,
        "request_payload": request_payload,
    });

    let client = reqwest::Client::new();
    let response = client
        .post(format!("{base_url}/jobs"))
        .json(&body)
        .send()
        .await?
        .error_for_status()?;

    let parsed: serde_json::Value = response.json().await?;
    println!("{parsed}");
    Ok(())
}
