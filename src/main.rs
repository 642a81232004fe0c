//! Agentic Labeler - Entry Point
//!
//! Labels each file given on the command line and prints one JSON result
//! per file to stdout. Logs go to stderr.

use agentic_labeler::llm::{ChatClient, ChatClientConfig, LlmClient};
use agentic_labeler::{Config, LlmPlanner, Orchestrator, PoolConfig, WorkerPool};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment
    dotenvy::dotenv().ok();

    // Parse args
    let args: Vec<String> = std::env::args().skip(1).collect();
    let help_mode = args.iter().any(|a| a == "--help" || a == "-h");
    let offline = args.iter().any(|a| a == "--offline");
    let json_logs = args.iter().any(|a| a == "--json-logs");
    let files: Vec<PathBuf> = args
        .iter()
        .filter(|a| !a.starts_with('-'))
        .map(PathBuf::from)
        .collect();

    if help_mode || files.is_empty() {
        println!("Agentic Labeler v{}", env!("CARGO_PKG_VERSION"));
        println!();
        println!("Usage: agentic-labeler [OPTIONS] <FILES>...");
        println!();
        println!("Options:");
        println!("  --offline      Run without an LLM (fallback plan, default decisions)");
        println!("  --json-logs    Log to stderr as JSON");
        println!("  --help, -h     Show this help");
        println!();
        println!("Environment variables:");
        println!("  OPENAI_API_KEY            API key (required unless --offline)");
        println!("  LLM_BASE_URL              Chat completions base URL");
        println!("  PLANNER_MODEL             Model for planning (default: gpt-4o)");
        println!("  DECISION_MODEL            Model for decisions (default: gpt-4o-mini)");
        println!("  LABELER_OUTPUT_DIR        Output directory (default: output)");
        println!("  LABELER_EXPERIENCE_PATH   Experience log (default: data/experience_db.json)");
        println!("  LABELER_MAX_WORKERS       Concurrent workers (default: 4)");
        println!("  LABELER_FAILURE_POLICY    continue | replan | abort | decide");
        return Ok(());
    }

    let log_level = std::env::var("RUST_LOG")
        .map(|s| match s.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        })
        .unwrap_or(Level::INFO);

    if json_logs {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(log_level)
            .with_writer(std::io::stderr)
            .with_ansi(false)
            .json()
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(log_level)
            .with_writer(std::io::stderr)
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    }

    info!("Agentic Labeler v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env()?;
    let mut builder = Orchestrator::builder(config.clone());

    if offline {
        info!("Offline mode: no LLM planning or decisions");
    } else {
        config.require_api_key()?;
        let planner_llm: Arc<dyn LlmClient> = Arc::new(ChatClient::new(
            ChatClientConfig::from_config(&config, &config.planner_model)?,
        )?);
        let decision_llm: Arc<dyn LlmClient> = Arc::new(ChatClient::new(
            ChatClientConfig::from_config(&config, &config.decision_model)?,
        )?);
        builder = builder
            .planner(Arc::new(LlmPlanner::new(planner_llm)))
            .llm(decision_llm);
    }

    let orchestrator = Arc::new(builder.build());
    let mut pool = WorkerPool::new(PoolConfig::from_config(&config), Arc::clone(&orchestrator));
    pool.start();

    let mut handles = Vec::with_capacity(files.len());
    for file in files {
        handles.push((file.clone(), pool.submit(file, None)?));
    }

    let mut failures = 0usize;
    for (file, handle) in handles {
        match handle.wait().await {
            Ok(result) => {
                if result.get("success").and_then(|v| v.as_bool()) != Some(true) {
                    failures += 1;
                }
                println!("{}", serde_json::to_string_pretty(&result)?);
            }
            Err(e) => {
                failures += 1;
                error!("{}: {}", file.display(), e);
            }
        }
    }

    pool.stop().await;
    info!(
        "Done: {} failed, system status {}",
        failures,
        serde_json::to_string(&orchestrator.system_status())?
    );

    Ok(())
}
