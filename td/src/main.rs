//! Workflow Execution Engine - operator CLI entry point.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use eyre::{Context, Result};
use tracing::info;

use workflowd::cli::{Cli, Command};
use workflowd::config::Config;
use workflowd::domain::WorkflowDefinition;
use workflowd::events::{create_event_bus, read_execution_events, spawn_event_logger};
use workflowd::llm::create_client_from_resolved;
use workflowd::workflow::{HttpAgentClient, LlmExtractor, WorkflowEngine, WorkflowManager};

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    let level_str = cli_log_level.or(config_log_level);
    let level = match level_str.map(str::to_uppercase).as_deref() {
        Some("TRACE") => tracing::Level::TRACE,
        Some("DEBUG") => tracing::Level::DEBUG,
        Some("WARN") | Some("WARNING") => tracing::Level::WARN,
        Some("ERROR") => tracing::Level::ERROR,
        Some("INFO") | None => tracing::Level::INFO,
        Some(other) => {
            eprintln!("Warning: Unknown log-level '{other}', defaulting to INFO");
            tracing::Level::INFO
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    Ok(())
}

/// Load every `*.yaml`/`*.yml` file under `dir` as a [`WorkflowDefinition`],
/// logging and skipping files that fail to parse rather than aborting
/// startup (§4.9 "failures logged, do not crash").
fn load_templates(dir: &PathBuf) -> Vec<WorkflowDefinition> {
    let Ok(entries) = fs::read_dir(dir) else {
        tracing::info!(?dir, "load_templates: no templates directory, starting with an empty catalog");
        return Vec::new();
    };

    let mut templates = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        let is_yaml = path.extension().and_then(|e| e.to_str()).is_some_and(|e| e == "yaml" || e == "yml");
        if !is_yaml {
            continue;
        }

        match fs::read_to_string(&path).and_then(|s| serde_yaml::from_str(&s).map_err(std::io::Error::other)) {
            Ok(def) => templates.push(def),
            Err(e) => tracing::warn!(?path, error = %e, "load_templates: failed to parse template, skipping"),
        }
    }
    templates
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.log_level.as_deref(), None)?;

    let config = Config::load(cli.config.as_ref()).context("failed to load configuration")?;

    let store = taskstore::Store::open(&config.storage.taskstore_dir).context("failed to open taskstore")?;

    let event_bus = create_event_bus();
    spawn_event_logger(event_bus.clone()).context("failed to start event logger")?;

    match cli.command {
        Command::Templates => {
            let templates = load_templates(&PathBuf::from("templates"));
            for t in &templates {
                println!("{}", t.id);
            }
        }
        Command::Run { thread_id, instruction, name } => {
            let manager = build_manager(&config, store)?;
            let mut context = std::collections::HashMap::new();
            context.insert("thread_id".to_string(), serde_json::json!(thread_id));
            let instance = manager
                .execute_workflow(name.as_deref(), &instruction, context, &thread_id)
                .await
                .map_err(|e| eyre::eyre!("{e}"))?;
            println!("{}", serde_json::to_string_pretty(&instance)?);
        }
        Command::Resume { thread_id, name, input } => {
            let manager = build_manager(&config, store)?;
            let human_input: serde_json::Value = serde_json::from_str(&input).unwrap_or(serde_json::json!(input));
            let instance = manager
                .resume_workflow(&name, human_input, &thread_id)
                .await
                .map_err(|e| eyre::eyre!("{e}"))?;
            println!("{}", serde_json::to_string_pretty(&instance)?);
        }
        Command::Replay { instance_id } => {
            let events = read_execution_events(default_runs_dir()?, &instance_id)?;
            for entry in events {
                println!("{}", serde_json::to_string(&entry)?);
            }
        }
    }

    Ok(())
}

fn default_runs_dir() -> Result<PathBuf> {
    let home = dirs::home_dir().ok_or_else(|| eyre::eyre!("could not determine home directory"))?;
    Ok(home.join(".taskdaemon").join("runs"))
}

fn build_manager(config: &Config, store: taskstore::Store) -> Result<WorkflowManager> {
    let templates = load_templates(&PathBuf::from("templates"));

    let agents: workflowd::workflow::AgentEndpoints = std::collections::HashMap::new();
    let agent_client = Arc::new(HttpAgentClient::new(agents));

    let resolved = config.llm.resolve().context("failed to resolve LLM provider")?;
    let llm = create_client_from_resolved(&resolved).map_err(|e| eyre::eyre!("{e}"))?;
    let extractor = Arc::new(LlmExtractor::new(llm.clone()));

    let engine = WorkflowEngine::new(agent_client, extractor, config.workflow.clone());

    info!(templates = templates.len(), "build_manager: starting workflow manager");
    Ok(WorkflowManager::spawn(templates, engine, store, Some(llm)))
}
