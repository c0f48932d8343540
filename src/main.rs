mod application;
mod cli;
mod config;
mod domain;
mod infrastructure;

use application::chat::{
    ChatEvent, ChatOrchestrator, ChatSettings, DEFAULT_MAX_STEPS, DEFAULT_SYSTEM_PROMPT,
};
use application::chat::history::ChatPayload;
use application::tooling::ToolManager;
use cli::{Cli, RunMode};
use clap::Parser;
use config::{AggregateConfig, load_config};
use domain::types::UiMessage;
use futures::StreamExt;
use infrastructure::model::OllamaClient;
use infrastructure::server;
use serde_json::json;
use std::collections::BTreeMap;
use std::error::Error;
use std::io::{IsTerminal, Read, Write};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};
use tracing_subscriber::{EnvFilter, fmt};

/// Default model when neither --model nor a request picks one.
const MODEL_ENV: &str = "MCPKIT_DEFAULT_MODEL";

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    dotenvy::dotenv().ok();
    init_tracing();
    info!("Starting mcpkit");
    let cli = Cli::parse();
    debug!(?cli.mode, config = ?cli.config, model = ?cli.model, "CLI arguments parsed");

    let config_path = cli.config.as_deref().map(Path::new);
    let config = load_config(config_path).await?.unwrap_or_else(|| {
        warn!("No MCP configuration found; running without aggregated servers");
        AggregateConfig { servers: Vec::new() }
    });
    info!(servers = config.servers.len(), "Configuration loaded");

    debug!(ollama_url = %cli.ollama_url, "Creating Ollama provider");
    let provider = Arc::new(OllamaClient::new(cli.ollama_url.clone()));
    let settings = ChatSettings {
        default_model: cli
            .model
            .clone()
            .or_else(|| std::env::var(MODEL_ENV).ok())
            .filter(|m| !m.trim().is_empty()),
        known_models: Vec::new(),
        system_prompt: cli
            .system
            .clone()
            .or_else(|| Some(DEFAULT_SYSTEM_PROMPT.to_string())),
        max_steps: cli.max_steps.unwrap_or(DEFAULT_MAX_STEPS),
    };
    let orchestrator = Arc::new(ChatOrchestrator::new(provider, settings));

    info!(mode = ?cli.mode, "Running in selected mode");
    match cli.mode {
        RunMode::Rest => {
            info!(addr = %cli.rest_addr, "Starting REST server");
            server::serve(orchestrator, config.servers, cli.rest_addr).await?;
        }
        RunMode::Tools => {
            let manager = ToolManager::connect(&config.servers).await;
            let catalog = manager.get_tools().await;
            let mut servers: BTreeMap<String, Vec<serde_json::Value>> = BTreeMap::new();
            for (key, tool) in &catalog {
                servers.entry(tool.namespace.clone()).or_default().push(json!({
                    "name": tool.original_name,
                    "key": key,
                    "description": tool.description,
                }));
            }
            let failures = manager.failures().to_vec();
            manager.close_all().await;
            let output = json!({ "servers": servers, "failures": failures });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        RunMode::Health => {
            let manager = ToolManager::connect(&config.servers).await;
            let report = manager.server_health().await;
            manager.close_all().await;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        RunMode::Chat => {
            let prompt = load_prompt(&cli)?;
            let payload = ChatPayload {
                messages: vec![UiMessage::user_text(prompt)],
                model: None,
                server_namespace: cli.server.clone(),
            };
            let manager = Arc::new(ToolManager::connect(&config.servers).await);
            let mut stream = orchestrator.handle(payload, manager).await?;
            let mut stdout = std::io::stdout();
            while let Some(event) = stream.next().await {
                match event {
                    ChatEvent::TextDelta { delta } => {
                        stdout.write_all(delta.as_bytes())?;
                        stdout.flush()?;
                    }
                    ChatEvent::ToolCall { name, .. } => {
                        info!(tool = name.as_str(), "Model requested a tool");
                    }
                    ChatEvent::ToolResult { name, is_error, .. } => {
                        info!(tool = name.as_str(), is_error, "Tool call settled");
                    }
                    ChatEvent::Error { message } => {
                        eprintln!("error: {message}");
                    }
                    ChatEvent::Done => {
                        stdout.write_all(b"\n")?;
                        stdout.flush()?;
                    }
                }
            }
        }
    }
    info!("Execution finished");
    Ok(())
}

fn init_tracing() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_level(true)
            .init();
    });
}

fn load_prompt(cli: &Cli) -> Result<String, Box<dyn Error>> {
    if let Some(path) = &cli.prompt_file {
        info!(path = %path, "Loading prompt from file");
        let content = std::fs::read_to_string(path)?;
        return Ok(content.trim().to_string());
    }

    if !cli.prompt.is_empty() {
        info!("Using prompt provided through CLI arguments");
        return Ok(cli.prompt.join(" ").trim().to_string());
    }

    if !std::io::stdin().is_terminal() {
        info!("Reading prompt from standard input");
        let mut buffer = String::new();
        std::io::stdin().read_to_string(&mut buffer)?;
        return Ok(buffer.trim().to_string());
    }

    warn!("Prompt not provided via arguments, file, or stdin");
    Err("prompt required via arguments, file, or stdin".into())
}
