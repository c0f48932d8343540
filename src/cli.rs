use std::net::SocketAddr;

use clap::{Parser, ValueEnum};

#[derive(Parser, Debug)]
#[command(
    name = "mcpkit",
    version,
    about = "Multi-server MCP aggregation client with streamed tool-calling chat"
)]
pub struct Cli {
    #[arg(long, default_value = "http://127.0.0.1:11434")]
    pub ollama_url: String,
    /// Path to the aggregation config (falls back to MCP_CONFIG, then
    /// mcp.config.json, then MCP_CONFIG_URL).
    #[arg(long)]
    pub config: Option<String>,
    /// Default model id when a request does not pick one.
    #[arg(long)]
    pub model: Option<String>,
    /// System prompt prepended to every conversation.
    #[arg(long)]
    pub system: Option<String>,
    /// Upper bound on model round trips per request.
    #[arg(long)]
    pub max_steps: Option<usize>,
    /// Restrict chat mode to one server namespace.
    #[arg(long)]
    pub server: Option<String>,
    #[arg(long, value_enum, default_value_t = RunMode::Rest)]
    pub mode: RunMode,
    #[arg(long, default_value = "127.0.0.1:8080")]
    pub rest_addr: SocketAddr,
    #[arg(long)]
    pub prompt_file: Option<String>,
    pub prompt: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RunMode {
    Rest,
    Chat,
    Tools,
    Health,
}
