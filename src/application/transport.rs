use crate::config::{HttpServerConfig, ServerConfig, StdioServerConfig};
use rmcp::model::{CallToolRequestParam, CallToolResult, Content, JsonObject, ResourceContents};
use rmcp::service::{RoleClient, RunningService, ServiceExt};
use rmcp::transport::sse_client::SseClientConfig;
use rmcp::transport::streamable_http_client::StreamableHttpClientTransportConfig;
use rmcp::transport::{SseClientTransport, StreamableHttpClientTransport};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Applied to session establishment and tool operations when a server does
/// not configure `timeoutMs`.
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

type McpService = RunningService<RoleClient, ()>;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to open session to server '{server}': {message}")]
    Init { server: String, message: String },
    #[error("server '{server}': stdio transport is not supported in this environment")]
    Unsupported { server: String },
    #[error("session to server '{server}' did not open within {timeout_ms}ms")]
    Timeout { server: String, timeout_ms: u64 },
}

#[derive(Debug, Error)]
pub enum ToolFetchError {
    #[error("server '{server}' tool listing failed: {message}")]
    Query { server: String, message: String },
    #[error("server '{server}' tool listing timed out after {timeout_ms}ms")]
    Timeout { server: String, timeout_ms: u64 },
}

#[derive(Debug, Error)]
pub enum ToolInvokeError {
    #[error("no connected server owns namespace '{namespace}'")]
    UnknownNamespace { namespace: String },
    #[error("tool '{tool}' arguments must be a JSON object: {message}")]
    InvalidArguments { tool: String, message: String },
    #[error("server '{server}' failed to run tool '{tool}': {message}")]
    Call {
        server: String,
        tool: String,
        message: String,
    },
    #[error("tool '{tool}' on server '{server}' reported an error: {message}")]
    ToolReported {
        server: String,
        tool: String,
        message: String,
    },
    #[error("tool '{tool}' on server '{server}' timed out after {timeout_ms}ms")]
    Timeout {
        server: String,
        tool: String,
        timeout_ms: u64,
    },
}

/// One open protocol connection to a server. The underlying rmcp service
/// owns the handshake and framing; this type only exposes tool listing, tool
/// invocation, and close.
pub struct Session {
    config: ServerConfig,
    service: McpService,
}

impl Session {
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn namespace(&self) -> &str {
        self.config.namespace()
    }

    fn timeout(&self) -> Duration {
        Duration::from_millis(self.config.timeout_ms().unwrap_or(DEFAULT_TIMEOUT_MS))
    }

    /// List the server's tools exactly as it reports them.
    pub async fn list_tools(&self) -> Result<Vec<rmcp::model::Tool>, ToolFetchError> {
        let timeout_ms = self.timeout().as_millis() as u64;
        let listed = tokio::time::timeout(self.timeout(), self.service.list_all_tools())
            .await
            .map_err(|_| ToolFetchError::Timeout {
                server: self.config.id().to_string(),
                timeout_ms,
            })?;
        listed.map_err(|err| ToolFetchError::Query {
            server: self.config.id().to_string(),
            message: err.to_string(),
        })
    }

    /// Invoke one tool by its server-reported name.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value, ToolInvokeError> {
        let arguments = coerce_arguments(name, arguments)?;
        let timeout_ms = self.timeout().as_millis() as u64;
        let params = CallToolRequestParam {
            name: name.to_owned().into(),
            arguments,
        };

        let result = tokio::time::timeout(self.timeout(), self.service.call_tool(params))
            .await
            .map_err(|_| ToolInvokeError::Timeout {
                server: self.config.id().to_string(),
                tool: name.to_string(),
                timeout_ms,
            })?
            .map_err(|err| ToolInvokeError::Call {
                server: self.config.id().to_string(),
                tool: name.to_string(),
                message: err.to_string(),
            })?;

        self.shape_call_result(name, result)
    }

    /// Close the session. Best-effort: a failed close is logged, never
    /// propagated.
    pub async fn close(self) {
        let server = self.config.id().to_string();
        if let Err(err) = self.service.cancel().await {
            debug!(server, %err, "Session close reported an error (session may have already ended)");
        }
    }

    fn shape_call_result(
        &self,
        tool: &str,
        result: CallToolResult,
    ) -> Result<Value, ToolInvokeError> {
        let text = extract_text_content(&result.content);
        if result.is_error.unwrap_or(false) {
            let message = result
                .structured_content
                .as_ref()
                .map(Value::to_string)
                .or_else(|| text.clone())
                .unwrap_or_else(|| "tool returned an error result".into());
            return Err(ToolInvokeError::ToolReported {
                server: self.config.id().to_string(),
                tool: tool.to_string(),
                message,
            });
        }

        if let Some(structured) = result.structured_content {
            return Ok(structured);
        }
        if let Some(text) = text {
            return Ok(Value::String(text));
        }
        Ok(Value::Array(
            result
                .content
                .iter()
                .filter_map(|item| serde_json::to_value(item).ok())
                .collect(),
        ))
    }
}

/// Open a protocol session using the mechanism the server's config selects.
pub async fn open_session(config: &ServerConfig) -> Result<Session, TransportError> {
    let timeout = Duration::from_millis(config.timeout_ms().unwrap_or(DEFAULT_TIMEOUT_MS));
    let timeout_ms = timeout.as_millis() as u64;
    let opening = async {
        match config {
            ServerConfig::Http(cfg) => open_http_with_fallback(cfg).await,
            ServerConfig::Sse(cfg) => open_sse(cfg).await,
            ServerConfig::Stdio(cfg) => open_stdio(cfg).await,
        }
    };

    let service = tokio::time::timeout(timeout, opening)
        .await
        .map_err(|_| TransportError::Timeout {
            server: config.id().to_string(),
            timeout_ms,
        })??;

    Ok(Session {
        config: config.clone(),
        service,
    })
}

/// The `http` strategy: a streamable-HTTP attempt, then an unconditional SSE
/// fallback. The HTTP attempt's error is dropped when SSE succeeds.
async fn open_http_with_fallback(cfg: &HttpServerConfig) -> Result<McpService, TransportError> {
    match open_streamable_http(cfg).await {
        Ok(service) => Ok(service),
        Err(err) => {
            warn!(
                server = %cfg.id,
                %err,
                "Streamable HTTP session failed; falling back to SSE"
            );
            open_sse(cfg).await
        }
    }
}

async fn open_streamable_http(cfg: &HttpServerConfig) -> Result<McpService, TransportError> {
    let url = join_url(&cfg.url, &cfg.http_path);
    let client = http_client(&cfg.id, &cfg.headers)?;
    let transport = StreamableHttpClientTransport::with_client(
        client,
        StreamableHttpClientTransportConfig::with_uri(url),
    );
    ().serve(transport)
        .await
        .map_err(|err| init_error(&cfg.id, err))
}

async fn open_sse(cfg: &HttpServerConfig) -> Result<McpService, TransportError> {
    let url = join_url(&cfg.url, &cfg.sse_path);
    let client = http_client(&cfg.id, &cfg.headers)?;
    let transport = SseClientTransport::start_with_client(
        client,
        SseClientConfig {
            sse_endpoint: url.into(),
            ..Default::default()
        },
    )
    .await
    .map_err(|err| init_error(&cfg.id, err))?;
    ().serve(transport)
        .await
        .map_err(|err| init_error(&cfg.id, err))
}

#[cfg(not(target_family = "wasm"))]
async fn open_stdio(cfg: &StdioServerConfig) -> Result<McpService, TransportError> {
    use rmcp::transport::{ConfigureCommandExt, TokioChildProcess};

    let transport = TokioChildProcess::new(tokio::process::Command::new(&cfg.command).configure(
        |command| {
            command
                .args(&cfg.args)
                .envs(cfg.env.iter())
                .stderr(std::process::Stdio::inherit());
            if let Some(cwd) = &cfg.cwd {
                command.current_dir(cwd);
            }
        },
    ))
    .map_err(|err| init_error(&cfg.id, err))?;

    ().serve(transport)
        .await
        .map_err(|err| init_error(&cfg.id, err))
}

#[cfg(target_family = "wasm")]
async fn open_stdio(cfg: &StdioServerConfig) -> Result<McpService, TransportError> {
    Err(TransportError::Unsupported {
        server: cfg.id.clone(),
    })
}

/// Join a base URL and a path: one trailing slash stripped from the base,
/// exactly one leading slash on the path.
pub fn join_url(base: &str, path: &str) -> String {
    if path.is_empty() {
        return base.to_string();
    }
    let base = base.strip_suffix('/').unwrap_or(base);
    let path = path.strip_prefix('/').unwrap_or(path);
    format!("{base}/{path}")
}

fn http_client(
    server: &str,
    headers: &HashMap<String, String>,
) -> Result<reqwest::Client, TransportError> {
    let mut map = reqwest::header::HeaderMap::new();
    for (name, value) in headers {
        let name = reqwest::header::HeaderName::from_bytes(name.as_bytes())
            .map_err(|err| init_error(server, err))?;
        let value = reqwest::header::HeaderValue::from_str(value)
            .map_err(|err| init_error(server, err))?;
        map.insert(name, value);
    }
    reqwest::Client::builder()
        .default_headers(map)
        .build()
        .map_err(|err| init_error(server, err))
}

fn init_error(server: &str, err: impl std::fmt::Display) -> TransportError {
    TransportError::Init {
        server: server.to_string(),
        message: err.to_string(),
    }
}

fn coerce_arguments(tool: &str, value: Value) -> Result<Option<JsonObject>, ToolInvokeError> {
    match value {
        Value::Null => Ok(None),
        Value::Object(map) => Ok(Some(map)),
        Value::String(raw) => {
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                return Ok(None);
            }
            let parsed: Value =
                serde_json::from_str(trimmed).map_err(|err| ToolInvokeError::InvalidArguments {
                    tool: tool.to_string(),
                    message: err.to_string(),
                })?;
            coerce_arguments(tool, parsed)
        }
        other => Err(ToolInvokeError::InvalidArguments {
            tool: tool.to_string(),
            message: format!("got {other}"),
        }),
    }
}

fn extract_text_content(content: &[Content]) -> Option<String> {
    let mut lines = Vec::new();
    for item in content {
        if let Some(text) = item.as_text() {
            lines.push(text.text.clone());
            continue;
        }
        if let Some(resource) = item.as_resource() {
            if let ResourceContents::TextResourceContents { text, .. } = &resource.resource {
                lines.push(text.clone());
            }
        }
    }
    if lines.is_empty() { None } else { Some(lines.join("\n")) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn join_url_strips_and_adds_slashes() {
        assert_eq!(join_url("https://h/", "/mcp"), "https://h/mcp");
        assert_eq!(join_url("https://h", "mcp"), "https://h/mcp");
        assert_eq!(join_url("https://h", "/mcp"), "https://h/mcp");
        assert_eq!(join_url("https://h:8080/", "sse"), "https://h:8080/sse");
        assert_eq!(join_url("https://h", ""), "https://h");
    }

    #[test]
    fn coerce_arguments_accepts_object_null_and_stringified_object() {
        let from_obj = coerce_arguments("t", json!({"q": "rust"}))
            .expect("object accepted")
            .expect("object present");
        assert_eq!(from_obj.get("q"), Some(&json!("rust")));

        assert_eq!(coerce_arguments("t", Value::Null).expect("null accepted"), None);
        assert_eq!(coerce_arguments("t", json!("")).expect("blank accepted"), None);

        let from_str = coerce_arguments("t", json!(r#"{"q":"go"}"#))
            .expect("stringified object accepted")
            .expect("object present");
        assert_eq!(from_str.get("q"), Some(&json!("go")));
    }

    #[test]
    fn coerce_arguments_rejects_non_objects() {
        let err = coerce_arguments("t", json!([1, 2])).expect_err("array rejected");
        assert!(matches!(err, ToolInvokeError::InvalidArguments { .. }));
    }

    #[test]
    fn header_maps_reject_invalid_names() {
        let mut headers = HashMap::new();
        headers.insert("bad header name".to_string(), "x".to_string());
        let err = http_client("srv", &headers).expect_err("invalid header rejected");
        assert!(matches!(err, TransportError::Init { server, .. } if server == "srv"));
    }
}
