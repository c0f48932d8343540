use crate::domain::types::{ChatMessage, ToolCallRequest};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::pin::Pin;
use thiserror::Error;
use tracing::{debug, info};

/// One round trip's worth of input for a provider: the resolved model, the
/// accumulated conversation, and the tools the model may request.
#[derive(Debug, Clone)]
pub struct ModelRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<ToolSpec>,
}

/// A tool as advertised to the model. `name` is the aggregate's safe key,
/// so whatever the model echoes back routes without further translation.
#[derive(Debug, Clone)]
pub struct ToolSpec {
    pub name: String,
    pub description: Option<String>,
    pub parameters: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ModelEvent {
    TextDelta(String),
    ToolCall(ToolCallRequest),
    Done,
}

pub type ModelEventStream = Pin<Box<dyn futures::Stream<Item = Result<ModelEvent, ModelError>> + Send>>;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("model provider returned invalid response: {0}")]
    InvalidResponse(String),
}

impl ModelError {
    pub fn user_message(&self) -> String {
        match self {
            ModelError::Network(err) => {
                if err.is_connect() {
                    "Could not reach the model service. Check that the Ollama server is running and reachable.".to_string()
                } else if err.is_timeout() {
                    "The model service took too long to answer. Try again shortly.".to_string()
                } else if let Some(status) = err.status() {
                    match status {
                        StatusCode::NOT_FOUND => {
                            "The model endpoint was not found (404). Check that the Ollama server exposes /api/chat.".to_string()
                        }
                        StatusCode::SERVICE_UNAVAILABLE | StatusCode::BAD_GATEWAY => {
                            "The model service is currently unavailable. Try again later.".to_string()
                        }
                        _ => format!(
                            "The model request failed with status {}. Try again later.",
                            status.as_u16()
                        ),
                    }
                } else {
                    "A network error occurred while contacting the model service.".to_string()
                }
            }
            ModelError::InvalidResponse(_) => {
                "The model service sent a response that could not be processed. Try again."
                    .to_string()
            }
        }
    }
}

#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Open one streaming completion. Events arrive in provider order; the
    /// stream ends after `Done` or the first error.
    async fn chat_stream(&self, request: ModelRequest) -> Result<ModelEventStream, ModelError>;
}

#[derive(Clone)]
pub struct OllamaClient {
    http: Client,
    base_url: String,
}

impl OllamaClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(base_url, Client::new())
    }

    pub fn with_client(base_url: impl Into<String>, client: Client) -> Self {
        Self {
            http: client,
            base_url: base_url.into(),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        let trimmed = self.base_url.trim_end_matches('/');
        let path = path.trim_start_matches('/');
        format!("{trimmed}/{path}")
    }
}

#[async_trait]
impl ModelProvider for OllamaClient {
    async fn chat_stream(&self, request: ModelRequest) -> Result<ModelEventStream, ModelError> {
        let url = self.endpoint("/api/chat");
        let payload = OllamaChatRequest::from(&request);
        info!(
            model = request.model.as_str(),
            url = %url,
            messages = request.messages.len(),
            tools = request.tools.len(),
            "Sending request to model provider"
        );
        let response = self
            .http
            .post(url)
            .json(&payload)
            .send()
            .await?
            .error_for_status()?;
        debug!("Model provider stream opened");

        let mut body = response.bytes_stream();
        let stream = async_stream::try_stream! {
            let mut buffer = String::new();
            while let Some(chunk) = body.next().await {
                let chunk = chunk.map_err(ModelError::Network)?;
                buffer.push_str(&String::from_utf8_lossy(&chunk));
                while let Some(newline) = buffer.find('\n') {
                    let line: String = buffer.drain(..=newline).collect();
                    for event in parse_line(line.trim())? {
                        let done = event == ModelEvent::Done;
                        yield event;
                        if done {
                            return;
                        }
                    }
                }
            }
            // Stream closed without a done marker; treat it as completion.
            yield ModelEvent::Done;
        };
        Ok(Box::pin(stream))
    }
}

/// Parse one NDJSON line from the Ollama chat stream into events. Blank
/// lines parse to nothing.
fn parse_line(line: &str) -> Result<Vec<ModelEvent>, ModelError> {
    if line.is_empty() {
        return Ok(Vec::new());
    }
    let frame: OllamaStreamFrame = serde_json::from_str(line)
        .map_err(|err| ModelError::InvalidResponse(format!("bad stream frame: {err}")))?;
    if let Some(error) = frame.error {
        return Err(ModelError::InvalidResponse(error));
    }

    let mut events = Vec::new();
    if let Some(message) = frame.message {
        if !message.content.is_empty() {
            events.push(ModelEvent::TextDelta(message.content));
        }
        for call in message.tool_calls {
            events.push(ModelEvent::ToolCall(ToolCallRequest {
                // Ollama does not assign call ids; mint one so tool results
                // can be correlated downstream.
                id: uuid::Uuid::new_v4().to_string(),
                name: call.function.name,
                arguments: call.function.arguments,
            }));
        }
    }
    if frame.done {
        events.push(ModelEvent::Done);
    }
    Ok(events)
}

#[derive(Debug, Serialize)]
struct OllamaChatRequest {
    model: String,
    messages: Vec<OllamaChatMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<OllamaTool>,
}

impl From<&ModelRequest> for OllamaChatRequest {
    fn from(value: &ModelRequest) -> Self {
        Self {
            model: value.model.clone(),
            messages: value
                .messages
                .iter()
                .map(|msg| OllamaChatMessage {
                    role: msg.role.as_str().to_string(),
                    content: msg.content.clone(),
                    tool_calls: msg
                        .tool_calls
                        .iter()
                        .map(|call| OllamaToolCall {
                            function: OllamaFunctionCall {
                                name: call.name.clone(),
                                arguments: call.arguments.clone(),
                            },
                        })
                        .collect(),
                    tool_name: msg.tool_name.clone(),
                })
                .collect(),
            stream: true,
            tools: value
                .tools
                .iter()
                .map(|tool| OllamaTool {
                    kind: "function",
                    function: OllamaFunctionSpec {
                        name: tool.name.clone(),
                        description: tool.description.clone(),
                        parameters: tool.parameters.clone(),
                    },
                })
                .collect(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct OllamaChatMessage {
    role: String,
    content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<OllamaToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_name: Option<String>,
}

#[derive(Debug, Serialize)]
struct OllamaTool {
    #[serde(rename = "type")]
    kind: &'static str,
    function: OllamaFunctionSpec,
}

#[derive(Debug, Serialize)]
struct OllamaFunctionSpec {
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    parameters: Value,
}

#[derive(Debug, Serialize, Deserialize)]
struct OllamaToolCall {
    function: OllamaFunctionCall,
}

#[derive(Debug, Serialize, Deserialize)]
struct OllamaFunctionCall {
    name: String,
    #[serde(default)]
    arguments: Value,
}

#[derive(Debug, Deserialize)]
struct OllamaStreamFrame {
    message: Option<OllamaChatMessage>,
    #[serde(default)]
    done: bool,
    error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::MessageRole;
    use serde_json::json;

    #[test]
    fn endpoint_joins_paths_correctly() {
        let client = OllamaClient::new("http://localhost:11434/");
        assert_eq!(
            client.endpoint("/api/chat"),
            "http://localhost:11434/api/chat"
        );
    }

    #[test]
    fn request_conversion_preserves_roles_and_tools() {
        let request = ModelRequest {
            model: "qwen3:8b".into(),
            messages: vec![
                ChatMessage::new(MessageRole::System, "stay concise"),
                ChatMessage::new(MessageRole::User, "hi"),
            ],
            tools: vec![ToolSpec {
                name: "files__read_file".into(),
                description: Some("Read a file".into()),
                parameters: json!({"type": "object"}),
            }],
        };
        let payload = OllamaChatRequest::from(&request);
        let roles: Vec<_> = payload.messages.iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, vec!["system", "user"]);
        assert!(payload.stream);
        assert_eq!(payload.tools[0].function.name, "files__read_file");
    }

    #[test]
    fn parse_line_yields_text_deltas_and_done() {
        let events = parse_line(r#"{"message": {"role": "assistant", "content": "Hel"}}"#)
            .expect("valid frame");
        assert_eq!(events, vec![ModelEvent::TextDelta("Hel".into())]);

        let events =
            parse_line(r#"{"message": {"role": "assistant", "content": ""}, "done": true}"#)
                .expect("valid frame");
        assert_eq!(events, vec![ModelEvent::Done]);

        assert!(parse_line("").expect("blank ok").is_empty());
    }

    #[test]
    fn parse_line_mints_ids_for_tool_calls() {
        let line = r#"{"message": {"role": "assistant", "content": "", "tool_calls": [
            {"function": {"name": "files__read_file", "arguments": {"path": "README.md"}}}
        ]}}"#;
        let events = parse_line(line).expect("valid frame");
        match &events[0] {
            ModelEvent::ToolCall(call) => {
                assert_eq!(call.name, "files__read_file");
                assert_eq!(call.arguments["path"], "README.md");
                assert!(!call.id.is_empty());
            }
            other => panic!("expected tool call, got {other:?}"),
        }
    }

    #[test]
    fn parse_line_surfaces_provider_errors() {
        let err = parse_line(r#"{"error": "model not found"}"#).expect_err("error frame");
        assert!(matches!(err, ModelError::InvalidResponse(msg) if msg == "model not found"));
    }

    #[tokio::test]
    async fn chat_stream_reads_ndjson_frames() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        let body = concat!(
            r#"{"message": {"role": "assistant", "content": "The answer"}}"#,
            "\n",
            r#"{"message": {"role": "assistant", "content": " is 4."}, "done": true}"#,
            "\n"
        );
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw(body.as_bytes().to_vec(), "application/x-ndjson"),
            )
            .mount(&server)
            .await;

        let client = OllamaClient::new(server.uri());
        let mut stream = client
            .chat_stream(ModelRequest {
                model: "qwen3:8b".into(),
                messages: vec![ChatMessage::new(MessageRole::User, "2+2?")],
                tools: Vec::new(),
            })
            .await
            .expect("stream opens");

        let mut events = Vec::new();
        while let Some(event) = stream.next().await {
            events.push(event.expect("event ok"));
        }
        assert_eq!(
            events,
            vec![
                ModelEvent::TextDelta("The answer".into()),
                ModelEvent::TextDelta(" is 4.".into()),
                ModelEvent::Done,
            ]
        );
    }
}
