pub mod history;

use crate::application::tooling::{AggregateCatalog, ToolManager};
use crate::domain::types::{ChatMessage, MessageRole, ToolCallRequest};
use crate::infrastructure::model::{
    ModelError, ModelEvent, ModelProvider, ModelRequest, ToolSpec,
};
use futures::{Stream, StreamExt};
use history::ChatPayload;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// At most this many model round trips per request unless configured
/// otherwise.
pub const DEFAULT_MAX_STEPS: usize = 5;

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant.";

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("no usable model: {0}")]
    ModelResolution(String),
}

/// One unit of streamed chat output, serialized as a tagged JSON object on
/// the wire.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ChatEvent {
    #[serde(rename_all = "camelCase")]
    TextDelta { delta: String },
    #[serde(rename_all = "camelCase")]
    ToolCall {
        id: String,
        name: String,
        arguments: Value,
    },
    #[serde(rename_all = "camelCase")]
    ToolResult {
        id: String,
        name: String,
        result: Value,
        is_error: bool,
    },
    #[serde(rename_all = "camelCase")]
    Error { message: String },
    Done,
}

#[derive(Debug, Clone)]
pub struct ChatSettings {
    pub default_model: Option<String>,
    /// Model ids the deployment accepts as-is. Empty means any requested id
    /// is trusted.
    pub known_models: Vec<String>,
    pub system_prompt: Option<String>,
    pub max_steps: usize,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            default_model: None,
            known_models: Vec::new(),
            system_prompt: Some(DEFAULT_SYSTEM_PROMPT.to_string()),
            max_steps: DEFAULT_MAX_STEPS,
        }
    }
}

type ModelResolver = dyn Fn(&str) -> Option<String> + Send + Sync;

/// Runs the model/tool loop for one chat request and streams the outcome.
pub struct ChatOrchestrator<P: ModelProvider> {
    provider: Arc<P>,
    settings: ChatSettings,
    resolver: Option<Box<ModelResolver>>,
}

impl<P: ModelProvider + 'static> ChatOrchestrator<P> {
    pub fn new(provider: Arc<P>, settings: ChatSettings) -> Self {
        Self {
            provider,
            settings,
            resolver: None,
        }
    }

    /// Install a fallback that maps an unrecognized requested model id to a
    /// usable one.
    pub fn with_resolver(
        mut self,
        resolver: impl Fn(&str) -> Option<String> + Send + Sync + 'static,
    ) -> Self {
        self.resolver = Some(Box::new(resolver));
        self
    }

    /// Pick the model for this request: the requested id when it is known,
    /// the resolver's mapping when it is not, the configured default when
    /// nothing was requested.
    pub fn resolve_model(&self, requested: Option<&str>) -> Result<String, ChatError> {
        if let Some(requested) = requested.map(str::trim).filter(|m| !m.is_empty()) {
            if self.settings.known_models.is_empty()
                || self.settings.known_models.iter().any(|m| m == requested)
            {
                return Ok(requested.to_string());
            }
            if let Some(mapped) = self.resolver.as_ref().and_then(|r| r(requested)) {
                debug!(requested, mapped, "Resolved unknown model id");
                return Ok(mapped);
            }
            if let Some(default) = &self.settings.default_model {
                warn!(requested, default, "Unknown model requested; using default");
                return Ok(default.clone());
            }
            return Err(ChatError::ModelResolution(format!(
                "requested model '{requested}' is not available"
            )));
        }
        self.settings
            .default_model
            .clone()
            .ok_or_else(|| ChatError::ModelResolution("no model requested and no default configured".into()))
    }

    /// Resolve the model and start the loop. An empty normalized history is
    /// not an error; the conversation proceeds with just the system prompt.
    /// The returned stream always terminates and always closes the manager's
    /// sessions exactly once, even when the consumer drops it mid-flight.
    pub async fn handle(
        &self,
        payload: ChatPayload,
        manager: Arc<ToolManager>,
    ) -> Result<ChatEventStream, ChatError> {
        let model = match self.resolve_model(payload.model.as_deref()) {
            Ok(model) => model,
            Err(err) => {
                manager.close_all().await;
                return Err(err);
            }
        };

        let mut catalog = manager.get_tools().await;
        if let Some(namespace) = &payload.server_namespace {
            retain_namespace(&mut catalog, namespace);
        }

        let mut messages = Vec::new();
        if let Some(prompt) = &self.settings.system_prompt {
            messages.push(ChatMessage::new(MessageRole::System, prompt.clone()));
        }
        for entry in &payload.messages {
            messages.push(ChatMessage::new(entry.role, entry.flattened_text()));
        }

        let provider = Arc::clone(&self.provider);
        let max_steps = self.settings.max_steps.max(1);
        Ok(Box::pin(run_loop(
            provider, model, messages, catalog, manager, max_steps,
        )))
    }
}

pub type ChatEventStream = std::pin::Pin<Box<dyn Stream<Item = ChatEvent> + Send>>;

/// Keep only the tools owned by `namespace`.
fn retain_namespace(catalog: &mut AggregateCatalog, namespace: &str) {
    catalog.retain(|_, tool| tool.namespace == namespace);
}

fn run_loop<P: ModelProvider + 'static>(
    provider: Arc<P>,
    model: String,
    mut messages: Vec<ChatMessage>,
    catalog: AggregateCatalog,
    manager: Arc<ToolManager>,
    max_steps: usize,
) -> impl Stream<Item = ChatEvent> + Send {
    let tools: Vec<ToolSpec> = catalog
        .iter()
        .map(|(key, tool)| ToolSpec {
            name: key.clone(),
            description: tool.description.clone(),
            parameters: tool.input_schema.clone(),
        })
        .collect();

    async_stream::stream! {
        let mut guard = CloseOnDrop(Some(Arc::clone(&manager)));

        'rounds: for round in 1..=max_steps {
            let request = ModelRequest {
                model: model.clone(),
                messages: messages.clone(),
                tools: tools.clone(),
            };
            let mut events = match provider.chat_stream(request).await {
                Ok(events) => events,
                Err(err) => {
                    yield ChatEvent::Error { message: err.user_message() };
                    break 'rounds;
                }
            };

            let mut text = String::new();
            let mut calls: Vec<ToolCallRequest> = Vec::new();
            while let Some(event) = events.next().await {
                match event {
                    Ok(ModelEvent::TextDelta(delta)) => {
                        text.push_str(&delta);
                        yield ChatEvent::TextDelta { delta };
                    }
                    Ok(ModelEvent::ToolCall(call)) => {
                        yield ChatEvent::ToolCall {
                            id: call.id.clone(),
                            name: exposed_name(&catalog, &call.name),
                            arguments: call.arguments.clone(),
                        };
                        calls.push(call);
                    }
                    Ok(ModelEvent::Done) => break,
                    Err(err) => {
                        yield ChatEvent::Error { message: err.user_message() };
                        break 'rounds;
                    }
                }
            }

            let mut assistant = ChatMessage::new(MessageRole::Assistant, text);
            assistant.tool_calls = calls.clone();
            messages.push(assistant);

            if calls.is_empty() {
                break 'rounds;
            }
            if round == max_steps {
                debug!(round, "Step cap reached with pending tool calls; stopping");
                break 'rounds;
            }

            for call in calls {
                let (result, is_error) = execute_call(&manager, &catalog, &call).await;
                yield ChatEvent::ToolResult {
                    id: call.id.clone(),
                    name: exposed_name(&catalog, &call.name),
                    result: result.clone(),
                    is_error,
                };
                let rendered = if is_error {
                    format!("Tool call failed: {}", render_result(&result))
                } else {
                    render_result(&result)
                };
                messages.push(ChatMessage::tool_result(call.name.clone(), rendered));
            }
        }

        yield ChatEvent::Done;
        if let Some(manager) = guard.0.take() {
            manager.close_all().await;
        }
    }
}

async fn execute_call(
    manager: &ToolManager,
    catalog: &AggregateCatalog,
    call: &ToolCallRequest,
) -> (Value, bool) {
    let Some(tool) = catalog.get(&call.name) else {
        return (
            Value::String(format!("unknown tool '{}'", call.name)),
            true,
        );
    };
    match manager
        .call_tool(&tool.namespace, &tool.original_name, call.arguments.clone())
        .await
    {
        Ok(value) => (value, false),
        Err(err) => {
            warn!(tool = call.name.as_str(), %err, "Tool call failed");
            (Value::String(err.to_string()), true)
        }
    }
}

fn exposed_name(catalog: &AggregateCatalog, key: &str) -> String {
    catalog
        .get(key)
        .map(|tool| tool.exposed_name.clone())
        .unwrap_or_else(|| key.to_string())
}

/// Render a tool result for the model's context window. Strings pass
/// through; anything structured is compact JSON.
fn render_result(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

/// Closes the manager's sessions if the event stream is dropped before it
/// reaches its own close. `close_all` is idempotent, so the normal path and
/// this fallback cannot double-close.
struct CloseOnDrop(Option<Arc<ToolManager>>);

impl Drop for CloseOnDrop {
    fn drop(&mut self) {
        if let Some(manager) = self.0.take() {
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move { manager.close_all().await });
            }
        }
    }
}
