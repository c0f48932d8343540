use crate::domain::types::{ContentPart, MessageRole, UiMessage, new_message_id};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

/// A chat request after normalization. Every accepted wire shape collapses
/// into this: an ordered message history plus optional routing hints.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatPayload {
    pub messages: Vec<UiMessage>,
    pub model: Option<String>,
    pub server_namespace: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FormPayload {
    message: Option<String>,
    model: Option<String>,
    server: Option<String>,
}

impl ChatPayload {
    /// Normalize a raw request body. This never fails: bodies that match no
    /// known shape yield an empty payload and the conversation proceeds with
    /// whatever context remains. Structured parsing is keyed off the declared
    /// content type, so a plain-text body that happens to look like JSON
    /// (`42`, `true`) still becomes one user message.
    pub fn from_request_bytes(content_type: Option<&str>, body: &[u8]) -> Self {
        let content_type = content_type.unwrap_or("");
        if content_type.starts_with("application/x-www-form-urlencoded") {
            return Self::from_form(body);
        }
        if content_type.starts_with("application/json") {
            return match serde_json::from_slice::<Value>(body) {
                Ok(value) => Self::from_value(value),
                Err(_) => Self::from_free_text(body),
            };
        }
        Self::from_free_text(body)
    }

    fn from_form(body: &[u8]) -> Self {
        match serde_urlencoded::from_bytes::<FormPayload>(body) {
            Ok(form) => {
                let messages = form
                    .message
                    .filter(|text| !text.trim().is_empty())
                    .map(|text| vec![UiMessage::user_text(text)])
                    .unwrap_or_default();
                Self {
                    messages,
                    model: form.model.filter(|m| !m.trim().is_empty()),
                    server_namespace: form.server.filter(|s| !s.trim().is_empty()),
                }
            }
            Err(err) => {
                debug!(%err, "Unparseable form body; treating as empty chat request");
                Self::default()
            }
        }
    }

    fn from_free_text(body: &[u8]) -> Self {
        let text = String::from_utf8_lossy(body);
        if text.trim().is_empty() {
            return Self::default();
        }
        Self {
            messages: vec![UiMessage::user_text(text.trim().to_string())],
            ..Self::default()
        }
    }

    fn from_value(value: Value) -> Self {
        match value {
            // The full shape: { messages: [...], model?, server? }.
            Value::Object(map) if map.contains_key("messages") => {
                let messages = map
                    .get("messages")
                    .and_then(Value::as_array)
                    .map(|items| items.iter().filter_map(normalize_message).collect())
                    .unwrap_or_default();
                Self {
                    messages,
                    model: string_field(&map, &["model"]),
                    server_namespace: string_field(
                        &map,
                        &["server", "serverNamespace", "namespace"],
                    ),
                }
            }
            // Single-message shorthand: { message: "...", model?, server? }.
            Value::Object(map) if map.contains_key("message") => {
                let messages = map
                    .get("message")
                    .and_then(Value::as_str)
                    .filter(|text| !text.trim().is_empty())
                    .map(|text| vec![UiMessage::user_text(text)])
                    .unwrap_or_default();
                Self {
                    messages,
                    model: string_field(&map, &["model"]),
                    server_namespace: string_field(
                        &map,
                        &["server", "serverNamespace", "namespace"],
                    ),
                }
            }
            // A bare array of content parts becomes one user message.
            Value::Array(items) => {
                let parts = normalize_parts(&items);
                if parts.is_empty() {
                    return Self::default();
                }
                Self {
                    messages: vec![UiMessage {
                        id: new_message_id(),
                        role: MessageRole::User,
                        parts,
                    }],
                    ..Self::default()
                }
            }
            // A bare JSON string is a one-line user turn.
            Value::String(text) if !text.trim().is_empty() => Self {
                messages: vec![UiMessage::user_text(text)],
                ..Self::default()
            },
            _ => Self::default(),
        }
    }
}

fn string_field(map: &serde_json::Map<String, Value>, names: &[&str]) -> Option<String> {
    names
        .iter()
        .find_map(|name| map.get(*name).and_then(Value::as_str))
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

/// Coerce one history entry. Entries with unknown roles (including tool
/// results replayed by clients) are dropped; the orchestrator rebuilds tool
/// context itself.
fn normalize_message(value: &Value) -> Option<UiMessage> {
    let map = value.as_object()?;
    let role = map
        .get("role")
        .and_then(Value::as_str)
        .and_then(MessageRole::from_str)?;
    if role == MessageRole::Tool {
        return None;
    }

    let id = map
        .get("id")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .unwrap_or_else(new_message_id);

    let parts = match (map.get("parts"), map.get("content")) {
        (Some(Value::Array(items)), _) => normalize_parts(items),
        (_, Some(Value::Array(items))) => normalize_parts(items),
        (_, Some(Value::String(text))) => vec![ContentPart::Text { text: text.clone() }],
        _ => Vec::new(),
    };
    if parts.is_empty() {
        return None;
    }

    Some(UiMessage { id, role, parts })
}

/// Coerce a list of wire parts, dropping anything of unrecognized shape. A
/// bare string in the list counts as a text part.
fn normalize_parts(items: &[Value]) -> Vec<ContentPart> {
    items
        .iter()
        .filter_map(|item| match item {
            Value::String(text) => Some(ContentPart::Text { text: text.clone() }),
            Value::Object(_) => serde_json::from_value(item.clone()).ok(),
            _ => None,
        })
        .collect()
}
