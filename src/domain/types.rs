use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

impl MessageRole {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageRole::System => "system",
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::Tool => "tool",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "system" => Some(MessageRole::System),
            "user" => Some(MessageRole::User),
            "assistant" => Some(MessageRole::Assistant),
            "tool" => Some(MessageRole::Tool),
            _ => None,
        }
    }
}

/// A typed fragment of message content. Parts of unrecognized shape are
/// dropped during normalization rather than failing the request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentPart {
    Text {
        text: String,
    },
    Image {
        image: String,
        #[serde(rename = "mediaType", skip_serializing_if = "Option::is_none")]
        media_type: Option<String>,
    },
    File {
        data: String,
        #[serde(rename = "mediaType")]
        media_type: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        filename: Option<String>,
    },
}

/// A conversation message as normalized from the wire: a stable id, a role,
/// and content that is always a list of typed parts (a bare string becomes a
/// single text part).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UiMessage {
    pub id: String,
    pub role: MessageRole,
    pub parts: Vec<ContentPart>,
}

impl UiMessage {
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            id: new_message_id(),
            role: MessageRole::User,
            parts: vec![ContentPart::Text { text: text.into() }],
        }
    }

    /// Flatten the message into a plain string for providers that only take
    /// text content. Non-text parts contribute a short placeholder so the
    /// model knows an attachment was present.
    pub fn flattened_text(&self) -> String {
        let mut chunks = Vec::new();
        for part in &self.parts {
            match part {
                ContentPart::Text { text } => chunks.push(text.clone()),
                ContentPart::Image { media_type, .. } => chunks.push(format!(
                    "[image attachment{}]",
                    media_type
                        .as_deref()
                        .map(|m| format!(": {m}"))
                        .unwrap_or_default()
                )),
                ContentPart::File {
                    media_type,
                    filename,
                    ..
                } => chunks.push(format!(
                    "[file attachment: {}]",
                    filename.as_deref().unwrap_or(media_type)
                )),
            }
        }
        chunks.join("\n")
    }
}

/// A model-ready message. The orchestrator builds these from normalized
/// history and extends the list as the tool loop progresses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRequest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
}

impl ChatMessage {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_name: None,
        }
    }

    pub fn tool_result(tool_name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Tool,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_name: Some(tool_name.into()),
        }
    }
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

pub fn new_message_id() -> String {
    Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_round_trips_through_str() {
        for role in [
            MessageRole::System,
            MessageRole::User,
            MessageRole::Assistant,
            MessageRole::Tool,
        ] {
            assert_eq!(MessageRole::from_str(role.as_str()), Some(role));
        }
        assert_eq!(MessageRole::from_str("developer"), None);
    }

    #[test]
    fn flattened_text_joins_parts() {
        let message = UiMessage {
            id: "m1".into(),
            role: MessageRole::User,
            parts: vec![
                ContentPart::Text {
                    text: "look at this".into(),
                },
                ContentPart::Image {
                    image: "data:image/png;base64,xyz".into(),
                    media_type: Some("image/png".into()),
                },
            ],
        };
        assert_eq!(
            message.flattened_text(),
            "look at this\n[image attachment: image/png]"
        );
    }
}
