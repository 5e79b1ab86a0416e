use serde::Serialize;
use thiserror::Error;

use crate::models::{ContentKind, GenerationConfig, Message, Role};

/// How many trailing messages accompany a request as context.
pub const HISTORY_LIMIT: usize = 3;

/// Stand-in for assistant XML in the request history; the full document
/// is large and the boundary only needs to know a diagram was produced.
pub const XML_PLACEHOLDER: &str =
    "[previous diagram XML omitted, already applied to the canvas]";

#[derive(Debug, Error)]
pub enum GenerateError {
    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Too many requests, retry later")]
    RateLimited,

    #[error("Server error: {0}")]
    Server(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Malformed stream: {0}")]
    MalformedStream(String),

    #[error("Generation failed: {0}")]
    Pipeline(String),

    #[error("Generated output is not a valid diagram document")]
    InvalidDocument,

    #[error("Generation cancelled")]
    Cancelled,

    #[error("Request failed: {0}")]
    RequestFailed(String),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EncodedImage {
    pub data: String,
    pub mime_type: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInput {
    pub text: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<EncodedImage>,
    /// Current canvas document, attached so follow-up turns can refine it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_xml: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HistoryEntry {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest {
    pub config: Option<GenerationConfig>,
    pub user_input: UserInput,
    pub chart_type: String,
    pub conversation_id: String,
    pub history: Vec<HistoryEntry>,
}

/// Events surfaced while consuming a generation response.
#[derive(Debug)]
pub enum StreamEvent {
    Content(String),
    Done,
    Error(GenerateError),
}

/// Trailing request context: the last few user/assistant messages, with
/// assistant documents swapped for the placeholder and empties dropped.
pub fn build_history(messages: &[Message]) -> Vec<HistoryEntry> {
    let start = messages.len().saturating_sub(HISTORY_LIMIT);
    messages[start..]
        .iter()
        .filter(|m| matches!(m.role, Role::User | Role::Assistant))
        .map(|m| HistoryEntry {
            role: m.role,
            content: if m.kind == ContentKind::Xml {
                XML_PLACEHOLDER.to_string()
            } else {
                m.content.clone()
            },
        })
        .filter(|entry| !entry.content.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(role: Role, kind: ContentKind, content: &str) -> Message {
        Message {
            id: "m".to_string(),
            conversation_id: "c".to_string(),
            role,
            content: content.to_string(),
            kind,
            attachments: Vec::new(),
            legacy_images: Vec::new(),
            legacy_files: Vec::new(),
            created_at: 0,
        }
    }

    #[test]
    fn test_build_history_limits_and_replaces_xml() {
        let messages = vec![
            message(Role::User, ContentKind::Text, "first"),
            message(Role::Assistant, ContentKind::Xml, "<mxfile/>"),
            message(Role::User, ContentKind::Text, "second"),
            message(Role::Assistant, ContentKind::Xml, "<mxfile/>"),
            message(Role::User, ContentKind::Text, "third"),
        ];

        let history = build_history(&messages);
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].content, "second");
        assert_eq!(history[1].content, XML_PLACEHOLDER);
        assert_eq!(history[2].content, "third");
    }

    #[test]
    fn test_build_history_drops_empty_and_system() {
        let messages = vec![
            message(Role::System, ContentKind::Text, "prompt"),
            message(Role::User, ContentKind::Text, ""),
            message(Role::User, ContentKind::Text, "draw"),
        ];

        let history = build_history(&messages);
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].content, "draw");
    }

    #[test]
    fn test_request_serializes_camel_case() {
        let request = GenerateRequest {
            config: None,
            user_input: UserInput {
                text: "draw".to_string(),
                images: vec![EncodedImage {
                    data: "AAAA".to_string(),
                    mime_type: "image/png".to_string(),
                    name: "a.png".to_string(),
                }],
                context_xml: Some("<mxfile/>".to_string()),
            },
            chart_type: "auto".to_string(),
            conversation_id: "c1".to_string(),
            history: vec![HistoryEntry {
                role: Role::User,
                content: "hi".to_string(),
            }],
        };

        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["chartType"], "auto");
        assert_eq!(value["conversationId"], "c1");
        assert_eq!(value["userInput"]["contextXml"], "<mxfile/>");
        assert_eq!(value["userInput"]["images"][0]["mimeType"], "image/png");
        assert_eq!(value["history"][0]["role"], "user");
    }
}
