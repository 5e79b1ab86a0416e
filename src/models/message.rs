use serde::{Deserialize, Serialize};

use super::attachment::AttachmentRef;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            "system" => Some(Role::System),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    Text,
    Xml,
}

impl ContentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentKind::Text => "text",
            ContentKind::Xml => "xml",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "text" => Some(ContentKind::Text),
            "xml" => Some(ContentKind::Xml),
            _ => None,
        }
    }
}

/// Image descriptor stored inline on old message rows, before attachments
/// moved into the blob store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LegacyImage {
    pub url: String,
    pub name: String,
    #[serde(default)]
    pub mime_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LegacyFile {
    pub name: String,
    #[serde(default)]
    pub mime_type: String,
    #[serde(default)]
    pub size: i64,
}

/// A stored chat message. Immutable once written; `created_at` is a
/// millisecond timestamp that orders messages within a conversation, with
/// the assistant half of a turn stamped one past its user half.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub role: Role,
    pub content: String,
    pub kind: ContentKind,
    #[serde(default)]
    pub attachments: Vec<AttachmentRef>,
    #[serde(default)]
    pub legacy_images: Vec<LegacyImage>,
    #[serde(default)]
    pub legacy_files: Vec<LegacyFile>,
    pub created_at: i64,
}
