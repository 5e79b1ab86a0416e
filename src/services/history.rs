use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::models::{
    AttachmentKind, AttachmentRef, BlobRecord, ContentKind, Conversation, GenerationConfig,
    Message, Role,
};
use crate::services::database::Database;

const DEFAULT_TITLE: &str = "New conversation";
const TITLE_LIMIT: usize = 30;
const PREVIEW_NAME_LIMIT: usize = 3;

/// One attachment handed in with a turn. Metadata is best-effort: missing
/// fields fall back to the bytes themselves, then to fixed defaults.
#[derive(Debug, Clone, Default)]
pub struct TurnAttachment {
    pub data: Option<Vec<u8>>,
    pub name: Option<String>,
    pub mime_type: Option<String>,
    pub size: Option<i64>,
}

/// Everything needed to persist one completed turn.
#[derive(Debug, Clone)]
pub struct TurnRecord {
    pub conversation_id: Option<String>,
    pub chart_type: String,
    pub user_input: String,
    pub generated_xml: String,
    pub config: Option<GenerationConfig>,
    pub images: Vec<TurnAttachment>,
    pub files: Vec<TurnAttachment>,
}

#[derive(Debug, Clone)]
pub struct TurnReceipt {
    pub conversation_id: String,
    pub user_message_id: String,
    pub assistant_message_id: String,
}

/// Per-conversation summary for the history list.
#[derive(Debug, Clone)]
pub struct HistoryPreview {
    pub id: String,
    pub chart_type: String,
    pub user_input: String,
    pub generated_xml: String,
    pub config: Option<GenerationConfig>,
    pub timestamp: DateTime<Utc>,
}

pub struct HistoryManager {
    db: Database,
}

impl HistoryManager {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Persist a turn: the conversation row (created if missing), the
    /// attachment blobs, and the user/assistant message pair. The
    /// assistant message is stamped one past the user message so the pair
    /// orders deterministically even under identical wall-clock reads.
    pub async fn add_history(&self, turn: TurnRecord) -> Result<TurnReceipt> {
        let conversation_id = turn
            .conversation_id
            .clone()
            .unwrap_or_else(|| self.db.generate_id());
        let now = Utc::now();

        self.db
            .add_conversation_if_missing(&Conversation {
                id: conversation_id.clone(),
                title: truncate_title(&turn.user_input),
                chart_type: turn.chart_type.clone(),
                config: turn.config.clone(),
                created_at: now,
                updated_at: now,
            })
            .await?;

        // Each attachment is saved in isolation; a failure drops that
        // attachment from the message but never aborts the turn.
        let mut attachment_refs = Vec::new();
        for image in &turn.images {
            if let Some(r) = self.save_blob(image, AttachmentKind::Image).await {
                attachment_refs.push(r);
            }
        }
        for file in &turn.files {
            if let Some(r) = self.save_blob(file, AttachmentKind::File).await {
                attachment_refs.push(r);
            }
        }

        let user_ts = Utc::now().timestamp_millis();
        let user_msg = Message {
            id: self.db.generate_id(),
            conversation_id: conversation_id.clone(),
            role: Role::User,
            content: turn.user_input.clone(),
            kind: ContentKind::Text,
            attachments: attachment_refs,
            legacy_images: Vec::new(),
            legacy_files: Vec::new(),
            created_at: user_ts,
        };
        self.db.put_message(&user_msg).await?;

        let assistant_msg = Message {
            id: self.db.generate_id(),
            conversation_id: conversation_id.clone(),
            role: Role::Assistant,
            content: turn.generated_xml.clone(),
            kind: ContentKind::Xml,
            attachments: Vec::new(),
            legacy_images: Vec::new(),
            legacy_files: Vec::new(),
            created_at: user_ts + 1,
        };
        self.db.put_message(&assistant_msg).await?;

        Ok(TurnReceipt {
            conversation_id,
            user_message_id: user_msg.id,
            assistant_message_id: assistant_msg.id,
        })
    }

    async fn save_blob(
        &self,
        payload: &TurnAttachment,
        kind: AttachmentKind,
    ) -> Option<AttachmentRef> {
        let data = payload.data.as_ref()?;
        let blob_id = self.db.generate_id();
        let name = payload.name.clone().unwrap_or_else(|| "file".to_string());
        let mime_type = payload
            .mime_type
            .clone()
            .unwrap_or_else(|| "application/octet-stream".to_string());
        let size = payload.size.unwrap_or(data.len() as i64);

        let record = BlobRecord {
            id: blob_id.clone(),
            name: name.clone(),
            mime_type: mime_type.clone(),
            size,
            data: data.clone(),
        };
        match self.db.put_blob(&record).await {
            Ok(()) => Some(AttachmentRef {
                blob_id,
                name,
                mime_type,
                size,
                kind,
            }),
            Err(e) => {
                tracing::warn!("Failed to persist attachment {}: {}", name, e);
                None
            }
        }
    }

    /// One preview per conversation: the latest assistant document, the
    /// latest user text, and a synthesized caption when the user message
    /// was image-only.
    pub async fn get_histories(&self) -> Result<Vec<HistoryPreview>> {
        let conversations = self.db.list_conversations().await?;
        let mut results = Vec::with_capacity(conversations.len());
        for conv in conversations {
            let messages = self.db.get_conversation_messages(&conv.id).await?;
            let last_xml = messages
                .iter()
                .rev()
                .find(|m| m.role == Role::Assistant && m.kind == ContentKind::Xml);
            let last_user = messages.iter().rev().find(|m| m.role == Role::User);

            let mut user_preview = last_user
                .map(|m| m.content.trim().to_string())
                .unwrap_or_default();
            if user_preview.is_empty() {
                if let Some(preview) = last_user.and_then(|m| image_preview(&m.attachments)) {
                    user_preview = preview;
                }
            }

            results.push(HistoryPreview {
                id: conv.id,
                chart_type: conv.chart_type,
                user_input: user_preview,
                generated_xml: last_xml.map(|m| m.content.clone()).unwrap_or_default(),
                config: conv.config,
                timestamp: conv.updated_at,
            });
        }
        Ok(results)
    }

    pub async fn delete_history(&self, id: &str) -> Result<()> {
        self.db.delete_conversation(id).await
    }

    pub async fn clear_all(&self) -> Result<()> {
        self.db.clear_all_stores().await
    }

    pub async fn get_conversation_messages(&self, id: &str) -> Result<Vec<Message>> {
        self.db.get_conversation_messages(id).await
    }
}

/// Caption for a message that carried images but no typed text, naming up
/// to three attachments.
fn image_preview(attachments: &[AttachmentRef]) -> Option<String> {
    let names: Vec<&str> = attachments
        .iter()
        .filter(|att| att.kind == AttachmentKind::Image)
        .map(|att| att.name.as_str())
        .collect();
    if names.is_empty() {
        return None;
    }
    let shown = &names[..names.len().min(PREVIEW_NAME_LIMIT)];
    let mut preview = format!("From images: {}", shown.join(", "));
    if names.len() > PREVIEW_NAME_LIMIT {
        preview.push_str(&format!(" +{} more", names.len() - PREVIEW_NAME_LIMIT));
    }
    Some(preview)
}

/// Derive a conversation title from the first line of user input.
fn truncate_title(text: &str) -> String {
    let first_line = text.lines().next().unwrap_or(text).trim();
    if first_line.is_empty() {
        return DEFAULT_TITLE.to_string();
    }
    if first_line.chars().count() > TITLE_LIMIT {
        let truncated: String = first_line.chars().take(TITLE_LIMIT).collect();
        format!("{}...", truncated)
    } else {
        first_line.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> HistoryManager {
        HistoryManager::new(Database::new_in_memory().unwrap())
    }

    fn image(name: &str, bytes: Option<Vec<u8>>) -> TurnAttachment {
        TurnAttachment {
            data: bytes,
            name: Some(name.to_string()),
            mime_type: Some("image/png".to_string()),
            size: None,
        }
    }

    fn turn(conversation_id: Option<String>) -> TurnRecord {
        TurnRecord {
            conversation_id,
            chart_type: "flowchart".to_string(),
            user_input: "Draw a login flow".to_string(),
            generated_xml: "<mxfile><diagram/></mxfile>".to_string(),
            config: Some(GenerationConfig {
                name: "default".to_string(),
                model: "gpt-4o".to_string(),
            }),
            images: Vec::new(),
            files: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_add_history_stores_user_assistant_pair() {
        let manager = manager();
        let receipt = manager.add_history(turn(None)).await.unwrap();

        let messages = manager
            .get_conversation_messages(&receipt.conversation_id)
            .await
            .unwrap();
        assert_eq!(messages.len(), 2);

        let user = &messages[0];
        let assistant = &messages[1];
        assert_eq!(user.role, Role::User);
        assert_eq!(user.kind, ContentKind::Text);
        assert_eq!(user.content, "Draw a login flow");
        assert_eq!(assistant.role, Role::Assistant);
        assert_eq!(assistant.kind, ContentKind::Xml);
        assert_eq!(assistant.content, "<mxfile><diagram/></mxfile>");
        assert_eq!(assistant.created_at, user.created_at + 1);
    }

    #[tokio::test]
    async fn test_add_history_reuses_existing_conversation() {
        let manager = manager();
        let receipt = manager.add_history(turn(None)).await.unwrap();

        let mut followup = turn(Some(receipt.conversation_id.clone()));
        followup.user_input = "Add a logout branch".to_string();
        manager.add_history(followup).await.unwrap();

        let previews = manager.get_histories().await.unwrap();
        assert_eq!(previews.len(), 1);
        assert_eq!(previews[0].user_input, "Add a logout branch");

        let messages = manager
            .get_conversation_messages(&receipt.conversation_id)
            .await
            .unwrap();
        assert_eq!(messages.len(), 4);
    }

    #[tokio::test]
    async fn test_failed_attachments_are_dropped_not_fatal() {
        let manager = manager();
        let mut record = turn(None);
        record.images = vec![image("a.png", Some(vec![1, 2])), image("b.png", None)];

        let receipt = manager.add_history(record).await.unwrap();
        let messages = manager
            .get_conversation_messages(&receipt.conversation_id)
            .await
            .unwrap();

        assert_eq!(messages.len(), 2);
        let user = &messages[0];
        assert_eq!(user.attachments.len(), 1);
        assert_eq!(user.attachments[0].name, "a.png");
        assert_eq!(user.attachments[0].kind, AttachmentKind::Image);

        let blob = manager
            .database()
            .get_blob(&user.attachments[0].blob_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(blob.data, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_image_only_preview_lists_names() {
        let manager = manager();
        let mut record = turn(None);
        record.user_input = String::new();
        record.images = vec![
            image("a.png", Some(vec![1])),
            image("b.png", Some(vec![2])),
            image("c.png", Some(vec![3])),
            image("d.png", Some(vec![4])),
        ];
        manager.add_history(record).await.unwrap();

        let previews = manager.get_histories().await.unwrap();
        assert_eq!(previews.len(), 1);
        assert_eq!(previews[0].user_input, "From images: a.png, b.png, c.png +1 more");
    }

    #[tokio::test]
    async fn test_delete_history_removes_conversation() {
        let manager = manager();
        let receipt = manager.add_history(turn(None)).await.unwrap();

        manager.delete_history(&receipt.conversation_id).await.unwrap();

        assert!(manager.get_histories().await.unwrap().is_empty());
        assert!(manager
            .get_conversation_messages(&receipt.conversation_id)
            .await
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_truncate_title() {
        assert_eq!(truncate_title("short"), "short");
        assert_eq!(truncate_title(""), DEFAULT_TITLE);
        assert_eq!(truncate_title("  \n"), DEFAULT_TITLE);
        let long = "a".repeat(40);
        assert_eq!(truncate_title(&long), format!("{}...", "a".repeat(30)));
    }
}
