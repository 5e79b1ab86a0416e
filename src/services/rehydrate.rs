use std::collections::HashMap;

use base64::Engine;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::models::{AttachmentKind, AttachmentRef, BlobRecord, ContentKind, Message, Role};
use crate::services::database::Database;
use crate::services::history::HistoryPreview;

/// Inline marker older versions prepended to file contents pasted into the
/// message body. Both marker languages exist in stored data.
static FILE_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^#\s*(?:来自文件|[Ff]rom file)\s*:\s*(.+)$").unwrap());

const FALLBACK_FILE_TYPE: &str = "text/plain";
const FALLBACK_MIME_TYPE: &str = "application/octet-stream";

/// Image ready for display: a self-contained data URL handle.
#[derive(Debug, Clone)]
pub struct DisplayImage {
    pub url: String,
    pub name: String,
    pub mime_type: String,
}

/// Non-image attachment rendered as a descriptor chip.
#[derive(Debug, Clone)]
pub struct DisplayFile {
    pub name: String,
    pub mime_type: String,
    pub size: i64,
}

#[derive(Debug, Clone)]
pub struct DisplayMessage {
    pub role: Role,
    pub content: String,
    pub kind: ContentKind,
    pub images: Vec<DisplayImage>,
    pub files: Vec<DisplayFile>,
}

/// A conversation rebuilt for display, plus the document that should
/// repopulate the canvas.
#[derive(Debug, Clone)]
pub struct ConversationView {
    pub messages: Vec<DisplayMessage>,
    pub current_xml: Option<String>,
}

/// Rebuild the conversation behind a history entry. Any failure degrades
/// to a two-message reconstruction of the preview's last turn instead of
/// an empty view.
pub async fn rehydrate(db: &Database, preview: &HistoryPreview) -> ConversationView {
    match rehydrate_messages(db, &preview.id).await {
        Ok(view) => view,
        Err(e) => {
            tracing::error!("Rehydration failed, degrading to last turn: {}", e);
            degraded_view(preview)
        }
    }
}

async fn rehydrate_messages(db: &Database, conversation_id: &str) -> anyhow::Result<ConversationView> {
    let messages = db.get_conversation_messages(conversation_id).await?;

    let mut display = Vec::with_capacity(messages.len());
    for msg in &messages {
        let blobs = resolve_blobs(db, &msg.attachments).await;
        display.push(to_display(msg, &blobs));
    }

    let current_xml = display
        .iter()
        .rev()
        .find(|m| m.role == Role::Assistant && m.kind == ContentKind::Xml)
        .map(|m| m.content.clone());

    Ok(ConversationView {
        messages: display,
        current_xml,
    })
}

/// Load the blobs behind a message's refs; a ref whose blob cannot be
/// loaded is simply left unresolved.
async fn resolve_blobs(db: &Database, refs: &[AttachmentRef]) -> HashMap<String, BlobRecord> {
    let mut blobs = HashMap::new();
    for r in refs {
        match db.get_blob(&r.blob_id).await {
            Ok(Some(record)) => {
                blobs.insert(r.blob_id.clone(), record);
            }
            Ok(None) => {}
            Err(e) => tracing::warn!("Failed to load blob {}: {}", r.blob_id, e),
        }
    }
    blobs
}

/// Recovery chain, first tier that produces a display message wins.
fn to_display(msg: &Message, blobs: &HashMap<String, BlobRecord>) -> DisplayMessage {
    from_attachments(msg, blobs)
        .or_else(|| from_inline_markers(msg))
        .or_else(|| from_legacy_fields(msg))
        .unwrap_or_else(|| passthrough(msg))
}

fn from_attachments(msg: &Message, blobs: &HashMap<String, BlobRecord>) -> Option<DisplayMessage> {
    if msg.attachments.is_empty() {
        return None;
    }

    let mut images = Vec::new();
    let mut files = Vec::new();
    for att in &msg.attachments {
        let record = blobs.get(&att.blob_id);
        let name = if att.name.is_empty() {
            record
                .map(|r| r.name.clone())
                .unwrap_or_else(|| "file".to_string())
        } else {
            att.name.clone()
        };
        let mime_type = if att.mime_type.is_empty() {
            record
                .map(|r| r.mime_type.clone())
                .unwrap_or_else(|| FALLBACK_MIME_TYPE.to_string())
        } else {
            att.mime_type.clone()
        };
        let size = if att.size > 0 {
            att.size
        } else {
            record.map(|r| r.size).unwrap_or(0)
        };

        if mime_type.starts_with("image/") || att.kind == AttachmentKind::Image {
            if let Some(record) = record {
                let encoded = base64::engine::general_purpose::STANDARD.encode(&record.data);
                images.push(DisplayImage {
                    url: format!("data:{};base64,{}", mime_type, encoded),
                    name,
                    mime_type,
                });
            }
        } else {
            files.push(DisplayFile {
                name,
                mime_type,
                size,
            });
        }
    }

    if images.is_empty() && files.is_empty() {
        return None;
    }

    // Content written before attachment storage may still embed the inline
    // file blocks; show only the typed text ahead of the first marker.
    let content = match FILE_MARKER.find(&msg.content) {
        Some(first) => msg.content[..first.start()].trim().to_string(),
        None => msg.content.clone(),
    };

    Some(DisplayMessage {
        role: msg.role,
        content,
        kind: msg.kind,
        images,
        files,
    })
}

fn from_inline_markers(msg: &Message) -> Option<DisplayMessage> {
    if msg.role != Role::User {
        return None;
    }
    let first = FILE_MARKER.find(&msg.content)?;

    let files = FILE_MARKER
        .captures_iter(&msg.content)
        .map(|caps| DisplayFile {
            name: caps[1].trim().to_string(),
            mime_type: FALLBACK_FILE_TYPE.to_string(),
            size: 0,
        })
        .collect();
    let content = msg.content[..first.start()].trim().to_string();

    Some(DisplayMessage {
        role: msg.role,
        content,
        kind: msg.kind,
        images: Vec::new(),
        files,
    })
}

fn from_legacy_fields(msg: &Message) -> Option<DisplayMessage> {
    if msg.role != Role::User {
        return None;
    }
    if msg.legacy_images.is_empty() && msg.legacy_files.is_empty() {
        return None;
    }

    let images = msg
        .legacy_images
        .iter()
        .map(|im| DisplayImage {
            url: im.url.clone(),
            name: im.name.clone(),
            mime_type: im.mime_type.clone(),
        })
        .collect();
    let files = msg
        .legacy_files
        .iter()
        .map(|f| DisplayFile {
            name: f.name.clone(),
            mime_type: if f.mime_type.is_empty() {
                FALLBACK_FILE_TYPE.to_string()
            } else {
                f.mime_type.clone()
            },
            size: f.size,
        })
        .collect();

    Some(DisplayMessage {
        role: msg.role,
        content: msg.content.clone(),
        kind: msg.kind,
        images,
        files,
    })
}

fn passthrough(msg: &Message) -> DisplayMessage {
    DisplayMessage {
        role: msg.role,
        content: msg.content.clone(),
        kind: msg.kind,
        images: Vec::new(),
        files: Vec::new(),
    }
}

/// Best-effort two-message thread from the preview's last input/output
/// pair, with file chips recovered from inline markers.
fn degraded_view(preview: &HistoryPreview) -> ConversationView {
    let raw = preview.user_input.as_str();
    let (typed, files) = match FILE_MARKER.find(raw) {
        Some(first) => {
            let files = FILE_MARKER
                .captures_iter(raw)
                .map(|caps| DisplayFile {
                    name: caps[1].trim().to_string(),
                    mime_type: FALLBACK_FILE_TYPE.to_string(),
                    size: 0,
                })
                .collect();
            (raw[..first.start()].trim().to_string(), files)
        }
        None => (raw.trim().to_string(), Vec::new()),
    };

    let current_xml = if preview.generated_xml.is_empty() {
        None
    } else {
        Some(preview.generated_xml.clone())
    };

    ConversationView {
        messages: vec![
            DisplayMessage {
                role: Role::User,
                content: typed,
                kind: ContentKind::Text,
                images: Vec::new(),
                files,
            },
            DisplayMessage {
                role: Role::Assistant,
                content: preview.generated_xml.clone(),
                kind: ContentKind::Xml,
                images: Vec::new(),
                files: Vec::new(),
            },
        ],
        current_xml,
    }
}
