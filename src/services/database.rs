use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tokio::task;

use crate::models::{
    AttachmentRef, BlobRecord, ContentKind, Conversation, Message, Role,
};

#[derive(Debug, Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    pub fn conn_ref(&self) -> &Arc<Mutex<Connection>> {
        &self.conn
    }

    pub async fn new() -> Result<Self> {
        let path = Self::db_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create data directory: {}", parent.display()))?;
        }

        let conn = Connection::open(&path)
            .with_context(|| format!("Failed to open database at {}", path.display()))?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;

        let db = Database {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;

        Ok(db)
    }

    /// Create an in-memory database (used for testing)
    pub fn new_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        let db = Database {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    fn db_path() -> Result<PathBuf> {
        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").expect("HOME not set");
                PathBuf::from(home).join(".local/share")
            });
        Ok(data_dir.join("mxchat").join("mxchat.db"))
    }

    fn run_migrations(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER NOT NULL
            );",
        )?;

        let version: i32 = conn
            .query_row(
                "SELECT COALESCE(MAX(version), 0) FROM schema_version",
                [],
                |row| row.get(0),
            )
            .unwrap_or(0);

        if version < 1 {
            conn.execute_batch(
                "CREATE TABLE conversations (
                    id TEXT PRIMARY KEY,
                    title TEXT NOT NULL,
                    chart_type TEXT NOT NULL,
                    config TEXT,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE messages (
                    id TEXT PRIMARY KEY,
                    conversation_id TEXT NOT NULL,
                    role TEXT NOT NULL,
                    content TEXT NOT NULL,
                    kind TEXT NOT NULL,
                    images TEXT,
                    files TEXT,
                    created_at INTEGER NOT NULL,
                    FOREIGN KEY (conversation_id) REFERENCES conversations(id) ON DELETE CASCADE
                );

                CREATE TABLE settings (
                    key TEXT PRIMARY KEY,
                    value TEXT NOT NULL
                );

                CREATE INDEX idx_conversations_updated ON conversations(updated_at DESC);
                CREATE INDEX idx_messages_conversation ON messages(conversation_id, created_at);

                INSERT INTO schema_version (version) VALUES (1);",
            )?;
        }

        // v2 moved attachment bytes out of the message row into a blob
        // table; the old inline images/files columns are kept readable.
        if version < 2 {
            conn.execute_batch(
                "CREATE TABLE blobs (
                    id TEXT PRIMARY KEY,
                    name TEXT NOT NULL,
                    mime_type TEXT NOT NULL,
                    size INTEGER NOT NULL,
                    data BLOB NOT NULL
                );

                ALTER TABLE messages ADD COLUMN attachments TEXT;

                UPDATE schema_version SET version = 2;",
            )?;
        }

        Ok(())
    }

    /// Collision-resistant id for conversations, messages and blobs.
    pub fn generate_id(&self) -> String {
        uuid::Uuid::new_v4().to_string()
    }

    // --- Conversation store ---

    /// Insert the conversation row unless one with the same id already
    /// exists; an existing row keeps its title, config and timestamps.
    pub async fn add_conversation_if_missing(&self, conversation: &Conversation) -> Result<()> {
        let conn = self.conn.clone();
        let conv = conversation.clone();
        task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();
            let config = conv.config.as_ref().map(serde_json::to_string).transpose()?;
            conn.execute(
                "INSERT OR IGNORE INTO conversations (id, title, chart_type, config, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    conv.id,
                    conv.title,
                    conv.chart_type,
                    config,
                    conv.created_at.to_rfc3339(),
                    conv.updated_at.to_rfc3339(),
                ],
            )?;
            Ok(())
        })
        .await?
    }

    pub async fn list_conversations(&self) -> Result<Vec<Conversation>> {
        let conn = self.conn.clone();
        task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();
            let mut stmt = conn.prepare(
                "SELECT id, title, chart_type, config, created_at, updated_at
                 FROM conversations ORDER BY updated_at DESC",
            )?;
            let conversations = stmt
                .query_map([], |row| Ok(Self::row_to_conversation(row)))?
                .collect::<Result<Vec<_>, _>>()?
                .into_iter()
                .collect::<Result<Vec<_>, _>>()?;
            Ok(conversations)
        })
        .await?
    }

    /// Delete a conversation, its messages and the blobs those messages
    /// reference.
    pub async fn delete_conversation(&self, id: &str) -> Result<()> {
        let conn = self.conn.clone();
        let id = id.to_string();
        task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();
            let mut stmt =
                conn.prepare("SELECT attachments FROM messages WHERE conversation_id = ?1")?;
            let attachment_lists = stmt
                .query_map(params![id], |row| row.get::<_, Option<String>>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            drop(stmt);
            for json in attachment_lists.into_iter().flatten() {
                let refs: Vec<AttachmentRef> = serde_json::from_str(&json).unwrap_or_default();
                for att in refs {
                    conn.execute("DELETE FROM blobs WHERE id = ?1", params![att.blob_id])?;
                }
            }
            conn.execute("DELETE FROM conversations WHERE id = ?1", params![id])?;
            Ok(())
        })
        .await?
    }

    pub async fn clear_all_stores(&self) -> Result<()> {
        let conn = self.conn.clone();
        task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();
            conn.execute_batch(
                "DELETE FROM messages;
                 DELETE FROM conversations;
                 DELETE FROM blobs;
                 DELETE FROM settings;",
            )?;
            Ok(())
        })
        .await?
    }

    // --- Message store ---

    pub async fn put_message(&self, message: &Message) -> Result<()> {
        let conn = self.conn.clone();
        let msg = message.clone();
        task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();
            let attachments = serde_json::to_string(&msg.attachments)?;
            let images = if msg.legacy_images.is_empty() {
                None
            } else {
                Some(serde_json::to_string(&msg.legacy_images)?)
            };
            let files = if msg.legacy_files.is_empty() {
                None
            } else {
                Some(serde_json::to_string(&msg.legacy_files)?)
            };
            conn.execute(
                "INSERT INTO messages (id, conversation_id, role, content, kind, images, files, attachments, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    msg.id,
                    msg.conversation_id,
                    msg.role.as_str(),
                    msg.content,
                    msg.kind.as_str(),
                    images,
                    files,
                    attachments,
                    msg.created_at,
                ],
            )?;
            // Appending a message counts as conversation activity
            conn.execute(
                "UPDATE conversations SET updated_at = ?1 WHERE id = ?2",
                params![Utc::now().to_rfc3339(), msg.conversation_id],
            )?;
            Ok(())
        })
        .await?
    }

    pub async fn get_conversation_messages(&self, conversation_id: &str) -> Result<Vec<Message>> {
        let conn = self.conn.clone();
        let conversation_id = conversation_id.to_string();
        task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();
            let mut stmt = conn.prepare(
                "SELECT id, conversation_id, role, content, kind, images, files, attachments, created_at
                 FROM messages WHERE conversation_id = ?1 ORDER BY created_at ASC",
            )?;
            let messages = stmt
                .query_map(params![conversation_id], |row| {
                    Ok(Self::row_to_message(row))
                })?
                .collect::<Result<Vec<_>, _>>()?
                .into_iter()
                .collect::<Result<Vec<_>, _>>()?;
            Ok(messages)
        })
        .await?
    }

    // --- Blob store ---

    pub async fn put_blob(&self, blob: &BlobRecord) -> Result<()> {
        let conn = self.conn.clone();
        let blob = blob.clone();
        task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();
            conn.execute(
                "INSERT INTO blobs (id, name, mime_type, size, data)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![blob.id, blob.name, blob.mime_type, blob.size, blob.data],
            )?;
            Ok(())
        })
        .await?
    }

    pub async fn get_blob(&self, id: &str) -> Result<Option<BlobRecord>> {
        let conn = self.conn.clone();
        let id = id.to_string();
        task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();
            let mut stmt = conn.prepare(
                "SELECT id, name, mime_type, size, data FROM blobs WHERE id = ?1",
            )?;
            let result = stmt
                .query_row(params![id], |row| {
                    Ok(BlobRecord {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        mime_type: row.get(2)?,
                        size: row.get(3)?,
                        data: row.get(4)?,
                    })
                })
                .optional()?;
            Ok(result)
        })
        .await?
    }

    // --- Settings ---

    pub async fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn.clone();
        let key = key.to_string();
        task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();
            let result: Option<String> = conn
                .query_row(
                    "SELECT value FROM settings WHERE key = ?1",
                    params![key],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(result)
        })
        .await?
    }

    pub async fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn.clone();
        let key = key.to_string();
        let value = value.to_string();
        task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();
            conn.execute(
                "INSERT INTO settings (key, value) VALUES (?1, ?2) ON CONFLICT(key) DO UPDATE SET value = ?2",
                params![key, value],
            )?;
            Ok(())
        })
        .await?
    }

    pub async fn delete_setting(&self, key: &str) -> Result<()> {
        let conn = self.conn.clone();
        let key = key.to_string();
        task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();
            conn.execute("DELETE FROM settings WHERE key = ?1", params![key])?;
            Ok(())
        })
        .await?
    }

    // --- Row helpers ---

    fn row_to_conversation(row: &rusqlite::Row) -> Result<Conversation> {
        let config_json: Option<String> = row.get(3)?;
        let created_str: String = row.get(4)?;
        let updated_str: String = row.get(5)?;

        Ok(Conversation {
            id: row.get(0)?,
            title: row.get(1)?,
            chart_type: row.get(2)?,
            config: config_json
                .as_deref()
                .and_then(|json| serde_json::from_str(json).ok()),
            created_at: DateTime::parse_from_rfc3339(&created_str)?.with_timezone(&Utc),
            updated_at: DateTime::parse_from_rfc3339(&updated_str)?.with_timezone(&Utc),
        })
    }

    fn row_to_message(row: &rusqlite::Row) -> Result<Message> {
        let role_str: String = row.get(2)?;
        let kind_str: String = row.get(4)?;

        Ok(Message {
            id: row.get(0)?,
            conversation_id: row.get(1)?,
            role: Role::from_str(&role_str)
                .ok_or_else(|| anyhow::anyhow!("Unknown role: {}", role_str))?,
            content: row.get(3)?,
            kind: ContentKind::from_str(&kind_str)
                .ok_or_else(|| anyhow::anyhow!("Unknown message kind: {}", kind_str))?,
            legacy_images: Self::json_list(row.get(5)?),
            legacy_files: Self::json_list(row.get(6)?),
            attachments: Self::json_list(row.get(7)?),
            created_at: row.get(8)?,
        })
    }

    /// Lenient decode for the JSON list columns: legacy rows may carry
    /// shapes this version no longer writes.
    fn json_list<T: serde::de::DeserializeOwned>(column: Option<String>) -> Vec<T> {
        column
            .as_deref()
            .map(|json| serde_json::from_str(json).unwrap_or_default())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AttachmentKind;

    fn conversation(id: &str, title: &str) -> Conversation {
        let now = Utc::now();
        Conversation {
            id: id.to_string(),
            title: title.to_string(),
            chart_type: "auto".to_string(),
            config: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn message(db: &Database, conversation_id: &str, role: Role, created_at: i64) -> Message {
        Message {
            id: db.generate_id(),
            conversation_id: conversation_id.to_string(),
            role,
            content: "hello".to_string(),
            kind: ContentKind::Text,
            attachments: Vec::new(),
            legacy_images: Vec::new(),
            legacy_files: Vec::new(),
            created_at,
        }
    }

    #[tokio::test]
    async fn test_schema_initialization() {
        let db = Database::new_in_memory().unwrap();
        let conversations = db.list_conversations().await.unwrap();
        assert!(conversations.is_empty());
    }

    #[tokio::test]
    async fn test_conversation_create_if_missing_is_idempotent() {
        let db = Database::new_in_memory().unwrap();
        let id = db.generate_id();

        db.add_conversation_if_missing(&conversation(&id, "first title"))
            .await
            .unwrap();
        db.add_conversation_if_missing(&conversation(&id, "second title"))
            .await
            .unwrap();

        let all = db.list_conversations().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].title, "first title");
    }

    #[tokio::test]
    async fn test_messages_ordered_by_created_at() {
        let db = Database::new_in_memory().unwrap();
        let conv_id = db.generate_id();
        db.add_conversation_if_missing(&conversation(&conv_id, "chat"))
            .await
            .unwrap();

        db.put_message(&message(&db, &conv_id, Role::Assistant, 11))
            .await
            .unwrap();
        db.put_message(&message(&db, &conv_id, Role::User, 10))
            .await
            .unwrap();

        let messages = db.get_conversation_messages(&conv_id).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[1].role, Role::Assistant);
    }

    #[tokio::test]
    async fn test_blob_roundtrip() {
        let db = Database::new_in_memory().unwrap();
        let blob = BlobRecord {
            id: db.generate_id(),
            name: "diagram.png".to_string(),
            mime_type: "image/png".to_string(),
            size: 3,
            data: vec![1, 2, 3],
        };
        db.put_blob(&blob).await.unwrap();

        let fetched = db.get_blob(&blob.id).await.unwrap().unwrap();
        assert_eq!(fetched.name, "diagram.png");
        assert_eq!(fetched.data, vec![1, 2, 3]);

        assert!(db.get_blob("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_conversation_cascades_to_messages_and_blobs() {
        let db = Database::new_in_memory().unwrap();
        let conv_id = db.generate_id();
        db.add_conversation_if_missing(&conversation(&conv_id, "chat"))
            .await
            .unwrap();

        let blob = BlobRecord {
            id: db.generate_id(),
            name: "notes.txt".to_string(),
            mime_type: "text/plain".to_string(),
            size: 2,
            data: vec![9, 9],
        };
        db.put_blob(&blob).await.unwrap();

        let mut msg = message(&db, &conv_id, Role::User, 1);
        msg.attachments = vec![AttachmentRef {
            blob_id: blob.id.clone(),
            name: blob.name.clone(),
            mime_type: blob.mime_type.clone(),
            size: blob.size,
            kind: AttachmentKind::File,
        }];
        db.put_message(&msg).await.unwrap();

        db.delete_conversation(&conv_id).await.unwrap();

        assert!(db.list_conversations().await.unwrap().is_empty());
        assert!(db
            .get_conversation_messages(&conv_id)
            .await
            .unwrap()
            .is_empty());
        assert!(db.get_blob(&blob.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_put_message_bumps_conversation_timestamp() {
        let db = Database::new_in_memory().unwrap();
        let conv_id = db.generate_id();
        db.add_conversation_if_missing(&conversation(&conv_id, "chat"))
            .await
            .unwrap();
        let before = db.list_conversations().await.unwrap()[0].updated_at;

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        db.put_message(&message(&db, &conv_id, Role::User, 1))
            .await
            .unwrap();

        let after = db.list_conversations().await.unwrap()[0].updated_at;
        assert!(after > before);
    }

    #[tokio::test]
    async fn test_clear_all_stores() {
        let db = Database::new_in_memory().unwrap();
        let conv_id = db.generate_id();
        db.add_conversation_if_missing(&conversation(&conv_id, "chat"))
            .await
            .unwrap();
        db.put_message(&message(&db, &conv_id, Role::User, 1))
            .await
            .unwrap();
        db.set_setting("active_config", "{}").await.unwrap();

        db.clear_all_stores().await.unwrap();

        assert!(db.list_conversations().await.unwrap().is_empty());
        assert!(db.get_setting("active_config").await.unwrap().is_none());
    }
}
