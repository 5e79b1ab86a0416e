use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentKind {
    Image,
    File,
}

/// By-reference pointer from a message into the blob store. The message
/// owns the reference; the bytes live in the blob row until the owning
/// conversation is deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachmentRef {
    pub blob_id: String,
    pub name: String,
    pub mime_type: String,
    pub size: i64,
    pub kind: AttachmentKind,
}

#[derive(Debug, Clone)]
pub struct BlobRecord {
    pub id: String,
    pub name: String,
    pub mime_type: String,
    pub size: i64,
    pub data: Vec<u8>,
}
