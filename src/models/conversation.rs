use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Provider preset recorded with a conversation: a user-facing label and
/// the model it targets. The credential itself is never stored here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationConfig {
    pub name: String,
    pub model: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub title: String,
    pub chart_type: String,
    pub config: Option<GenerationConfig>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
