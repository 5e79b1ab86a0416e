pub mod attachment;
pub mod conversation;
pub mod message;

pub use attachment::{AttachmentKind, AttachmentRef, BlobRecord};
pub use conversation::{Conversation, GenerationConfig};
pub use message::{ContentKind, LegacyFile, LegacyImage, Message, Role};
