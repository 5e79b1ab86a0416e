pub mod client;
pub mod stream;
pub mod types;

pub use client::{GenerateClient, GenerationBoundary};
pub use types::{
    build_history, EncodedImage, GenerateError, GenerateRequest, HistoryEntry, StreamEvent,
    UserInput,
};
