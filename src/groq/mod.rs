//! Groq（OpenAI 兼容 chat completions）客户端。

pub mod client;
pub mod types;

pub use client::{ApiError, CompletionProvider, GroqClient};
pub use types::{ChatMessage, Completion};
