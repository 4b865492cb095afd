//! 外发邮件 AI 改写：按 key 轮换调用 Groq，配额耗尽时退回原文。

mod handler;
mod prompt;
mod rotation;
#[cfg(test)]
mod testing;
mod types;

pub use handler::handle_enhance;
