//! AI provider API key 池。
//!
//! 目标：在多个 key 之间按固定顺序轮换，记录每个 key 的当日用量与冷却状态，
//! 某个 key 限流/额度耗尽时自动落到下一个；全部不可用时给出明确的“整体耗尽”信号。

mod clock;
mod error;
mod manager;
mod policy;
mod selector;
mod store;
mod types;

pub use error::KeyPoolError;
pub use manager::KeyManager;
pub use policy::{MAX_COOLDOWN, QuotaPolicy};
pub use store::KeyStore;
pub use types::{FailureReason, KeySnapshot, KeySpec, UsageOutcome};

#[cfg(test)]
pub use clock::ManualClock;
