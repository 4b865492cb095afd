//! 带 key 轮换的文本生成：取 key → 调用 provider → 上报结果，失败时换下一个 key。

use crate::gateway::common::retry::should_retry_with_next_key;
use crate::groq::{ApiError, ChatMessage, Completion, CompletionProvider};
use crate::key_pool::{KeyManager, UsageOutcome};
use crate::logging::mask_key;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EnhanceError {
    /// 所有 key 都不可用：调用方应跳过 AI 增强，而不是继续重试。
    #[error("AI 配额已耗尽：所有 API key 都在冷却或已用完当日额度")]
    Exhausted,

    /// 单次调用失败（已换 key 重试仍失败，或错误不适合重试）。
    #[error(transparent)]
    Provider(#[from] ApiError),

    #[error("Groq 调用任务异常终止: {0}")]
    Aborted(String),
}

pub async fn complete_with_rotation<P>(
    keys: &Arc<KeyManager>,
    provider: &Arc<P>,
    messages: Vec<ChatMessage>,
    max_attempts: usize,
) -> Result<Completion, EnhanceError>
where
    P: CompletionProvider + 'static,
{
    let mut last_err: Option<ApiError> = None;

    for attempt in 1..=max_attempts.max(1) {
        let key = match keys.acquire_key().await {
            Ok(key) => key,
            Err(e) => {
                tracing::warn!(attempt, error = %e, "没有可用的 Groq API key");
                return Err(EnhanceError::Exhausted);
            }
        };

        // 调用与上报放在独立任务里：客户端断开导致本 future 被丢弃时，
        // 这次尝试仍会跑完并上报一次。
        let task = tokio::spawn(run_attempt(
            keys.clone(),
            provider.clone(),
            key.clone(),
            messages.clone(),
        ));
        let result = match task.await {
            Ok(result) => result,
            Err(e) => {
                tracing::error!(key = %mask_key(&key), attempt, "Groq 调用任务异常终止: {e}");
                return Err(EnhanceError::Aborted(e.to_string()));
            }
        };

        match result {
            Ok(completion) => return Ok(completion),
            Err(e) => {
                tracing::warn!(
                    key = %mask_key(&key),
                    attempt,
                    reason = %e.reason(),
                    error = %e,
                    "Groq 调用失败"
                );
                let retry = should_retry_with_next_key(&e);
                last_err = Some(e);
                if !retry {
                    break;
                }
            }
        }
    }

    Err(match last_err {
        Some(e) => EnhanceError::Provider(e),
        None => EnhanceError::Exhausted,
    })
}

/// 单次尝试：调用 provider，并且无论成功失败都上报一次结果。
async fn run_attempt<P: CompletionProvider>(
    keys: Arc<KeyManager>,
    provider: Arc<P>,
    key: String,
    messages: Vec<ChatMessage>,
) -> Result<Completion, ApiError> {
    let result = provider.complete(&key, messages).await;
    let outcome = match &result {
        Ok(_) => UsageOutcome::Success,
        Err(e) => UsageOutcome::Failure {
            reason: e.reason(),
            retry_after: e.retry_after(),
        },
    };
    keys.record_usage(&key, outcome).await;
    result
}
