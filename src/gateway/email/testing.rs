//! 测试用的脚本化 provider 与 key 池。

use crate::groq::{ApiError, ChatMessage, Completion, CompletionProvider};
use crate::key_pool::{FailureReason, KeyManager, KeySpec, KeyStore, ManualClock, QuotaPolicy};
use chrono::{DateTime, TimeZone, Utc};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

pub fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 6, 1, 9, 0, 0).unwrap()
}

pub fn manager(keys: &[&str]) -> Arc<KeyManager> {
    let specs: Vec<KeySpec> = keys
        .iter()
        .map(|k| KeySpec {
            key: k.to_string(),
            daily_capacity: 10,
        })
        .collect();
    Arc::new(KeyManager::with_clock(
        KeyStore::in_memory(&specs, start()),
        QuotaPolicy::default(),
        Arc::new(ManualClock::new(start())),
    ))
}

pub fn http(status: u16, reason: FailureReason) -> ApiError {
    ApiError::Http {
        status,
        message: "x".to_string(),
        reason,
        retry_after: None,
    }
}

/// 按顺序返回预设结果的 provider，并记录每次使用的 key。
#[derive(Default)]
pub struct ScriptedProvider {
    results: Mutex<VecDeque<Result<String, ApiError>>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedProvider {
    pub fn new(results: Vec<Result<String, ApiError>>) -> Arc<Self> {
        Arc::new(Self {
            results: Mutex::new(results.into()),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl CompletionProvider for ScriptedProvider {
    async fn complete(
        &self,
        api_key: &str,
        _messages: Vec<ChatMessage>,
    ) -> Result<Completion, ApiError> {
        self.calls.lock().unwrap().push(api_key.to_string());
        let next = self
            .results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Err(ApiError::EmptyResponse));
        next.map(|text| Completion {
            text,
            model: "test-model".to_string(),
        })
    }
}

/// 调用开始后挂起，直到测试放行。
#[derive(Default)]
pub struct GatedProvider {
    pub started: Notify,
    pub release: Notify,
}

impl CompletionProvider for GatedProvider {
    async fn complete(
        &self,
        _api_key: &str,
        _messages: Vec<ChatMessage>,
    ) -> Result<Completion, ApiError> {
        self.started.notify_one();
        self.release.notified().await;
        Ok(Completion {
            text: "late".to_string(),
            model: "test-model".to_string(),
        })
    }
}
