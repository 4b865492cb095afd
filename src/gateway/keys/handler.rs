use crate::error::AppError;
use crate::gateway::AppState;
use crate::key_pool::{KeyPoolError, KeySnapshot, QuotaPolicy};
use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct KeyStatsResponse {
    total_daily_capacity: u64,
    used_today: u64,
    available_keys: usize,
    total_keys: usize,
    model: String,
    keys: Vec<KeySnapshot>,
}

/// GET /api/ai/key-stats - 整体与每个 key 的当日用量（key 已脱敏）
pub async fn handle_key_stats(State(state): State<Arc<AppState>>) -> Response {
    let stats = state.keys.get_key_stats().await;
    let keys = state.keys.key_snapshots().await;
    Json(KeyStatsResponse {
        total_daily_capacity: stats.total_daily_capacity,
        used_today: stats.used_today,
        available_keys: state.keys.available_count().await,
        total_keys: state.keys.key_count().await,
        model: state.groq.model().to_string(),
        keys,
    })
    .into_response()
}

/// GET /api/ai/policy
pub async fn handle_policy_get(State(state): State<Arc<AppState>>) -> Response {
    Json(state.keys.policy()).into_response()
}

/// 策略的部分更新：未给出的字段保持不变。
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PolicyUpdate {
    #[serde(default)]
    rate_limit_cooldown_secs: Option<u64>,
    #[serde(default)]
    error_cooldown_secs: Option<u64>,
    #[serde(default)]
    count_failed_attempts: Option<bool>,
}

impl PolicyUpdate {
    fn apply_to(&self, current: QuotaPolicy) -> Result<QuotaPolicy, &'static str> {
        let mut next = current;
        if let Some(secs) = self.rate_limit_cooldown_secs {
            next.rate_limit_cooldown = Duration::from_secs(secs);
        }
        if let Some(secs) = self.error_cooldown_secs {
            next.error_cooldown = Duration::from_secs(secs);
        }
        if let Some(v) = self.count_failed_attempts {
            next.count_failed_attempts = v;
        }
        next.validate()?;
        Ok(next)
    }
}

/// POST /api/ai/policy - 运行时调整冷却策略（不落盘，重启后回到环境变量配置）
pub async fn handle_policy_post(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let update: PolicyUpdate = match sonic_rs::from_slice(&body) {
        Ok(v) => v,
        Err(e) => return AppError::bad_request(format!("请求体不是合法的 JSON: {e}")).into_response(),
    };

    let next = match update.apply_to(state.keys.policy()) {
        Ok(p) => p,
        Err(msg) => return AppError::bad_request(msg).into_response(),
    };
    state.keys.set_policy(next);

    tracing::info!(
        rate_limit_cooldown_secs = next.rate_limit_cooldown.as_secs(),
        error_cooldown_secs = next.error_cooldown.as_secs(),
        count_failed_attempts = next.count_failed_attempts,
        "冷却策略已更新"
    );
    Json(next).into_response()
}

#[derive(Debug, Deserialize)]
struct ResetRequest {
    #[serde(default)]
    key: String,
}

#[derive(Debug, Serialize)]
struct ResetResponse {
    success: bool,
}

/// POST /api/ai/keys/reset - 人工重置单个 key 的当日用量与冷却
pub async fn handle_key_reset(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let req: ResetRequest = match sonic_rs::from_slice(&body) {
        Ok(v) => v,
        Err(e) => return AppError::bad_request(format!("请求体不是合法的 JSON: {e}")).into_response(),
    };
    let key = req.key.trim();
    if key.is_empty() {
        return AppError::bad_request("key 不能为空").into_response();
    }

    match state.keys.reset_key(key).await {
        Ok(()) => Json(ResetResponse { success: true }).into_response(),
        Err(e @ KeyPoolError::UnknownKey(_)) => AppError::not_found(e.to_string()).into_response(),
        Err(e) => AppError::bad_request(e.to_string()).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(json: &str) -> PolicyUpdate {
        sonic_rs::from_str(json).unwrap()
    }

    #[test]
    fn partial_update_keeps_other_fields() {
        let next = update(r#"{"errorCooldownSecs":5}"#)
            .apply_to(QuotaPolicy::default())
            .unwrap();
        assert_eq!(next.error_cooldown, Duration::from_secs(5));
        assert_eq!(next.rate_limit_cooldown, Duration::from_secs(60));
        assert!(next.count_failed_attempts);

        let next = update(r#"{"countFailedAttempts":false}"#)
            .apply_to(next)
            .unwrap();
        assert!(!next.count_failed_attempts);
        assert_eq!(next.error_cooldown, Duration::from_secs(5));
    }

    #[test]
    fn invalid_update_is_rejected() {
        assert!(
            update(r#"{"rateLimitCooldownSecs":0}"#)
                .apply_to(QuotaPolicy::default())
                .is_err()
        );
        // 错误冷却不能长于限流冷却
        assert!(
            update(r#"{"errorCooldownSecs":120}"#)
                .apply_to(QuotaPolicy::default())
                .is_err()
        );
        // 超过 24 小时的冷却会让时间计算溢出
        assert!(
            update(r#"{"rateLimitCooldownSecs":9000000000000}"#)
                .apply_to(QuotaPolicy::default())
                .is_err()
        );
        assert!(update("{}").apply_to(QuotaPolicy::default()).is_ok());
    }
}
