use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// 失败原因分类（由 provider 客户端根据状态码/结构化错误字段给出）。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", from = "String")]
pub enum FailureReason {
    /// 触发速率限制（429）。
    RateLimited,
    /// 配额/账单耗尽：当天剩余时间不可用。
    QuotaExceeded,
    /// 其他错误。
    GenericError,
    /// 超时、连接失败或响应为空。
    NoResponse,
}

impl FailureReason {
    /// 解析外部传入的分类字符串；无法识别时按 generic 处理（冷却时间最短）。
    pub fn parse(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "rate_limited" | "rate_limit_exceeded" | "rate_limit" => Self::RateLimited,
            "quota_exceeded" | "insufficient_quota" | "billing" => Self::QuotaExceeded,
            "no_response" | "timeout" => Self::NoResponse,
            "generic_error" | "generic" | "error" => Self::GenericError,
            other => {
                tracing::warn!(reason = other, "未知的失败分类，按 generic_error 处理");
                Self::GenericError
            }
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::RateLimited => "rate_limited",
            Self::QuotaExceeded => "quota_exceeded",
            Self::GenericError => "generic_error",
            Self::NoResponse => "no_response",
        }
    }
}

impl From<String> for FailureReason {
    fn from(value: String) -> Self {
        Self::parse(&value)
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 一次调用的结果，由调用方上报给 KeyManager::record_usage。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageOutcome {
    Success,
    Failure {
        reason: FailureReason,
        /// provider 返回的重试提示（retry-after 等），存在时优先使用。
        retry_after: Option<Duration>,
    },
}

impl UsageOutcome {
    pub fn failure(reason: FailureReason) -> Self {
        Self::Failure {
            reason,
            retry_after: None,
        }
    }
}

/// 单个 provider key 的配额状态。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiKeyRecord {
    pub key: String,
    pub daily_capacity: u32,
    pub used_today: u32,
    /// used_today 计数所属的自然日（UTC）。
    pub window_day: NaiveDate,
    pub cooldown_until: Option<DateTime<Utc>>,
    pub last_failure_reason: Option<FailureReason>,
    pub last_used_at: Option<DateTime<Utc>>,
}

impl ApiKeyRecord {
    pub fn new(key: impl Into<String>, daily_capacity: u32, now: DateTime<Utc>) -> Self {
        Self {
            key: key.into(),
            daily_capacity,
            used_today: 0,
            window_day: now.date_naive(),
            cooldown_until: None,
            last_failure_reason: None,
            last_used_at: None,
        }
    }
}

/// 配置中的一个 key（启动时用于初始化 KeyStore）。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySpec {
    pub key: String,
    pub daily_capacity: u32,
}

/// 单个 key 在某一时刻的状态（由 cooldown_until / used_today 推导）。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyState {
    Usable,
    CoolingDown,
    ExhaustedForDay,
}

/// 所有 key 的汇总统计（不包含任何 key 明文）。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyStats {
    pub total_daily_capacity: u64,
    pub used_today: u64,
}

/// 对外展示用的单 key 视图，key 已脱敏。
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KeySnapshot {
    pub key: String,
    pub daily_capacity: u32,
    pub used_today: u32,
    pub state: KeyState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cooldown_until: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_failure_reason: Option<FailureReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_used_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_classification_falls_back_to_generic() {
        assert_eq!(FailureReason::parse("RATE_LIMITED"), FailureReason::RateLimited);
        assert_eq!(
            FailureReason::parse("insufficient_quota"),
            FailureReason::QuotaExceeded
        );
        assert_eq!(FailureReason::parse("timeout"), FailureReason::NoResponse);
        assert_eq!(FailureReason::parse("teapot"), FailureReason::GenericError);
    }

    #[test]
    fn reason_serializes_snake_case_and_parses_leniently() {
        let s = sonic_rs::to_string(&FailureReason::QuotaExceeded).unwrap();
        assert_eq!(s, r#""quota_exceeded""#);

        let r: FailureReason = sonic_rs::from_str(r#""rate_limited""#).unwrap();
        assert_eq!(r, FailureReason::RateLimited);
        let r: FailureReason = sonic_rs::from_str(r#""something_new""#).unwrap();
        assert_eq!(r, FailureReason::GenericError);
    }
}
