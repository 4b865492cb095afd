//! 配额策略：纯函数，不做任何 I/O；给定输入结果确定，便于注入时钟测试。

use crate::key_pool::types::{ApiKeyRecord, FailureReason, KeyState};
use chrono::{DateTime, NaiveTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_RATE_LIMIT_COOLDOWN: Duration = Duration::from_secs(60);
pub const DEFAULT_ERROR_COOLDOWN: Duration = Duration::from_secs(10);

/// 冷却时间上限（含 provider 给出的重试提示）：24 小时。
pub const MAX_COOLDOWN: Duration = Duration::from_secs(24 * 3600);

/// 冷却与计数策略（可在运行时通过 /api/ai/policy 调整）。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaPolicy {
    #[serde(rename = "rateLimitCooldownSecs", with = "secs")]
    pub rate_limit_cooldown: Duration,
    #[serde(rename = "errorCooldownSecs", with = "secs")]
    pub error_cooldown: Duration,
    /// 失败的调用是否也消耗当日额度（默认 true，与 provider 侧计费一致）。
    pub count_failed_attempts: bool,
}

impl Default for QuotaPolicy {
    fn default() -> Self {
        Self {
            rate_limit_cooldown: DEFAULT_RATE_LIMIT_COOLDOWN,
            error_cooldown: DEFAULT_ERROR_COOLDOWN,
            count_failed_attempts: true,
        }
    }
}

impl QuotaPolicy {
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.rate_limit_cooldown.is_zero() {
            return Err("限流冷却时间必须大于 0");
        }
        if self.error_cooldown.is_zero() {
            return Err("错误冷却时间必须大于 0");
        }
        if self.rate_limit_cooldown > MAX_COOLDOWN || self.error_cooldown > MAX_COOLDOWN {
            return Err("冷却时间不能超过 24 小时");
        }
        if self.error_cooldown >= self.rate_limit_cooldown {
            return Err("错误冷却时间必须短于限流冷却时间");
        }
        Ok(())
    }

    /// 失败后的冷却截止时间。
    ///
    /// - rate_limited：优先使用 provider 的重试提示，否则使用 rate_limit_cooldown
    /// - quota_exceeded：冷却到下一个自然日（UTC）零点
    /// - generic_error / no_response：error_cooldown（短于限流冷却）
    pub fn cooldown_for(
        &self,
        reason: FailureReason,
        retry_hint: Option<Duration>,
        now: DateTime<Utc>,
    ) -> DateTime<Utc> {
        match reason {
            FailureReason::RateLimited => {
                let d = retry_hint
                    .filter(|d| !d.is_zero())
                    .map(|d| d.min(MAX_COOLDOWN))
                    .unwrap_or(self.rate_limit_cooldown);
                add_saturating(now, d)
            }
            FailureReason::QuotaExceeded => next_day_boundary(now),
            FailureReason::GenericError | FailureReason::NoResponse => {
                add_saturating(now, self.error_cooldown)
            }
        }
    }
}

/// 当前时刻所在自然日的零点（UTC）。
pub fn day_start(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive().and_time(NaiveTime::MIN).and_utc()
}

/// 下一个自然日边界（UTC 零点）。
pub fn next_day_boundary(now: DateTime<Utc>) -> DateTime<Utc> {
    day_start(now) + TimeDelta::days(1)
}

/// 按 now 计算有效的当日用量：计数窗口已经过期则视为 0。
pub fn effective_used(record: &ApiKeyRecord, now: DateTime<Utc>) -> u32 {
    if record.window_day < now.date_naive() {
        0
    } else {
        record.used_today
    }
}

/// 若跨过了自然日边界则原地重置计数，返回是否发生了重置。
///
/// 结束于当天零点之前（含）的冷却随之清除；跨过边界仍未结束的短冷却保留。
pub fn apply_daily_reset(record: &mut ApiKeyRecord, now: DateTime<Utc>) -> bool {
    let today = now.date_naive();
    if record.window_day >= today {
        return false;
    }
    record.used_today = 0;
    record.window_day = today;
    if record
        .cooldown_until
        .is_some_and(|until| until <= day_start(now))
    {
        record.cooldown_until = None;
    }
    true
}

pub fn is_usable(record: &ApiKeyRecord, now: DateTime<Utc>) -> bool {
    if record.cooldown_until.is_some_and(|until| now < until) {
        return false;
    }
    effective_used(record, now) < record.daily_capacity
}

pub fn key_state(record: &ApiKeyRecord, now: DateTime<Utc>) -> KeyState {
    if effective_used(record, now) >= record.daily_capacity {
        return KeyState::ExhaustedForDay;
    }
    match record.cooldown_until {
        Some(until) if now < until => {
            if until >= next_day_boundary(now) {
                KeyState::ExhaustedForDay
            } else {
                KeyState::CoolingDown
            }
        }
        _ => KeyState::Usable,
    }
}

fn add_saturating(now: DateTime<Utc>, d: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(d)
        .ok()
        .and_then(|delta| now.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

mod secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}
