use crate::key_pool::clock::{Clock, SystemClock};
use crate::key_pool::error::KeyPoolError;
use crate::key_pool::policy::{self, QuotaPolicy};
use crate::key_pool::selector;
use crate::key_pool::store::KeyStore;
use crate::key_pool::types::{ApiKeyRecord, KeySnapshot, KeyStats, UsageOutcome};
use crate::logging::mask_key;
use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Key 轮换管理器：选择可用 key、汇总统计、记录每次调用结果。
///
/// 启动时构造一次，以 `Arc` 注入到各请求处理器。所有时间相关的状态
/// （冷却到期、跨天重置）都在调用时按时钟惰性计算，不依赖后台定时任务。
#[derive(Debug)]
pub struct KeyManager {
    store: KeyStore,
    policy: ArcSwap<QuotaPolicy>,
    clock: Arc<dyn Clock>,
}

/// 一次 record_usage 对记录造成的变化（用于日志）。
#[derive(Debug, Clone, Copy)]
struct Transition {
    reset: bool,
    used_today: u32,
    daily_capacity: u32,
    exhausted: bool,
    cooldown_until: Option<DateTime<Utc>>,
}

impl KeyManager {
    pub fn new(store: KeyStore, policy: QuotaPolicy) -> Self {
        Self::with_clock(store, policy, Arc::new(SystemClock))
    }

    pub fn with_clock(store: KeyStore, policy: QuotaPolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            policy: ArcSwap::from_pointee(policy),
            clock,
        }
    }

    pub fn policy(&self) -> QuotaPolicy {
        **self.policy.load()
    }

    pub fn set_policy(&self, policy: QuotaPolicy) {
        self.policy.store(Arc::new(policy));
    }

    /// 按配置顺序返回第一个当前可用的 key；全部不可用时返回 None（整体耗尽）。
    pub async fn get_available_key(&self) -> Option<String> {
        let now = self.clock.now();
        let records = self.store.list_all().await;
        selector::first_usable(&records, now).map(|r| r.key.clone())
    }

    /// 与 [`KeyManager::get_available_key`] 相同，但把整体耗尽转换为类型化错误。
    pub async fn acquire_key(&self) -> Result<String, KeyPoolError> {
        self.get_available_key()
            .await
            .ok_or(KeyPoolError::NoKeyAvailable)
    }

    pub async fn get_key_stats(&self) -> KeyStats {
        let now = self.clock.now();
        let records = self.store.list_all().await;
        selector::aggregate_stats(&records, now)
    }

    /// 每个 key 的脱敏视图（用于统计接口）。
    pub async fn key_snapshots(&self) -> Vec<KeySnapshot> {
        let now = self.clock.now();
        self.store
            .list_all()
            .await
            .into_iter()
            .map(|mut r| {
                policy::apply_daily_reset(&mut r, now);
                KeySnapshot {
                    key: mask_key(&r.key),
                    daily_capacity: r.daily_capacity,
                    used_today: r.used_today,
                    state: policy::key_state(&r, now),
                    cooldown_until: r.cooldown_until.filter(|until| *until > now),
                    last_failure_reason: r.last_failure_reason,
                    last_used_at: r.last_used_at,
                }
            })
            .collect()
    }

    pub async fn available_count(&self) -> usize {
        let now = self.clock.now();
        self.store
            .list_all()
            .await
            .iter()
            .filter(|r| policy::is_usable(r, now))
            .count()
    }

    pub async fn key_count(&self) -> usize {
        self.store.list_all().await.len()
    }

    /// 人工重置单个 key：清零当日用量、冷却与失败原因，保留额度配置。
    pub async fn reset_key(&self, key: &str) -> Result<(), KeyPoolError> {
        let current = self.store.get(key).await?;
        let fresh = ApiKeyRecord::new(current.key, current.daily_capacity, self.clock.now());
        self.store.upsert(fresh).await;
        tracing::info!(key = %mask_key(key), "API key 状态已人工重置");
        Ok(())
    }

    /// 记录一次调用结果。调用方每次尝试必须且只能上报一次。
    ///
    /// 未知 key 不会返回错误，只记录 warn 日志。
    pub async fn record_usage(&self, key: &str, outcome: UsageOutcome) {
        let now = self.clock.now();
        let policy = self.policy();
        let masked = mask_key(key);

        let transition = match self
            .store
            .update(key, |r| apply_outcome(r, outcome, &policy, now))
            .await
        {
            Ok(t) => t,
            Err(e) => {
                tracing::warn!(key = %masked, error = %e, "上报了未配置的 API key，忽略");
                return;
            }
        };

        if transition.reset {
            tracing::info!(key = %masked, "跨自然日，已重置当日用量");
        }

        match outcome {
            UsageOutcome::Success => {
                tracing::debug!(
                    key = %masked,
                    used = transition.used_today,
                    capacity = transition.daily_capacity,
                    "API key 调用成功"
                );
            }
            UsageOutcome::Failure { reason, .. } => {
                tracing::warn!(
                    key = %masked,
                    reason = %reason,
                    cooldown_until = ?transition.cooldown_until,
                    "API key 调用失败，进入冷却"
                );
            }
        }

        if transition.exhausted {
            tracing::info!(
                key = %masked,
                capacity = transition.daily_capacity,
                "API key 当日额度已用尽"
            );
        }
    }
}

fn apply_outcome(
    r: &mut ApiKeyRecord,
    outcome: UsageOutcome,
    policy: &QuotaPolicy,
    now: DateTime<Utc>,
) -> Transition {
    let reset = policy::apply_daily_reset(r, now);
    let before = r.used_today;

    match outcome {
        UsageOutcome::Success => {
            r.used_today = r.used_today.saturating_add(1);
            r.last_failure_reason = None;
        }
        UsageOutcome::Failure {
            reason,
            retry_after,
        } => {
            if policy.count_failed_attempts {
                r.used_today = r.used_today.saturating_add(1);
            }
            r.last_failure_reason = Some(reason);
            raise_cooldown(r, policy.cooldown_for(reason, retry_after, now));
        }
    }
    r.last_used_at = Some(now);

    let exhausted = before < r.daily_capacity && r.used_today >= r.daily_capacity;
    if exhausted {
        raise_cooldown(r, policy::next_day_boundary(now));
    }

    Transition {
        reset,
        used_today: r.used_today,
        daily_capacity: r.daily_capacity,
        exhausted,
        cooldown_until: r.cooldown_until,
    }
}

/// cooldown_until 只增不减（跨天重置除外）。
fn raise_cooldown(r: &mut ApiKeyRecord, until: DateTime<Utc>) {
    r.cooldown_until = Some(match r.cooldown_until {
        Some(existing) if existing > until => existing,
        _ => until,
    });
}
