//! 选择算法：按配置顺序取第一个可用的 key。
//!
//! 不维护轮询游标或 LRU 状态，重复调用结果稳定；key 进入冷却后自然落到下一个。

use crate::key_pool::policy;
use crate::key_pool::types::{ApiKeyRecord, KeyStats};
use chrono::{DateTime, Utc};

pub fn first_usable(records: &[ApiKeyRecord], now: DateTime<Utc>) -> Option<&ApiKeyRecord> {
    records.iter().find(|r| policy::is_usable(r, now))
}

pub fn aggregate_stats(records: &[ApiKeyRecord], now: DateTime<Utc>) -> KeyStats {
    records.iter().fold(
        KeyStats {
            total_daily_capacity: 0,
            used_today: 0,
        },
        |mut acc, r| {
            acc.total_daily_capacity += u64::from(r.daily_capacity);
            // 失败上报可能在额度用尽后继续累加，统计时按容量封顶。
            acc.used_today += u64::from(policy::effective_used(r, now).min(r.daily_capacity));
            acc
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeDelta, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 20, 9, 0, 0).unwrap()
    }

    fn records(keys: &[&str]) -> Vec<ApiKeyRecord> {
        keys.iter().map(|k| ApiKeyRecord::new(*k, 3, now())).collect()
    }

    #[test]
    fn skips_cooling_key_in_rotation_order() {
        let mut rs = records(&["A", "B", "C"]);
        rs[0].cooldown_until = Some(now() + TimeDelta::seconds(30));
        assert_eq!(first_usable(&rs, now()).map(|r| r.key.as_str()), Some("B"));
    }

    #[test]
    fn none_when_fleet_exhausted() {
        let mut rs = records(&["A", "B"]);
        rs[0].used_today = 3;
        rs[1].cooldown_until = Some(now() + TimeDelta::hours(1));
        assert!(first_usable(&rs, now()).is_none());
    }

    #[test]
    fn stats_sum_capacity_and_cap_overshoot() {
        let mut rs = records(&["A", "B"]);
        rs[0].used_today = 5;
        rs[1].used_today = 1;
        let stats = aggregate_stats(&rs, now());
        assert_eq!(stats.total_daily_capacity, 6);
        assert_eq!(stats.used_today, 4);

        // 跨天后按 0 计
        let stats = aggregate_stats(&rs, now() + TimeDelta::days(1));
        assert_eq!(stats.used_today, 0);
    }
}
