use crate::key_pool::error::KeyPoolError;
use crate::key_pool::types::{ApiKeyRecord, FailureReason, KeySpec};
use crate::logging::mask_key;
use crate::util::id;
use anyhow::{Context, anyhow};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::{Mutex, RwLock};

const USAGE_FILE_NAME: &str = "key_usage.json";

/// Key 配额表：所有读写都经过同一把 RwLock，单条记录的修改在写锁内完成，
/// 并发上报不会丢失计数。
///
/// 可选持久化：每次修改后把可变字段快照写入 `<data_dir>/key_usage.json`，
/// 以 key 指纹（UUID v5）标识，不落盘明文。
#[derive(Debug)]
pub struct KeyStore {
    file_path: Option<PathBuf>,
    state: RwLock<State>,
    save_lock: Mutex<()>,
}

#[derive(Debug, Default)]
struct State {
    /// 配置顺序即轮换顺序。
    records: Vec<ApiKeyRecord>,
    index: HashMap<String, usize>,
}

impl State {
    fn from_specs(specs: &[KeySpec], now: DateTime<Utc>) -> Self {
        let mut state = Self::default();
        for spec in specs {
            if state.index.contains_key(&spec.key) {
                tracing::warn!(key = %mask_key(&spec.key), "重复配置的 API key，已忽略");
                continue;
            }
            state.push(ApiKeyRecord::new(spec.key.clone(), spec.daily_capacity, now));
        }
        state
    }

    fn push(&mut self, record: ApiKeyRecord) {
        self.index.insert(record.key.clone(), self.records.len());
        self.records.push(record);
    }
}

/// 落盘格式：只包含可变字段。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PersistedUsage {
    key_id: String,
    used_today: u32,
    window_day: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    cooldown_until: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_failure_reason: Option<FailureReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_used_at: Option<DateTime<Utc>>,
}

impl PersistedUsage {
    fn from_record(r: &ApiKeyRecord) -> Self {
        Self {
            key_id: id::key_fingerprint(&r.key),
            used_today: r.used_today,
            window_day: r.window_day,
            cooldown_until: r.cooldown_until,
            last_failure_reason: r.last_failure_reason,
            last_used_at: r.last_used_at,
        }
    }

    fn apply_to(&self, r: &mut ApiKeyRecord) {
        r.used_today = self.used_today;
        r.window_day = self.window_day;
        r.cooldown_until = self.cooldown_until;
        r.last_failure_reason = self.last_failure_reason;
        r.last_used_at = self.last_used_at;
    }
}

impl KeyStore {
    /// 纯内存存储：进程重启后计数归零。
    pub fn in_memory(specs: &[KeySpec], now: DateTime<Utc>) -> Self {
        Self {
            file_path: None,
            state: RwLock::new(State::from_specs(specs, now)),
            save_lock: Mutex::new(()),
        }
    }

    /// 带快照持久化的存储；需调用 [`KeyStore::load`] 恢复上次的计数。
    pub fn persistent(specs: &[KeySpec], now: DateTime<Utc>, data_dir: impl AsRef<Path>) -> Self {
        Self {
            file_path: Some(data_dir.as_ref().join(USAGE_FILE_NAME)),
            state: RwLock::new(State::from_specs(specs, now)),
            save_lock: Mutex::new(()),
        }
    }

    /// 从快照恢复计数。文件不存在视为全新计数；只恢复仍在配置中的 key。
    pub async fn load(&self) -> anyhow::Result<usize> {
        let Some(path) = &self.file_path else {
            return Ok(0);
        };

        let data = match tokio::fs::read(path).await {
            Ok(v) => v,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e).context("读取 key_usage.json 失败"),
        };

        let persisted: Vec<PersistedUsage> = sonic_rs::from_slice(&data)
            .map_err(|e| anyhow!(e))
            .context("解析 key_usage.json 失败")?;
        let by_id: HashMap<&str, &PersistedUsage> =
            persisted.iter().map(|p| (p.key_id.as_str(), p)).collect();

        let mut restored = 0usize;
        let mut state = self.state.write().await;
        for record in &mut state.records {
            if let Some(p) = by_id.get(id::key_fingerprint(&record.key).as_str()) {
                p.apply_to(record);
                restored += 1;
            }
        }
        Ok(restored)
    }

    pub async fn get(&self, key: &str) -> Result<ApiKeyRecord, KeyPoolError> {
        let state = self.state.read().await;
        state
            .index
            .get(key)
            .map(|&i| state.records[i].clone())
            .ok_or_else(|| KeyPoolError::UnknownKey(mask_key(key)))
    }

    /// 覆盖写入一条记录（幂等）；不存在时追加到轮换顺序末尾。
    pub async fn upsert(&self, record: ApiKeyRecord) {
        {
            let mut state = self.state.write().await;
            match state.index.get(&record.key).copied() {
                Some(i) => state.records[i] = record,
                None => state.push(record),
            }
        }
        self.persist().await;
    }

    /// 按配置顺序返回所有记录。
    pub async fn list_all(&self) -> Vec<ApiKeyRecord> {
        self.state.read().await.records.clone()
    }

    /// 在写锁内对单条记录执行修改，返回闭包的结果。
    pub async fn update<F, T>(&self, key: &str, f: F) -> Result<T, KeyPoolError>
    where
        F: FnOnce(&mut ApiKeyRecord) -> T,
    {
        let out = {
            let mut state = self.state.write().await;
            let Some(i) = state.index.get(key).copied() else {
                return Err(KeyPoolError::UnknownKey(mask_key(key)));
            };
            f(&mut state.records[i])
        };
        self.persist().await;
        Ok(out)
    }

    /// 写快照；失败只记录日志，不影响请求路径。
    async fn persist(&self) {
        let Some(path) = &self.file_path else {
            return;
        };
        // 在 save_lock 内取快照，保证后写入的一定是更新的状态。
        let _guard = self.save_lock.lock().await;
        let snapshot: Vec<PersistedUsage> = {
            let state = self.state.read().await;
            state.records.iter().map(PersistedUsage::from_record).collect()
        };
        if let Err(e) = save_snapshot(path, &snapshot).await {
            tracing::warn!("保存 key 用量快照失败: {e:#}");
        }
    }
}

async fn save_snapshot(path: &Path, snapshot: &[PersistedUsage]) -> anyhow::Result<()> {
    if let Some(dir) = path.parent() {
        tokio::fs::create_dir_all(dir)
            .await
            .context("创建数据目录失败")?;
    }
    let data = sonic_rs::to_vec_pretty(snapshot).context("序列化 key_usage.json 失败")?;
    tokio::fs::write(path, data)
        .await
        .context("写入 key_usage.json 失败")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn specs(keys: &[&str]) -> Vec<KeySpec> {
        keys.iter()
            .map(|k| KeySpec {
                key: k.to_string(),
                daily_capacity: 10,
            })
            .collect()
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 1, 12, 0, 0).unwrap()
    }

    fn temp_dir(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("outreach-ai-{name}-{}", uuid::Uuid::new_v4()))
    }

    #[tokio::test]
    async fn list_all_keeps_configuration_order_and_drops_duplicates() {
        let store = KeyStore::in_memory(&specs(&["c", "a", "b", "a"]), now());
        let keys: Vec<String> = store.list_all().await.into_iter().map(|r| r.key).collect();
        assert_eq!(keys, vec!["c", "a", "b"]);
    }

    #[tokio::test]
    async fn get_unknown_key_is_not_found() {
        let store = KeyStore::in_memory(&specs(&["a"]), now());
        assert!(store.get("a").await.is_ok());
        assert!(matches!(
            store.get("zzz").await,
            Err(KeyPoolError::UnknownKey(_))
        ));
    }

    #[tokio::test]
    async fn upsert_overwrites_in_place_and_appends_new() {
        let store = KeyStore::in_memory(&specs(&["a", "b"]), now());
        let mut a = store.get("a").await.unwrap();
        a.used_today = 4;
        store.upsert(a.clone()).await;
        store.upsert(a).await;
        store.upsert(ApiKeyRecord::new("c", 3, now())).await;

        let all = store.list_all().await;
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].used_today, 4);
        assert_eq!(all[2].key, "c");
    }

    #[tokio::test]
    async fn concurrent_updates_do_not_lose_increments() {
        let store = std::sync::Arc::new(KeyStore::in_memory(&specs(&["a"]), now()));
        let mut handles = Vec::new();
        for _ in 0..64 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.update("a", |r| r.used_today += 1).await.unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(store.get("a").await.unwrap().used_today, 64);
    }

    #[tokio::test]
    async fn snapshot_round_trips_without_storing_secrets() {
        let dir = temp_dir("persist");
        let store = KeyStore::persistent(&specs(&["secret-a", "secret-b"]), now(), &dir);
        store
            .update("secret-b", |r| {
                r.used_today = 7;
                r.last_failure_reason = Some(FailureReason::RateLimited);
            })
            .await
            .unwrap();

        let raw = tokio::fs::read_to_string(dir.join(USAGE_FILE_NAME))
            .await
            .unwrap();
        assert!(!raw.contains("secret-a"));
        assert!(!raw.contains("secret-b"));

        // 重启后：新增一个 key，删除一个 key
        let reloaded = KeyStore::persistent(&specs(&["secret-b", "secret-c"]), now(), &dir);
        assert_eq!(reloaded.load().await.unwrap(), 1);
        let b = reloaded.get("secret-b").await.unwrap();
        assert_eq!(b.used_today, 7);
        assert_eq!(b.last_failure_reason, Some(FailureReason::RateLimited));
        assert_eq!(reloaded.get("secret-c").await.unwrap().used_today, 0);

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn load_without_snapshot_is_fresh() {
        let dir = temp_dir("missing");
        let store = KeyStore::persistent(&specs(&["a"]), now(), &dir);
        assert_eq!(store.load().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn load_rejects_corrupt_snapshot() {
        let dir = temp_dir("corrupt");
        tokio::fs::create_dir_all(&dir).await.unwrap();
        tokio::fs::write(dir.join(USAGE_FILE_NAME), b"{not json")
            .await
            .unwrap();
        let store = KeyStore::persistent(&specs(&["a"]), now(), &dir);
        assert!(store.load().await.is_err());
        assert_eq!(store.get("a").await.unwrap().used_today, 0);
        let _ = tokio::fs::remove_dir_all(&dir).await;
    }
}
