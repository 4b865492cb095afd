use crate::key_pool::{KeySpec, MAX_COOLDOWN, QuotaPolicy};
use figment::Figment;
use figment::providers::Env;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 8046;
const DEFAULT_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_DAILY_CAPACITY: u32 = 1_000;
const DEFAULT_MAX_KEY_ATTEMPTS: usize = 3;

pub const DEFAULT_GROQ_BASE_URL: &str = "https://api.groq.com";
pub const DEFAULT_GROQ_MODEL: &str = "llama-3.3-70b-versatile";

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,

    pub api_key: String,

    pub groq_keys: Vec<KeySpec>,
    pub groq_model: String,
    pub groq_base_url: String,
    pub groq_max_key_attempts: usize,
    pub timeout_ms: u64,
    pub proxy: String,

    pub policy: QuotaPolicy,

    pub key_usage_persist: bool,
    pub data_dir: String,

    pub debug: String,
}

#[derive(Debug, Default, Deserialize)]
struct RawEnv {
    #[serde(alias = "HOST")]
    host: Option<String>,
    #[serde(alias = "PORT")]
    port: Option<u16>,

    #[serde(alias = "API_KEY")]
    api_key: Option<String>,

    #[serde(alias = "GROQ_API_KEYS")]
    groq_api_keys: Option<String>,
    #[serde(alias = "GROQ_API_KEY")]
    groq_api_key: Option<String>,
    #[serde(alias = "GROQ_DAILY_CAPACITY")]
    groq_daily_capacity: Option<u32>,
    #[serde(alias = "GROQ_MODEL")]
    groq_model: Option<String>,
    #[serde(alias = "GROQ_BASE_URL")]
    groq_base_url: Option<String>,
    #[serde(alias = "GROQ_MAX_KEY_ATTEMPTS")]
    groq_max_key_attempts: Option<usize>,
    #[serde(alias = "TIMEOUT")]
    timeout: Option<u64>,
    #[serde(alias = "PROXY")]
    proxy: Option<String>,

    #[serde(alias = "RATE_LIMIT_COOLDOWN_SECS")]
    rate_limit_cooldown_secs: Option<u64>,
    #[serde(alias = "ERROR_COOLDOWN_SECS")]
    error_cooldown_secs: Option<u64>,
    #[serde(
        alias = "COUNT_FAILED_ATTEMPTS",
        default,
        deserialize_with = "lenient_string"
    )]
    count_failed_attempts: Option<String>,

    #[serde(alias = "KEY_USAGE_PERSIST", default, deserialize_with = "lenient_string")]
    key_usage_persist: Option<String>,
    #[serde(alias = "DATA_DIR")]
    data_dir: Option<String>,

    #[serde(alias = "DEBUG")]
    debug: Option<String>,
}

impl Config {
    pub fn load() -> Self {
        load_dotenv();

        let raw = Figment::from(Env::raw())
            .extract::<RawEnv>()
            .unwrap_or_default();

        let mut cfg = Self::from_raw(raw);

        // 命令行覆盖：-debug <level>
        let mut args = std::env::args().skip(1);
        while let Some(arg) = args.next() {
            if arg == "-debug"
                && let Some(v) = args.next()
            {
                cfg.debug = v;
            }
        }

        cfg
    }

    fn from_raw(raw: RawEnv) -> Self {
        let default_capacity = raw.groq_daily_capacity.unwrap_or(DEFAULT_DAILY_CAPACITY);
        Self {
            host: raw.host.unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: raw.port.unwrap_or(DEFAULT_PORT),
            api_key: raw.api_key.unwrap_or_default(),
            groq_keys: parse_key_list(
                raw.groq_api_keys.as_deref(),
                raw.groq_api_key.as_deref(),
                default_capacity,
            ),
            groq_model: raw
                .groq_model
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_GROQ_MODEL.to_string()),
            groq_base_url: raw
                .groq_base_url
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_GROQ_BASE_URL.to_string()),
            groq_max_key_attempts: raw
                .groq_max_key_attempts
                .unwrap_or(DEFAULT_MAX_KEY_ATTEMPTS)
                .max(1),
            timeout_ms: raw.timeout.unwrap_or(DEFAULT_TIMEOUT_MS),
            proxy: raw.proxy.unwrap_or_default(),
            policy: build_policy(
                raw.rate_limit_cooldown_secs,
                raw.error_cooldown_secs,
                parse_bool(raw.count_failed_attempts.as_deref()),
            ),
            key_usage_persist: parse_bool(raw.key_usage_persist.as_deref()).unwrap_or(false),
            data_dir: raw.data_dir.unwrap_or_else(|| "./data".to_string()),
            debug: raw.debug.unwrap_or_else(|| "off".to_string()),
        }
    }

    pub fn log_level(&self) -> crate::logging::LogLevel {
        crate::logging::LogLevel::parse(&self.debug)
    }
}

/// 解析 key 列表：逗号/换行分隔，每项可写成 `key:capacity` 覆盖默认日额度。
/// GROQ_API_KEY 作为单 key 兼容项追加在末尾（已存在则忽略）。
fn parse_key_list(list: Option<&str>, single: Option<&str>, default_capacity: u32) -> Vec<KeySpec> {
    let mut out: Vec<KeySpec> = Vec::new();
    let items = list
        .unwrap_or_default()
        .split([',', '\n'])
        .chain(single.into_iter());

    for item in items {
        let item = item.trim();
        if item.is_empty() {
            continue;
        }
        let (key, daily_capacity) = match item.rsplit_once(':') {
            Some((k, c)) if !k.trim().is_empty() => match c.trim().parse::<u32>() {
                Ok(c) => (k.trim(), c),
                Err(_) => (item, default_capacity),
            },
            _ => (item, default_capacity),
        };
        if out.iter().any(|s| s.key == key) {
            continue;
        }
        out.push(KeySpec {
            key: key.to_string(),
            daily_capacity,
        });
    }
    out
}

/// 生成冷却策略；错误冷却必须短于限流冷却，否则收敛到限流冷却的一半。
fn build_policy(
    rate_limit_secs: Option<u64>,
    error_secs: Option<u64>,
    count_failed_attempts: Option<bool>,
) -> QuotaPolicy {
    let defaults = QuotaPolicy::default();
    let rate_limit_cooldown = rate_limit_secs
        .filter(|s| *s > 0)
        .map(Duration::from_secs)
        .unwrap_or(defaults.rate_limit_cooldown)
        .clamp(Duration::from_secs(2), MAX_COOLDOWN);
    let mut error_cooldown = error_secs
        .filter(|s| *s > 0)
        .map(Duration::from_secs)
        .unwrap_or(defaults.error_cooldown);
    if error_cooldown >= rate_limit_cooldown {
        error_cooldown = rate_limit_cooldown / 2;
    }
    QuotaPolicy {
        rate_limit_cooldown,
        error_cooldown,
        count_failed_attempts: count_failed_attempts.unwrap_or(defaults.count_failed_attempts),
    }
}

/// figment 会把 `true` / `1` 这类环境变量值解析成布尔或数字，这里统一还原成字符串。
fn lenient_string<'de, D>(d: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Str(String),
        Bool(bool),
        Int(i64),
        Float(f64),
    }

    Ok(Option::<Raw>::deserialize(d)?.map(|v| match v {
        Raw::Str(s) => s,
        Raw::Bool(b) => b.to_string(),
        Raw::Int(i) => i.to_string(),
        Raw::Float(f) => f.to_string(),
    }))
}

fn parse_bool(value: Option<&str>) -> Option<bool> {
    match value?.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn load_dotenv() {
    let Some(dotenv_path) = find_dotenv_path() else {
        return;
    };

    let Ok(file) = std::fs::File::open(&dotenv_path) else {
        return;
    };

    let reader = std::io::BufReader::new(file);
    for line in std::io::BufRead::lines(reader).map_while(Result::ok) {
        let Some((key, value)) = parse_dotenv_line(&line) else {
            continue;
        };
        // 已在进程环境中设置的变量优先。
        if std::env::var_os(&key).is_some() {
            continue;
        }
        // Rust 2024：修改进程环境变量在并发场景下可能触发 UB，因此 API 为 unsafe。
        // 这里在启动阶段、tokio 工作线程读取环境变量之前调用。
        unsafe {
            std::env::set_var(key, value);
        }
    }
}

fn find_dotenv_path() -> Option<PathBuf> {
    let cwd = std::env::current_dir().ok()?;
    let mut dir: &Path = cwd.as_path();

    loop {
        let candidate = dir.join(".env");
        if candidate.is_file() {
            return Some(candidate);
        }

        // 不越过仓库根目录。
        if dir.join("Cargo.toml").is_file() || dir.join(".git").is_dir() {
            return None;
        }

        let parent = dir.parent()?;
        if parent == dir {
            return None;
        }
        dir = parent;
    }
}

fn parse_dotenv_line(line: &str) -> Option<(String, String)> {
    let mut line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }

    if let Some(rest) = line.strip_prefix("export ") {
        line = rest.trim_start();
    }

    let (key, raw) = line.split_once('=')?;
    let key = key.trim();
    if key.is_empty() {
        return None;
    }

    let raw = raw.trim();
    let bytes = raw.as_bytes();
    if bytes.len() >= 2 {
        let first = bytes[0];
        let last = bytes[bytes.len() - 1];
        if (first == b'"' && last == b'"') || (first == b'\'' && last == b'\'') {
            return Some((key.to_string(), raw[1..raw.len() - 1].to_string()));
        }
    }

    Some((key.to_string(), strip_inline_comment(raw).trim().to_string()))
}

fn strip_inline_comment(value: &str) -> &str {
    let bytes = value.as_bytes();
    for i in 0..bytes.len() {
        if bytes[i] != b'#' {
            continue;
        }
        if i == 0 || bytes[i - 1] == b' ' || bytes[i - 1] == b'\t' {
            return value[..i].trim_end();
        }
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_list_supports_capacity_override_and_dedup() {
        let keys = parse_key_list(
            Some("gsk_a, gsk_b:250,\n gsk_a ,,gsk_c:notanumber"),
            Some("gsk_d"),
            1000,
        );
        let got: Vec<(&str, u32)> = keys
            .iter()
            .map(|k| (k.key.as_str(), k.daily_capacity))
            .collect();
        assert_eq!(
            got,
            vec![
                ("gsk_a", 1000),
                ("gsk_b", 250),
                ("gsk_c:notanumber", 1000),
                ("gsk_d", 1000),
            ]
        );
    }

    #[test]
    fn single_key_fallback_not_duplicated() {
        let keys = parse_key_list(Some("gsk_a"), Some("gsk_a"), 5);
        assert_eq!(keys.len(), 1);
        assert!(parse_key_list(None, None, 5).is_empty());
    }

    #[test]
    fn policy_clamps_error_cooldown_below_rate_limit() {
        let p = build_policy(Some(30), Some(45), Some(false));
        assert_eq!(p.rate_limit_cooldown, Duration::from_secs(30));
        assert_eq!(p.error_cooldown, Duration::from_secs(15));
        assert!(!p.count_failed_attempts);
        assert!(p.validate().is_ok());

        let p = build_policy(None, None, None);
        assert_eq!(p, QuotaPolicy::default());

        let p = build_policy(Some(9_000_000_000_000), None, None);
        assert_eq!(p.rate_limit_cooldown, MAX_COOLDOWN);
        assert!(p.validate().is_ok());
    }

    #[test]
    fn parse_bool_values() {
        assert_eq!(parse_bool(Some("TRUE")), Some(true));
        assert_eq!(parse_bool(Some(" off ")), Some(false));
        assert_eq!(parse_bool(Some("maybe")), None);
        assert_eq!(parse_bool(None), None);
    }

    #[test]
    fn dotenv_line_parsing() {
        assert_eq!(
            parse_dotenv_line("export GROQ_API_KEYS=\"a,b\""),
            Some(("GROQ_API_KEYS".to_string(), "a,b".to_string()))
        );
        assert_eq!(
            parse_dotenv_line("PORT=9000 # comment"),
            Some(("PORT".to_string(), "9000".to_string()))
        );
        assert_eq!(parse_dotenv_line("# only comment"), None);
        assert_eq!(parse_dotenv_line("=value"), None);
    }

    #[test]
    fn defaults_from_empty_env() {
        let cfg = Config::from_raw(RawEnv::default());
        assert_eq!(cfg.port, DEFAULT_PORT);
        assert_eq!(cfg.groq_model, DEFAULT_GROQ_MODEL);
        assert_eq!(cfg.groq_max_key_attempts, DEFAULT_MAX_KEY_ATTEMPTS);
        assert!(!cfg.key_usage_persist);
        assert!(cfg.groq_keys.is_empty());
    }
}
