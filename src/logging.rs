use axum::http::HeaderMap;
use std::time::Duration;

/// 日志等级：
/// - off：不输出客户端/后端的详细请求响应
/// - low：输出客户端请求/响应（格式化/脱敏）
/// - medium：输出客户端 + Groq 后端请求/响应（格式化/脱敏）
/// - high：输出客户端 + Groq 后端请求/响应（完全原始，仅脱敏鉴权头）
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Off = 0,
    Low = 1,
    Medium = 2,
    High = 3,
}

impl LogLevel {
    pub fn parse(debug: &str) -> Self {
        match debug.trim().to_lowercase().as_str() {
            "low" | "client" => Self::Low,
            "medium" | "backend" => Self::Medium,
            "high" | "all" | "raw" => Self::High,
            _ => Self::Off,
        }
    }

    pub fn client_enabled(self) -> bool {
        self >= Self::Low
    }

    pub fn backend_enabled(self) -> bool {
        self >= Self::Medium
    }

    pub fn raw_enabled(self) -> bool {
        self >= Self::High
    }
}

/// API key 脱敏：只保留前 4 位与后 4 位，短 key 全部隐藏。
pub fn mask_key(key: &str) -> String {
    let chars: Vec<char> = key.trim().chars().collect();
    if chars.len() <= 12 {
        return "****".to_string();
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}…{tail}")
}

pub fn format_duration_ms(d: Duration) -> i64 {
    d.as_millis().min(i64::MAX as u128) as i64
}

pub fn client_request(method: &str, path: &str, headers: &HeaderMap, body: &[u8], raw: bool) {
    let body = if raw {
        format_bytes_raw(body)
    } else {
        format_body_bytes(body)
    };
    tracing::info!(
        "\n===================== 客户端请求 ======================\n[客户端请求] {method} {path}\n[客户端请求头]\n{}\n{}\n=========================================================",
        format_headers(headers),
        body
    );
}

pub fn client_response(status: u16, duration: Duration, body: &[u8], raw: bool) {
    let body = if raw {
        format_bytes_raw(body)
    } else {
        format_body_bytes(body)
    };
    tracing::info!(
        "\n===================== 客户端响应 ======================\n[客户端响应] {} {}ms\n{}\n==========================================================",
        status,
        format_duration_ms(duration),
        body
    );
}

pub fn backend_request(method: &str, url: &str, key: &str, body: &[u8], raw: bool) {
    let body = if raw {
        format_bytes_raw(body)
    } else {
        format_body_bytes(body)
    };
    tracing::info!(
        "\n====================== 后端请求 ========================\n[后端请求] {method} {url}\n[API Key] {}\n{}\n==========================================================",
        mask_key(key),
        body
    );
}

pub fn backend_response(status: u16, duration: Duration, body: &[u8], raw: bool) {
    let body = if raw {
        format_bytes_raw(body)
    } else {
        format_body_bytes(body)
    };
    tracing::info!(
        "\n====================== 后端响应 ========================\n[后端响应] {} {}ms\n{}\n==========================================================",
        status,
        format_duration_ms(duration),
        body
    );
}

fn format_headers(headers: &HeaderMap) -> String {
    let mut out = String::new();
    for (name, value) in headers.iter() {
        let key_lc = name.as_str().to_lowercase();
        let redacted = key_lc == "authorization"
            || key_lc == "proxy-authorization"
            || key_lc == "x-api-key"
            || key_lc == "cookie";
        let v = if redacted {
            "***"
        } else {
            value.to_str().unwrap_or("<binary>")
        };
        out.push_str(name.as_str());
        out.push_str(": ");
        out.push_str(v);
        out.push('\n');
    }
    out
}

fn format_body_bytes(bytes: &[u8]) -> String {
    if bytes.is_empty() {
        return String::new();
    }
    match sonic_rs::from_slice::<sonic_rs::Value>(bytes) {
        Ok(v) => match sonic_rs::to_string_pretty(&v) {
            Ok(s) => truncate_text_for_log(&s),
            Err(_) => truncate_text_for_log(&v.to_string()),
        },
        Err(_) => truncate_text_for_log(&String::from_utf8_lossy(bytes)),
    }
}

fn format_bytes_raw(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

fn truncate_text_for_log(s: &str) -> String {
    const MAX_CHARS: usize = 16 * 1024;
    if s.chars().count() <= MAX_CHARS {
        return s.to_string();
    }
    let mut out: String = s.chars().take(MAX_CHARS).collect();
    out.push_str("...[TRUNCATED]");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mask_key_keeps_only_edges() {
        assert_eq!(mask_key("gsk_1234567890abcdefWXYZ"), "gsk_…WXYZ");
        assert_eq!(mask_key("short"), "****");
        assert_eq!(mask_key(""), "****");
    }

    #[test]
    fn log_level_parse() {
        assert_eq!(LogLevel::parse("LOW"), LogLevel::Low);
        assert_eq!(LogLevel::parse(" medium "), LogLevel::Medium);
        assert_eq!(LogLevel::parse("raw"), LogLevel::High);
        assert_eq!(LogLevel::parse("whatever"), LogLevel::Off);
        assert!(LogLevel::High.backend_enabled());
        assert!(!LogLevel::Low.backend_enabled());
    }

    #[test]
    fn headers_are_redacted() {
        let mut h = HeaderMap::new();
        h.insert("authorization", "Bearer secret".parse().unwrap());
        h.insert("x-api-key", "secret".parse().unwrap());
        h.insert("content-type", "application/json".parse().unwrap());
        let out = format_headers(&h);
        assert!(!out.contains("secret"));
        assert!(out.contains("application/json"));
    }

    #[test]
    fn long_text_is_truncated() {
        let s = "x".repeat(20_000);
        let out = truncate_text_for_log(&s);
        assert!(out.ends_with("...[TRUNCATED]"));
        assert!(out.len() < s.len());
    }
}
