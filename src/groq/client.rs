use crate::config::Config;
use crate::groq::types::{ChatMessage, ChatRequest, ChatResponse, Completion};
use crate::key_pool::FailureReason;
use crate::logging::{self, LogLevel};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue, RETRY_AFTER, USER_AGENT};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

const CHAT_COMPLETIONS_PATH: &str = "/openai/v1/chat/completions";

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Groq API 错误 {status}: {message}")]
    Http {
        status: u16,
        message: String,
        reason: FailureReason,
        retry_after: Option<Duration>,
    },

    #[error("Groq 未返回任何内容")]
    EmptyResponse,

    #[error(transparent)]
    Transport(#[from] reqwest::Error),

    #[error(transparent)]
    Json(#[from] sonic_rs::Error),
}

impl ApiError {
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// 结构化的失败分类，供 key 池计算冷却时间。
    pub fn reason(&self) -> FailureReason {
        match self {
            Self::Http { reason, .. } => *reason,
            Self::EmptyResponse => FailureReason::NoResponse,
            Self::Transport(e) if e.is_timeout() || e.is_connect() => FailureReason::NoResponse,
            Self::Transport(_) | Self::Json(_) => FailureReason::GenericError,
        }
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Http { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// 文本生成的 provider 抽象（便于在测试中替换为脚本化实现）。
pub trait CompletionProvider: Send + Sync {
    fn complete(
        &self,
        api_key: &str,
        messages: Vec<ChatMessage>,
    ) -> impl Future<Output = Result<Completion, ApiError>> + Send;
}

#[derive(Debug, Clone)]
pub struct GroqClient {
    http: reqwest::Client,
    url: String,
    model: String,
    log_level: LogLevel,
}

impl GroqClient {
    pub fn new(cfg: &Config) -> Result<Self, anyhow::Error> {
        let mut builder = reqwest::Client::builder()
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90));

        if cfg.timeout_ms > 0 {
            builder = builder.timeout(Duration::from_millis(cfg.timeout_ms));
        }
        if !cfg.proxy.trim().is_empty() {
            builder = builder.proxy(reqwest::Proxy::all(cfg.proxy.trim())?);
        }

        Ok(Self {
            http: builder.build()?,
            url: format!(
                "{}{CHAT_COMPLETIONS_PATH}",
                cfg.groq_base_url.trim().trim_end_matches('/')
            ),
            model: cfg.groq_model.clone(),
            log_level: cfg.log_level(),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn build_headers(&self, api_key: &str) -> HeaderMap {
        let mut h = HeaderMap::new();
        h.insert(USER_AGENT, HeaderValue::from_static("outreach-ai/0.1"));
        h.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {api_key}"))
                .unwrap_or(HeaderValue::from_static("")),
        );
        h.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        h
    }

    pub async fn chat(&self, api_key: &str, req: &ChatRequest) -> Result<ChatResponse, ApiError> {
        let body = sonic_rs::to_vec(req)?;
        if self.log_level.backend_enabled() {
            logging::backend_request(
                "POST",
                &self.url,
                api_key,
                &body,
                self.log_level.raw_enabled(),
            );
        }

        let start = std::time::Instant::now();
        let resp = self
            .http
            .post(&self.url)
            .headers(self.build_headers(api_key))
            .body(body)
            .send()
            .await?;

        let status = resp.status().as_u16();
        let headers = resp.headers().clone();
        let bytes = resp.bytes().await?;
        if self.log_level.backend_enabled() {
            logging::backend_response(
                status,
                start.elapsed(),
                &bytes,
                self.log_level.raw_enabled(),
            );
        }

        if !(200..300).contains(&status) {
            return Err(extract_error_details(status, &headers, &bytes));
        }
        Ok(sonic_rs::from_slice::<ChatResponse>(&bytes)?)
    }
}

impl CompletionProvider for GroqClient {
    async fn complete(
        &self,
        api_key: &str,
        messages: Vec<ChatMessage>,
    ) -> Result<Completion, ApiError> {
        let req = ChatRequest {
            model: self.model.clone(),
            messages,
            temperature: Some(0.7),
            max_tokens: Some(1024),
        };
        let resp = self.chat(api_key, &req).await?;
        if let Some(usage) = &resp.usage {
            tracing::debug!(
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                total_tokens = usage.total_tokens,
                finish_reason = ?resp.choices.first().and_then(|c| c.finish_reason.as_deref()),
                "Groq 调用完成"
            );
        }
        let text = resp.first_text().ok_or(ApiError::EmptyResponse)?.to_string();
        let model = if resp.model.is_empty() {
            self.model.clone()
        } else {
            resp.model
        };
        Ok(Completion { text, model })
    }
}

/// 根据状态码、结构化错误字段（error.code / error.type）与响应头分类失败原因。
/// 不解析 message 文本。
fn extract_error_details(status: u16, headers: &HeaderMap, body: &[u8]) -> ApiError {
    #[derive(Debug, serde::Deserialize)]
    struct ErrResp {
        error: ErrInner,
    }

    #[derive(Debug, serde::Deserialize)]
    struct ErrInner {
        #[serde(default)]
        message: String,
        #[serde(rename = "type", default)]
        ty: Option<String>,
        #[serde(default)]
        code: Option<String>,
    }

    let mut message = "Unknown error".to_string();
    let mut ty = String::new();
    let mut code = String::new();
    if let Ok(err_resp) = sonic_rs::from_slice::<ErrResp>(body) {
        let err = err_resp.error;
        if !err.message.is_empty() {
            message = err.message;
        }
        ty = err.ty.unwrap_or_default().to_lowercase();
        code = err.code.unwrap_or_default().to_lowercase();
    }

    let quota = code == "insufficient_quota" || ty == "billing" || ty == "insufficient_quota";
    let reason = if status == 402 || quota {
        FailureReason::QuotaExceeded
    } else if status == 429 {
        FailureReason::RateLimited
    } else {
        FailureReason::GenericError
    };

    let retry_after = match reason {
        FailureReason::RateLimited => retry_hint(headers, &ty),
        _ => None,
    };

    ApiError::Http {
        status,
        message,
        reason,
        retry_after,
    }
}

/// 重试提示：优先 retry-after，其次按限流类型取 x-ratelimit-reset-tokens / -requests。
fn retry_hint(headers: &HeaderMap, limit_type: &str) -> Option<Duration> {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };

    if let Some(d) = header(RETRY_AFTER.as_str()).and_then(parse_seconds) {
        return Some(d);
    }

    let (first, second) = if limit_type == "tokens" {
        ("x-ratelimit-reset-tokens", "x-ratelimit-reset-requests")
    } else {
        ("x-ratelimit-reset-requests", "x-ratelimit-reset-tokens")
    };
    header(first)
        .and_then(parse_reset_duration)
        .or_else(|| header(second).and_then(parse_reset_duration))
}

fn parse_seconds(s: &str) -> Option<Duration> {
    let secs: f64 = s.trim().parse().ok()?;
    // 超出 Duration 表示范围（如 1e300）或为负时视为无效提示
    Duration::try_from_secs_f64(secs).ok()
}

/// 解析形如 "2m59.56s" / "7.66s" / "1h2m" / "250ms" 的时长。
fn parse_reset_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    let mut total = 0f64;
    let mut num = String::new();
    let mut chars = s.chars().peekable();
    let mut matched = false;

    while let Some(c) = chars.next() {
        if c.is_ascii_digit() || c == '.' {
            num.push(c);
            continue;
        }
        let value: f64 = num.parse().ok()?;
        num.clear();
        total += match c {
            'h' => value * 3600.0,
            'm' if chars.peek() == Some(&'s') => {
                chars.next();
                value / 1000.0
            }
            'm' => value * 60.0,
            's' => value,
            _ => return None,
        };
        matched = true;
    }

    // 没有单位的纯数字按秒处理
    if !num.is_empty() {
        if matched {
            return None;
        }
        return parse_seconds(&num);
    }

    Duration::try_from_secs_f64(total).ok()
}
