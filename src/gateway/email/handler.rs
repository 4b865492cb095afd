use crate::error::AppError;
use crate::gateway::AppState;
use crate::gateway::email::prompt::{build_messages, clean_output};
use crate::gateway::email::rotation::{EnhanceError, complete_with_rotation};
use crate::gateway::email::types::{EnhanceQuery, EnhanceRequest, EnhanceResponse};
use crate::groq::CompletionProvider;
use crate::key_pool::KeyManager;
use crate::logging;
use crate::util::id;
use axum::Json;
use axum::body::Bytes;
use axum::extract::{OriginalUri, Query, State};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use std::sync::Arc;
use std::time::Instant;

const REASON_QUOTA_EXHAUSTED: &str = "ai_quota_exhausted";
const REASON_UNAVAILABLE: &str = "ai_unavailable";

/// POST /api/email/enhance - 用 AI 改写外发邮件正文。
///
/// AI 不可用时默认退回原文（enhanced=false），strict=true 时返回 503/502。
pub async fn handle_enhance(
    State(state): State<Arc<AppState>>,
    Query(query): Query<EnhanceQuery>,
    method: Method,
    uri: OriginalUri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let start = Instant::now();
    let log_level = state.cfg.log_level();
    if log_level.client_enabled() {
        logging::client_request(
            method.as_str(),
            uri.0.path(),
            &headers,
            &body,
            log_level.raw_enabled(),
        );
    }

    let outcome = enhance(
        &state.keys,
        &state.groq,
        state.cfg.groq_max_key_attempts,
        query,
        &body,
    )
    .await;
    match outcome {
        Ok(out) => {
            if log_level.client_enabled()
                && let Ok(bytes) = sonic_rs::to_vec(&out)
            {
                logging::client_response(
                    StatusCode::OK.as_u16(),
                    start.elapsed(),
                    &bytes,
                    log_level.raw_enabled(),
                );
            }
            (StatusCode::OK, Json(out)).into_response()
        }
        Err(e) => {
            if log_level.client_enabled() {
                logging::client_response(
                    e.status().as_u16(),
                    start.elapsed(),
                    e.to_string().as_bytes(),
                    log_level.raw_enabled(),
                );
            }
            e.into_response()
        }
    }
}

async fn enhance<P: CompletionProvider + 'static>(
    keys: &Arc<KeyManager>,
    provider: &Arc<P>,
    max_attempts: usize,
    query: EnhanceQuery,
    body: &[u8],
) -> Result<EnhanceResponse, AppError> {
    let req: EnhanceRequest = sonic_rs::from_slice(body)
        .map_err(|e| AppError::bad_request(format!("请求体不是合法的 JSON: {e}")))?;
    if req.body.trim().is_empty() {
        return Err(AppError::bad_request("body 不能为空"));
    }

    let request_id = id::request_id();
    let messages = build_messages(&req);
    match complete_with_rotation(keys, provider, messages, max_attempts).await {
        Ok(completion) => {
            let text = clean_output(&completion.text);
            if text.is_empty() {
                tracing::warn!(request_id = %request_id, "Groq 返回的改写结果为空，退回原文");
                return Ok(EnhanceResponse::passthrough(req, REASON_UNAVAILABLE));
            }
            tracing::info!(request_id = %request_id, model = %completion.model, "邮件改写完成");
            Ok(EnhanceResponse {
                subject: req.subject,
                body: text,
                enhanced: true,
                reason: None,
                model: Some(completion.model),
            })
        }
        Err(EnhanceError::Exhausted) => {
            let stats = keys.get_key_stats().await;
            tracing::warn!(
                request_id = %request_id,
                used_today = stats.used_today,
                total_daily_capacity = stats.total_daily_capacity,
                "AI 配额已耗尽，跳过邮件改写"
            );
            if query.strict {
                return Err(AppError::quota_exhausted(EnhanceError::Exhausted.to_string()));
            }
            Ok(EnhanceResponse::passthrough(req, REASON_QUOTA_EXHAUSTED))
        }
        Err(e) => {
            tracing::warn!(request_id = %request_id, error = %e, "AI 改写失败，退回原文");
            if query.strict {
                return Err(AppError::backend(e.to_string()));
            }
            Ok(EnhanceResponse::passthrough(req, REASON_UNAVAILABLE))
        }
    }
}
