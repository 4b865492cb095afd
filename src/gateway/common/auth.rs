use crate::error::AppError;
use crate::gateway::AppState;
use axum::{
    extract::{Request, State},
    http::{HeaderMap, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;

/// /api 路由鉴权：配置了 API_KEY 时要求 `Authorization: Bearer <key>` 或 `x-api-key`。
pub async fn api_key_middleware(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Response {
    let expected = state.cfg.api_key.trim();
    if expected.is_empty() || is_authorized(&headers, expected) {
        return next.run(request).await;
    }
    AppError::unauthorized("缺少或错误的 API Key").into_response()
}

fn is_authorized(headers: &HeaderMap, expected: &str) -> bool {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().strip_prefix("Bearer "))
        .map(str::trim);
    let x_api_key = headers
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .map(str::trim);

    let matches = |v: Option<&str>| {
        v.is_some_and(|v| constant_time_eq(v.as_bytes(), expected.as_bytes()))
    };
    matches(bearer) || matches(x_api_key)
}

/// 比较耗时与首个不同字节的位置无关。
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |diff, (x, y)| diff | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_bearer_or_x_api_key() {
        let mut h = HeaderMap::new();
        assert!(!is_authorized(&h, "s3cret"));

        h.insert(header::AUTHORIZATION, "Bearer s3cret".parse().unwrap());
        assert!(is_authorized(&h, "s3cret"));

        let mut h = HeaderMap::new();
        h.insert("x-api-key", "s3cret".parse().unwrap());
        assert!(is_authorized(&h, "s3cret"));

        let mut h = HeaderMap::new();
        h.insert(header::AUTHORIZATION, "Bearer wrong".parse().unwrap());
        assert!(!is_authorized(&h, "s3cret"));

        let mut h = HeaderMap::new();
        h.insert("x-api-key", "s3cre".parse().unwrap());
        assert!(!is_authorized(&h, "s3cret"));
    }

    #[test]
    fn constant_time_eq_compares_whole_input() {
        assert!(constant_time_eq(b"s3cret", b"s3cret"));
        assert!(!constant_time_eq(b"s3cret", b"s3creT"));
        assert!(!constant_time_eq(b"s3cret", b"s3cret!"));
        assert!(constant_time_eq(b"", b""));
    }
}
