use crate::groq::ApiError;
use crate::key_pool::FailureReason;

/// 失败后是否值得换下一个 key 重试。
///
/// 限流、额度耗尽、无响应、鉴权失败（key 失效）与 5xx 换 key 可能成功；
/// 400 之类的请求本身问题换 key 也没用。
pub fn should_retry_with_next_key(err: &ApiError) -> bool {
    match err.reason() {
        FailureReason::RateLimited | FailureReason::QuotaExceeded | FailureReason::NoResponse => {
            true
        }
        FailureReason::GenericError => match err.status() {
            Some(status) => matches!(status, 401 | 403) || status >= 500,
            None => matches!(err, ApiError::Transport(_)),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn http(status: u16, reason: FailureReason) -> ApiError {
        ApiError::Http {
            status,
            message: "x".to_string(),
            reason,
            retry_after: None,
        }
    }

    #[test]
    fn retries_on_key_specific_failures() {
        assert!(should_retry_with_next_key(&http(
            429,
            FailureReason::RateLimited
        )));
        assert!(should_retry_with_next_key(&http(
            429,
            FailureReason::QuotaExceeded
        )));
        assert!(should_retry_with_next_key(&http(
            401,
            FailureReason::GenericError
        )));
        assert!(should_retry_with_next_key(&http(
            503,
            FailureReason::GenericError
        )));
        assert!(should_retry_with_next_key(&ApiError::EmptyResponse));
    }

    #[test]
    fn does_not_retry_bad_requests() {
        assert!(!should_retry_with_next_key(&http(
            400,
            FailureReason::GenericError
        )));
        assert!(!should_retry_with_next_key(&http(
            404,
            FailureReason::GenericError
        )));
    }
}
