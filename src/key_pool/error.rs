use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KeyPoolError {
    /// 所有 key 都在冷却或已用完当日额度（整体耗尽，而非单个 key 故障）。
    #[error("AI 配额已耗尽：没有可用的 API key")]
    NoKeyAvailable,

    /// 上报了未配置的 key：属于调用方的编程错误，只记录日志。
    #[error("未知的 API key: {0}")]
    UnknownKey(String),
}
