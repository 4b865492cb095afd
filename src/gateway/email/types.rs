use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnhanceRequest {
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub tone: Option<String>,
    #[serde(default)]
    pub recipient_name: Option<String>,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EnhanceQuery {
    /// strict=true 时，AI 不可用直接返回错误，而不是退回原文。
    #[serde(default)]
    pub strict: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnhanceResponse {
    pub subject: String,
    pub body: String,
    pub enhanced: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl EnhanceResponse {
    /// AI 不可用时退回原文。
    pub fn passthrough(req: EnhanceRequest, reason: &'static str) -> Self {
        Self {
            subject: req.subject,
            body: req.body,
            enhanced: false,
            reason: Some(reason),
            model: None,
        }
    }
}
