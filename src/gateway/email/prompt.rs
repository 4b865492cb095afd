use crate::gateway::email::types::EnhanceRequest;
use crate::groq::ChatMessage;

const SYSTEM_PROMPT: &str = "You are an expert recruiter who writes concise, warm and professional \
outreach emails. Rewrite the email you are given so it is clear, personal and persuasive while \
keeping every fact, name, link and call to action from the original. Do not invent details. \
Return only the rewritten email body, without a subject line, explanations or formatting fences.";

const DEFAULT_TONE: &str = "professional and friendly";

pub fn build_messages(req: &EnhanceRequest) -> Vec<ChatMessage> {
    let mut user = String::new();
    let tone = non_empty(req.tone.as_deref()).unwrap_or(DEFAULT_TONE);
    user.push_str(&format!("Tone: {tone}\n"));
    if let Some(name) = non_empty(req.recipient_name.as_deref()) {
        user.push_str(&format!("Recipient: {name}\n"));
    }
    if let Some(company) = non_empty(req.company.as_deref()) {
        user.push_str(&format!("Company: {company}\n"));
    }
    if let Some(role) = non_empty(req.role.as_deref()) {
        user.push_str(&format!("Role: {role}\n"));
    }
    if let Some(subject) = non_empty(Some(req.subject.as_str())) {
        user.push_str(&format!("Subject: {subject}\n"));
    }
    user.push_str("\nEmail body:\n");
    user.push_str(req.body.trim());

    vec![ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(user)]
}

/// 去掉模型偶尔附带的代码围栏与首尾引号。
pub fn clean_output(text: &str) -> String {
    let mut s = text.trim();
    if let Some(rest) = s.strip_prefix("```") {
        // 跳过围栏后的语言标记所在行
        s = rest.split_once('\n').map(|(_, body)| body).unwrap_or(rest);
        s = s.trim_end().strip_suffix("```").unwrap_or(s).trim();
    }
    if s.len() >= 2 && s.starts_with('"') && s.ends_with('"') {
        s = s[1..s.len() - 1].trim();
    }
    s.to_string()
}

fn non_empty(v: Option<&str>) -> Option<&str> {
    v.map(str::trim).filter(|v| !v.is_empty())
}
